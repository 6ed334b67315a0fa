//! Error types for the reconciliation controller
//!
//! Per-candidate failures never surface here; they are captured in the
//! `DiscoveryReport`. Only configuration problems and an exhausted
//! coordinator wait abort a run.

use thiserror::Error;

/// Result type for controller operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Run-level error type for the reconciliation controller
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Fatal configuration problem, reported before any network activity
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The coordinator never became reachable within the configured wait
    #[error("Coordinator unavailable: {0}")]
    CoordinatorUnavailable(String),

    /// Coordinator metadata operation failed
    #[error("Membership error: {0}")]
    Membership(#[from] MembershipError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the coordinator's metadata store
#[derive(Error, Debug)]
pub enum MembershipError {
    /// Metadata query failed
    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A metadata row could not be interpreted
    #[error("Malformed membership record: {0}")]
    MalformedRecord(String),
}

/// The coordinator refused to add a node.
///
/// Surfaced plainly by the membership client and recorded as a per-candidate
/// failure by the controller, with the coordinator's reason kept verbatim.
#[derive(Error, Debug)]
#[error("Coordinator rejected {node_name}:{port}: {reason}")]
pub struct RegistrationError {
    pub node_name: String,
    pub port: u16,
    pub reason: String,
}

impl RegistrationError {
    pub fn new(node_name: impl Into<String>, port: u16, reason: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            port,
            reason: reason.into(),
        }
    }
}
