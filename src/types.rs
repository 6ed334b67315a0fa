//! Core types for worker discovery and membership reconciliation
//!
//! This module defines the data structures that flow through a discovery
//! pass: candidates produced by the resolver, readiness states attached
//! during probing, membership records read from the coordinator, and the
//! final report handed back to the caller.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::*;
use serde::{Deserialize, Serialize};

/// A worker node candidate produced by the resolver.
///
/// Immutable once created; candidates are re-derived on every run and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeCandidate {
    /// Logical name under one of the accepted naming schemes, e.g. `worker3`
    pub logical_name: String,
    /// Fully-qualified network address (logical name + private domain suffix)
    pub address: String,
    /// Database service port
    pub port: u16,
}

impl NodeCandidate {
    pub fn new(logical_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            logical_name: logical_name.into(),
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for NodeCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Transient readiness state attached to a candidate during probing.
///
/// States only ever advance: `Unknown` → (`NetworkReachable` |
/// `NetworkUnreachable`) → (`ServiceReady` | `TimedOut`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessState {
    /// Not yet probed
    Unknown,
    /// TCP reachability attempts exhausted
    NetworkUnreachable,
    /// TCP-level reachability confirmed, service not yet probed
    NetworkReachable,
    /// Database service accepted an authenticated probe connection
    ServiceReady,
    /// Service-level probe attempts exhausted after the node was reachable
    TimedOut,
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Unknown => write!(f, "unknown"),
            ReadinessState::NetworkUnreachable => write!(f, "network unreachable"),
            ReadinessState::NetworkReachable => write!(f, "network reachable"),
            ReadinessState::ServiceReady => write!(f, "service ready"),
            ReadinessState::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Role of a node in the cluster metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Holds cluster metadata and routes queries
    Coordinator,
    /// Stores shards and executes routed queries
    Worker,
}

/// A membership record owned by the coordinator's metadata store.
///
/// The controller only reads and appends these; it never deletes records
/// or mutates roles. At most one record exists per (node_name, port) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub node_name: String,
    pub port: u16,
    pub role: NodeRole,
    pub active: bool,
}

impl MembershipRecord {
    /// Whether this record counts toward the active worker total.
    ///
    /// The criterion is role == Worker, not metadata group id; coordinators
    /// are excluded by role regardless of their group.
    pub fn is_active_worker(&self) -> bool {
        self.role == NodeRole::Worker && self.active
    }
}

/// Why a candidate ended up in the report's `failed` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// TCP reachability was never confirmed
    NetworkUnreachable,
    /// The service probe never succeeded within its attempt budget
    ProbeTimedOut,
    /// The run deadline expired before this candidate was processed
    DeadlineExceeded,
    /// The candidate's processing task failed outright, e.g. panicked
    TaskFailed(String),
    /// The coordinator rejected the registration; reason preserved verbatim
    RegistrationRejected(String),
    /// The membership existence check itself failed
    MembershipCheckFailed(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NetworkUnreachable => write!(f, "network unreachable"),
            FailureReason::ProbeTimedOut => write!(f, "service probe timed out"),
            FailureReason::DeadlineExceeded => write!(f, "run deadline exceeded"),
            FailureReason::TaskFailed(msg) => write!(f, "candidate task failed: {}", msg),
            FailureReason::RegistrationRejected(msg) => {
                write!(f, "registration rejected: {}", msg)
            }
            FailureReason::MembershipCheckFailed(msg) => {
                write!(f, "membership check failed: {}", msg)
            }
        }
    }
}

/// Outcome of one full discovery-and-registration pass.
///
/// Produced once per controller run, immutable, consumed by the caller for
/// logging and summary only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Every candidate the resolver produced, in discovery order
    pub discovered: Vec<NodeCandidate>,
    /// Candidates newly added to the cluster metadata this run
    pub registered: Vec<NodeCandidate>,
    /// Candidates already present in the metadata before this run
    pub skipped_existing: Vec<NodeCandidate>,
    /// Candidates that could not be registered, with reasons
    pub failed: Vec<(NodeCandidate, FailureReason)>,
    /// Authoritative active-worker count from the post-run metadata read,
    /// when that read succeeded
    pub active_workers: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DiscoveryReport {
    /// An empty report starting at the given run timestamp.
    pub fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            discovered: Vec::new(),
            registered: Vec::new(),
            skipped_existing: Vec::new(),
            failed: Vec::new(),
            active_workers: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Render the human-readable summary written to stdout.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} discovered, {} registered, {} already present, {} failed ({}s)\n",
            "Reconciliation complete:".bold(),
            self.discovered.len(),
            self.registered.len().to_string().green(),
            self.skipped_existing.len(),
            if self.failed.is_empty() {
                self.failed.len().to_string().normal()
            } else {
                self.failed.len().to_string().red()
            },
            self.elapsed().as_secs(),
        ));

        if self.discovered.is_empty() {
            out.push_str(&format!(
                "{} no worker candidates resolved; a fresh cluster may have zero extra workers\n",
                "warning:".yellow().bold()
            ));
        }

        for candidate in &self.registered {
            out.push_str(&format!("  {} {}\n", "registered".green(), candidate));
        }
        for candidate in &self.skipped_existing {
            out.push_str(&format!("  {} {}\n", "skipped".dimmed(), candidate));
        }
        for (candidate, reason) in &self.failed {
            out.push_str(&format!("  {} {}: {}\n", "failed".red(), candidate, reason));
        }

        if let Some(count) = self.active_workers {
            out.push_str(&format!("Active workers in cluster metadata: {}\n", count));
        }
        out
    }
}
