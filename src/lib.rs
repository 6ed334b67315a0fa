//! # corral: worker discovery and cluster-membership reconciliation
//!
//! corral takes a coordinator endpoint and an unknown, possibly-changing
//! set of worker nodes, discovers which workers exist on the private
//! network, waits for them to become reachable, registers them exactly
//! once with the coordinator's cluster metadata, and reports a consistent
//! membership summary.
//!
//! Data flows one direction: candidate names → resolved addresses →
//! readiness-confirmed addresses → registered members → report.

#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod error;
pub mod membership;
pub mod probe;
pub mod resolver;
pub mod retry;
pub mod types;

/// Command-line interface and argument parsing
pub mod cli;

// Re-export main types
pub use config::{ControllerConfig, CoordinatorConfig};
pub use controller::ReconcileController;
pub use error::{MembershipError, ReconcileError, ReconcileResult, RegistrationError};
pub use membership::{CoordinatorClient, MembershipStore};
pub use probe::{PgServiceProbe, ReadinessProbe, ServiceProbe, TwoPhaseProber};
pub use resolver::{default_schemes, DnsResolver, NameResolver, NamingScheme, WorkerResolver};
pub use retry::RetryPolicy;
pub use types::{
    DiscoveryReport, FailureReason, MembershipRecord, NodeCandidate, NodeRole, ReadinessState,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
