use clap::Parser;
use std::time::Duration;

use crate::config::ControllerConfig;

/// corral - worker discovery and cluster-membership reconciliation
/// for distributed PostgreSQL (Citus) clusters
#[derive(Parser, Debug)]
#[command(name = "corral")]
#[command(version = "0.1.0")]
#[command(about = "Discover worker nodes on the private network and reconcile them into the coordinator's cluster metadata")]
#[command(long_about = "
corral discovers worker nodes on the private network by fanning out the
accepted naming schemes (worker{N}, worker-{N}, citus-worker{N},
citus-worker-{N}), waits for each one to become reachable and accept
authenticated connections, registers newly-found workers with the
coordinator's cluster metadata exactly once, and prints a membership
summary.

Coordinator credentials come from the standard PG* environment variables
(PGHOST, PGPORT, PGUSER, PGPASSWORD, PGDATABASE). Re-running is always
safe: already-registered workers are skipped.

Usage examples:
  corral                          # one reconciliation pass
  corral --json                   # machine-readable report on stdout
  corral --max-index 8            # only probe indices 1..=8
")]
pub struct Cli {
    /// Upper worker index to fan the naming schemes out to
    #[arg(long)]
    pub max_index: Option<u32>,

    /// Private-network domain suffix appended to worker names
    #[arg(long)]
    pub domain_suffix: Option<String>,

    /// Database service port expected on workers
    #[arg(long)]
    pub worker_port: Option<u16>,

    /// Bound the coordinator wait to this many seconds (default: wait forever)
    #[arg(long)]
    pub coordinator_wait_secs: Option<u64>,

    /// Deadline in seconds for the whole worker discovery-and-registration phase
    #[arg(long)]
    pub run_deadline_secs: Option<u64>,

    /// Emit the discovery report as JSON instead of the human summary
    #[arg(long)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// Overlay command-line flags onto the environment-derived configuration.
    pub fn apply(&self, config: &mut ControllerConfig) {
        if let Some(max_index) = self.max_index {
            config.max_index = max_index;
        }
        if let Some(suffix) = &self.domain_suffix {
            config.domain_suffix = suffix.clone();
        }
        if let Some(port) = self.worker_port {
            config.worker_port = port;
        }
        if let Some(secs) = self.coordinator_wait_secs {
            config.coordinator_wait = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = self.run_deadline_secs {
            config.run_deadline = Duration::from_secs(secs);
        }
    }
}
