//! Controller configuration
//!
//! Credentials and endpoints arrive through environment-style keys (the
//! standard `PG*` family plus a few controller-specific ones) and are
//! threaded explicitly into the resolver, prober, and membership client
//! constructors rather than read as ambient global state.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ReconcileError, ReconcileResult};

/// Connection settings for the coordinator's metadata store.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub pool_size: u32,
}

/// Full configuration for one reconciliation run.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub coordinator: CoordinatorConfig,
    /// Private-network domain suffix appended to logical worker names
    pub domain_suffix: String,
    /// Database service port expected on workers
    pub worker_port: u16,
    /// Upper index bound for the naming-scheme fan-out
    pub max_index: u32,
    /// Interval between probe attempts (both phases)
    pub probe_interval: Duration,
    /// Attempt ceiling per probe phase
    pub probe_attempts: u32,
    /// Per-attempt connection timeout for probes and lookups
    pub connect_timeout: Duration,
    /// Bounded worker-pool size for concurrent candidate processing
    pub max_concurrency: usize,
    /// Deadline on the whole discovery-and-registration phase
    pub run_deadline: Duration,
    /// Interval between coordinator availability polls
    pub coordinator_poll_interval: Duration,
    /// Optional bound on the coordinator wait; `None` waits forever
    pub coordinator_wait: Option<Duration>,
}

impl ControllerConfig {
    /// Load configuration from the process environment.
    ///
    /// `PGHOST`, `PGUSER`, and `PGPASSWORD` are required; everything else
    /// has a default. Missing credentials are fatal before any network
    /// activity.
    pub fn from_env() -> ReconcileResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key/value source.
    pub fn from_lookup<F>(lookup: F) -> ReconcileResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parsed_or(&lookup, "PGPORT", 5432u16)?;
        let coordinator = CoordinatorConfig {
            host: required(&lookup, "PGHOST")?,
            port,
            user: required(&lookup, "PGUSER")?,
            password: required(&lookup, "PGPASSWORD")?,
            database: lookup("PGDATABASE").unwrap_or_else(|| "postgres".to_string()),
            pool_size: parsed_or(&lookup, "COORDINATOR_POOL_SIZE", 5u32)?,
        };

        let config = Self {
            coordinator,
            domain_suffix: lookup("WORKER_DOMAIN_SUFFIX").unwrap_or_else(|| "internal".to_string()),
            worker_port: parsed_or(&lookup, "WORKER_PORT", port)?,
            max_index: parsed_or(&lookup, "MAX_WORKER_INDEX", 20u32)?,
            probe_interval: Duration::from_secs(parsed_or(&lookup, "PROBE_INTERVAL_SECS", 5u64)?),
            probe_attempts: parsed_or(&lookup, "PROBE_ATTEMPTS", 30u32)?,
            connect_timeout: Duration::from_secs(parsed_or(&lookup, "CONNECT_TIMEOUT_SECS", 5u64)?),
            max_concurrency: parsed_or(&lookup, "MAX_CONCURRENCY", 20usize)?,
            run_deadline: Duration::from_secs(parsed_or(&lookup, "RUN_DEADLINE_SECS", 600u64)?),
            coordinator_poll_interval: Duration::from_secs(5),
            coordinator_wait: match lookup("COORDINATOR_WAIT_SECS") {
                Some(raw) => Some(Duration::from_secs(parse_value("COORDINATOR_WAIT_SECS", &raw)?)),
                None => None,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would prevent any discovery attempt.
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.max_index == 0 {
            return Err(ReconcileError::Configuration(
                "MAX_WORKER_INDEX must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ReconcileError::Configuration(
                "MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.coordinator.password.is_empty() {
            return Err(ReconcileError::Configuration(
                "PGPASSWORD must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn required<F>(lookup: &F, key: &str) -> ReconcileResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ReconcileError::Configuration(format!("{} is not set", key)))
}

fn parsed_or<F, T>(lookup: &F, key: &str, default: T) -> ReconcileResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> ReconcileResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse()
        .map_err(|e| ReconcileError::Configuration(format!("invalid {}: {}", key, e)))
}
