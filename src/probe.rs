//! Two-phase worker readiness probing
//!
//! A candidate is only considered ready once both phases pass, in order:
//! TCP-level reachability first, then an authenticated database probe.
//! The service probe is never attempted before the network phase succeeds,
//! which avoids connection-refused churn while a node is still booting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::retry::{poll_until, RetryPolicy};
use crate::types::{NodeCandidate, ReadinessState};

/// Awaits a candidate's readiness, yielding its terminal probe state.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn await_ready(&self, candidate: &NodeCandidate) -> ReadinessState;
}

/// A single authenticated service-level probe attempt.
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn probe(&self, candidate: &NodeCandidate) -> bool;
}

/// Service probe that opens an authenticated database connection against
/// the candidate and runs a trivial query.
pub struct PgServiceProbe {
    user: String,
    password: String,
    database: String,
    connect_timeout: Duration,
}

impl PgServiceProbe {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            database: database.into(),
            connect_timeout,
        }
    }

    fn options_for(&self, candidate: &NodeCandidate) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&candidate.address)
            .port(candidate.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .disable_statement_logging()
    }
}

#[async_trait]
impl ServiceProbe for PgServiceProbe {
    async fn probe(&self, candidate: &NodeCandidate) -> bool {
        let options = self.options_for(candidate);
        let attempt = async {
            let mut conn = options.connect().await?;
            sqlx::query("SELECT 1").execute(&mut conn).await?;
            conn.close().await
        };
        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                trace!(candidate = %candidate, error = %e, "service probe refused");
                false
            }
            Err(_) => {
                trace!(candidate = %candidate, "service probe attempt timed out");
                false
            }
        }
    }
}

/// Strictly ordered two-phase prober: TCP reachability, then service
/// readiness, each bounded by its own retry policy.
pub struct TwoPhaseProber {
    tcp_policy: RetryPolicy,
    service_policy: RetryPolicy,
    connect_timeout: Duration,
    service: Arc<dyn ServiceProbe>,
}

impl TwoPhaseProber {
    pub fn new(
        tcp_policy: RetryPolicy,
        service_policy: RetryPolicy,
        connect_timeout: Duration,
        service: Arc<dyn ServiceProbe>,
    ) -> Self {
        Self {
            tcp_policy,
            service_policy,
            connect_timeout,
            service,
        }
    }

    async fn tcp_reachable(&self, candidate: &NodeCandidate) -> bool {
        let connect = TcpStream::connect((candidate.address.as_str(), candidate.port));
        matches!(
            tokio::time::timeout(self.connect_timeout, connect).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl ReadinessProbe for TwoPhaseProber {
    async fn await_ready(&self, candidate: &NodeCandidate) -> ReadinessState {
        let reachable =
            poll_until(self.tcp_policy, || self.tcp_reachable(candidate)).await;
        if !reachable {
            debug!(candidate = %candidate, "network reachability attempts exhausted");
            return ReadinessState::NetworkUnreachable;
        }
        debug!(candidate = %candidate, "network reachable, probing service");

        let ready =
            poll_until(self.service_policy, || self.service.probe(candidate)).await;
        if ready {
            ReadinessState::ServiceReady
        } else {
            debug!(candidate = %candidate, "service probe attempts exhausted");
            ReadinessState::TimedOut
        }
    }
}
