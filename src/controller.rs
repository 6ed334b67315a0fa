//! Reconciliation controller
//!
//! Orchestrates resolver, prober, and membership client into one
//! discovery-and-registration pass. Candidates are processed independently
//! on a bounded worker pool; one candidate's failure never blocks the
//! others, and per-candidate errors land in the report instead of aborting
//! the run. Re-running the controller is the retry mechanism, made
//! idempotent by the pre-registration existence check.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::membership::{CoordinatorClient, MembershipStore};
use crate::probe::{PgServiceProbe, ReadinessProbe, TwoPhaseProber};
use crate::resolver::{default_schemes, DnsResolver, WorkerResolver};
use crate::retry::{poll_forever, RetryPolicy};
use crate::types::{DiscoveryReport, FailureReason, NodeCandidate, ReadinessState};

/// Terminal classification of one candidate within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CandidateOutcome {
    Registered,
    SkippedExisting,
    Failed(FailureReason),
}

/// One-pass discovery-and-registration controller.
///
/// Holds no persistent state; every run re-derives its candidate set.
pub struct ReconcileController {
    config: ControllerConfig,
    store: Arc<dyn MembershipStore>,
    resolver: WorkerResolver,
    probe: Arc<dyn ReadinessProbe>,
}

impl ReconcileController {
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn MembershipStore>,
        resolver: WorkerResolver,
        probe: Arc<dyn ReadinessProbe>,
    ) -> Self {
        Self {
            config,
            store,
            resolver,
            probe,
        }
    }

    /// Wire up the production components for the given configuration.
    pub fn from_config(config: ControllerConfig) -> Self {
        let store: Arc<dyn MembershipStore> =
            Arc::new(CoordinatorClient::connect(&config.coordinator));
        let resolver = WorkerResolver::new(
            Arc::new(DnsResolver::new(config.connect_timeout)),
            default_schemes(),
            config.max_index,
            config.domain_suffix.clone(),
            config.worker_port,
        );
        let probe_policy = RetryPolicy::new(config.probe_interval, config.probe_attempts);
        let probe: Arc<dyn ReadinessProbe> = Arc::new(TwoPhaseProber::new(
            probe_policy,
            probe_policy,
            config.connect_timeout,
            Arc::new(PgServiceProbe::new(
                config.coordinator.user.clone(),
                config.coordinator.password.clone(),
                config.coordinator.database.clone(),
                config.connect_timeout,
            )),
        ));
        Self::new(config, store, resolver, probe)
    }

    /// Execute one discovery-and-registration pass.
    ///
    /// Returns `Err` only for an exhausted bounded coordinator wait; every
    /// per-candidate problem is reported, not raised.
    pub async fn run(&self) -> ReconcileResult<DiscoveryReport> {
        let started_at = Utc::now();

        self.wait_for_coordinator().await?;

        let discovered = self.resolver.discover().await;
        info!(count = discovered.len(), "worker candidate discovery finished");

        let mut report = DiscoveryReport::empty(started_at);
        report.discovered = discovered.clone();

        if discovered.is_empty() {
            warn!("no worker candidates resolved; continuing with an empty cluster");
        } else {
            let outcomes = self.process_candidates(&discovered).await;
            for (idx, candidate) in discovered.into_iter().enumerate() {
                match outcomes
                    .get(&idx)
                    .cloned()
                    .unwrap_or(CandidateOutcome::Failed(FailureReason::DeadlineExceeded))
                {
                    CandidateOutcome::Registered => report.registered.push(candidate),
                    CandidateOutcome::SkippedExisting => report.skipped_existing.push(candidate),
                    CandidateOutcome::Failed(reason) => report.failed.push((candidate, reason)),
                }
            }
        }

        // Authoritative post-run count; failure here degrades the report
        // rather than the run.
        match self.store.list_members().await {
            Ok(members) => {
                report.active_workers =
                    Some(members.iter().filter(|m| m.is_active_worker()).count());
            }
            Err(e) => warn!(error = %e, "post-run membership read failed"),
        }

        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Block until the coordinator's metadata store answers a ping.
    ///
    /// Unbounded by default: nothing else can proceed without the
    /// coordinator, and its cold start can be slow. A configured bound
    /// turns exhaustion into a run-level failure.
    async fn wait_for_coordinator(&self) -> ReconcileResult<()> {
        let interval = self.config.coordinator_poll_interval;
        let wait = poll_forever(interval, || async {
            match self.store.ping().await {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "coordinator not yet reachable");
                    false
                }
            }
        });

        match self.config.coordinator_wait {
            None => {
                wait.await;
                Ok(())
            }
            Some(bound) => timeout(bound, wait).await.map_err(|_| {
                ReconcileError::CoordinatorUnavailable(format!(
                    "no answer from {} within {}s",
                    self.config.coordinator.host,
                    bound.as_secs()
                ))
            }),
        }
    }

    /// Probe and register every candidate concurrently on a bounded pool,
    /// under the overall run deadline. Candidates still unresolved when the
    /// deadline passes are absent from the result and classified as failed
    /// by the caller.
    async fn process_candidates(
        &self,
        candidates: &[NodeCandidate],
    ) -> HashMap<usize, CandidateOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks: JoinSet<(usize, CandidateOutcome)> = JoinSet::new();
        let mut task_slots: HashMap<tokio::task::Id, usize> = HashMap::new();

        for (idx, candidate) in candidates.iter().cloned().enumerate() {
            let store = Arc::clone(&self.store);
            let probe = Arc::clone(&self.probe);
            let semaphore = Arc::clone(&semaphore);
            let handle = tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (idx, CandidateOutcome::Failed(FailureReason::DeadlineExceeded))
                    }
                };
                (idx, process_candidate(store, probe, &candidate).await)
            });
            task_slots.insert(handle.id(), idx);
        }

        let deadline = Instant::now() + self.config.run_deadline;
        let mut outcomes = HashMap::new();
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((idx, outcome)))) => {
                    outcomes.insert(idx, outcome);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "candidate task failed");
                    // Attribute the failure to its candidate so the report
                    // does not misname a panic as a deadline problem.
                    if !e.is_cancelled() {
                        if let Some(idx) = task_slots.get(&e.id()) {
                            outcomes.insert(
                                *idx,
                                CandidateOutcome::Failed(FailureReason::TaskFailed(e.to_string())),
                            );
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        unresolved = candidates.len() - outcomes.len(),
                        "run deadline reached, abandoning unresolved candidates"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }
        outcomes
    }
}

/// Process one candidate through the probe → existence check → register
/// pipeline. The candidate set is deduplicated by logical name, so at most
/// one `add_member` call is ever made per (node name, port) pair.
async fn process_candidate(
    store: Arc<dyn MembershipStore>,
    probe: Arc<dyn ReadinessProbe>,
    candidate: &NodeCandidate,
) -> CandidateOutcome {
    match probe.await_ready(candidate).await {
        ReadinessState::ServiceReady => {}
        ReadinessState::NetworkUnreachable => {
            return CandidateOutcome::Failed(FailureReason::NetworkUnreachable)
        }
        // The prober only yields terminal states; anything else is an
        // exhausted probe.
        ReadinessState::TimedOut | ReadinessState::Unknown | ReadinessState::NetworkReachable => {
            return CandidateOutcome::Failed(FailureReason::ProbeTimedOut)
        }
    }

    match store.is_registered(&candidate.address, candidate.port).await {
        Ok(true) => {
            debug!(candidate = %candidate, "already registered, skipping");
            CandidateOutcome::SkippedExisting
        }
        Ok(false) => match store.add_member(&candidate.address, candidate.port).await {
            Ok(()) => {
                info!(candidate = %candidate, "registered new worker");
                CandidateOutcome::Registered
            }
            Err(e) => CandidateOutcome::Failed(FailureReason::RegistrationRejected(e.reason)),
        },
        Err(e) => CandidateOutcome::Failed(FailureReason::MembershipCheckFailed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MembershipError, RegistrationError};
    use crate::types::MembershipRecord;
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::time::Duration;

    struct EmptyStore;

    #[async_trait]
    impl MembershipStore for EmptyStore {
        async fn ping(&self) -> Result<(), MembershipError> {
            Ok(())
        }
        async fn list_members(&self) -> Result<Vec<MembershipRecord>, MembershipError> {
            Ok(Vec::new())
        }
        async fn is_registered(&self, _: &str, _: u16) -> Result<bool, MembershipError> {
            Ok(false)
        }
        async fn add_member(&self, name: &str, port: u16) -> Result<(), RegistrationError> {
            Err(RegistrationError::new(name, port, "unexpected call"))
        }
    }

    struct NoResolver;

    #[async_trait]
    impl crate::resolver::NameResolver for NoResolver {
        async fn resolve(&self, _: &str, _: u16) -> Option<IpAddr> {
            None
        }
    }

    struct NeverReady;

    #[async_trait]
    impl ReadinessProbe for NeverReady {
        async fn await_ready(&self, _: &NodeCandidate) -> ReadinessState {
            ReadinessState::NetworkUnreachable
        }
    }

    fn test_config() -> ControllerConfig {
        ControllerConfig::from_lookup(|key| {
            match key {
                "PGHOST" => Some("coordinator.internal"),
                "PGUSER" => Some("postgres"),
                "PGPASSWORD" => Some("secret"),
                _ => None,
            }
            .map(str::to_string)
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_candidate_set_yields_empty_report() {
        let config = test_config();
        let resolver = WorkerResolver::new(
            Arc::new(NoResolver),
            default_schemes(),
            config.max_index,
            config.domain_suffix.clone(),
            config.worker_port,
        );
        let controller = ReconcileController::new(
            config,
            Arc::new(EmptyStore),
            resolver,
            Arc::new(NeverReady),
        );

        let report = controller.run().await.unwrap();
        assert!(report.discovered.is_empty());
        assert!(report.registered.is_empty());
        assert!(report.skipped_existing.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(report.active_workers, Some(0));
    }

    #[tokio::test]
    async fn test_bounded_coordinator_wait_exhaustion_fails_the_run() {
        struct DownStore;

        #[async_trait]
        impl MembershipStore for DownStore {
            async fn ping(&self) -> Result<(), MembershipError> {
                Err(MembershipError::MalformedRecord("down".to_string()))
            }
            async fn list_members(&self) -> Result<Vec<MembershipRecord>, MembershipError> {
                Ok(Vec::new())
            }
            async fn is_registered(&self, _: &str, _: u16) -> Result<bool, MembershipError> {
                Ok(false)
            }
            async fn add_member(&self, name: &str, port: u16) -> Result<(), RegistrationError> {
                Err(RegistrationError::new(name, port, "down"))
            }
        }

        let mut config = test_config();
        config.coordinator_poll_interval = Duration::from_millis(5);
        config.coordinator_wait = Some(Duration::from_millis(20));

        let resolver = WorkerResolver::new(
            Arc::new(NoResolver),
            default_schemes(),
            config.max_index,
            config.domain_suffix.clone(),
            config.worker_port,
        );
        let controller = ReconcileController::new(
            config,
            Arc::new(DownStore),
            resolver,
            Arc::new(NeverReady),
        );

        let err = controller.run().await.unwrap_err();
        assert!(matches!(err, ReconcileError::CoordinatorUnavailable(_)));
    }
}
