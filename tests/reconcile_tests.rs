//! Reconciliation controller scenario tests
//!
//! Exercises full controller runs against mock resolver, prober, and
//! membership store implementations: idempotent re-runs, partial-failure
//! isolation, concurrent probing, deadline handling, and empty clusters.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use corral::{
    default_schemes, ControllerConfig, FailureReason, MembershipError, MembershipRecord,
    MembershipStore, NameResolver, NodeCandidate, NodeRole, ReadinessProbe, ReadinessState,
    ReconcileController, RegistrationError, WorkerResolver,
};

/// Resolver backed by a fixed set of known addresses.
struct FixedResolver {
    known: HashSet<String>,
}

impl FixedResolver {
    fn new(hosts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            known: hosts.iter().map(|h| h.to_string()).collect(),
        })
    }
}

#[async_trait]
impl NameResolver for FixedResolver {
    async fn resolve(&self, host: &str, _port: u16) -> Option<IpAddr> {
        self.known.contains(host).then(|| IpAddr::from([10, 0, 0, 1]))
    }
}

/// Probe with scripted per-address outcomes and optional per-address delay.
struct ScriptedProbe {
    outcomes: HashMap<String, ReadinessState>,
    delays: HashMap<String, Duration>,
}

impl ScriptedProbe {
    fn all_ready() -> Arc<Self> {
        Arc::new(Self {
            outcomes: HashMap::new(),
            delays: HashMap::new(),
        })
    }

    fn with_outcomes(outcomes: &[(&str, ReadinessState)]) -> Arc<Self> {
        Arc::new(Self {
            outcomes: outcomes
                .iter()
                .map(|(h, s)| (h.to_string(), *s))
                .collect(),
            delays: HashMap::new(),
        })
    }

    fn with_delays(delays: &[(&str, Duration)]) -> Arc<Self> {
        Arc::new(Self {
            outcomes: HashMap::new(),
            delays: delays.iter().map(|(h, d)| (h.to_string(), *d)).collect(),
        })
    }
}

#[async_trait]
impl ReadinessProbe for ScriptedProbe {
    async fn await_ready(&self, candidate: &NodeCandidate) -> ReadinessState {
        if let Some(delay) = self.delays.get(&candidate.address) {
            tokio::time::sleep(*delay).await;
        }
        self.outcomes
            .get(&candidate.address)
            .copied()
            .unwrap_or(ReadinessState::ServiceReady)
    }
}

/// In-memory membership store recording every mutation.
struct RecordingStore {
    members: Mutex<HashSet<(String, u16)>>,
    add_calls: Mutex<HashMap<(String, u16), u32>>,
    reject: HashSet<String>,
}

impl RecordingStore {
    fn empty() -> Arc<Self> {
        Self::with_members(&[])
    }

    fn with_members(members: &[(&str, u16)]) -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(
                members
                    .iter()
                    .map(|(n, p)| (n.to_string(), *p))
                    .collect(),
            ),
            add_calls: Mutex::new(HashMap::new()),
            reject: HashSet::new(),
        })
    }

    fn rejecting(reject: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(HashSet::new()),
            add_calls: Mutex::new(HashMap::new()),
            reject: reject.iter().map(|h| h.to_string()).collect(),
        })
    }

    async fn add_calls_for(&self, name: &str, port: u16) -> u32 {
        self.add_calls
            .lock()
            .await
            .get(&(name.to_string(), port))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl MembershipStore for RecordingStore {
    async fn ping(&self) -> Result<(), MembershipError> {
        Ok(())
    }

    async fn list_members(&self) -> Result<Vec<MembershipRecord>, MembershipError> {
        Ok(self
            .members
            .lock()
            .await
            .iter()
            .map(|(name, port)| MembershipRecord {
                node_name: name.clone(),
                port: *port,
                role: NodeRole::Worker,
                active: true,
            })
            .collect())
    }

    async fn is_registered(&self, node_name: &str, port: u16) -> Result<bool, MembershipError> {
        Ok(self
            .members
            .lock()
            .await
            .contains(&(node_name.to_string(), port)))
    }

    async fn add_member(&self, node_name: &str, port: u16) -> Result<(), RegistrationError> {
        *self
            .add_calls
            .lock()
            .await
            .entry((node_name.to_string(), port))
            .or_insert(0) += 1;
        if self.reject.contains(node_name) {
            return Err(RegistrationError::new(
                node_name,
                port,
                "node name is invalid",
            ));
        }
        self.members
            .lock()
            .await
            .insert((node_name.to_string(), port));
        Ok(())
    }
}

fn test_config() -> ControllerConfig {
    let mut config = ControllerConfig::from_lookup(|key| {
        match key {
            "PGHOST" => Some("coordinator.internal"),
            "PGUSER" => Some("postgres"),
            "PGPASSWORD" => Some("secret"),
            _ => None,
        }
        .map(str::to_string)
    })
    .unwrap();
    config.coordinator_poll_interval = Duration::from_millis(5);
    config.run_deadline = Duration::from_secs(5);
    config
}

fn controller(
    config: ControllerConfig,
    store: Arc<RecordingStore>,
    resolvable: &[&str],
    probe: Arc<dyn ReadinessProbe>,
) -> ReconcileController {
    let resolver = WorkerResolver::new(
        FixedResolver::new(resolvable),
        default_schemes(),
        config.max_index,
        config.domain_suffix.clone(),
        config.worker_port,
    );
    let store: Arc<dyn MembershipStore> = store;
    ReconcileController::new(config, store, resolver, probe)
}

#[tokio::test]
async fn test_fresh_cluster_registers_every_reachable_worker() {
    let store = RecordingStore::empty();
    let ctl = controller(
        test_config(),
        store.clone(),
        &["worker1.internal", "worker2.internal"],
        ScriptedProbe::all_ready(),
    );

    let report = ctl.run().await.unwrap();
    assert_eq!(report.discovered.len(), 2);
    assert_eq!(report.registered.len(), 2);
    assert!(report.skipped_existing.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(report.active_workers, Some(2));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let store = RecordingStore::empty();
    let hosts = ["worker1.internal", "worker2.internal"];

    let first = controller(test_config(), store.clone(), &hosts, ScriptedProbe::all_ready())
        .run()
        .await
        .unwrap();
    assert_eq!(first.registered.len(), 2);

    let second = controller(test_config(), store.clone(), &hosts, ScriptedProbe::all_ready())
        .run()
        .await
        .unwrap();
    assert!(second.registered.is_empty());
    assert_eq!(second.skipped_existing.len(), 2);
    assert!(second.failed.is_empty());

    // Exactly one add call per worker across both runs.
    assert_eq!(store.add_calls_for("worker1.internal", 5432).await, 1);
    assert_eq!(store.add_calls_for("worker2.internal", 5432).await, 1);
}

#[tokio::test]
async fn test_manually_registered_worker_is_skipped_without_add_call() {
    let store = RecordingStore::with_members(&[("worker1.internal", 5432)]);
    let ctl = controller(
        test_config(),
        store.clone(),
        &["worker1.internal", "worker2.internal"],
        ScriptedProbe::all_ready(),
    );

    let report = ctl.run().await.unwrap();
    assert_eq!(
        report.skipped_existing,
        vec![NodeCandidate::new("worker1", "worker1.internal", 5432)]
    );
    assert_eq!(report.registered.len(), 1);
    assert_eq!(store.add_calls_for("worker1.internal", 5432).await, 0);
    assert_eq!(store.add_calls_for("worker2.internal", 5432).await, 1);
}

#[tokio::test]
async fn test_one_candidate_timing_out_does_not_block_the_others() {
    let store = RecordingStore::empty();
    let probe = ScriptedProbe::with_outcomes(&[
        ("worker1.internal", ReadinessState::TimedOut),
        ("worker3.internal", ReadinessState::NetworkUnreachable),
    ]);
    let ctl = controller(
        test_config(),
        store.clone(),
        &["worker1.internal", "worker2.internal", "worker3.internal"],
        probe,
    );

    let report = ctl.run().await.unwrap();
    assert_eq!(report.registered.len(), 1);
    assert_eq!(report.registered[0].logical_name, "worker2");
    assert_eq!(report.failed.len(), 2);

    let reasons: HashMap<&str, &FailureReason> = report
        .failed
        .iter()
        .map(|(c, r)| (c.logical_name.as_str(), r))
        .collect();
    assert_eq!(reasons["worker1"], &FailureReason::ProbeTimedOut);
    assert_eq!(reasons["worker3"], &FailureReason::NetworkUnreachable);
}

#[tokio::test]
async fn test_registration_rejection_is_isolated_and_reason_preserved() {
    let store = RecordingStore::rejecting(&["worker1.internal"]);
    let ctl = controller(
        test_config(),
        store.clone(),
        &["worker1.internal", "worker2.internal"],
        ScriptedProbe::all_ready(),
    );

    let report = ctl.run().await.unwrap();
    assert_eq!(report.registered.len(), 1);
    assert_eq!(report.failed.len(), 1);
    let (candidate, reason) = &report.failed[0];
    assert_eq!(candidate.logical_name, "worker1");
    assert_eq!(
        reason,
        &FailureReason::RegistrationRejected("node name is invalid".to_string())
    );
}

#[tokio::test]
async fn test_slow_workers_are_probed_concurrently() {
    let store = RecordingStore::empty();
    let probe = ScriptedProbe::with_delays(&[
        ("worker1.internal", Duration::from_millis(300)),
        ("worker2.internal", Duration::from_millis(300)),
    ]);
    let ctl = controller(
        test_config(),
        store.clone(),
        &["worker1.internal", "worker2.internal"],
        probe,
    );

    let start = std::time::Instant::now();
    let report = ctl.run().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(report.registered.len(), 2);
    // Total run time tracks the slowest candidate, not the sum.
    assert!(
        elapsed < Duration::from_millis(550),
        "candidates were probed sequentially: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_run_deadline_marks_unresolved_candidates_failed() {
    let store = RecordingStore::empty();
    let probe = ScriptedProbe::with_delays(&[("worker2.internal", Duration::from_secs(60))]);
    let mut config = test_config();
    config.run_deadline = Duration::from_millis(200);

    let ctl = controller(
        config,
        store.clone(),
        &["worker1.internal", "worker2.internal"],
        probe,
    );

    let report = ctl.run().await.unwrap();
    assert_eq!(report.registered.len(), 1);
    assert_eq!(report.registered[0].logical_name, "worker1");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0.logical_name, "worker2");
    assert_eq!(report.failed[0].1, FailureReason::DeadlineExceeded);
}

#[tokio::test]
async fn test_panicking_candidate_task_is_reported_as_task_failure() {
    /// Panics for one address, ready for everything else.
    struct PanicOn(String);

    #[async_trait]
    impl ReadinessProbe for PanicOn {
        async fn await_ready(&self, candidate: &NodeCandidate) -> ReadinessState {
            if candidate.address == self.0 {
                panic!("probe state corrupted");
            }
            ReadinessState::ServiceReady
        }
    }

    let store = RecordingStore::empty();
    let ctl = controller(
        test_config(),
        store.clone(),
        &["worker1.internal", "worker2.internal"],
        Arc::new(PanicOn("worker1.internal".to_string())),
    );

    let report = ctl.run().await.unwrap();
    assert_eq!(report.registered.len(), 1);
    assert_eq!(report.registered[0].logical_name, "worker2");
    assert_eq!(report.failed.len(), 1);
    let (candidate, reason) = &report.failed[0];
    assert_eq!(candidate.logical_name, "worker1");
    assert!(
        matches!(*reason, FailureReason::TaskFailed(_)),
        "expected a task failure, got: {}",
        reason
    );
}

#[tokio::test]
async fn test_empty_cluster_is_a_successful_run() {
    let store = RecordingStore::empty();
    let ctl = controller(test_config(), store.clone(), &[], ScriptedProbe::all_ready());

    let report = ctl.run().await.unwrap();
    assert!(report.discovered.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(report.active_workers, Some(0));

    colored::control::set_override(false);
    assert!(report.render_summary().contains("warning:"));
}

#[tokio::test]
async fn test_discovery_order_is_stable_across_runs() {
    let hosts = [
        "worker1.internal",
        "worker2.internal",
        "citus-worker-1.internal",
    ];
    let store = RecordingStore::empty();

    let first = controller(test_config(), store.clone(), &hosts, ScriptedProbe::all_ready())
        .run()
        .await
        .unwrap();
    let second = controller(test_config(), store.clone(), &hosts, ScriptedProbe::all_ready())
        .run()
        .await
        .unwrap();

    assert_eq!(first.discovered, second.discovered);
    let names: Vec<&str> = first
        .discovered
        .iter()
        .map(|c| c.logical_name.as_str())
        .collect();
    assert_eq!(names, vec!["worker1", "worker2", "citus-worker-1"]);
}
