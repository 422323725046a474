use super::*;
use crate::clock::Clock;
use crate::collector::build_snapshot;
use crate::models::{ContainerStats, InstanceInfo};
use crate::remediation::{HardAction, Outcome, Target};
use crate::store::CooldownBucket;
use crate::testing::{stats, MockRuntime, TokioClock};
use std::sync::atomic::Ordering;
use tempfile::TempDir;

const T0: i64 = 1_700_000_000;

struct Fixture {
    _dir: TempDir,
    runtime: Arc<MockRuntime>,
    store: Arc<StateStore>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    executor: Arc<RemediationExecutor>,
    coordinator: ScheduledRestartCoordinator,
    fleet: FleetScheduler,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new(T0));
        let store = Arc::new(StateStore::new(dir.path()));
        let audit = Arc::new(AuditLog::new(store.instances_dir(), clock.clone()));
        let logger = StructuredLogger::new("test-host");
        let executor = Arc::new(RemediationExecutor::new(
            runtime.clone(),
            store.clone(),
            audit.clone(),
            clock.clone(),
            logger.clone(),
        ));
        let coordinator = ScheduledRestartCoordinator::new(
            executor.clone(),
            store.clone(),
            audit.clone(),
            clock.clone(),
            logger,
        );
        let fleet = FleetScheduler::new(executor.clone(), store.clone(), clock.clone());

        Self {
            _dir: dir,
            runtime,
            store,
            audit,
            clock,
            executor,
            coordinator,
            fleet,
        }
    }

    /// Instance up for two hours with a one hour restart interval
    async fn add_due(&self, name: &str) {
        let stats = ContainerStats {
            started_at: Some(T0 - 7200),
            ..stats(5.0, 20.0, 100)
        };
        self.runtime.add(name, None, stats);
        self.store.ensure_instance(name).await.unwrap();
        self.store
            .set_instance_key(name, "restart_interval_hours", json!(1))
            .await
            .unwrap();
    }

    fn snapshot(&self, name: &str) -> MetricsSnapshot {
        let instances = self.instances();
        let info = instances.iter().find(|i| i.name == name).unwrap();
        let stats = self.runtime.stats.lock().unwrap()[&info.container_name].clone();
        build_snapshot(info, &stats, self.clock.now())
    }

    fn instances(&self) -> Vec<InstanceInfo> {
        self.runtime.instances.lock().unwrap().clone()
    }

    /// Let live waiters run to completion
    async fn wait_idle(&self) {
        for _ in 0..600 {
            if self.coordinator.live_waiters() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        panic!("waiters did not finish");
    }

    async fn actions(&self, name: &str) -> Vec<String> {
        self.audit
            .read(name, 100)
            .await
            .iter()
            .map(|e| e["action"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    async fn action_ts(&self, name: &str, action: &str) -> i64 {
        self.audit
            .read(name, 100)
            .await
            .iter()
            .find(|e| e["action"] == action)
            .and_then(|e| e["ts"].as_i64())
            .unwrap()
    }
}

fn since<'a>(actions: &'a [String], action: &str) -> &'a [String] {
    let pos = actions.iter().position(|a| a == action).unwrap();
    &actions[pos + 1..]
}

#[tokio::test(start_paused = true)]
async fn test_queued_restart_executes_after_grace() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    let cfg = GlobalConfig::default();

    let events = f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await;
    assert_eq!(
        events,
        vec![Event::RestartQueued {
            instance: "vm1".to_string(),
            execute_at: T0 + 30,
        }]
    );
    assert_eq!(f.store.load_instance("vm1").await.state.pending_restart_ts, T0);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(f.runtime.restarted().is_empty());

    f.wait_idle().await;
    assert_eq!(f.runtime.restarted(), vec!["blobevm_vm1"]);

    let restart_ts = f.action_ts("vm1", "restart").await;
    assert!((T0 + 29..=T0 + 31).contains(&restart_ts), "restart at {}", restart_ts);

    let state = f.store.load_instance("vm1").await.state;
    assert_eq!(state.pending_restart_ts, 0);
    assert_eq!(state.last_auto_restart_ts, restart_ts);

    let actions = f.actions("vm1").await;
    assert!(actions.contains(&"scheduled_restart_executing".to_string()));
    assert_eq!(actions.last().unwrap(), "scheduled_restart_done");
}

#[tokio::test(start_paused = true)]
async fn test_pending_intent_is_not_queued_twice() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    let cfg = GlobalConfig::default();

    assert_eq!(f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await.len(), 1);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await.is_empty());

    f.wait_idle().await;
    assert_eq!(f.runtime.restarted().len(), 1);
    assert_eq!(f.store.load_instance("vm1").await.state.pending_restart_ts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_execute_skips_restart() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    let cfg = GlobalConfig::default();

    f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(f.coordinator.cancel("vm1").await.unwrap());
    f.wait_idle().await;

    assert!(f.runtime.restarted().is_empty());
    let actions = f.actions("vm1").await;
    assert_eq!(
        since(&actions, "scheduled_restart_queued"),
        ["scheduled_restart_cancelled".to_string()]
    );

    // The cancellation restarts the interval instead of re-queuing at once
    assert!(f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await.is_empty());
    assert!(!f.coordinator.cancel("vm1").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_postpone_moves_execution() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    let cfg = GlobalConfig::default();

    f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await;
    let execute_at = f.coordinator.postpone("vm1", 60).await.unwrap();
    assert_eq!(execute_at, Some(T0 + 90));

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert!(f.runtime.restarted().is_empty());

    f.wait_idle().await;
    assert!(f.action_ts("vm1", "restart").await >= T0 + 90);
    assert_eq!(f.coordinator.postpone("vm2", 10).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_postpone_by_huge_amount_saturates() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    let cfg = GlobalConfig::default();

    f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await;
    let execute_at = f.coordinator.postpone("vm1", i64::MAX).await.unwrap();
    assert_eq!(execute_at, Some(i64::MAX));
    assert_eq!(
        f.store.load_instance("vm1").await.state.pending_restart_ts,
        i64::MAX
    );

    // Pushed out of reach, not wrapped into the past
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(f.runtime.restarted().is_empty());
    assert!(f.coordinator.has_live_waiter("vm1"));

    assert!(f.coordinator.cancel("vm1").await.unwrap());
    f.wait_idle().await;
    assert!(f.runtime.restarted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_start_time_still_queues() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    f.runtime.set_stats(
        "vm1",
        ContainerStats {
            started_at: None,
            ..stats(5.0, 20.0, 100)
        },
    );

    let snapshot = f.snapshot("vm1");
    assert_eq!(snapshot.uptime_sec, 0);
    assert_eq!(snapshot.started_at, None);

    let events = f
        .coordinator
        .evaluate(&snapshot, &GlobalConfig::default())
        .await;
    assert_eq!(events.len(), 1);
    f.wait_idle().await;
    assert_eq!(f.runtime.restarted(), vec!["blobevm_vm1"]);
}

#[tokio::test(start_paused = true)]
async fn test_grace_is_reread_while_waiting() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    let cfg = GlobalConfig::default();

    f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await;
    f.store
        .set_instance_key("vm1", "restart_graceful_seconds", json!(5))
        .await
        .unwrap();

    f.wait_idle().await;
    assert!(f.action_ts("vm1", "restart").await <= T0 + 6);
}

#[tokio::test(start_paused = true)]
async fn test_persisted_intent_resumes_without_requeue() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    let cfg = GlobalConfig::default();

    let mut patch = Map::new();
    patch.insert("pending_restart_ts".to_string(), json!(T0 - 10));
    f.store.update_instance("vm1", patch).await.unwrap();

    let events = f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await;
    assert!(events.is_empty());
    assert!(f.coordinator.has_live_waiter("vm1"));

    f.wait_idle().await;
    assert!(f.action_ts("vm1", "restart").await <= T0 + 21);
    assert!(!f.actions("vm1").await.contains(&"scheduled_restart_queued".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_restart_supersedes_intent() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    let cfg = GlobalConfig::default();

    f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let target = Target {
        instance: "vm1",
        container: "blobevm_vm1",
    };
    let outcome = f
        .executor
        .hard(target, HardAction::Restart, RestartReason::Memory, &cfg)
        .await;
    assert_eq!(outcome, Outcome::Done);

    f.wait_idle().await;
    assert_eq!(f.runtime.restarted().len(), 1);

    let state = f.store.load_instance("vm1").await.state;
    assert_eq!(state.pending_restart_ts, 0);
    assert_eq!(state.last_auto_restart_ts, 0);
    assert_eq!(f.actions("vm1").await.last().unwrap(), "scheduled_restart_superseded");
}

#[tokio::test(start_paused = true)]
async fn test_failed_restart_clears_intent() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    f.runtime.fail_restart.store(true, Ordering::SeqCst);
    let cfg = GlobalConfig::default();

    f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await;
    f.wait_idle().await;

    let state = f.store.load_instance("vm1").await.state;
    assert_eq!(state.pending_restart_ts, 0);
    assert_eq!(state.last_auto_restart_ts, 0);

    let actions = f.actions("vm1").await;
    assert!(actions.contains(&"remediation_failed".to_string()));
    assert_eq!(actions.last().unwrap(), "scheduled_restart_error");
}

#[tokio::test(start_paused = true)]
async fn test_not_due_or_in_cooldown_does_not_queue() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    f.add_due("vm2").await;
    let cfg = GlobalConfig::default();

    f.runtime.set_stats(
        "vm1",
        ContainerStats {
            started_at: Some(T0 - 600),
            ..stats(5.0, 20.0, 100)
        },
    );
    assert!(f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await.is_empty());

    f.store
        .record_restart(CooldownBucket::Restarts, "blobevm_vm2", T0 - 60)
        .await
        .unwrap();
    assert!(f.coordinator.evaluate(&f.snapshot("vm2"), &cfg).await.is_empty());

    f.store
        .set_instance_key("vm2", "optimize_enabled", json!(false))
        .await
        .unwrap();
    assert!(f.coordinator.evaluate(&f.snapshot("vm2"), &cfg).await.is_empty());
    assert_eq!(f.coordinator.live_waiters(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_all_keeps_persisted_intent() {
    let f = Fixture::new();
    f.add_due("vm1").await;
    let cfg = GlobalConfig::default();

    f.coordinator.evaluate(&f.snapshot("vm1"), &cfg).await;
    f.coordinator.abort_all();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(f.runtime.restarted().is_empty());
    assert_eq!(f.store.load_instance("vm1").await.state.pending_restart_ts, T0);
}

#[tokio::test(start_paused = true)]
async fn test_fleet_restarts_spaced_and_records_run() {
    let f = Fixture::new();
    for name in ["vm3", "vm1", "vm2"] {
        f.runtime.add(name, None, stats(5.0, 20.0, 100));
    }
    let cfg = GlobalConfig::default();

    let events = f.fleet.run(&f.instances(), &cfg).await;
    let restarted: Vec<&str> = events
        .iter()
        .filter(|e| e.is_restart())
        .map(|e| e.instance())
        .collect();
    assert_eq!(restarted, vec!["vm1", "vm2", "vm3"]);

    let ts: Vec<i64> = futures::future::join_all(
        ["vm1", "vm2", "vm3"].map(|name| f.action_ts(name, "restart")),
    )
    .await;
    assert!(ts[1] - ts[0] >= 2 && ts[2] - ts[1] >= 2, "{:?}", ts);

    assert_eq!(f.store.last_global_restart().await, ts[2]);
    assert!(f.fleet.run(&f.instances(), &cfg).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fleet_respects_cap_and_cooldown() {
    let f = Fixture::new();
    for name in ["vm1", "vm2", "vm3", "vm4"] {
        f.runtime.add(name, None, stats(5.0, 20.0, 100));
    }
    f.store
        .record_restart(CooldownBucket::Restarts, "blobevm_vm2", T0 - 60)
        .await
        .unwrap();
    let cfg = GlobalConfig {
        max_restarts_per_run: 2,
        ..Default::default()
    };

    let events = f.fleet.run(&f.instances(), &cfg).await;
    assert_eq!(f.runtime.restarted(), vec!["blobevm_vm1", "blobevm_vm3"]);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::CooldownSkip { instance, reason: RestartReason::Fleet, .. } if instance == "vm2"
    )));
    assert!(events.iter().all(|e| e.instance() != "vm4"));
}

#[tokio::test(start_paused = true)]
async fn test_fleet_without_restarts_leaves_last_run_unset() {
    let f = Fixture::new();
    f.runtime.add("vm1", None, stats(5.0, 20.0, 100));
    f.store
        .record_restart(CooldownBucket::Restarts, "blobevm_vm1", T0 - 60)
        .await
        .unwrap();
    let cfg = GlobalConfig::default();

    let events = f.fleet.run(&f.instances(), &cfg).await;
    assert!(events.iter().all(|e| !e.is_restart()));
    assert_eq!(f.store.last_global_restart().await, 0);

    let disabled = GlobalConfig {
        scheduler_enabled: false,
        ..Default::default()
    };
    assert!(!f.fleet.is_due(&disabled).await);
}
