use super::*;
use crate::clock::{Clock, ManualClock};
use crate::collector::build_snapshot;
use crate::models::{ContainerStats, HealthStage};
use crate::observability::StructuredLogger;
use crate::remediation::RemediationExecutor;
use crate::store::{AuditLog, CooldownBucket, StateStore};
use crate::testing::{stats, MockHost, MockProbe, MockRuntime};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    runtime: Arc<MockRuntime>,
    host: Arc<MockHost>,
    probe: Arc<MockProbe>,
    store: Arc<StateStore>,
    clock: ManualClock,
    pipeline: GuardPipeline,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let host = Arc::new(MockHost::new());
        let probe = Arc::new(MockProbe::new());
        let clock = ManualClock::new(1_000_000);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(StateStore::new(dir.path()));
        let audit = Arc::new(AuditLog::new(store.instances_dir(), shared_clock.clone()));
        let executor = Arc::new(RemediationExecutor::new(
            runtime.clone(),
            store.clone(),
            audit.clone(),
            shared_clock.clone(),
            StructuredLogger::new("test-host"),
        ));

        let pipeline = GuardPipeline::new(vec![
            Box::new(MemoryGuard::new(executor.clone())),
            Box::new(CpuGuard::new(executor.clone())),
            Box::new(SwapGuard::new(executor.clone(), host.clone())),
            Box::new(HealthGuard::new(
                executor,
                probe.clone(),
                store.clone(),
                audit,
                shared_clock,
            )),
        ]);

        Self {
            _dir: dir,
            runtime,
            host,
            probe,
            store,
            clock,
            pipeline,
        }
    }

    fn add(&self, name: &str, stats: ContainerStats) {
        let url = format!("http://{}.test/", name);
        self.runtime.add(name, Some(&url), stats);
    }

    /// Run the pipeline against the mock runtime's current figures
    async fn tick(&self, cfg: &GlobalConfig) -> Vec<Event> {
        let instances = self.runtime.instances.lock().unwrap().clone();
        let now = self.clock.now();
        let snapshots: Vec<_> = instances
            .iter()
            .map(|i| {
                let stats = self.runtime.stats.lock().unwrap()[&i.container_name].clone();
                build_snapshot(i, &stats, now)
            })
            .collect();
        let system = *self.host.stats.lock().unwrap();

        let ctx = GuardContext {
            cfg,
            snapshots: &snapshots,
            instances: &instances,
            system: Some(system),
        };
        self.pipeline.run_once(&ctx).await
    }
}

fn restarts(events: &[Event]) -> Vec<&Event> {
    events.iter().filter(|e| e.is_restart()).collect()
}

#[tokio::test]
async fn test_memory_guard_restarts_only_worst_offender() {
    let f = Fixture::new();
    f.add("a", stats(1.0, 65.0, 10));
    f.add("b", stats(1.0, 80.0, 10));
    f.add("c", stats(1.0, 20.0, 10));

    let events = f.tick(&GlobalConfig::default()).await;

    assert_eq!(f.runtime.restarted(), vec!["blobevm_b"]);
    assert_eq!(
        restarts(&events),
        vec![&Event::Restart {
            reason: RestartReason::Memory,
            instance: "b".to_string(),
            value: 80.0
        }]
    );
}

#[tokio::test]
async fn test_cooldown_skips_without_fallback() {
    let f = Fixture::new();
    f.add("a", stats(1.0, 65.0, 10));
    f.add("b", stats(1.0, 80.0, 10));
    f.store
        .record_restart(CooldownBucket::Restarts, "blobevm_b", 1_000_000 - 60)
        .await
        .unwrap();

    let events = f.tick(&GlobalConfig::default()).await;

    assert!(f.runtime.restarted().is_empty());
    assert!(events.contains(&Event::CooldownSkip {
        reason: RestartReason::Memory,
        instance: "b".to_string(),
        remaining_secs: 540
    }));
}

#[tokio::test]
async fn test_at_most_one_restart_per_guard() {
    let f = Fixture::new();
    // Each guard has a distinct worst offender
    f.add("mem", stats(10.0, 95.0, 100));
    f.add("mem2", stats(10.0, 90.0, 100));
    f.add("cpu", stats(300.0, 10.0, 100));
    f.add("cpu2", stats(250.0, 10.0, 100));
    f.add("heavy", stats(10.0, 10.0, 10_000));
    f.add("sick", stats(10.0, 10.0, 100));
    f.host.set_swap(50, 100);
    f.probe.respond("http://sick.test/", Some(502));
    f.store
        .set_health_stage("sick", HealthStage::Warned, 1)
        .await
        .unwrap();

    let events = f.tick(&GlobalConfig::default()).await;

    let restarted = f.runtime.restarted();
    assert_eq!(restarted.len(), 4);
    assert_eq!(
        restarted,
        vec!["blobevm_mem", "blobevm_cpu", "blobevm_heavy", "blobevm_sick"]
    );
    assert_eq!(restarts(&events).len(), 4);
}

#[tokio::test]
async fn test_disabled_guards_are_skipped() {
    let f = Fixture::new();
    f.add("a", stats(99.0, 99.0, 10));

    let mut cfg = GlobalConfig::default();
    cfg.guards.memory = false;
    cfg.guards.cpu = false;

    assert!(f.tick(&cfg).await.is_empty());
    assert!(f.runtime.restarted().is_empty());

    cfg.guards.cpu = true;
    let events = f.tick(&cfg).await;
    assert_eq!(events[0].reason(), Some(RestartReason::Cpu));
}

#[tokio::test]
async fn test_globally_disabled_does_nothing() {
    let f = Fixture::new();
    f.add("a", stats(99.0, 99.0, 10));
    let cfg = GlobalConfig {
        enabled: false,
        ..Default::default()
    };

    assert!(f.tick(&cfg).await.is_empty());
    assert!(f.runtime.restarted().is_empty());
}

#[tokio::test]
async fn test_swap_guard_targets_largest_footprint() {
    let f = Fixture::new();
    f.add("small", stats(1.0, 5.0, 1_000));
    f.add("large", stats(1.0, 5.0, 9_000));
    f.add("medium", stats(1.0, 5.0, 5_000));
    f.host.set_swap(15, 100);

    let events = f.tick(&GlobalConfig::default()).await;

    assert_eq!(f.host.drops.load(Ordering::SeqCst), 1);
    assert_eq!(f.runtime.restarted(), vec!["blobevm_large"]);
    assert_eq!(
        restarts(&events),
        vec![&Event::Restart {
            reason: RestartReason::Swap,
            instance: "large".to_string(),
            value: 15.0
        }]
    );
}

#[tokio::test]
async fn test_swap_guard_skips_unknown_footprints() {
    let f = Fixture::new();
    f.add("a", stats(1.0, 5.0, 0));
    f.add("b", stats(1.0, 5.0, 0));
    f.host.set_swap(15, 100);

    let events = f.tick(&GlobalConfig::default()).await;

    assert_eq!(f.host.drops.load(Ordering::SeqCst), 1);
    assert!(restarts(&events).is_empty());
    assert!(f.runtime.restarted().is_empty());
}

#[tokio::test]
async fn test_swap_below_threshold_is_quiet() {
    let f = Fixture::new();
    f.add("a", stats(1.0, 5.0, 1_000));
    f.host.set_swap(5, 100);

    assert!(f.tick(&GlobalConfig::default()).await.is_empty());
    assert_eq!(f.host.drops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_health_three_stage_escalation() {
    let f = Fixture::new();
    f.add("vm1", stats(1.0, 5.0, 10));
    f.probe.respond("http://vm1.test/", None);
    let cfg = GlobalConfig::default();

    // First failure: warn only
    let events = f.tick(&cfg).await;
    assert_eq!(
        events,
        vec![Event::HealthWarn {
            instance: "vm1".to_string()
        }]
    );
    assert_eq!(f.store.health_stage("vm1").await, HealthStage::Warned);
    assert!(f.runtime.restarted().is_empty());

    // Second failure: restart the container
    let events = f.tick(&cfg).await;
    assert_eq!(restarts(&events).len(), 1);
    assert_eq!(f.runtime.restarted(), vec!["blobevm_vm1"]);
    assert_eq!(f.store.health_stage("vm1").await, HealthStage::Restarted);

    // Third failure, after the cooldown: recreate
    f.clock.advance(601);
    let events = f.tick(&cfg).await;
    assert_eq!(
        restarts(&events),
        vec![&Event::Recreate {
            reason: RestartReason::Health,
            instance: "vm1".to_string()
        }]
    );
    assert_eq!(f.runtime.recreated(), vec!["vm1"]);

    // Recovery clears the markers
    f.probe.respond("http://vm1.test/", Some(301));
    let events = f.tick(&cfg).await;
    assert_eq!(
        events,
        vec![Event::HealthRecovered {
            instance: "vm1".to_string()
        }]
    );
    assert_eq!(f.store.health_stage("vm1").await, HealthStage::None);
}

#[tokio::test]
async fn test_health_restart_in_cooldown_keeps_marker() {
    let f = Fixture::new();
    f.add("vm1", stats(1.0, 5.0, 10));
    f.probe.respond("http://vm1.test/", Some(500));
    f.store
        .set_health_stage("vm1", HealthStage::Warned, 1)
        .await
        .unwrap();
    f.store
        .record_restart(CooldownBucket::Restarts, "blobevm_vm1", 1_000_000)
        .await
        .unwrap();

    let events = f.tick(&GlobalConfig::default()).await;
    assert!(matches!(events[0], Event::CooldownSkip { .. }));
    assert_eq!(f.store.health_stage("vm1").await, HealthStage::Warned);
}

#[tokio::test]
async fn test_health_highest_stage_wins_others_deferred() {
    let f = Fixture::new();
    for name in ["a", "b", "c"] {
        f.add(name, stats(1.0, 5.0, 10));
        f.probe.respond(&format!("http://{}.test/", name), Some(503));
    }
    f.store.set_health_stage("a", HealthStage::Warned, 1).await.unwrap();
    f.store
        .set_health_stage("b", HealthStage::Restarted, 1)
        .await
        .unwrap();
    f.store.set_health_stage("c", HealthStage::Warned, 1).await.unwrap();

    let events = f.tick(&GlobalConfig::default()).await;

    assert_eq!(f.runtime.recreated(), vec!["b"]);
    assert!(f.runtime.restarted().is_empty());
    assert!(events.contains(&Event::HealthDeferred {
        instance: "a".to_string()
    }));
    assert!(events.contains(&Event::HealthDeferred {
        instance: "c".to_string()
    }));
    // Deferred instances keep their stage
    assert_eq!(f.store.health_stage("a").await, HealthStage::Warned);
    assert_eq!(f.store.health_stage("c").await, HealthStage::Warned);
}

#[tokio::test]
async fn test_health_ties_broken_by_name() {
    let f = Fixture::new();
    for name in ["zeta", "alpha"] {
        f.add(name, stats(1.0, 5.0, 10));
        f.probe.respond(&format!("http://{}.test/", name), None);
        f.store
            .set_health_stage(name, HealthStage::Warned, 1)
            .await
            .unwrap();
    }

    f.tick(&GlobalConfig::default()).await;
    assert_eq!(f.runtime.restarted(), vec!["blobevm_alpha"]);
}

#[test]
fn test_worst_offender_threshold_is_inclusive() {
    let info = crate::models::InstanceInfo {
        name: "a".to_string(),
        container_name: "blobevm_a".to_string(),
        status: String::new(),
        url: None,
    };
    let snapshots = vec![build_snapshot(&info, &stats(70.0, 60.0, 1), 0)];

    assert!(worst_offender(&snapshots, 60.0, |s| s.mem_pct).is_some());
    assert!(worst_offender(&snapshots, 60.1, |s| s.mem_pct).is_none());
}
