//! Optimizer facade
//!
//! Wires the collector, guard pipeline, escalation engine and schedulers
//! around one state directory, and drives them from a background tick.
//! Nothing raised inside a tick propagates out of [`Optimizer::run_once`].

use crate::clock::Clock;
use crate::collector::{collect_fleet, RuntimeCollector, SnapshotStore};
use crate::error::{OptimizerError, Result};
use crate::escalation::ThresholdEscalationEngine;
use crate::guards::{CpuGuard, GuardContext, GuardPipeline, HealthGuard, MemoryGuard, SwapGuard};
use crate::health::{components, HealthRegistry};
use crate::models::{Event, InstanceInfo, MetricsSnapshot, SystemStats};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::remediation::{Outcome, RemediationExecutor};
use crate::runtime::{HostProbe, HttpProbe, InstanceRuntime};
use crate::scheduler::{FleetScheduler, ScheduledRestartCoordinator};
use crate::store::{
    validate_instance_name, AuditLog, GlobalConfig, InstanceRecord, StateStore,
    INSTANCE_STATE_KEYS,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Process-level settings; optimizer policy lives in the state directory
#[derive(Debug, Clone)]
pub struct OptimizerOptions {
    pub state_dir: PathBuf,
    /// Background tick interval (default: 15 seconds)
    pub tick_interval: Duration,
    /// Per-instance metrics read timeout (default: 5 seconds)
    pub stats_timeout: Duration,
    /// Health probe timeout (default: 6 seconds)
    pub probe_timeout: Duration,
    /// Restart waiter poll interval (default: 1 second)
    pub waiter_poll_interval: Duration,
    /// Host name attached to structured log records
    pub host_name: String,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/opt/blobe-vm"),
            tick_interval: Duration::from_secs(15),
            stats_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(6),
            waiter_poll_interval: Duration::from_secs(1),
            host_name: "localhost".to_string(),
        }
    }
}

/// Snapshot of the optimizer for status queries
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerStatus {
    pub config: GlobalConfig,
    pub live_stats: BTreeMap<String, MetricsSnapshot>,
    pub system: Option<SystemStats>,
    pub last_global_restart_ts: i64,
}

struct BackgroundLoop {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Optimizer {
    runtime: Arc<dyn InstanceRuntime>,
    host: Arc<dyn HostProbe>,
    store: Arc<StateStore>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    collector: RuntimeCollector,
    snapshots: SnapshotStore,
    /// Instances seen by the last successful listing
    instances: RwLock<Vec<InstanceInfo>>,
    executor: Arc<RemediationExecutor>,
    pipeline: GuardPipeline,
    escalation: ThresholdEscalationEngine,
    scheduler: ScheduledRestartCoordinator,
    fleet: FleetScheduler,
    health: HealthRegistry,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
    tick_interval: Duration,
    /// Held for the duration of a tick
    tick_lock: Mutex<()>,
    background: Mutex<Option<BackgroundLoop>>,
}

impl Optimizer {
    pub fn new(
        runtime: Arc<dyn InstanceRuntime>,
        probe: Arc<dyn HttpProbe>,
        host: Arc<dyn HostProbe>,
        clock: Arc<dyn Clock>,
        options: OptimizerOptions,
    ) -> Self {
        let store = Arc::new(StateStore::new(options.state_dir));
        let audit = Arc::new(AuditLog::new(store.instances_dir(), clock.clone()));
        let logger = StructuredLogger::new(options.host_name);
        let executor = Arc::new(RemediationExecutor::new(
            runtime.clone(),
            store.clone(),
            audit.clone(),
            clock.clone(),
            logger.clone(),
        ));

        let pipeline = GuardPipeline::new(vec![
            Box::new(MemoryGuard::new(executor.clone())),
            Box::new(CpuGuard::new(executor.clone())),
            Box::new(SwapGuard::new(executor.clone(), host.clone())),
            Box::new(
                HealthGuard::new(
                    executor.clone(),
                    probe,
                    store.clone(),
                    audit.clone(),
                    clock.clone(),
                )
                .with_timeout(options.probe_timeout),
            ),
        ]);

        let escalation = ThresholdEscalationEngine::new(
            executor.clone(),
            store.clone(),
            audit.clone(),
            clock.clone(),
            logger.clone(),
        );
        let scheduler = ScheduledRestartCoordinator::new(
            executor.clone(),
            store.clone(),
            audit.clone(),
            clock.clone(),
            logger.clone(),
        )
        .with_poll_interval(options.waiter_poll_interval);
        let fleet = FleetScheduler::new(executor.clone(), store.clone(), clock.clone());

        Self {
            collector: RuntimeCollector::new(runtime.clone(), clock.clone())
                .with_timeout(options.stats_timeout),
            runtime,
            host,
            store,
            audit,
            clock,
            snapshots: SnapshotStore::new(),
            instances: RwLock::new(Vec::new()),
            executor,
            pipeline,
            escalation,
            scheduler,
            fleet,
            health: HealthRegistry::new(),
            metrics: OptimizerMetrics::new(),
            logger,
            tick_interval: options.tick_interval,
            tick_lock: Mutex::new(()),
            background: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn health_registry(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    // ---------------------------------------------------------------------
    // Tick
    // ---------------------------------------------------------------------

    /// Run one full tick and return what it did
    pub async fn run_once(&self) -> Vec<Event> {
        let _tick = self.tick_lock.lock().await;
        let start = Instant::now();

        let instances = match self.refresh_instances().await {
            Some(instances) => instances,
            None => {
                self.metrics.observe_tick_duration(start.elapsed().as_secs_f64());
                return Vec::new();
            }
        };

        let mut store_failures = 0usize;
        for instance in &instances {
            if let Err(e) = self.store.ensure_instance(&instance.name).await {
                store_failures += 1;
                warn!(instance = %instance.name, error = %e, "Failed to create instance record");
            }
        }
        if store_failures == 0 {
            self.health.set_healthy(components::STORE).await;
        } else {
            self.health
                .set_degraded(components::STORE, "instance records could not be written")
                .await;
        }

        let results = collect_fleet(&self.collector, &instances).await;
        if results.errors.is_empty() {
            self.health.set_healthy(components::COLLECTOR).await;
        } else {
            self.metrics.inc_collection_errors(results.errors.len() as u64);
            self.health
                .set_degraded(
                    components::COLLECTOR,
                    format!("{} instance(s) unreadable", results.errors.len()),
                )
                .await;
        }

        let system = match self.host.system_stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                debug!(error = %e, "Failed to read host memory stats");
                None
            }
        };

        self.snapshots.replace(results.snapshots);
        self.snapshots.set_system(system);
        self.metrics.set_instances_monitored(instances.len() as i64);

        let snapshots = self.snapshots.all();
        let cfg = self.store.load_global().await;
        let mut events = Vec::new();

        if cfg.enabled {
            if cfg.strict_memory_limit {
                events.extend(self.enforce_memory_limits(&instances, &cfg).await);
            }

            let ctx = GuardContext {
                cfg: &cfg,
                snapshots: &snapshots,
                instances: &instances,
                system,
            };
            events.extend(self.pipeline.run_once(&ctx).await);
            self.health.set_healthy(components::GUARDS).await;

            for snapshot in &snapshots {
                events.extend(self.escalation.evaluate(snapshot, &cfg).await);
            }
            for snapshot in &snapshots {
                events.extend(self.scheduler.evaluate(snapshot, &cfg).await);
            }
            events.extend(self.fleet.run(&instances, &cfg).await);
            self.health.set_healthy(components::SCHEDULER).await;
        } else {
            debug!("Optimizer disabled, skipping remediation");
        }

        let elapsed = start.elapsed();
        self.metrics.observe_tick_duration(elapsed.as_secs_f64());
        debug!(
            instances = instances.len(),
            events = events.len(),
            elapsed_ms = elapsed.as_millis(),
            "Tick complete"
        );

        events
    }

    async fn refresh_instances(&self) -> Option<Vec<InstanceInfo>> {
        match self.runtime.list_instances().await {
            Ok(instances) => {
                *self.instances.write().await = instances.clone();
                Some(instances)
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Failed to list instances");
                self.health
                    .set_unhealthy(components::COLLECTOR, "instance listing failed")
                    .await;
                None
            }
        }
    }

    async fn enforce_memory_limits(
        &self,
        instances: &[InstanceInfo],
        cfg: &GlobalConfig,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        for instance in instances {
            let outcome = self
                .executor
                .apply_memory_limit(
                    &instance.name,
                    &instance.container_name,
                    &cfg.memory_limit,
                    cfg.memory_swappiness,
                )
                .await;
            if outcome.is_done() {
                events.push(Event::MemoryLimitApplied {
                    instance: instance.name.clone(),
                    limit: cfg.memory_limit.clone(),
                });
            }
        }
        events
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub async fn status(&self) -> OptimizerStatus {
        let live_stats = self
            .snapshots
            .all()
            .into_iter()
            .map(|s| (s.instance.clone(), s))
            .collect();

        OptimizerStatus {
            config: self.store.load_global().await,
            live_stats,
            system: self.snapshots.system(),
            last_global_restart_ts: self.store.last_global_restart().await,
        }
    }

    /// Latest snapshot; `None` means no stats were collected for the instance
    pub fn instance_stats(&self, name: &str) -> Option<MetricsSnapshot> {
        self.snapshots.get(name)
    }

    pub async fn instance_state(&self, name: &str) -> Result<InstanceRecord> {
        validate_instance_name(name)?;
        Ok(self.store.load_instance(name).await)
    }

    pub async fn tail_logs(&self, name: &str) -> String {
        if validate_instance_name(name).is_err() {
            return String::new();
        }
        self.audit.tail(name).await
    }

    pub async fn read_logs(&self, name: &str, lines: usize) -> Vec<Value> {
        if validate_instance_name(name).is_err() {
            return Vec::new();
        }
        self.audit.read(name, lines).await
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// Set one global key; `guards` merges key-wise
    pub async fn set_config(&self, key: &str, value: Value) -> Result<GlobalConfig> {
        let cfg = self.store.set_global_key(key, value).await?;
        self.logger.log_config_change("global", key);
        Ok(cfg)
    }

    /// Set one per-instance override. Escalation and scheduling state is
    /// managed by the optimizer and rejected here.
    pub async fn set_instance_config(
        &self,
        name: &str,
        key: &str,
        value: Value,
    ) -> Result<InstanceRecord> {
        if INSTANCE_STATE_KEYS.contains(&key) {
            return Err(OptimizerError::InvalidConfig {
                key: key.to_string(),
                reason: "managed by the optimizer".to_string(),
            });
        }
        let record = self.store.set_instance_key(name, key, value).await?;
        self.logger.log_config_change(name, key);
        Ok(record)
    }

    // ---------------------------------------------------------------------
    // Manual operations
    // ---------------------------------------------------------------------

    /// Run the in-place cleanup for one instance, or every instance with
    /// `"all"`. Returns false when no such instance is known.
    pub async fn trigger_optimize(&self, name: &str) -> bool {
        let targets: Vec<InstanceInfo> = if name == "all" {
            self.known_instances().await
        } else {
            self.find_instance(name).await.into_iter().collect()
        };
        if targets.is_empty() {
            return false;
        }

        for instance in &targets {
            let outcome = self
                .executor
                .soft_cleanup(&instance.name, &instance.container_name)
                .await;
            if let Outcome::Failed(e) = &outcome {
                debug!(instance = %instance.name, error = %e, "Manual cleanup failed");
            }

            let mut patch = Map::new();
            patch.insert("last_optimize_ts".to_string(), json!(self.clock.now()));
            if let Err(e) = self.store.update_instance(&instance.name, patch).await {
                warn!(instance = %instance.name, error = %e, "Failed to record optimize time");
            }
        }
        true
    }

    /// Cancel a queued scheduled restart. Returns false when none was pending.
    pub async fn cancel_scheduled_restart(&self, name: &str) -> Result<bool> {
        validate_instance_name(name)?;
        let cancelled = self.scheduler.cancel(name).await?;
        if cancelled {
            info!(instance = %name, "Scheduled restart cancelled");
        }
        Ok(cancelled)
    }

    /// Push a queued restart back; returns the new execution time
    pub async fn postpone_scheduled_restart(&self, name: &str, secs: i64) -> Result<Option<i64>> {
        validate_instance_name(name)?;
        self.scheduler.postpone(name, secs).await
    }

    /// Run the fleet-wide restart pass now if it is due
    pub async fn run_fleet_schedule(&self) -> Vec<Event> {
        let cfg = self.store.load_global().await;
        if !cfg.enabled {
            return Vec::new();
        }
        let instances = self.known_instances().await;
        self.fleet.run(&instances, &cfg).await
    }

    /// Discard everything kept for a deleted instance
    pub async fn forget_instance(&self, name: &str) -> Result<()> {
        validate_instance_name(name)?;
        let container = match self.find_instance(name).await {
            Some(instance) => instance.container_name,
            None => self
                .snapshots
                .get(name)
                .map(|s| s.container)
                .unwrap_or_else(|| name.to_string()),
        };

        self.scheduler.abort(name);
        self.snapshots.remove(name);
        self.instances.write().await.retain(|i| i.name != name);
        self.store.remove_instance(name, &container).await?;
        info!(instance = %name, container = %container, "Forgot instance");
        Ok(())
    }

    async fn known_instances(&self) -> Vec<InstanceInfo> {
        let cached = self.instances.read().await.clone();
        if !cached.is_empty() {
            return cached;
        }
        self.refresh_instances().await.unwrap_or_default()
    }

    async fn find_instance(&self, name: &str) -> Option<InstanceInfo> {
        let cached = self
            .instances
            .read()
            .await
            .iter()
            .find(|i| i.name == name)
            .cloned();
        if cached.is_some() {
            return cached;
        }
        self.refresh_instances()
            .await
            .and_then(|all| all.into_iter().find(|i| i.name == name))
    }

    // ---------------------------------------------------------------------
    // Background loop
    // ---------------------------------------------------------------------

    /// Start the tick loop. Returns false when one is already running.
    pub async fn start_background_loop(self: &Arc<Self>) -> bool {
        let mut slot = self.background.lock().await;
        if slot.as_ref().is_some_and(|bg| !bg.handle.is_finished()) {
            return false;
        }

        self.health.register_all().await;
        let (shutdown, rx) = broadcast::channel(1);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop(rx).await });

        *slot = Some(BackgroundLoop { shutdown, handle });
        self.health.set_ready(true).await;
        true
    }

    async fn run_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.tick_interval.as_secs(),
            "Starting optimizer loop"
        );

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let events = self.run_once().await;
                    let restarts = events.iter().filter(|e| e.is_restart()).count();
                    if restarts > 0 {
                        info!(restarts, events = events.len(), "Tick remediated instances");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down optimizer loop");
                    break;
                }
            }
        }
    }

    /// Stop the loop and abort live waiters. Safe to call more than once.
    pub async fn stop(&self) {
        let background = self.background.lock().await.take();
        if let Some(bg) = background {
            let _ = bg.shutdown.send(());
            if let Err(e) = bg.handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Optimizer loop ended abnormally");
                }
            }
            self.logger.log_shutdown("stop requested");
        }

        self.scheduler.abort_all();
        self.health.set_ready(false).await;
    }
}
