//! Time-based restart scheduling
//!
//! Per instance, a restart is queued once `restart_interval_hours` have
//! passed since the last restart (automatic or container start). Queuing
//! persists the intent and spawns a [`RestartWaiter`] that executes it after
//! the graceful period unless it is cancelled first. A fleet-wide variant
//! walks every instance on the global interval.

mod fleet;
mod waiter;

#[cfg(test)]
mod tests;

pub use fleet::FleetScheduler;
pub use waiter::{RestartWaiter, WaiterState};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::{Event, MetricsSnapshot, RestartReason};
use crate::observability::StructuredLogger;
use crate::remediation::RemediationExecutor;
use crate::store::{AuditLog, GlobalConfig, StateStore};
use dashmap::DashMap;
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct ScheduledRestartCoordinator {
    executor: Arc<RemediationExecutor>,
    store: Arc<StateStore>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
    /// Persisted-state poll interval for waiters (default: 1 second)
    poll_interval: Duration,
    /// Live waiters, tracked only so they can be aborted on stop
    waiters: DashMap<String, JoinHandle<WaiterState>>,
}

impl ScheduledRestartCoordinator {
    pub fn new(
        executor: Arc<RemediationExecutor>,
        store: Arc<StateStore>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            executor,
            store,
            audit,
            clock,
            logger,
            poll_interval: Duration::from_secs(1),
            waiters: DashMap::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Queue a restart for the instance if one is due, or resume a waiter
    /// for an intent persisted by a previous process
    pub async fn evaluate(&self, snapshot: &MetricsSnapshot, cfg: &GlobalConfig) -> Vec<Event> {
        let name = snapshot.instance.as_str();
        let record = self.store.load_instance(name).await;

        if record.state.pending_restart_ts != 0 {
            if !self.has_live_waiter(name) {
                info!(instance = %name, "Resuming waiter for persisted restart intent");
                self.spawn_waiter(name, &snapshot.container, record.state.pending_restart_ts);
            }
            return Vec::new();
        }

        if !record.config.optimize_enabled {
            return Vec::new();
        }
        let interval = record.config.restart_interval_secs();
        if interval <= 0 {
            return Vec::new();
        }

        let remaining = self
            .executor
            .cooldown_remaining(&snapshot.container, RestartReason::Scheduled, cfg)
            .await;
        if remaining > 0 {
            debug!(instance = %name, remaining, "Scheduled restart waits for cooldown");
            return Vec::new();
        }

        let now = self.clock.now();
        let last_restart = record
            .state
            .last_auto_restart_ts
            .max(record.state.last_restart_cancel_ts)
            .max(snapshot.started_at.unwrap_or(0));
        if now.saturating_sub(last_restart) < interval {
            return Vec::new();
        }

        let mut patch = Map::new();
        patch.insert("pending_restart_ts".to_string(), json!(now));
        if let Err(e) = self.store.update_instance(name, patch).await {
            tracing::warn!(instance = %name, error = %e, "Failed to persist restart intent");
            return Vec::new();
        }

        let grace = record.config.restart_graceful_seconds;
        let execute_at = now.saturating_add(grace);
        self.audit
            .append(
                name,
                "scheduled_restart_queued",
                json!({ "since_last": now.saturating_sub(last_restart), "grace": grace }),
            )
            .await;
        self.logger.log_schedule(name, "queued", execute_at);
        self.spawn_waiter(name, &snapshot.container, now);

        vec![Event::RestartQueued {
            instance: name.to_string(),
            execute_at,
        }]
    }

    /// Cancel a queued restart. Returns false when nothing was pending.
    pub async fn cancel(&self, name: &str) -> Result<bool> {
        let record = self.store.load_instance(name).await;
        if record.state.pending_restart_ts == 0 {
            return Ok(false);
        }

        let mut patch = Map::new();
        patch.insert("pending_restart_ts".to_string(), json!(0));
        self.store.update_instance(name, patch).await?;
        Ok(true)
    }

    /// Push a queued restart back by `secs`. Returns the new execution time,
    /// or `None` when nothing was pending.
    pub async fn postpone(&self, name: &str, secs: i64) -> Result<Option<i64>> {
        let record = self.store.load_instance(name).await;
        let pending = record.state.pending_restart_ts;
        if pending == 0 {
            return Ok(None);
        }

        let moved = pending.saturating_add(secs.max(0));
        let mut patch = Map::new();
        patch.insert("pending_restart_ts".to_string(), json!(moved));
        self.store.update_instance(name, patch).await?;

        self.audit
            .append(name, "scheduled_restart_postponed", json!({ "by": secs }))
            .await;
        Ok(Some(moved.saturating_add(record.config.restart_graceful_seconds)))
    }

    pub fn has_live_waiter(&self, name: &str) -> bool {
        self.waiters
            .get(name)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Number of waiters still running
    pub fn live_waiters(&self) -> usize {
        self.waiters.retain(|_, handle| !handle.is_finished());
        self.waiters.len()
    }

    /// Abort the waiter for one instance, if any
    pub fn abort(&self, name: &str) {
        if let Some((_, handle)) = self.waiters.remove(name) {
            handle.abort();
        }
    }

    /// Abort every live waiter; persisted intents survive for the next start
    pub fn abort_all(&self) {
        for entry in self.waiters.iter() {
            entry.value().abort();
        }
        self.waiters.clear();
    }

    fn spawn_waiter(&self, name: &str, container: &str, queued_at: i64) {
        let waiter = RestartWaiter {
            instance: name.to_string(),
            container: container.to_string(),
            executor: self.executor.clone(),
            store: self.store.clone(),
            audit: self.audit.clone(),
            clock: self.clock.clone(),
            logger: self.logger.clone(),
            poll_interval: self.poll_interval,
            queued_at,
        };

        let handle = tokio::spawn(waiter.run());
        if let Some(previous) = self.waiters.insert(name.to_string(), handle) {
            previous.abort();
        }
    }
}
