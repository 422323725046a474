//! Fleet-wide scheduled restarts

use crate::clock::Clock;
use crate::models::{Event, InstanceInfo, RestartReason};
use crate::remediation::{hard_event, HardAction, Outcome, RemediationExecutor, Target};
use crate::store::{GlobalConfig, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Restarts every managed instance on the global interval, spaced out and
/// capped per run, skipping containers still in cooldown
pub struct FleetScheduler {
    executor: Arc<RemediationExecutor>,
    store: Arc<StateStore>,
    clock: Arc<dyn Clock>,
}

impl FleetScheduler {
    pub fn new(
        executor: Arc<RemediationExecutor>,
        store: Arc<StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            store,
            clock,
        }
    }

    /// True when the global interval has elapsed since the last fleet run
    pub async fn is_due(&self, cfg: &GlobalConfig) -> bool {
        if !cfg.scheduler_enabled {
            return false;
        }
        let interval = cfg.restart_interval_secs();
        if interval <= 0 {
            return false;
        }
        let last = self.store.last_global_restart().await;
        self.clock.now().saturating_sub(last) >= interval
    }

    /// Run one fleet pass if due. `lastGlobalRestartTs` is written only when
    /// at least one instance was restarted.
    pub async fn run(&self, instances: &[InstanceInfo], cfg: &GlobalConfig) -> Vec<Event> {
        if !self.is_due(cfg).await {
            return Vec::new();
        }

        let mut ordered: Vec<&InstanceInfo> = instances.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        let spacing = Duration::from_secs(cfg.fleet_restart_spacing_seconds);
        let mut events = Vec::new();
        let mut restarted = 0u64;

        for instance in ordered {
            if restarted >= cfg.max_restarts_per_run {
                debug!(cap = cfg.max_restarts_per_run, "Fleet restart cap reached");
                break;
            }
            if restarted > 0 && !spacing.is_zero() {
                tokio::time::sleep(spacing).await;
            }

            let outcome = self
                .executor
                .hard(
                    Target {
                        instance: &instance.name,
                        container: &instance.container_name,
                    },
                    HardAction::Restart,
                    RestartReason::Fleet,
                    cfg,
                )
                .await;

            match &outcome {
                Outcome::Done => restarted += 1,
                Outcome::SkippedCooldown { remaining_secs } => {
                    info!(instance = %instance.name, remaining_secs, "skip restart (cooldown)");
                }
                Outcome::Failed(_) => {}
            }
            events.push(hard_event(
                &outcome,
                HardAction::Restart,
                RestartReason::Fleet,
                &instance.name,
                0.0,
            ));
        }

        if restarted > 0 {
            let now = self.clock.now();
            if let Err(e) = self.store.set_last_global_restart(now).await {
                warn!(error = %e, "Failed to persist last fleet restart time");
            }
            info!(restarted, "Fleet restart pass finished");
        }

        events
    }
}
