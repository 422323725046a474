//! Remediation primitives
//!
//! Soft cleanup runs a fixed command sequence inside the container; hard
//! remediation restarts or recreates it through the runtime. Every primitive
//! returns an [`Outcome`] instead of an error: failures are reported through
//! one sink (tracing plus the instance's audit log) and never unwind past
//! the caller.

use crate::clock::Clock;
use crate::error::OptimizerError;
use crate::models::{Event, RestartReason};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::runtime::InstanceRuntime;
use crate::store::{AuditLog, CooldownBucket, GlobalConfig, StateStore};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// In-place cleanup sequence, run as root; each step has its own timeout
pub const CLEANUP_COMMANDS: &[&str] = &[
    "rm -rf /tmp/* /var/tmp/*",
    "sync",
    "apt-get -y autoclean",
    "rm -rf /var/cache/apt/archives/*",
];

const CLEANUP_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one remediation primitive
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    SkippedCooldown { remaining_secs: i64 },
    Failed(OptimizerError),
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardAction {
    Restart,
    Recreate,
}

impl HardAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HardAction::Restart => "restart",
            HardAction::Recreate => "recreate",
        }
    }
}

/// Target of a hard remediation
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub instance: &'a str,
    pub container: &'a str,
}

/// Removes a container from the in-flight set when the restart finishes
struct InFlight<'a> {
    set: &'a DashMap<String, ()>,
    container: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.container);
    }
}

pub struct RemediationExecutor {
    runtime: Arc<dyn InstanceRuntime>,
    store: Arc<StateStore>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
    /// Containers with a restart currently running
    in_flight: DashMap<String, ()>,
}

impl RemediationExecutor {
    pub fn new(
        runtime: Arc<dyn InstanceRuntime>,
        store: Arc<StateStore>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            runtime,
            store,
            audit,
            clock,
            metrics: OptimizerMetrics::new(),
            logger,
            in_flight: DashMap::new(),
        }
    }

    /// Cooldown ledger used for a restart with the given reason
    pub fn bucket_for(reason: RestartReason, cfg: &GlobalConfig) -> CooldownBucket {
        if cfg.shared_restart_cooldown || reason.is_scheduled() {
            CooldownBucket::Restarts
        } else {
            CooldownBucket::Remediation
        }
    }

    /// Seconds until `container` may be restarted again for `reason`
    pub async fn cooldown_remaining(
        &self,
        container: &str,
        reason: RestartReason,
        cfg: &GlobalConfig,
    ) -> i64 {
        let bucket = Self::bucket_for(reason, cfg);
        let last = self.store.last_restart(bucket, container).await;
        if last == 0 {
            return 0;
        }
        last.saturating_add(cfg.cooldown_secs())
            .saturating_sub(self.clock.now())
            .max(0)
    }

    /// Run the cleanup sequence. A failing step does not stop the rest; the
    /// outcome is `Failed` only when every step failed.
    pub async fn soft_cleanup(&self, instance: &str, container: &str) -> Outcome {
        let mut failed_steps = 0usize;
        self.audit
            .append(instance, "soft_optimize_start", json!({ "container": container }))
            .await;

        for command in CLEANUP_COMMANDS {
            if let Err(e) = self
                .runtime
                .exec(container, command, CLEANUP_STEP_TIMEOUT)
                .await
            {
                failed_steps += 1;
                debug!(instance = %instance, command = %command, error = %e, "Cleanup step failed");
            }
        }

        self.metrics.inc_soft_optimizations();
        self.logger.log_soft_optimize(instance, failed_steps);
        self.audit
            .append(
                instance,
                "soft_optimize_done",
                json!({ "failed_steps": failed_steps }),
            )
            .await;

        if failed_steps == CLEANUP_COMMANDS.len() {
            let err = OptimizerError::remediation_failed(instance, "every cleanup step failed");
            self.report_failure(instance, "soft_optimize", &err).await;
            Outcome::Failed(err)
        } else {
            Outcome::Done
        }
    }

    /// Restart or recreate `target`, gated by its cooldown and the in-flight set
    pub async fn hard(
        &self,
        target: Target<'_>,
        action: HardAction,
        reason: RestartReason,
        cfg: &GlobalConfig,
    ) -> Outcome {
        let remaining_secs = self.cooldown_remaining(target.container, reason, cfg).await;
        if remaining_secs > 0 {
            self.metrics.inc_cooldown_skips();
            self.logger
                .log_cooldown_skip(target.instance, reason.as_str(), remaining_secs);
            self.audit
                .append(
                    target.instance,
                    "cooldown_skip",
                    json!({ "reason": reason, "remaining_secs": remaining_secs }),
                )
                .await;
            return Outcome::SkippedCooldown { remaining_secs };
        }

        let _in_flight = match self.claim(target.container) {
            Some(guard) => guard,
            None => {
                let err = OptimizerError::ConcurrentRestartRace {
                    container: target.container.to_string(),
                };
                info!(instance = %target.instance, reason = %reason, "{}", err);
                return Outcome::Failed(err);
            }
        };

        let result = match action {
            HardAction::Restart => self.runtime.restart(target.container).await,
            HardAction::Recreate => self.runtime.recreate(target.instance).await,
        };

        if let Err(e) = result {
            let err = OptimizerError::remediation_failed(target.instance, format!("{:#}", e));
            self.report_failure(target.instance, reason.as_str(), &err).await;
            return Outcome::Failed(err);
        }

        let now = self.clock.now();
        let bucket = Self::bucket_for(reason, cfg);
        if let Err(e) = self.store.record_restart(bucket, target.container, now).await {
            warn!(container = %target.container, error = %e, "Failed to record restart time");
        }

        self.metrics.inc_restarts(reason.as_str());
        self.logger.log_remediation(
            target.instance,
            target.container,
            action.as_str(),
            reason.as_str(),
        );
        self.audit
            .append(
                target.instance,
                action.as_str(),
                json!({ "reason": reason, "container": target.container }),
            )
            .await;

        Outcome::Done
    }

    /// Apply the strict memory ceiling to one container
    pub async fn apply_memory_limit(
        &self,
        instance: &str,
        container: &str,
        limit: &str,
        swappiness: u64,
    ) -> Outcome {
        match self.runtime.update_memory(container, limit, swappiness).await {
            Ok(()) => {
                debug!(instance = %instance, limit = %limit, swappiness, "Memory limit enforced");
                Outcome::Done
            }
            Err(e) => {
                let err = OptimizerError::remediation_failed(instance, format!("{:#}", e));
                self.report_failure(instance, "memory_limit", &err).await;
                Outcome::Failed(err)
            }
        }
    }

    fn claim(&self, container: &str) -> Option<InFlight<'_>> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(container.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlight {
                    set: &self.in_flight,
                    container: container.to_string(),
                })
            }
        }
    }

    /// The single error sink for remediation failures
    async fn report_failure(&self, instance: &str, reason: &str, err: &OptimizerError) {
        self.logger
            .log_remediation_failed(instance, reason, &err.to_string());
        self.audit
            .append(
                instance,
                "remediation_failed",
                json!({ "reason": reason, "kind": err.kind(), "error": err.to_string() }),
            )
            .await;
    }
}

/// Translate a hard-remediation outcome into the tick's event
pub fn hard_event(
    outcome: &Outcome,
    action: HardAction,
    reason: RestartReason,
    instance: &str,
    value: f64,
) -> Event {
    let instance = instance.to_string();
    match outcome {
        Outcome::Done => match action {
            HardAction::Restart => Event::Restart {
                reason,
                instance,
                value,
            },
            HardAction::Recreate => Event::Recreate { reason, instance },
        },
        Outcome::SkippedCooldown { remaining_secs } => Event::CooldownSkip {
            reason,
            instance,
            remaining_secs: *remaining_secs,
        },
        Outcome::Failed(e) => Event::RemediationFailed {
            reason,
            instance,
            error: e.to_string(),
        },
    }
}
