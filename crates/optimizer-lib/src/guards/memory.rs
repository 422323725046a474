use super::{worst_offender, Guard, GuardContext};
use crate::models::{Event, RestartReason};
use crate::remediation::{hard_event, HardAction, RemediationExecutor, Target};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Restarts the instance with the highest memory percentage at or above
/// `memoryThreshold`, without any grace period
pub struct MemoryGuard {
    executor: Arc<RemediationExecutor>,
}

impl MemoryGuard {
    pub fn new(executor: Arc<RemediationExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Guard for MemoryGuard {
    fn kind(&self) -> RestartReason {
        RestartReason::Memory
    }

    async fn evaluate(&self, ctx: &GuardContext<'_>) -> Vec<Event> {
        let Some(worst) = worst_offender(ctx.snapshots, ctx.cfg.memory_threshold, |s| s.mem_pct)
        else {
            return Vec::new();
        };

        info!(
            instance = %worst.instance,
            mem_pct = worst.mem_pct,
            threshold = ctx.cfg.memory_threshold,
            "Memory guard triggered"
        );

        let target = Target {
            instance: &worst.instance,
            container: &worst.container,
        };
        let outcome = self
            .executor
            .hard(target, HardAction::Restart, RestartReason::Memory, ctx.cfg)
            .await;

        vec![hard_event(
            &outcome,
            HardAction::Restart,
            RestartReason::Memory,
            &worst.instance,
            worst.mem_pct,
        )]
    }
}
