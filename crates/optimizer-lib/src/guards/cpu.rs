use super::{worst_offender, Guard, GuardContext};
use crate::models::{Event, RestartReason};
use crate::remediation::{hard_event, HardAction, RemediationExecutor, Target};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Same policy as the memory guard, on CPU percentage against `cpuThreshold`
pub struct CpuGuard {
    executor: Arc<RemediationExecutor>,
}

impl CpuGuard {
    pub fn new(executor: Arc<RemediationExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Guard for CpuGuard {
    fn kind(&self) -> RestartReason {
        RestartReason::Cpu
    }

    async fn evaluate(&self, ctx: &GuardContext<'_>) -> Vec<Event> {
        let Some(worst) = worst_offender(ctx.snapshots, ctx.cfg.cpu_threshold, |s| s.cpu_pct)
        else {
            return Vec::new();
        };

        info!(
            instance = %worst.instance,
            cpu_pct = worst.cpu_pct,
            threshold = ctx.cfg.cpu_threshold,
            "CPU guard triggered"
        );

        let outcome = self
            .executor
            .hard(
                Target {
                    instance: &worst.instance,
                    container: &worst.container,
                },
                HardAction::Restart,
                RestartReason::Cpu,
                ctx.cfg,
            )
            .await;

        vec![hard_event(
            &outcome,
            HardAction::Restart,
            RestartReason::Cpu,
            &worst.instance,
            worst.cpu_pct,
        )]
    }
}
