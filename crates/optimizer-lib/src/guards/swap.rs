use super::{Guard, GuardContext};
use crate::models::{Event, RestartReason};
use crate::remediation::{hard_event, HardAction, RemediationExecutor, Target};
use crate::runtime::HostProbe;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Host-level swap pressure guard.
///
/// When system swap usage reaches `swapThreshold`, drops the page cache and
/// restarts the instance with the largest resident memory footprint.
pub struct SwapGuard {
    executor: Arc<RemediationExecutor>,
    host: Arc<dyn HostProbe>,
}

impl SwapGuard {
    pub fn new(executor: Arc<RemediationExecutor>, host: Arc<dyn HostProbe>) -> Self {
        Self { executor, host }
    }
}

#[async_trait]
impl Guard for SwapGuard {
    fn kind(&self) -> RestartReason {
        RestartReason::Swap
    }

    async fn evaluate(&self, ctx: &GuardContext<'_>) -> Vec<Event> {
        let Some(system) = ctx.system else {
            return Vec::new();
        };
        let swap_pct = system.swap_pct();
        if swap_pct < ctx.cfg.swap_threshold {
            return Vec::new();
        }

        info!(swap_pct, threshold = ctx.cfg.swap_threshold, "Swap guard triggered");

        if let Err(e) = self.host.drop_caches().await {
            warn!(error = %e, "Failed to drop page cache");
        }

        // An unparsable footprint reads as 0 and never makes an instance the target
        let Some(heaviest) = ctx
            .snapshots
            .iter()
            .filter(|s| s.mem_bytes > 0)
            .max_by_key(|s| s.mem_bytes)
        else {
            warn!("Swap guard found no instance with a known memory footprint");
            return Vec::new();
        };

        let outcome = self
            .executor
            .hard(
                Target {
                    instance: &heaviest.instance,
                    container: &heaviest.container,
                },
                HardAction::Restart,
                RestartReason::Swap,
                ctx.cfg,
            )
            .await;

        vec![hard_event(
            &outcome,
            HardAction::Restart,
            RestartReason::Swap,
            &heaviest.instance,
            swap_pct,
        )]
    }
}
