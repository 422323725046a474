//! Guard pipeline
//!
//! Four independent guards run once per tick in fixed priority order:
//! memory, cpu, swap, health. Each guard restarts at most one container
//! (its own worst offender), so a tick issues at most four restarts. A
//! target still in cooldown means zero restarts for that guard; there is
//! no fallback to the next-worst instance.

mod cpu;
mod health;
mod memory;
mod swap;

pub use cpu::CpuGuard;
pub use health::HealthGuard;
pub use memory::MemoryGuard;
pub use swap::SwapGuard;

use crate::models::{Event, InstanceInfo, MetricsSnapshot, RestartReason, SystemStats};
use crate::store::{GlobalConfig, GuardToggles};
use async_trait::async_trait;
use tracing::debug;

/// Inputs shared by every guard for one tick
pub struct GuardContext<'a> {
    pub cfg: &'a GlobalConfig,
    pub snapshots: &'a [MetricsSnapshot],
    pub instances: &'a [InstanceInfo],
    pub system: Option<SystemStats>,
}

#[async_trait]
pub trait Guard: Send + Sync {
    fn kind(&self) -> RestartReason;

    /// Evaluate the guard and perform at most one restart
    async fn evaluate(&self, ctx: &GuardContext<'_>) -> Vec<Event>;
}

/// Whether the toggle for a guard kind is on
pub fn guard_enabled(toggles: &GuardToggles, kind: RestartReason) -> bool {
    match kind {
        RestartReason::Memory => toggles.memory,
        RestartReason::Cpu => toggles.cpu,
        RestartReason::Swap => toggles.swap,
        RestartReason::Health => toggles.health,
        _ => false,
    }
}

/// Snapshot with the highest `metric` at or above `threshold`
pub fn worst_offender<F>(
    snapshots: &[MetricsSnapshot],
    threshold: f64,
    metric: F,
) -> Option<&MetricsSnapshot>
where
    F: Fn(&MetricsSnapshot) -> f64,
{
    snapshots
        .iter()
        .filter(|s| metric(s) >= threshold)
        .max_by(|a, b| metric(a).total_cmp(&metric(b)))
}

pub struct GuardPipeline {
    guards: Vec<Box<dyn Guard>>,
}

impl GuardPipeline {
    /// Guards are evaluated in the order given
    pub fn new(guards: Vec<Box<dyn Guard>>) -> Self {
        Self { guards }
    }

    pub async fn run_once(&self, ctx: &GuardContext<'_>) -> Vec<Event> {
        let mut events = Vec::new();

        if !ctx.cfg.enabled {
            return events;
        }

        for guard in &self.guards {
            let kind = guard.kind();
            if !guard_enabled(&ctx.cfg.guards, kind) {
                debug!(guard = %kind, "Guard disabled, skipping");
                continue;
            }
            events.extend(guard.evaluate(ctx).await);
        }

        events
    }
}

#[cfg(test)]
mod tests;
