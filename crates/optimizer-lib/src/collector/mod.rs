//! Metrics collection from the container runtime
//!
//! Reads per-instance CPU, memory, swap and uptime through the
//! [`InstanceRuntime`] inspection interface. Reads for the whole fleet run
//! concurrently and each carries its own timeout, so one stuck container
//! cannot stall the tick.

pub mod parse;
mod snapshot;


pub use snapshot::SnapshotStore;

use crate::clock::Clock;
use crate::error::{OptimizerError, Result};
use crate::models::{percent_of, ContainerStats, InstanceInfo, MetricsSnapshot};
use crate::runtime::InstanceRuntime;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Trait for metrics collection implementations
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Collect a snapshot for one instance, or fail with
    /// [`OptimizerError::MetricsUnavailable`]
    async fn collect(&self, instance: &InstanceInfo) -> Result<MetricsSnapshot>;
}

/// Collector backed by an [`InstanceRuntime`]
pub struct RuntimeCollector {
    runtime: Arc<dyn InstanceRuntime>,
    clock: Arc<dyn Clock>,
    /// Per-instance read timeout (default: 5 seconds)
    timeout: Duration,
}

impl RuntimeCollector {
    pub fn new(runtime: Arc<dyn InstanceRuntime>, clock: Arc<dyn Clock>) -> Self {
        Self {
            runtime,
            clock,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MetricsCollector for RuntimeCollector {
    async fn collect(&self, instance: &InstanceInfo) -> Result<MetricsSnapshot> {
        let read = self.runtime.container_stats(&instance.container_name);

        let stats = match tokio::time::timeout(self.timeout, read).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => return Err(OptimizerError::metrics_unavailable(&instance.name, e)),
            Err(_) => {
                return Err(OptimizerError::metrics_unavailable(
                    &instance.name,
                    format!("inspection timed out after {:?}", self.timeout),
                ))
            }
        };

        Ok(build_snapshot(instance, &stats, self.clock.now()))
    }
}

/// Derive a snapshot from raw runtime figures at time `now`
pub fn build_snapshot(instance: &InstanceInfo, stats: &ContainerStats, now: i64) -> MetricsSnapshot {
    let uptime_sec = stats
        .started_at
        .map(|started| (now - started).max(0) as u64)
        .unwrap_or(0);

    MetricsSnapshot {
        instance: instance.name.clone(),
        container: instance.container_name.clone(),
        cpu_pct: stats.cpu_pct,
        mem_pct: stats.mem_pct,
        swap_pct: percent_of(stats.swap_used_bytes, stats.swap_total_bytes),
        mem_bytes: stats.mem_bytes,
        uptime_sec,
        started_at: stats.started_at,
        ts: now,
    }
}

/// Results from a collection cycle
#[derive(Debug, Default)]
pub struct CollectionResults {
    pub snapshots: Vec<MetricsSnapshot>,
    pub errors: Vec<OptimizerError>,
}

/// Collect snapshots for every instance concurrently
pub async fn collect_fleet(
    collector: &dyn MetricsCollector,
    instances: &[InstanceInfo],
) -> CollectionResults {
    let reads = instances.iter().map(|instance| collector.collect(instance));
    let mut results = CollectionResults::default();

    for (instance, outcome) in instances.iter().zip(join_all(reads).await) {
        match outcome {
            Ok(snapshot) => results.snapshots.push(snapshot),
            Err(e) => {
                debug!(instance = %instance.name, error = %e, "Failed to collect metrics");
                results.errors.push(e);
            }
        }
    }

    results
}
