//! Observability infrastructure for the fleet optimizer
//!
//! Provides:
//! - Prometheus metrics (tick latency, monitored instances, remediation counters)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for tick duration (in seconds)
const TICK_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OptimizerMetricsInner> = OnceLock::new();

struct OptimizerMetricsInner {
    tick_duration_seconds: Histogram,
    instances_monitored: IntGauge,
    restarts_total: IntCounterVec,
    soft_optimizations_total: IntCounter,
    collection_errors_total: IntCounter,
    cooldown_skips_total: IntCounter,
}

impl OptimizerMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "fleet_optimizer_tick_duration_seconds",
                "Time spent in one optimizer tick",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            instances_monitored: register_int_gauge!(
                "fleet_optimizer_instances_monitored",
                "Number of instances with a live metrics snapshot"
            )
            .expect("Failed to register instances_monitored"),

            restarts_total: register_int_counter_vec!(
                "fleet_optimizer_restarts_total",
                "Container restarts and recreates issued, by reason",
                &["reason"]
            )
            .expect("Failed to register restarts_total"),

            soft_optimizations_total: register_int_counter!(
                "fleet_optimizer_soft_optimizations_total",
                "In-place cleanup sequences run"
            )
            .expect("Failed to register soft_optimizations_total"),

            collection_errors_total: register_int_counter!(
                "fleet_optimizer_collection_errors_total",
                "Instances whose metrics could not be read"
            )
            .expect("Failed to register collection_errors_total"),

            cooldown_skips_total: register_int_counter!(
                "fleet_optimizer_cooldown_skips_total",
                "Restarts suppressed by the per-container cooldown"
            )
            .expect("Failed to register cooldown_skips_total"),
        }
    }
}

/// Optimizer metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct OptimizerMetrics {
    _private: (),
}

impl Default for OptimizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OptimizerMetricsInner {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new)
    }

    pub fn observe_tick_duration(&self, duration_secs: f64) {
        self.inner().tick_duration_seconds.observe(duration_secs);
    }

    pub fn set_instances_monitored(&self, count: i64) {
        self.inner().instances_monitored.set(count);
    }

    pub fn inc_restarts(&self, reason: &str) {
        self.inner()
            .restarts_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_soft_optimizations(&self) {
        self.inner().soft_optimizations_total.inc();
    }

    pub fn inc_collection_errors(&self, count: u64) {
        self.inner().collection_errors_total.inc_by(count);
    }

    pub fn inc_cooldown_skips(&self) {
        self.inner().cooldown_skips_total.inc();
    }
}

/// Structured logger for optimizer events
///
/// Emits the canonical `event = "..."` records for remediation,
/// escalation and scheduling decisions.
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Log a restart or recreate that was carried out
    pub fn log_remediation(&self, instance: &str, container: &str, action: &str, reason: &str) {
        warn!(
            event = "remediation",
            host = %self.host,
            instance = %instance,
            container = %container,
            action = %action,
            reason = %reason,
            "Remediation executed"
        );
    }

    pub fn log_cooldown_skip(&self, instance: &str, reason: &str, remaining_secs: i64) {
        info!(
            event = "cooldown_skip",
            host = %self.host,
            instance = %instance,
            reason = %reason,
            remaining_secs = remaining_secs,
            "Skip restart (cooldown)"
        );
    }

    pub fn log_remediation_failed(&self, instance: &str, reason: &str, error: &str) {
        warn!(
            event = "remediation_failed",
            host = %self.host,
            instance = %instance,
            reason = %reason,
            error = %error,
            "Remediation failed"
        );
    }

    pub fn log_soft_optimize(&self, instance: &str, failed_steps: usize) {
        info!(
            event = "soft_optimize",
            host = %self.host,
            instance = %instance,
            failed_steps = failed_steps,
            "In-place cleanup completed"
        );
    }

    /// Log an escalation step of the threshold engine
    pub fn log_threshold(&self, instance: &str, stage: &str, mem_pct: f64, cpu_pct: f64) {
        info!(
            event = "threshold",
            host = %self.host,
            instance = %instance,
            stage = %stage,
            mem_pct = mem_pct,
            cpu_pct = cpu_pct,
            "Threshold escalation"
        );
    }

    /// Log a scheduled restart waiter transition
    pub fn log_schedule(&self, instance: &str, state: &str, execute_at: i64) {
        info!(
            event = "scheduled_restart",
            host = %self.host,
            instance = %instance,
            state = %state,
            execute_at = execute_at,
            "Scheduled restart state change"
        );
    }

    pub fn log_startup(&self, version: &str, state_dir: &str) {
        info!(
            event = "optimizer_started",
            host = %self.host,
            optimizer_version = %version,
            state_dir = %state_dir,
            "Fleet optimizer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "optimizer_shutdown",
            host = %self.host,
            reason = %reason,
            "Fleet optimizer shutting down"
        );
    }

    pub fn log_config_change(&self, scope: &str, key: &str) {
        info!(
            event = "config_changed",
            host = %self.host,
            scope = %scope,
            key = %key,
            "Configuration updated"
        );
    }
}
