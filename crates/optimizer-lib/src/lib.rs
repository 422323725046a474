//! Fleet optimizer library
//!
//! This crate provides the core functionality for:
//! - Metrics collection from the container runtime
//! - Resource guards (memory, cpu, swap, health)
//! - Per-instance threshold escalation
//! - Scheduled and fleet-wide restarts
//! - Persisted configuration, state and audit logs
//! - Health checks and observability

pub mod clock;
pub mod collector;
pub mod error;
pub mod escalation;
pub mod guards;
pub mod health;
pub mod models;
pub mod observability;
pub mod optimizer;
pub mod remediation;
pub mod runtime;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{OptimizerError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OptimizerMetrics, StructuredLogger};
pub use optimizer::{Optimizer, OptimizerOptions, OptimizerStatus};
pub use store::{GlobalConfig, InstanceConfig, InstanceRecord, InstanceState};
