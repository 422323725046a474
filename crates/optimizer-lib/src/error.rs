//! Error taxonomy for the optimizer
//!
//! Every kind except the configuration ones is caught and logged where it
//! happens; nothing here is allowed to escape a tick.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Metrics unavailable for {instance}: {reason}")]
    MetricsUnavailable { instance: String, reason: String },

    #[error("Remediation failed for {instance}: {reason}")]
    RemediationFailed { instance: String, reason: String },

    #[error("Probe failed for {url}: {reason}")]
    ProbeFailed { url: String, reason: String },

    #[error("Failed to persist configuration: {0}")]
    ConfigPersistFailed(String),

    #[error("Restart of {container} already in progress")]
    ConcurrentRestartRace { container: String },

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("Invalid instance name: {0:?}")]
    InvalidInstanceName(String),
}

impl OptimizerError {
    /// Short machine-readable name used in audit entries and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            OptimizerError::MetricsUnavailable { .. } => "metrics_unavailable",
            OptimizerError::RemediationFailed { .. } => "remediation_failed",
            OptimizerError::ProbeFailed { .. } => "probe_failed",
            OptimizerError::ConfigPersistFailed(_) => "config_persist_failed",
            OptimizerError::ConcurrentRestartRace { .. } => "concurrent_restart_race",
            OptimizerError::InvalidConfig { .. } => "invalid_config",
            OptimizerError::InvalidInstanceName(_) => "invalid_instance_name",
        }
    }

    pub(crate) fn metrics_unavailable(instance: &str, reason: impl ToString) -> Self {
        OptimizerError::MetricsUnavailable {
            instance: instance.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn remediation_failed(instance: &str, reason: impl ToString) -> Self {
        OptimizerError::RemediationFailed {
            instance: instance.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn persist(reason: impl ToString) -> Self {
        OptimizerError::ConfigPersistFailed(reason.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        let err = OptimizerError::metrics_unavailable("vm1", "not running");
        assert_eq!(err.kind(), "metrics_unavailable");
        assert_eq!(
            err.to_string(),
            "Metrics unavailable for vm1: not running"
        );

        let race = OptimizerError::ConcurrentRestartRace {
            container: "blobevm_vm1".to_string(),
        };
        assert_eq!(race.kind(), "concurrent_restart_race");
    }
}
