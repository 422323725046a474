//! Core data models for the optimizer

use serde::{Deserialize, Serialize};

/// A managed instance as reported by the lifecycle surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    pub container_name: String,
    #[serde(default)]
    pub status: String,
    /// Advertised URL probed by the health guard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Raw per-container figures read from the runtime's inspection interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub mem_bytes: u64,
    pub swap_used_bytes: u64,
    /// Zero when the container has no finite swap ceiling
    pub swap_total_bytes: u64,
    /// Unix seconds the container was last started
    pub started_at: Option<i64>,
}

/// Metrics snapshot for one instance, taken once per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub instance: String,
    pub container: String,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub swap_pct: f64,
    pub mem_bytes: u64,
    pub uptime_sec: u64,
    /// Unix seconds the container was started; `None` when the runtime did not say
    #[serde(default)]
    pub started_at: Option<i64>,
    pub ts: i64,
}

/// Host-wide memory and swap usage in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub mem_used: u64,
    pub mem_total: u64,
    pub swap_used: u64,
    pub swap_total: u64,
}

impl SystemStats {
    pub fn swap_pct(&self) -> f64 {
        percent_of(self.swap_used, self.swap_total)
    }
}

/// `used / total * 100`, defined as 0 when total is 0
pub fn percent_of(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    used as f64 / total as f64 * 100.0
}

/// Why a remediation was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartReason {
    Memory,
    Cpu,
    Swap,
    Health,
    Threshold,
    Scheduled,
    Fleet,
}

impl RestartReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartReason::Memory => "memory",
            RestartReason::Cpu => "cpu",
            RestartReason::Swap => "swap",
            RestartReason::Health => "health",
            RestartReason::Threshold => "threshold",
            RestartReason::Scheduled => "scheduled",
            RestartReason::Fleet => "fleet",
        }
    }

    /// Restarts triggered by the scheduler rather than by a live condition
    pub fn is_scheduled(&self) -> bool {
        matches!(self, RestartReason::Scheduled | RestartReason::Fleet)
    }
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health-guard escalation stage, persisted as marker files
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStage {
    None,
    Warned,
    Restarted,
}

/// Something the optimizer did (or deliberately did not do) during a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Event {
    Restart {
        reason: RestartReason,
        instance: String,
        value: f64,
    },
    Recreate {
        reason: RestartReason,
        instance: String,
    },
    CooldownSkip {
        reason: RestartReason,
        instance: String,
        remaining_secs: i64,
    },
    RemediationFailed {
        reason: RestartReason,
        instance: String,
        error: String,
    },
    HealthWarn {
        instance: String,
    },
    HealthDeferred {
        instance: String,
    },
    HealthRecovered {
        instance: String,
    },
    SoftOptimize {
        instance: String,
        mem_pct: f64,
        cpu_pct: f64,
    },
    ThresholdPersisted {
        instance: String,
        auto_reboot: bool,
    },
    ThresholdRecovered {
        instance: String,
    },
    RestartQueued {
        instance: String,
        execute_at: i64,
    },
    MemoryLimitApplied {
        instance: String,
        limit: String,
    },
}

impl Event {
    pub fn instance(&self) -> &str {
        match self {
            Event::Restart { instance, .. }
            | Event::Recreate { instance, .. }
            | Event::CooldownSkip { instance, .. }
            | Event::RemediationFailed { instance, .. }
            | Event::HealthWarn { instance }
            | Event::HealthDeferred { instance }
            | Event::HealthRecovered { instance }
            | Event::SoftOptimize { instance, .. }
            | Event::ThresholdPersisted { instance, .. }
            | Event::ThresholdRecovered { instance }
            | Event::RestartQueued { instance, .. }
            | Event::MemoryLimitApplied { instance, .. } => instance,
        }
    }

    /// True for events that restarted or recreated a container
    pub fn is_restart(&self) -> bool {
        matches!(self, Event::Restart { .. } | Event::Recreate { .. })
    }

    pub fn reason(&self) -> Option<RestartReason> {
        match self {
            Event::Restart { reason, .. }
            | Event::Recreate { reason, .. }
            | Event::CooldownSkip { reason, .. }
            | Event::RemediationFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// One audit log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: i64,
    pub action: String,
    #[serde(default)]
    pub info: serde_json::Value,
}
