//! Persisted configuration documents
//!
//! The global document uses camelCase keys, the per-instance document uses
//! snake_case keys. Both tolerate missing keys (defaults apply) and the
//! loosely typed values older tooling wrote (`"0"`, `"false"`, `"85"`).

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-guard enable switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardToggles {
    pub memory: bool,
    pub cpu: bool,
    pub swap: bool,
    pub health: bool,
}

impl Default for GuardToggles {
    fn default() -> Self {
        Self {
            memory: true,
            cpu: true,
            swap: true,
            health: true,
        }
    }
}

/// Fleet-wide optimizer policy (`.optimizer.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConfig {
    #[serde(deserialize_with = "lenient_bool")]
    pub enabled: bool,
    pub guards: GuardToggles,
    #[serde(deserialize_with = "lenient_bool")]
    pub strict_memory_limit: bool,
    pub memory_limit: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub memory_swappiness: u64,
    #[serde(deserialize_with = "lenient_bool")]
    pub scheduler_enabled: bool,
    #[serde(deserialize_with = "lenient_f64")]
    pub restart_interval_hours: f64,
    #[serde(deserialize_with = "lenient_u64")]
    pub container_restart_cooldown_minutes: u64,
    #[serde(deserialize_with = "lenient_f64")]
    pub memory_threshold: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub cpu_threshold: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub swap_threshold: f64,
    #[serde(deserialize_with = "lenient_u64")]
    pub max_restarts_per_run: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub fleet_restart_spacing_seconds: u64,
    /// Scheduled restarts share the remediation cooldown bucket
    #[serde(deserialize_with = "lenient_bool")]
    pub shared_restart_cooldown: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            guards: GuardToggles::default(),
            strict_memory_limit: false,
            memory_limit: "1g".to_string(),
            memory_swappiness: 10,
            scheduler_enabled: true,
            restart_interval_hours: 24.0,
            container_restart_cooldown_minutes: 10,
            memory_threshold: 60.0,
            cpu_threshold: 70.0,
            swap_threshold: 10.0,
            max_restarts_per_run: 10,
            fleet_restart_spacing_seconds: 2,
            shared_restart_cooldown: true,
        }
    }
}

/// Upper bounds accepted for duration settings
const MAX_INTERVAL_HOURS: f64 = 24.0 * 365.0 * 10.0;
const MAX_MINUTES: u64 = 60 * 24 * 365;
const MAX_SECONDS: u64 = 60 * 60 * 24 * 7;

impl GlobalConfig {
    pub fn cooldown_secs(&self) -> i64 {
        i64::try_from(self.container_restart_cooldown_minutes)
            .unwrap_or(i64::MAX)
            .saturating_mul(60)
    }

    pub fn restart_interval_secs(&self) -> i64 {
        hours_to_secs(self.restart_interval_hours)
    }

    /// Reject values the tick cannot act on. Returns the offending key.
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        check_hours("restartIntervalHours", self.restart_interval_hours)?;
        check_at_most(
            "containerRestartCooldownMinutes",
            self.container_restart_cooldown_minutes,
            MAX_MINUTES,
        )?;
        check_at_most(
            "fleetRestartSpacingSeconds",
            self.fleet_restart_spacing_seconds,
            MAX_SECONDS,
        )?;
        check_at_most("memorySwappiness", self.memory_swappiness, 100)?;
        for (key, value) in [
            ("memoryThreshold", self.memory_threshold),
            ("cpuThreshold", self.cpu_threshold),
            ("swapThreshold", self.swap_threshold),
        ] {
            check_finite(key, value)?;
        }
        Ok(())
    }
}

/// Per-instance overrides stored in `instances/<name>/instance.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    #[serde(deserialize_with = "lenient_f64")]
    pub mem_threshold_pct: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub cpu_threshold_pct: f64,
    /// Zero disables scheduled restarts for the instance
    #[serde(deserialize_with = "lenient_f64")]
    pub restart_interval_hours: f64,
    #[serde(deserialize_with = "lenient_i64")]
    pub restart_graceful_seconds: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub threshold_grace_minutes: i64,
    #[serde(deserialize_with = "lenient_bool")]
    pub auto_reboot_enabled: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub optimize_enabled: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            mem_threshold_pct: 85.0,
            cpu_threshold_pct: 90.0,
            restart_interval_hours: 0.0,
            restart_graceful_seconds: 30,
            threshold_grace_minutes: 2,
            auto_reboot_enabled: true,
            optimize_enabled: true,
        }
    }
}

impl InstanceConfig {
    pub fn restart_interval_secs(&self) -> i64 {
        hours_to_secs(self.restart_interval_hours)
    }

    pub fn threshold_grace_secs(&self) -> i64 {
        self.threshold_grace_minutes.saturating_mul(60)
    }

    /// Reject values the tick cannot act on. Returns the offending key.
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        check_hours("restart_interval_hours", self.restart_interval_hours)?;
        check_range(
            "restart_graceful_seconds",
            self.restart_graceful_seconds,
            MAX_SECONDS,
        )?;
        check_range(
            "threshold_grace_minutes",
            self.threshold_grace_minutes,
            MAX_MINUTES,
        )?;
        check_finite("mem_threshold_pct", self.mem_threshold_pct)?;
        check_finite("cpu_threshold_pct", self.cpu_threshold_pct)
    }
}

fn hours_to_secs(hours: f64) -> i64 {
    if !hours.is_finite() || hours <= 0.0 {
        return 0;
    }
    // float to int casts saturate
    (hours * 3600.0) as i64
}

fn check_finite(key: &'static str, value: f64) -> Result<(), (&'static str, String)> {
    if value.is_finite() {
        Ok(())
    } else {
        Err((key, format!("expected a finite number, got {}", value)))
    }
}

fn check_hours(key: &'static str, hours: f64) -> Result<(), (&'static str, String)> {
    check_finite(key, hours)?;
    if !(0.0..=MAX_INTERVAL_HOURS).contains(&hours) {
        return Err((key, format!("must be between 0 and {}", MAX_INTERVAL_HOURS)));
    }
    Ok(())
}

fn check_at_most(key: &'static str, value: u64, max: u64) -> Result<(), (&'static str, String)> {
    if value > max {
        return Err((key, format!("must be at most {}", max)));
    }
    Ok(())
}

fn check_range(key: &'static str, value: i64, max: u64) -> Result<(), (&'static str, String)> {
    if value < 0 || value as u64 > max {
        return Err((key, format!("must be between 0 and {}", max)));
    }
    Ok(())
}

/// Escalation and restart-intent bookkeeping for one instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceState {
    #[serde(deserialize_with = "lenient_i64")]
    pub last_threshold_exceed_ts: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub last_optimize_ts: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub last_auto_restart_ts: i64,
    /// Non-zero while a scheduled restart is queued
    #[serde(deserialize_with = "lenient_i64")]
    pub pending_restart_ts: i64,
    /// When a queued restart was last cancelled; restarts the interval
    #[serde(deserialize_with = "lenient_i64")]
    pub last_restart_cancel_ts: i64,
}

/// Full instance document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    #[serde(flatten)]
    pub config: InstanceConfig,
    #[serde(flatten)]
    pub state: InstanceState,
}

/// Keys of the instance document that hold bookkeeping rather than policy
pub const INSTANCE_STATE_KEYS: &[&str] = &[
    "last_threshold_exceed_ts",
    "last_optimize_ts",
    "last_auto_restart_ts",
    "pending_restart_ts",
    "last_restart_cancel_ts",
];

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !matches!(s.trim(), "0" | "false" | "False"),
        _ => true,
    })
}

fn number_from_value<E: de::Error>(value: Value) -> Result<f64, E> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| E::custom("number out of range")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| E::custom(format!("expected a number, got {:?}", s))),
        Value::Null => Ok(0.0),
        other => Err(E::custom(format!("expected a number, got {}", other))),
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    number_from_value(Value::deserialize(deserializer)?)
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    number_from_value(Value::deserialize(deserializer)?).map(|f| f as i64)
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = number_from_value::<D::Error>(Value::deserialize(deserializer)?)?;
    if value < 0.0 {
        return Err(de::Error::custom("expected a non-negative number"));
    }
    Ok(value as u64)
}
