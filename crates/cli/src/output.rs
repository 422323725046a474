//! Output formatting utilities

use chrono::{TimeZone, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Parse a format name from the config file
    pub fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Print a table from a list of rows
pub fn print_table<T: Tabled>(rows: &[T]) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format seconds as `1d 2h 3m`
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Format a unix timestamp; zero means never
pub fn format_ts(ts: i64) -> String {
    if ts == 0 {
        return "never".to_string();
    }
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => ts.to_string(),
    }
}

/// Color a percentage against a warn/critical pair
pub fn color_pct(value: f64, warn: f64, critical: f64) -> String {
    let formatted = format!("{:.1}%", value);
    if value >= critical {
        formatted.red().to_string()
    } else if value >= warn {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Color an audit action by severity
pub fn color_action(action: &str) -> String {
    match action {
        "restart" | "recreate" | "auto_reboot" | "scheduled_restart_done" => {
            action.red().to_string()
        }
        "remediation_failed" | "scheduled_restart_error" => action.red().bold().to_string(),
        "cooldown_skip" | "health_warn" | "threshold_exceeded" | "threshold_persisted" => {
            action.yellow().to_string()
        }
        "health_recovered" | "threshold_recovered" | "soft_optimize_done" => {
            action.green().to_string()
        }
        _ => action.to_string(),
    }
}
