//! Status and live metrics commands

use anyhow::Result;
use colored::Colorize;
use serde_json::{json, Value};
use tabled::Tabled;

use crate::client::{ApiClient, ApiError, RunOnceResponse, Snapshot, Status};
use crate::output::{
    color_pct, format_bytes, format_ts, format_uptime, print_info, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

/// Row for the live stats table
#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Swap")]
    swap: String,
    #[tabled(rename = "Resident")]
    resident: String,
    #[tabled(rename = "Uptime")]
    uptime: String,
}

impl From<&Snapshot> for StatsRow {
    fn from(s: &Snapshot) -> Self {
        Self {
            instance: s.instance.clone(),
            cpu: color_pct(s.cpu_pct, 50.0, 70.0),
            memory: color_pct(s.mem_pct, 50.0, 60.0),
            swap: color_pct(s.swap_pct, 5.0, 10.0),
            resident: format_bytes(s.mem_bytes),
            uptime: format_uptime(s.uptime_sec),
        }
    }
}

/// Row for the config table
#[derive(Tabled)]
struct ConfigRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Show global configuration, host usage and live stats
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: Status = client.get("optimizer/status").await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!("{}", "Optimizer".bold());
            println!("{}", "=".repeat(50));
            let enabled = status
                .config
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if enabled {
                println!("State:              {}", "enabled".green());
            } else {
                println!("State:              {}", "disabled".yellow());
            }
            println!(
                "Last fleet restart: {}",
                format_ts(status.last_global_restart_ts)
            );
            if let Some(system) = &status.system {
                println!(
                    "Host memory:        {} / {}",
                    format_bytes(system.mem_used),
                    format_bytes(system.mem_total)
                );
                println!(
                    "Host swap:          {} / {}",
                    format_bytes(system.swap_used),
                    format_bytes(system.swap_total)
                );
            }
            println!();

            let rows: Vec<ConfigRow> = status
                .config
                .iter()
                .map(|(key, value)| ConfigRow {
                    key: key.clone(),
                    value: display_value(value),
                })
                .collect();
            print_table(&rows);
            println!();

            let rows: Vec<StatsRow> = status.live_stats.values().map(StatsRow::from).collect();
            print_table(&rows);
        }
    }

    Ok(())
}

/// Show live stats for one instance, or every instance
pub async fn show_stats(
    client: &ApiClient,
    name: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let snapshots: Vec<Snapshot> = match &name {
        Some(name) => {
            let path = format!("optimizer/instances/{}/stats", name);
            match client.get::<Snapshot>(&path).await {
                Ok(snapshot) => vec![snapshot],
                Err(e) if is_not_found(&e) => {
                    match format {
                        OutputFormat::Json => print_json(&json!({ "error": "no-stats" }))?,
                        OutputFormat::Table => {
                            print_warning(&format!("No stats collected for {}", name))
                        }
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        None => {
            let status: Status = client.get("optimizer/status").await?;
            status.live_stats.into_values().collect()
        }
    };

    match format {
        OutputFormat::Json => print_json(&snapshots)?,
        OutputFormat::Table => {
            let rows: Vec<StatsRow> = snapshots.iter().map(StatsRow::from).collect();
            print_table(&rows);
        }
    }

    Ok(())
}

/// Run one optimizer tick now
pub async fn run_once(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response: RunOnceResponse = client.post("optimizer/run-once", &json!({})).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            print_success("Tick complete");
            if response.events.is_empty() {
                print_info("No action taken");
            }
            for event in &response.events {
                let action = event["action"].as_str().unwrap_or("event");
                let instance = event["instance"].as_str().unwrap_or("-");
                println!("  {} {}", action.cyan(), instance);
            }
        }
    }

    Ok(())
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ApiError>()
        .map(ApiError::is_not_found)
        .unwrap_or(false)
}
