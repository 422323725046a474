//! Per-instance commands: logs, manual cleanup, scheduled restarts

use anyhow::Result;
use colored::Colorize;
use serde_json::{json, Value};
use tabled::Tabled;

use crate::client::{ApiClient, CancelResponse, LogEntry, PostponeRequest, PostponeResponse};
use crate::output::{
    color_action, format_ts, print_info, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

const DEFAULT_JSON_LINES: usize = 1000;

/// Row for the audit log table
#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Show an instance's audit log; `lines` limits to the newest entries
pub async fn show_logs(
    client: &ApiClient,
    name: &str,
    lines: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    if lines.is_none() && format == OutputFormat::Table {
        let text = client
            .get_text(&format!("optimizer/instances/{}/logs", name))
            .await?;
        print!("{}", text);
        return Ok(());
    }

    let lines = lines.unwrap_or(DEFAULT_JSON_LINES);
    let path = format!("optimizer/instances/{}/logs?lines={}", name, lines);
    let entries: Vec<LogEntry> = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Table => {
            if entries.is_empty() {
                print_info(&format!("No log entries for {}", name));
                return Ok(());
            }
            let rows: Vec<LogRow> = entries
                .iter()
                .map(|e| LogRow {
                    time: format_ts(e.ts),
                    action: color_action(&e.action),
                    details: match &e.info {
                        Value::Null => String::new(),
                        info => info.to_string(),
                    },
                })
                .collect();
            print_table(&rows);
        }
    }

    Ok(())
}

/// Run the in-place cleanup for one instance, or `all`
pub async fn optimize(client: &ApiClient, target: &str, format: OutputFormat) -> Result<()> {
    let path = format!("optimizer/instances/{}/optimize", target);
    let response: Value = client.post(&path, &json!({})).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => print_success(&format!("Cleanup ran for {}", target.cyan())),
    }

    Ok(())
}

/// Cancel a queued scheduled restart
pub async fn cancel_restart(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let path = format!("optimizer/instances/{}/cancel-restart", name);
    let response: CancelResponse = client.post(&path, &json!({})).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table if response.cancelled => {
            print_success(&format!("Scheduled restart of {} cancelled", name.cyan()))
        }
        OutputFormat::Table => print_warning(&format!("No restart pending for {}", name)),
    }

    Ok(())
}

/// Push a queued scheduled restart back
pub async fn postpone_restart(
    client: &ApiClient,
    name: &str,
    seconds: i64,
    format: OutputFormat,
) -> Result<()> {
    let path = format!("optimizer/instances/{}/postpone-restart", name);
    let response: PostponeResponse = client.post(&path, &PostponeRequest { seconds }).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => match response.execute_at {
            Some(ts) => print_success(&format!(
                "Restart of {} now due at {}",
                name.cyan(),
                format_ts(ts)
            )),
            None => print_warning(&format!("No restart pending for {}", name)),
        },
    }

    Ok(())
}
