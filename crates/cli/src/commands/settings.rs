//! Configuration commands

use anyhow::Result;
use colored::Colorize;
use serde_json::Value;

use crate::client::{parse_value, ApiClient, ConfigUpdate};
use crate::output::{print_json, print_success, OutputFormat};

/// Set a global key, or a per-instance override when `instance` is given
pub async fn set_config(
    client: &ApiClient,
    key: &str,
    raw_value: &str,
    instance: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let update = ConfigUpdate {
        key: key.to_string(),
        value: parse_value(raw_value),
    };

    let path = match &instance {
        Some(name) => format!("optimizer/instances/{}/config", name),
        None => "optimizer/config".to_string(),
    };
    let response: Value = client.post(&path, &update).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            let scope = instance.as_deref().unwrap_or("global");
            print_success(&format!(
                "{} {} = {}",
                scope.cyan(),
                key.bold(),
                update.value
            ));
        }
    }

    Ok(())
}
