//! Fleet Optimizer CLI
//!
//! A command-line tool for inspecting and steering the fleet optimizer
//! daemon: status, live stats, configuration, audit logs, manual cleanup
//! and scheduled restarts.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{instances, settings, status};

/// Fleet Optimizer CLI
#[derive(Parser)]
#[command(name = "fleetopt")]
#[command(author, version, about = "CLI for the Fleet Optimizer", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via FLEETOPT_API_URL env var)
    #[arg(long, env = "FLEETOPT_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show optimizer configuration, host usage and live stats
    Status,

    /// Run one optimizer tick now
    RunOnce,

    /// Set a configuration key (value is parsed as JSON, else taken as a string)
    Set {
        key: String,

        value: String,

        /// Set a per-instance override instead of a global key
        #[arg(long, short)]
        instance: Option<String>,
    },

    /// Show live stats for one instance (all when omitted)
    Stats { name: Option<String> },

    /// Show an instance's optimizer log
    Logs {
        name: String,

        /// Only the newest N entries
        #[arg(long, short)]
        lines: Option<usize>,
    },

    /// Run the in-place cleanup for an instance, or `all`
    Optimize { target: String },

    /// Cancel a queued scheduled restart
    CancelRestart { name: String },

    /// Push a queued scheduled restart back
    PostponeRestart {
        name: String,

        /// Seconds to add to the pending restart
        seconds: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = config::Config::load()?;

    let format = cli
        .format
        .or_else(|| {
            file_config
                .default_format
                .as_deref()
                .and_then(output::OutputFormat::from_name)
        })
        .unwrap_or_default();

    // Initialize client
    let api_url = file_config.resolve_api_url(cli.api_url.as_deref());
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Status => status::show_status(&client, format).await?,
        Commands::RunOnce => status::run_once(&client, format).await?,
        Commands::Set {
            key,
            value,
            instance,
        } => settings::set_config(&client, &key, &value, instance, format).await?,
        Commands::Stats { name } => status::show_stats(&client, name, format).await?,
        Commands::Logs { name, lines } => {
            instances::show_logs(&client, &name, lines, format).await?
        }
        Commands::Optimize { target } => instances::optimize(&client, &target, format).await?,
        Commands::CancelRestart { name } => {
            instances::cancel_restart(&client, &name, format).await?
        }
        Commands::PostponeRestart { name, seconds } => {
            instances::postpone_restart(&client, &name, seconds, format).await?
        }
    }

    Ok(())
}
