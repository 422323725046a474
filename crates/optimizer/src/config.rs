//! Daemon configuration

use anyhow::{Context, Result};
use optimizer_lib::runtime::DockerRuntimeConfig;
use optimizer_lib::OptimizerOptions;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, read from `OPTIMIZER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Root of the persisted optimizer state
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// API server port for control/health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Background tick interval in seconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Instance manager binary used for listing and recreating instances
    #[serde(default = "default_manager_bin")]
    pub manager_bin: String,

    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_stats_timeout")]
    pub stats_timeout_secs: u64,

    /// Host name attached to structured log records
    #[serde(default = "default_host_name")]
    pub host_name: String,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/opt/blobe-vm")
}

fn default_api_port() -> u16 {
    8080
}

fn default_tick_interval() -> u64 {
    15
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_manager_bin() -> String {
    "blobe-vm-manager".to_string()
}

fn default_container_prefix() -> String {
    "blobevm_".to_string()
}

fn default_probe_timeout() -> u64 {
    6
}

fn default_stats_timeout() -> u64 {
    5
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

impl DaemonConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("OPTIMIZER").try_parsing(true))
            .build()
            .context("Failed to read OPTIMIZER_* environment")?;

        config
            .try_deserialize()
            .context("Invalid optimizer configuration")
    }

    pub fn runtime_config(&self) -> DockerRuntimeConfig {
        DockerRuntimeConfig {
            docker_bin: self.docker_bin.clone(),
            manager_bin: self.manager_bin.clone(),
            container_prefix: self.container_prefix.clone(),
            inspect_timeout: Duration::from_secs(self.stats_timeout_secs),
            ..Default::default()
        }
    }

    pub fn optimizer_options(&self) -> OptimizerOptions {
        OptimizerOptions {
            state_dir: self.state_dir.clone(),
            tick_interval: Duration::from_secs(self.tick_interval_secs.max(1)),
            stats_timeout: Duration::from_secs(self.stats_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            host_name: self.host_name.clone(),
            ..Default::default()
        }
    }
}
