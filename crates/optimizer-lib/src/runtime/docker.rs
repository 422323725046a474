//! Docker-backed instance runtime
//!
//! Container inspection and control go through the `docker` CLI; the
//! instance inventory and recreate operation go through the instance
//! manager binary. Per-container swap figures come from the cgroup v2
//! hierarchy since `docker stats` does not report them.

use super::InstanceRuntime;
use crate::collector::parse::{parse_mem_usage, parse_percent, parse_started_at};
use crate::models::{ContainerStats, InstanceInfo};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

/// Settings for [`DockerRuntime`]
#[derive(Debug, Clone)]
pub struct DockerRuntimeConfig {
    pub docker_bin: String,
    pub manager_bin: String,
    /// Prepended to an instance name to form its container name
    pub container_prefix: String,
    /// Timeout for inspection commands
    pub inspect_timeout: Duration,
    /// Timeout for restart and recreate commands
    pub lifecycle_timeout: Duration,
    pub cgroup_root: PathBuf,
}

impl Default for DockerRuntimeConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            manager_bin: "blobe-vm-manager".to_string(),
            container_prefix: "blobevm_".to_string(),
            inspect_timeout: Duration::from_secs(5),
            lifecycle_timeout: Duration::from_secs(120),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
        }
    }
}

pub struct DockerRuntime {
    config: DockerRuntimeConfig,
}

impl DockerRuntime {
    pub fn new(config: DockerRuntimeConfig) -> Self {
        Self { config }
    }

    pub fn container_name(&self, name: &str) -> String {
        format!("{}{}", self.config.container_prefix, name)
    }

    /// Run a command to completion and return its stdout
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<String> {
        debug!(program = %program, args = ?args, "Running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .with_context(|| format!("{} {} timed out after {:?}", program, args.join(" "), timeout))?
            .with_context(|| format!("Failed to spawn {}", program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} {} exited with {}: {}",
                program,
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl InstanceRuntime for DockerRuntime {
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>> {
        let out = self
            .run(&self.config.manager_bin, &["list"], self.config.inspect_timeout)
            .await?;
        Ok(parse_manager_list(&out, &self.config.container_prefix))
    }

    async fn container_stats(&self, container: &str) -> Result<ContainerStats> {
        let inspect = self
            .run(
                &self.config.docker_bin,
                &[
                    "inspect",
                    "--format",
                    "{{.State.Running}}|{{.State.StartedAt}}|{{.Id}}",
                    container,
                ],
                self.config.inspect_timeout,
            )
            .await?;

        let fields: Vec<&str> = inspect.trim().split('|').collect();
        if fields.len() < 3 {
            bail!("Unexpected inspect output: {:?}", inspect.trim());
        }
        if fields[0] != "true" {
            bail!("Container {} is not running", container);
        }
        let started_at = parse_started_at(fields[1]);
        let container_id = fields[2];

        let stats = self
            .run(
                &self.config.docker_bin,
                &[
                    "stats",
                    "--no-stream",
                    "--format",
                    "{{.CPUPerc}}|{{.MemPerc}}|{{.MemUsage}}",
                    container,
                ],
                self.config.inspect_timeout,
            )
            .await?;

        let line = stats.lines().next().unwrap_or_default();
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 3 {
            bail!("Unexpected stats output: {:?}", line);
        }

        let (swap_used_bytes, swap_total_bytes) =
            read_cgroup_swap(&self.config.cgroup_root, container_id).await;

        Ok(ContainerStats {
            cpu_pct: parse_percent(parts[0]).unwrap_or(0.0),
            mem_pct: parse_percent(parts[1]).unwrap_or(0.0),
            mem_bytes: parse_mem_usage(parts[2]).unwrap_or(0),
            swap_used_bytes,
            swap_total_bytes,
            started_at,
        })
    }

    async fn restart(&self, container: &str) -> Result<()> {
        self.run(
            &self.config.docker_bin,
            &["restart", container],
            self.config.lifecycle_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn recreate(&self, name: &str) -> Result<()> {
        self.run(
            &self.config.manager_bin,
            &["recreate", name],
            self.config.lifecycle_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn exec(&self, container: &str, command: &str, timeout: Duration) -> Result<()> {
        self.run(
            &self.config.docker_bin,
            &["exec", "-u", "root", container, "sh", "-c", command],
            timeout,
        )
        .await
        .map(|_| ())
    }

    async fn update_memory(&self, container: &str, limit: &str, swappiness: u64) -> Result<()> {
        let memory = format!("--memory={}", limit);
        let memory_swap = format!("--memory-swap={}", limit);
        let swappiness = format!("--memory-swappiness={}", swappiness);

        self.run(
            &self.config.docker_bin,
            &["update", &memory, &memory_swap, &swappiness, container],
            self.config.inspect_timeout,
        )
        .await
        .map(|_| ())
    }
}

/// Parse the manager's `list` output.
///
/// Relevant lines look like `- name -> status -> url`; everything else is
/// ignored. The url column is optional.
pub fn parse_manager_list(output: &str, container_prefix: &str) -> Vec<InstanceInfo> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("- "))
        .filter_map(|rest| {
            let parts: Vec<&str> = rest.split("->").map(str::trim).collect();
            let name = parts.first()?.split_whitespace().next()?.to_string();
            let status = parts.get(1).copied().unwrap_or_default().to_string();
            let url = parts
                .get(2)
                .filter(|u| !u.is_empty())
                .map(|u| u.to_string());

            Some(InstanceInfo {
                container_name: format!("{}{}", container_prefix, name),
                name,
                status,
                url,
            })
        })
        .collect()
}

/// Swap usage and ceiling for a container's cgroup; `(0, 0)` when unknown.
///
/// An unlimited ceiling (`max`) is reported as a zero total.
async fn read_cgroup_swap(cgroup_root: &Path, container_id: &str) -> (u64, u64) {
    let candidates = [
        cgroup_root
            .join("system.slice")
            .join(format!("docker-{}.scope", container_id)),
        cgroup_root.join("docker").join(container_id),
    ];

    for dir in candidates {
        let current = match fs::read_to_string(dir.join("memory.swap.current")).await {
            Ok(content) => content.trim().parse::<u64>().unwrap_or(0),
            Err(_) => continue,
        };
        let max = fs::read_to_string(dir.join("memory.swap.max"))
            .await
            .ok()
            .and_then(|content| content.trim().parse::<u64>().ok())
            .unwrap_or(0);
        return (current, max);
    }

    (0, 0)
}
