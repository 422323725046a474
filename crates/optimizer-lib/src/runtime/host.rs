//! Host memory probe backed by procfs

use super::HostProbe;
use crate::models::SystemStats;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::process::Command;

pub struct ProcHostProbe {
    proc_path: PathBuf,
}

impl ProcHostProbe {
    pub fn new() -> Self {
        Self {
            proc_path: PathBuf::from("/proc"),
        }
    }

    /// Create probe with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
        }
    }
}

impl Default for ProcHostProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostProbe for ProcHostProbe {
    async fn system_stats(&self) -> Result<SystemStats> {
        let path = self.proc_path.join("meminfo");
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(parse_meminfo(&content))
    }

    async fn drop_caches(&self) -> Result<()> {
        // Flush dirty pages first so the drop can release them
        let status = Command::new("sync")
            .status()
            .await
            .context("Failed to run sync")?;
        if !status.success() {
            anyhow::bail!("sync exited with {}", status);
        }

        let path = self.proc_path.join("sys/vm/drop_caches");
        fs::write(&path, "3\n")
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Parse `/proc/meminfo` contents into byte counts
pub fn parse_meminfo(content: &str) -> SystemStats {
    let mut values: HashMap<&str, u64> = HashMap::new();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        if let Ok(kib) = value.parse::<u64>() {
            values.insert(key.trim_end_matches(':'), kib * 1024);
        }
    }

    let get = |key: &str| values.get(key).copied().unwrap_or(0);

    let mem_total = get("MemTotal");
    let mem_available = values
        .get("MemAvailable")
        .copied()
        .unwrap_or_else(|| get("MemFree") + get("Buffers") + get("Cached"));
    let swap_total = get("SwapTotal");

    SystemStats {
        mem_used: mem_total.saturating_sub(mem_available),
        mem_total,
        swap_used: swap_total.saturating_sub(get("SwapFree")),
        swap_total,
    }
}
