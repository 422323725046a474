//! In-memory collaborators for unit tests

use crate::error::{OptimizerError, Result as OptResult};
use crate::models::{ContainerStats, InstanceInfo, SystemStats};
use crate::runtime::{HostProbe, HttpProbe, InstanceRuntime};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock runtime recording every lifecycle call
#[derive(Default)]
pub struct MockRuntime {
    pub instances: Mutex<Vec<InstanceInfo>>,
    pub stats: Mutex<HashMap<String, ContainerStats>>,
    /// Containers whose stats read never completes
    pub stalled: Mutex<HashSet<String>>,
    pub restarts: Mutex<Vec<String>>,
    pub recreates: Mutex<Vec<String>>,
    pub execs: Mutex<Vec<(String, String)>>,
    pub memory_updates: Mutex<Vec<(String, String, u64)>>,
    pub fail_restart: AtomicBool,
    pub fail_exec: AtomicBool,
    pub fail_list: AtomicBool,
    pub restart_delay: Mutex<Duration>,
    pub restart_calls: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance with the given stats; container is `blobevm_<name>`
    pub fn add(&self, name: &str, url: Option<&str>, stats: ContainerStats) {
        let container = format!("blobevm_{}", name);
        self.instances.lock().unwrap().push(InstanceInfo {
            name: name.to_string(),
            container_name: container.clone(),
            status: "running".to_string(),
            url: url.map(str::to_string),
        });
        self.stats.lock().unwrap().insert(container, stats);
    }

    pub fn set_stats(&self, name: &str, stats: ContainerStats) {
        self.stats
            .lock()
            .unwrap()
            .insert(format!("blobevm_{}", name), stats);
    }

    pub fn restarted(&self) -> Vec<String> {
        self.restarts.lock().unwrap().clone()
    }

    pub fn recreated(&self) -> Vec<String> {
        self.recreates.lock().unwrap().clone()
    }

    pub fn exec_count(&self) -> usize {
        self.execs.lock().unwrap().len()
    }
}

pub fn stats(cpu_pct: f64, mem_pct: f64, mem_bytes: u64) -> ContainerStats {
    ContainerStats {
        cpu_pct,
        mem_pct,
        mem_bytes,
        ..Default::default()
    }
}

#[async_trait]
impl InstanceRuntime for MockRuntime {
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>> {
        if self.fail_list.load(Ordering::SeqCst) {
            bail!("manager unavailable");
        }
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn container_stats(&self, container: &str) -> Result<ContainerStats> {
        let stalled = self.stalled.lock().unwrap().contains(container);
        if stalled {
            std::future::pending::<()>().await;
        }
        let stats = self.stats.lock().unwrap().get(container).cloned();
        match stats {
            Some(stats) => Ok(stats),
            None => bail!("No such container: {}", container),
        }
    }

    async fn restart(&self, container: &str) -> Result<()> {
        self.restart_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.restart_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_restart.load(Ordering::SeqCst) {
            bail!("restart of {} failed", container);
        }
        self.restarts.lock().unwrap().push(container.to_string());
        Ok(())
    }

    async fn recreate(&self, name: &str) -> Result<()> {
        self.recreates.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn exec(&self, container: &str, command: &str, _timeout: Duration) -> Result<()> {
        self.execs
            .lock()
            .unwrap()
            .push((container.to_string(), command.to_string()));
        if self.fail_exec.load(Ordering::SeqCst) {
            bail!("exec failed");
        }
        Ok(())
    }

    async fn update_memory(&self, container: &str, limit: &str, swappiness: u64) -> Result<()> {
        self.memory_updates
            .lock()
            .unwrap()
            .push((container.to_string(), limit.to_string(), swappiness));
        Ok(())
    }
}

/// Probe answering from a per-URL table; unknown URLs answer 200
#[derive(Default)]
pub struct MockProbe {
    pub responses: Mutex<HashMap<String, Option<u16>>>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` makes the probe fail outright
    pub fn respond(&self, url: &str, status: Option<u16>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), status);
    }
}

#[async_trait]
impl HttpProbe for MockProbe {
    async fn probe(&self, url: &str, _timeout: Duration) -> OptResult<u16> {
        match self.responses.lock().unwrap().get(url).copied() {
            Some(Some(status)) => Ok(status),
            Some(None) => Err(OptimizerError::ProbeFailed {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
            None => Ok(200),
        }
    }
}

#[derive(Default)]
pub struct MockHost {
    pub stats: Mutex<SystemStats>,
    pub drops: AtomicUsize,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_swap(&self, used: u64, total: u64) {
        let mut stats = self.stats.lock().unwrap();
        stats.swap_used = used;
        stats.swap_total = total;
    }
}

#[async_trait]
impl HostProbe for MockHost {
    async fn system_stats(&self) -> Result<SystemStats> {
        Ok(*self.stats.lock().unwrap())
    }

    async fn drop_caches(&self) -> Result<()> {
        self.drops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Clock that follows tokio's (pausable) time from a fixed epoch, so
/// `start_paused` tests can drive pollers and wall-clock deadlines together
pub struct TokioClock {
    base: i64,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(base: i64) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }
}

impl crate::clock::Clock for TokioClock {
    fn now(&self) -> i64 {
        self.base + self.start.elapsed().as_secs() as i64
    }
}
