//! Collaborator seams the optimizer drives
//!
//! Everything that touches the container runtime, the instance manager,
//! the host kernel or the network sits behind one of these traits. The
//! production implementations shell out or make HTTP requests; tests
//! substitute in-memory mocks.

mod docker;
mod host;
mod probe;

pub use docker::{parse_manager_list, DockerRuntime, DockerRuntimeConfig};
pub use host::{parse_meminfo, ProcHostProbe};
pub use probe::ReqwestProbe;

use crate::models::{ContainerStats, InstanceInfo, SystemStats};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Instance-lifecycle and container inspection surface
#[async_trait]
pub trait InstanceRuntime: Send + Sync {
    /// Instances known to the instance manager
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>>;

    /// Current resource figures for a running container
    async fn container_stats(&self, container: &str) -> Result<ContainerStats>;

    async fn restart(&self, container: &str) -> Result<()>;

    /// Destroy and recreate an instance from its definition
    async fn recreate(&self, name: &str) -> Result<()>;

    /// Run a shell command as root inside the container
    async fn exec(&self, container: &str, command: &str, timeout: Duration) -> Result<()>;

    /// Apply a memory ceiling (also used as the swap ceiling) and swappiness
    async fn update_memory(&self, container: &str, limit: &str, swappiness: u64) -> Result<()>;
}

/// Bounded-timeout reachability check
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// Returns the HTTP status code or [`crate::OptimizerError::ProbeFailed`]
    async fn probe(&self, url: &str, timeout: Duration) -> crate::Result<u16>;
}

/// Host memory accounting and page-cache control
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn system_stats(&self) -> Result<SystemStats>;

    async fn drop_caches(&self) -> Result<()>;
}

/// 2xx and 3xx responses count as healthy
pub fn is_healthy_status(status: u16) -> bool {
    (200..400).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_status_range() {
        assert!(is_healthy_status(200));
        assert!(is_healthy_status(302));
        assert!(!is_healthy_status(404));
        assert!(!is_healthy_status(503));
        assert!(!is_healthy_status(199));
    }
}
