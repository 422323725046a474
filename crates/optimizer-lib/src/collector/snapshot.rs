//! Latest metrics, written once per tick

use crate::models::{MetricsSnapshot, SystemStats};
use dashmap::DashMap;
use std::sync::RwLock;
use tracing::debug;

/// Live per-instance snapshots plus the latest host figures.
///
/// The collector is the only writer; everything else reads through the
/// accessors.
#[derive(Default)]
pub struct SnapshotStore {
    /// Map of instance name -> latest snapshot
    snapshots: DashMap<String, MetricsSnapshot>,
    system: RwLock<Option<SystemStats>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the per-instance set with one tick's results.
    ///
    /// Instances missing from `snapshots` (stopped or uninspectable this
    /// tick) are dropped so stale figures never drive a remediation.
    pub fn replace(&self, snapshots: Vec<MetricsSnapshot>) {
        let fresh: std::collections::HashSet<String> =
            snapshots.iter().map(|s| s.instance.clone()).collect();
        self.snapshots.retain(|name, _| fresh.contains(name));

        for snapshot in snapshots {
            self.snapshots.insert(snapshot.instance.clone(), snapshot);
        }
        debug!(instances = self.snapshots.len(), "Snapshot store updated");
    }

    /// Latest snapshot for one instance
    pub fn get(&self, name: &str) -> Option<MetricsSnapshot> {
        self.snapshots.get(name).map(|r| r.clone())
    }

    /// All snapshots ordered by instance name
    pub fn all(&self) -> Vec<MetricsSnapshot> {
        let mut all: Vec<MetricsSnapshot> =
            self.snapshots.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.instance.cmp(&b.instance));
        all
    }

    pub fn remove(&self, name: &str) -> Option<MetricsSnapshot> {
        self.snapshots.remove(name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn set_system(&self, stats: Option<SystemStats>) {
        if let Ok(mut guard) = self.system.write() {
            *guard = stats;
        }
    }

    pub fn system(&self) -> Option<SystemStats> {
        self.system.read().ok().and_then(|guard| *guard)
    }
}
