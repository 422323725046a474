//! Per-instance append-only audit log (`opt-log.jsonl`)

use crate::clock::Clock;
use crate::models::LogEntry;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

const LOG_FILE: &str = "opt-log.jsonl";

pub struct AuditLog {
    instances_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(instances_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            instances_dir: instances_dir.into(),
            clock,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.instances_dir.join(name).join(LOG_FILE)
    }

    /// Append one entry; failures are logged and otherwise ignored
    pub async fn append(&self, name: &str, action: &str, info: Value) {
        let entry = LogEntry {
            ts: self.clock.now(),
            action: action.to_string(),
            info,
        };

        if let Err(e) = self.write_entry(name, &entry).await {
            warn!(instance = %name, action = %action, error = %e, "Failed to append audit entry");
        }
    }

    async fn write_entry(&self, name: &str, entry: &LogEntry) -> std::io::Result<()> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    /// Raw log text, empty when the instance has no log
    pub async fn tail(&self, name: &str) -> String {
        fs::read_to_string(self.path(name)).await.unwrap_or_default()
    }

    /// The last `lines` entries; unparsable lines are kept as `{"raw": ...}`
    pub async fn read(&self, name: &str, lines: usize) -> Vec<Value> {
        let content = self.tail(name).await;
        let all: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = all.len().saturating_sub(lines);

        all[start..]
            .iter()
            .map(|line| match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => serde_json::to_value(entry).unwrap_or(Value::Null),
                Err(_) => json!({ "raw": line }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(100);
        let log = AuditLog::new(dir.path(), Arc::new(clock.clone()));

        log.append("vm1", "restart", json!({"reason": "memory"})).await;
        clock.advance(5);
        log.append("vm1", "cooldown_skip", json!({})).await;

        let entries = log.read("vm1", 10).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["ts"], 100);
        assert_eq!(entries[0]["info"]["reason"], "memory");
        assert_eq!(entries[1]["action"], "cooldown_skip");
        assert_eq!(entries[1]["ts"], 105);

        let last = log.read("vm1", 1).await;
        assert_eq!(last.len(), 1);
        assert_eq!(last[0]["action"], "cooldown_skip");
    }

    #[tokio::test]
    async fn test_tail_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path(), Arc::new(ManualClock::new(0)));
        assert_eq!(log.tail("ghost").await, "");
        assert!(log.read("ghost", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_lines_kept_raw() {
        let dir = TempDir::new().unwrap();
        let instance_dir = dir.path().join("vm1");
        std::fs::create_dir_all(&instance_dir).unwrap();
        std::fs::write(
            instance_dir.join(LOG_FILE),
            "legacy plain text line\n{\"ts\":1,\"action\":\"restart\",\"info\":{}}\n",
        )
        .unwrap();

        let log = AuditLog::new(dir.path(), Arc::new(ManualClock::new(0)));
        let entries = log.read("vm1", 10).await;
        assert_eq!(entries[0]["raw"], "legacy plain text line");
        assert_eq!(entries[1]["action"], "restart");
    }
}
