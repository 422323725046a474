//! Persisted optimizer state
//!
//! Layout under the state directory:
//! - `.optimizer.json` global policy document
//! - `.optimizer_last_restart` fleet-level last restart timestamp
//! - `.optimizer_restarts/<safe>.last` shared (or scheduler-only) cooldown records
//! - `.optimizer_cooldowns/<safe>.last` remediation cooldown records when separate
//! - `instances/<name>/instance.json` per-instance overrides and bookkeeping
//! - `instances/<name>/opt-log.jsonl` audit log
//! - `instances/<name>/.health_warn`, `.health_fail` health markers

mod audit;
mod config;

pub use audit::AuditLog;
pub use config::{
    GlobalConfig, GuardToggles, InstanceConfig, InstanceRecord, InstanceState,
    INSTANCE_STATE_KEYS,
};

use crate::error::{OptimizerError, Result};
use crate::models::HealthStage;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const GLOBAL_CONFIG_FILE: &str = ".optimizer.json";
const LAST_GLOBAL_RESTART_FILE: &str = ".optimizer_last_restart";
const INSTANCES_DIR: &str = "instances";
const INSTANCE_DOC: &str = "instance.json";
const HEALTH_WARN_MARKER: &str = ".health_warn";
const HEALTH_FAIL_MARKER: &str = ".health_fail";

/// Which cooldown ledger a restart is recorded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownBucket {
    /// Scheduled restarts, and every restart when cooldowns are shared
    Restarts,
    /// Guard, escalation and health restarts when cooldowns are separate
    Remediation,
}

impl CooldownBucket {
    fn dir_name(&self) -> &'static str {
        match self {
            CooldownBucket::Restarts => ".optimizer_restarts",
            CooldownBucket::Remediation => ".optimizer_cooldowns",
        }
    }
}

fn invalid_value((key, reason): (&'static str, String)) -> OptimizerError {
    OptimizerError::InvalidConfig {
        key: key.to_string(),
        reason,
    }
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`
pub fn sanitize_container_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Reject names that cannot safely address an instance directory
pub fn validate_instance_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(OptimizerError::InvalidInstanceName(name.to_string()))
    }
}

/// File-backed store for configuration documents, markers and cooldowns
pub struct StateStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles on JSON documents
    doc_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            doc_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root.join(INSTANCES_DIR)
    }

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.instances_dir().join(name)
    }

    fn instance_doc_path(&self, name: &str) -> PathBuf {
        self.instance_dir(name).join(INSTANCE_DOC)
    }

    fn cooldown_path(&self, bucket: CooldownBucket, container: &str) -> PathBuf {
        self.root
            .join(bucket.dir_name())
            .join(format!("{}.last", sanitize_container_name(container)))
    }

    // ---------------------------------------------------------------------
    // Global configuration
    // ---------------------------------------------------------------------

    /// Raw global document; empty when missing or unreadable
    pub async fn load_global_document(&self) -> Map<String, Value> {
        read_json_object(&self.root.join(GLOBAL_CONFIG_FILE)).await
    }

    /// Global policy with defaults for anything missing or malformed
    pub async fn load_global(&self) -> GlobalConfig {
        let doc = self.load_global_document().await;
        match serde_json::from_value(Value::Object(doc)) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "Global config document is invalid, using defaults");
                GlobalConfig::default()
            }
        }
    }

    /// Set one top-level key of the global document.
    ///
    /// `guards` merges key-wise; every other key is replaced. The merged
    /// document must still parse as a [`GlobalConfig`].
    pub async fn set_global_key(&self, key: &str, value: Value) -> Result<GlobalConfig> {
        if key.is_empty() {
            return Err(OptimizerError::InvalidConfig {
                key: key.to_string(),
                reason: "missing key".to_string(),
            });
        }

        let _guard = self.doc_lock.lock().await;
        let mut doc = self.load_global_document().await;

        match (key, value) {
            ("guards", Value::Object(patch)) => {
                let guards = doc
                    .entry("guards")
                    .or_insert_with(|| Value::Object(Map::new()));
                if !guards.is_object() {
                    *guards = Value::Object(Map::new());
                }
                if let Value::Object(existing) = guards {
                    existing.extend(patch);
                }
            }
            (key, value) => {
                doc.insert(key.to_string(), value);
            }
        }

        let cfg: GlobalConfig = serde_json::from_value(Value::Object(doc.clone())).map_err(
            |e| OptimizerError::InvalidConfig {
                key: key.to_string(),
                reason: e.to_string(),
            },
        )?;
        cfg.validate().map_err(invalid_value)?;

        write_json(&self.root.join(GLOBAL_CONFIG_FILE), &Value::Object(doc)).await?;
        Ok(cfg)
    }

    pub async fn last_global_restart(&self) -> i64 {
        read_timestamp(&self.root.join(LAST_GLOBAL_RESTART_FILE)).await
    }

    pub async fn set_last_global_restart(&self, ts: i64) -> Result<()> {
        write_text(&self.root.join(LAST_GLOBAL_RESTART_FILE), &ts.to_string()).await
    }

    // ---------------------------------------------------------------------
    // Instances
    // ---------------------------------------------------------------------

    /// Names of instances that have a state directory
    pub async fn list_instance_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(self.instances_dir()).await {
            Ok(entries) => entries,
            Err(_) => return names,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        names.sort();
        names
    }

    /// Create the instance record with defaults on first discovery
    pub async fn ensure_instance(&self, name: &str) -> Result<InstanceRecord> {
        validate_instance_name(name)?;
        let path = self.instance_doc_path(name);

        let _guard = self.doc_lock.lock().await;
        if fs::metadata(&path).await.is_err() {
            debug!(instance = %name, "Creating instance record with defaults");
            let record = InstanceRecord::default();
            let value = serde_json::to_value(&record)
                .map_err(|e| OptimizerError::persist(e.to_string()))?;
            write_json(&path, &value).await?;
            return Ok(record);
        }
        drop(_guard);

        Ok(self.load_instance(name).await)
    }

    /// Instance record with defaults for anything missing or malformed
    pub async fn load_instance(&self, name: &str) -> InstanceRecord {
        let doc = read_json_object(&self.instance_doc_path(name)).await;
        match serde_json::from_value(Value::Object(doc)) {
            Ok(record) => record,
            Err(e) => {
                warn!(instance = %name, error = %e, "Instance document is invalid, using defaults");
                InstanceRecord::default()
            }
        }
    }

    /// Merge `patch` into the instance document, keeping foreign keys
    pub async fn update_instance(&self, name: &str, patch: Map<String, Value>) -> Result<()> {
        validate_instance_name(name)?;
        let path = self.instance_doc_path(name);

        let _guard = self.doc_lock.lock().await;
        let mut doc = read_json_object(&path).await;
        doc.extend(patch);
        write_json(&path, &Value::Object(doc)).await
    }

    /// Set one key of the instance document after validating the result
    pub async fn set_instance_key(
        &self,
        name: &str,
        key: &str,
        value: Value,
    ) -> Result<InstanceRecord> {
        validate_instance_name(name)?;
        let path = self.instance_doc_path(name);

        let _guard = self.doc_lock.lock().await;
        let mut doc = read_json_object(&path).await;
        doc.insert(key.to_string(), value);

        let record: InstanceRecord = serde_json::from_value(Value::Object(doc.clone()))
            .map_err(|e| OptimizerError::InvalidConfig {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        record.config.validate().map_err(invalid_value)?;

        write_json(&path, &Value::Object(doc)).await?;
        Ok(record)
    }

    /// Drop every trace of an instance: directory, log, markers, cooldowns
    pub async fn remove_instance(&self, name: &str, container: &str) -> Result<()> {
        validate_instance_name(name)?;

        let _guard = self.doc_lock.lock().await;
        match fs::remove_dir_all(self.instance_dir(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(OptimizerError::persist(e)),
        }

        for bucket in [CooldownBucket::Restarts, CooldownBucket::Remediation] {
            let _ = fs::remove_file(self.cooldown_path(bucket, container)).await;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Health markers
    // ---------------------------------------------------------------------

    pub async fn health_stage(&self, name: &str) -> HealthStage {
        let dir = self.instance_dir(name);
        if fs::metadata(dir.join(HEALTH_FAIL_MARKER)).await.is_ok() {
            HealthStage::Restarted
        } else if fs::metadata(dir.join(HEALTH_WARN_MARKER)).await.is_ok() {
            HealthStage::Warned
        } else {
            HealthStage::None
        }
    }

    pub async fn set_health_stage(&self, name: &str, stage: HealthStage, ts: i64) -> Result<()> {
        validate_instance_name(name)?;
        let dir = self.instance_dir(name);
        let warn_marker = dir.join(HEALTH_WARN_MARKER);
        let fail_marker = dir.join(HEALTH_FAIL_MARKER);

        match stage {
            HealthStage::None => {
                let _ = fs::remove_file(&fail_marker).await;
                let _ = fs::remove_file(&warn_marker).await;
                Ok(())
            }
            HealthStage::Warned => write_text(&warn_marker, &ts.to_string()).await,
            HealthStage::Restarted => {
                if fs::metadata(&warn_marker).await.is_err() {
                    write_text(&warn_marker, &ts.to_string()).await?;
                }
                write_text(&fail_marker, &ts.to_string()).await
            }
        }
    }

    // ---------------------------------------------------------------------
    // Cooldown records
    // ---------------------------------------------------------------------

    pub async fn last_restart(&self, bucket: CooldownBucket, container: &str) -> i64 {
        read_timestamp(&self.cooldown_path(bucket, container)).await
    }

    pub async fn record_restart(
        &self,
        bucket: CooldownBucket,
        container: &str,
        ts: i64,
    ) -> Result<()> {
        write_text(&self.cooldown_path(bucket, container), &ts.to_string()).await
    }
}

async fn read_json_object(path: &Path) -> Map<String, Value> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(_) => return Map::new(),
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!(path = %path.display(), "Ignoring unreadable JSON document");
            Map::new()
        }
    }
}

async fn read_timestamp(path: &Path) -> i64 {
    fs::read_to_string(path)
        .await
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

async fn write_json(path: &Path, value: &Value) -> Result<()> {
    let content =
        serde_json::to_string_pretty(value).map_err(|e| OptimizerError::persist(e))?;
    write_text(path, &content).await
}

/// Write through a temporary file and rename so readers never see a torn file
async fn write_text(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| OptimizerError::persist(format!("{}: {}", parent.display(), e)))?;
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)
        .await
        .map_err(|e| OptimizerError::persist(format!("{}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| OptimizerError::persist(format!("{}: {}", path.display(), e)))
}
