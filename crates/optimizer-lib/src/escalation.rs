//! Per-instance threshold escalation
//!
//! Each instance carries its own memory and CPU thresholds. The first tick
//! over threshold records the exceed time and runs the in-place cleanup;
//! staying over threshold for the grace period escalates to a restart
//! (when auto reboot is enabled). Dropping back under both thresholds
//! clears the exceed time.

use crate::clock::Clock;
use crate::models::{Event, MetricsSnapshot, RestartReason};
use crate::observability::StructuredLogger;
use crate::remediation::{hard_event, HardAction, Outcome, RemediationExecutor, Target};
use crate::store::{AuditLog, GlobalConfig, InstanceRecord, StateStore};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;

pub struct ThresholdEscalationEngine {
    executor: Arc<RemediationExecutor>,
    store: Arc<StateStore>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
}

impl ThresholdEscalationEngine {
    pub fn new(
        executor: Arc<RemediationExecutor>,
        store: Arc<StateStore>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            executor,
            store,
            audit,
            clock,
            logger,
        }
    }

    pub async fn evaluate(&self, snapshot: &MetricsSnapshot, cfg: &GlobalConfig) -> Vec<Event> {
        let name = snapshot.instance.as_str();
        let record = self.store.load_instance(name).await;
        if !record.config.optimize_enabled {
            return Vec::new();
        }

        let now = self.clock.now();
        let (mem, cpu) = (snapshot.mem_pct, snapshot.cpu_pct);
        let exceeded =
            mem >= record.config.mem_threshold_pct || cpu >= record.config.cpu_threshold_pct;
        let last_exceed = record.state.last_threshold_exceed_ts;

        if !exceeded {
            if last_exceed != 0 {
                self.patch(name, &[("last_threshold_exceed_ts", json!(0))]).await;
                self.audit
                    .append(name, "threshold_recovered", json!({ "mem": mem, "cpu": cpu }))
                    .await;
                self.logger.log_threshold(name, "recovered", mem, cpu);
                return vec![Event::ThresholdRecovered {
                    instance: name.to_string(),
                }];
            }
            return Vec::new();
        }

        if last_exceed == 0 {
            return self.first_exceed(snapshot, &record, now).await;
        }

        if now.saturating_sub(last_exceed) >= record.config.threshold_grace_secs() {
            return self.persisted(snapshot, &record, cfg, now).await;
        }

        Vec::new()
    }

    async fn first_exceed(
        &self,
        snapshot: &MetricsSnapshot,
        record: &InstanceRecord,
        now: i64,
    ) -> Vec<Event> {
        let name = snapshot.instance.as_str();
        self.patch(name, &[("last_threshold_exceed_ts", json!(now))]).await;
        self.audit
            .append(
                name,
                "threshold_exceeded",
                json!({
                    "mem": snapshot.mem_pct,
                    "cpu": snapshot.cpu_pct,
                    "mem_th": record.config.mem_threshold_pct,
                    "cpu_th": record.config.cpu_threshold_pct,
                }),
            )
            .await;
        self.logger
            .log_threshold(name, "exceeded", snapshot.mem_pct, snapshot.cpu_pct);

        self.executor.soft_cleanup(name, &snapshot.container).await;
        self.patch(name, &[("last_optimize_ts", json!(self.clock.now()))])
            .await;

        vec![Event::SoftOptimize {
            instance: name.to_string(),
            mem_pct: snapshot.mem_pct,
            cpu_pct: snapshot.cpu_pct,
        }]
    }

    async fn persisted(
        &self,
        snapshot: &MetricsSnapshot,
        record: &InstanceRecord,
        cfg: &GlobalConfig,
        now: i64,
    ) -> Vec<Event> {
        let name = snapshot.instance.as_str();
        let auto_reboot = record.config.auto_reboot_enabled;

        self.audit
            .append(
                name,
                "threshold_persisted",
                json!({ "mem": snapshot.mem_pct, "cpu": snapshot.cpu_pct, "auto_reboot": auto_reboot }),
            )
            .await;
        self.logger
            .log_threshold(name, "persisted", snapshot.mem_pct, snapshot.cpu_pct);

        let mut events = vec![Event::ThresholdPersisted {
            instance: name.to_string(),
            auto_reboot,
        }];
        if !auto_reboot {
            return events;
        }

        let outcome = self
            .executor
            .hard(
                Target {
                    instance: name,
                    container: &snapshot.container,
                },
                HardAction::Restart,
                RestartReason::Threshold,
                cfg,
            )
            .await;

        if outcome == Outcome::Done {
            self.patch(
                name,
                &[
                    ("last_auto_restart_ts", json!(now)),
                    ("last_threshold_exceed_ts", json!(0)),
                ],
            )
            .await;
            self.audit
                .append(
                    name,
                    "auto_reboot",
                    json!({ "mem": snapshot.mem_pct, "cpu": snapshot.cpu_pct }),
                )
                .await;
        }

        events.push(hard_event(
            &outcome,
            HardAction::Restart,
            RestartReason::Threshold,
            name,
            snapshot.mem_pct.max(snapshot.cpu_pct),
        ));
        events
    }

    async fn patch(&self, name: &str, fields: &[(&str, Value)]) {
        let patch: Map<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        if let Err(e) = self.store.update_instance(name, patch).await {
            warn!(instance = %name, error = %e, "Failed to persist escalation state");
        }
    }
}
