//! Cancellable restart waiter
//!
//! A waiter owns one queued restart intent. It communicates with the rest
//! of the optimizer only through the persisted instance document: zeroing
//! `pending_restart_ts` cancels it, moving the timestamp postpones it, and
//! `restart_graceful_seconds` is re-read on every poll.

use crate::clock::Clock;
use crate::error::OptimizerError;
use crate::models::RestartReason;
use crate::observability::StructuredLogger;
use crate::remediation::{HardAction, Outcome, RemediationExecutor, Target};
use crate::store::{AuditLog, StateStore};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle of a queued restart: `Queued -> {Cancelled | Executing -> Done}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaiterState {
    Queued,
    Cancelled,
    Executing,
    Done,
}

pub struct RestartWaiter {
    pub(super) instance: String,
    pub(super) container: String,
    pub(super) executor: Arc<RemediationExecutor>,
    pub(super) store: Arc<StateStore>,
    pub(super) audit: Arc<AuditLog>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) logger: StructuredLogger,
    pub(super) poll_interval: Duration,
    /// Unix seconds the intent was first queued, for the audit trail
    pub(super) queued_at: i64,
}

impl RestartWaiter {
    /// Poll until cancelled or due, then execute. Returns the final state.
    pub async fn run(self) -> WaiterState {
        let mut state = WaiterState::Queued;

        while state == WaiterState::Queued {
            let record = self.store.load_instance(&self.instance).await;
            let pending = record.state.pending_restart_ts;
            let now = self.clock.now();

            if pending == 0 {
                state = self.transition(state, WaiterState::Cancelled, now);
                self.patch(&[("last_restart_cancel_ts", json!(now))]).await;
                self.audit
                    .append(
                        &self.instance,
                        "scheduled_restart_cancelled",
                        json!({ "since_start": now - self.queued_at }),
                    )
                    .await;
                return state;
            }

            let execute_at = pending.saturating_add(record.config.restart_graceful_seconds);
            if now >= execute_at {
                state = self.transition(state, WaiterState::Executing, execute_at);
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        self.audit
            .append(
                &self.instance,
                "scheduled_restart_executing",
                json!({ "started_at": self.queued_at }),
            )
            .await;

        let cfg = self.store.load_global().await;
        let outcome = self
            .executor
            .hard(
                Target {
                    instance: &self.instance,
                    container: &self.container,
                },
                HardAction::Restart,
                RestartReason::Scheduled,
                &cfg,
            )
            .await;

        let now = self.clock.now();
        match outcome {
            Outcome::Done => {
                self.patch(&[
                    ("last_auto_restart_ts", json!(now)),
                    ("pending_restart_ts", json!(0)),
                ])
                .await;
                self.audit
                    .append(&self.instance, "scheduled_restart_done", json!({}))
                    .await;
            }
            // Another trigger restarted the container first
            Outcome::SkippedCooldown { remaining_secs } => {
                self.patch(&[("pending_restart_ts", json!(0))]).await;
                self.audit
                    .append(
                        &self.instance,
                        "scheduled_restart_superseded",
                        json!({ "cooldown_remaining": remaining_secs }),
                    )
                    .await;
            }
            Outcome::Failed(OptimizerError::ConcurrentRestartRace { .. }) => {
                self.patch(&[("pending_restart_ts", json!(0))]).await;
                self.audit
                    .append(
                        &self.instance,
                        "scheduled_restart_superseded",
                        json!({ "race": true }),
                    )
                    .await;
            }
            // Clearing the intent lets the next tick queue a fresh one
            Outcome::Failed(e) => {
                self.patch(&[("pending_restart_ts", json!(0))]).await;
                self.audit
                    .append(
                        &self.instance,
                        "scheduled_restart_error",
                        json!({ "error": e.to_string() }),
                    )
                    .await;
            }
        }

        self.transition(state, WaiterState::Done, now)
    }

    fn transition(&self, from: WaiterState, to: WaiterState, at: i64) -> WaiterState {
        debug!(instance = %self.instance, from = ?from, to = ?to, "Restart waiter transition");
        self.logger.log_schedule(&self.instance, state_name(to), at);
        to
    }

    async fn patch(&self, fields: &[(&str, Value)]) {
        let patch: Map<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        if let Err(e) = self.store.update_instance(&self.instance, patch).await {
            warn!(instance = %self.instance, error = %e, "Failed to persist restart intent");
        }
    }
}

fn state_name(state: WaiterState) -> &'static str {
    match state {
        WaiterState::Queued => "queued",
        WaiterState::Cancelled => "cancelled",
        WaiterState::Executing => "executing",
        WaiterState::Done => "done",
    }
}
