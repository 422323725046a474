//! Reachability guard with three-stage escalation
//!
//! Per instance, consecutive probe failures move through the persisted
//! marker stages: the first writes the warn marker and does nothing else,
//! the second restarts the container, the third recreates the instance.
//! Only one restart or recreate happens per tick; the instance at the
//! highest stage wins (ties broken by name) and the rest are deferred
//! without touching their markers. A successful probe clears the markers.

use super::{Guard, GuardContext};
use crate::clock::Clock;
use crate::models::{Event, HealthStage, InstanceInfo, RestartReason};
use crate::remediation::{hard_event, HardAction, Outcome, RemediationExecutor, Target};
use crate::runtime::{is_healthy_status, HttpProbe};
use crate::store::{AuditLog, StateStore};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct HealthGuard {
    executor: Arc<RemediationExecutor>,
    probe: Arc<dyn HttpProbe>,
    store: Arc<StateStore>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    /// Per-probe timeout (default: 6 seconds)
    timeout: Duration,
}

impl HealthGuard {
    pub fn new(
        executor: Arc<RemediationExecutor>,
        probe: Arc<dyn HttpProbe>,
        store: Arc<StateStore>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            probe,
            store,
            audit,
            clock,
            timeout: Duration::from_secs(6),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn is_healthy(&self, url: &str) -> bool {
        match self.probe.probe(url, self.timeout).await {
            Ok(status) => is_healthy_status(status),
            Err(e) => {
                debug!(url = %url, error = %e, "Health probe failed");
                false
            }
        }
    }

    async fn set_stage(&self, name: &str, stage: HealthStage) {
        if let Err(e) = self
            .store
            .set_health_stage(name, stage, self.clock.now())
            .await
        {
            warn!(instance = %name, error = %e, "Failed to update health marker");
        }
    }
}

#[async_trait]
impl Guard for HealthGuard {
    fn kind(&self) -> RestartReason {
        RestartReason::Health
    }

    async fn evaluate(&self, ctx: &GuardContext<'_>) -> Vec<Event> {
        let probed: Vec<(&InstanceInfo, &str)> = ctx
            .instances
            .iter()
            .filter_map(|i| i.url.as_deref().map(|url| (i, url)))
            .collect();

        let results = join_all(probed.iter().map(|(_, url)| self.is_healthy(url))).await;

        let mut events = Vec::new();
        // Failing instances already past the warn stage, with their stage
        let mut escalations: Vec<(HealthStage, &InstanceInfo)> = Vec::new();

        for ((instance, url), healthy) in probed.iter().zip(results) {
            let stage = self.store.health_stage(&instance.name).await;

            if healthy {
                if stage != HealthStage::None {
                    info!(instance = %instance.name, "Instance healthy again, clearing markers");
                    self.set_stage(&instance.name, HealthStage::None).await;
                    self.audit
                        .append(&instance.name, "health_recovered", json!({ "url": url }))
                        .await;
                    events.push(Event::HealthRecovered {
                        instance: instance.name.clone(),
                    });
                }
                continue;
            }

            match stage {
                HealthStage::None => {
                    warn!(instance = %instance.name, url = %url, "Health check failed, warning");
                    self.set_stage(&instance.name, HealthStage::Warned).await;
                    self.audit
                        .append(&instance.name, "health_warn", json!({ "url": url }))
                        .await;
                    events.push(Event::HealthWarn {
                        instance: instance.name.clone(),
                    });
                }
                stage => escalations.push((stage, *instance)),
            }
        }

        // Highest stage first, then name order
        escalations.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.name.cmp(&b.name)));

        let mut escalations = escalations.into_iter();
        if let Some((stage, chosen)) = escalations.next() {
            let action = if stage == HealthStage::Restarted {
                HardAction::Recreate
            } else {
                HardAction::Restart
            };

            let outcome = self
                .executor
                .hard(
                    Target {
                        instance: &chosen.name,
                        container: &chosen.container_name,
                    },
                    action,
                    RestartReason::Health,
                    ctx.cfg,
                )
                .await;

            if outcome == Outcome::Done && action == HardAction::Restart {
                self.set_stage(&chosen.name, HealthStage::Restarted).await;
            }
            events.push(hard_event(
                &outcome,
                action,
                RestartReason::Health,
                &chosen.name,
                0.0,
            ));
        }

        for (_, deferred) in escalations {
            debug!(instance = %deferred.name, "Health remediation deferred to a later tick");
            self.audit
                .append(&deferred.name, "health_deferred", json!({}))
                .await;
            events.push(Event::HealthDeferred {
                instance: deferred.name.clone(),
            });
        }

        events
    }
}
