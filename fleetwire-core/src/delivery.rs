// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`DeliveryWorker`]: claims `PENDING` jobs, dispatches them to the protocol sender matching
//! the job's integration kind, and applies the retry policy from §4.10 — exponential backoff
//! (base 2 s, cap 300 s, jitter ±20%), five attempts, then `FAILED` + a [`DeadLetterRecord`].
//! The claim-token CAS and deadline reaping live in [`crate::store::RelationalStore`]; this
//! module only decides what to do with a job once it holds the claim.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::health::HealthCounters;
use crate::model::{DeadLetterRecord, DestinationType, DlqStatus, Integration, IntegrationKind};
use crate::scope::Scope;
use crate::senders::{DeliveryRequest, Sender};
use crate::store::{RelationalStore, StoreError};

const BASE_SECS: u64 = 2;
const CAP_SECS: u64 = 300;
const JITTER_FRACTION: f64 = 0.2;

/// Compute the backoff delay before attempt number `attempt` (1-indexed), base 2 s doubling
/// per attempt, capped at 300 s, with up to ±20% jitter.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let base = BASE_SECS.saturating_mul(2u64.saturating_pow(exponent));
    let capped = base.min(CAP_SECS);
    let jitter = rand::thread_rng().gen_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
    Duration::from_secs_f64((capped as f64 * jitter).max(0.0))
}

/// Best-effort mapping from an integration's protocol kind to the route-destination vocabulary
/// [`DeadLetterRecord`] snapshots its destination as. `Email`/`Snmp` integrations have no
/// route-destination analogue (routes only ever target webhook/mqtt_republish/postgresql), so
/// they fall back to `Webhook`; the `destination_config` snapshot alongside it still carries
/// the real SMTP/SNMP configuration, so no delivery detail is lost.
fn destination_type_for_kind(kind: IntegrationKind) -> DestinationType {
    match kind {
        IntegrationKind::Webhook | IntegrationKind::Email | IntegrationKind::Snmp => DestinationType::Webhook,
        IntegrationKind::Mqtt => DestinationType::MqttRepublish,
    }
}

/// Worker that repeatedly claims and delivers jobs until cancelled.
pub struct DeliveryWorker {
    store: Arc<dyn RelationalStore>,
    senders: HashMap<IntegrationKind, Arc<dyn Sender>>,
    health: Arc<HealthCounters>,
    max_attempts: u32,
    claim_lease: chrono::Duration,
    poll_interval: Duration,
}

impl DeliveryWorker {
    /// Build a worker dispatching to `senders` (one per [`IntegrationKind`]).
    #[must_use]
    pub fn new(
        store: Arc<dyn RelationalStore>,
        senders: HashMap<IntegrationKind, Arc<dyn Sender>>,
        health: Arc<HealthCounters>,
        max_attempts: u32,
        claim_lease: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            senders,
            health,
            max_attempts,
            claim_lease: chrono::Duration::from_std(claim_lease).unwrap_or(chrono::Duration::seconds(30)),
            poll_interval,
        }
    }

    /// Poll for and deliver jobs until `cancel` fires. In-flight attempts are finished before
    /// returning, per §5's shutdown ordering (delivery workers finish in-flight attempts).
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.claim_and_deliver_one().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(err) => {
                    log::error!("delivery worker store error: {err}");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Claim and process exactly one job, returning `Ok(true)` if one was available.
    pub async fn claim_and_deliver_one(&self) -> Result<bool, StoreError> {
        let claim_token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let deadline = now + self.claim_lease;
        let Some(job) = self.store.claim_next_job(&claim_token, deadline, now).await? else {
            return Ok(false);
        };

        let scope = Scope::tenant(job.tenant_id.clone());
        let integration = if let Some(route_id) = job.integration_id.strip_prefix("route:") {
            // Route-originated webhook jobs carry their destination config inline rather than
            // through a stored Integration row.
            let _ = route_id;
            Integration {
                integration_id: job.integration_id.clone(),
                tenant_id: job.tenant_id.clone(),
                kind: IntegrationKind::Webhook,
                config: job.payload.get("destinationConfig").cloned().unwrap_or(serde_json::json!({})),
                enabled: true,
            }
        } else {
            match self.store.get_integration(&scope, &job.integration_id).await? {
                Some(integration) => integration,
                None => {
                    self.terminal_fail(&job.job_id, &claim_token, &scope, &job, None, "integration not found")
                        .await?;
                    return Ok(true);
                }
            }
        };

        let Some(sender) = self.senders.get(&integration.kind) else {
            self.terminal_fail(
                &job.job_id,
                &claim_token,
                &scope,
                &job,
                Some(&integration),
                "no sender configured for integration kind",
            )
            .await?;
            return Ok(true);
        };

        let request = DeliveryRequest {
            payload: job.payload.clone(),
            destination_config: integration.config.clone(),
        };
        let outcome = sender.send(&request).await;

        if outcome.success {
            self.store.complete_job(&job.job_id, &claim_token).await?;
            self.health.record_delivery_succeeded();
            return Ok(true);
        }

        let error = outcome.error.unwrap_or_else(|| "delivery failed".to_string());
        if !outcome.retryable || job.attempts + 1 >= self.max_attempts {
            self.terminal_fail(&job.job_id, &claim_token, &scope, &job, Some(&integration), &error)
                .await?;
            return Ok(true);
        }

        let next_attempt_at = Utc::now()
            + chrono::Duration::from_std(backoff_delay(job.attempts + 1)).unwrap_or(chrono::Duration::seconds(2));
        self.store
            .retry_job(&job.job_id, &claim_token, error, next_attempt_at)
            .await?;
        self.health.record_delivery_retried();
        Ok(true)
    }

    async fn terminal_fail(
        &self,
        job_id: &str,
        claim_token: &str,
        scope: &Scope,
        job: &crate::model::DeliveryJob,
        integration: Option<&Integration>,
        error: &str,
    ) -> Result<(), StoreError> {
        self.store.fail_job(job_id, claim_token, error.to_string()).await?;
        self.health.record_delivery_dead_lettered();
        let (destination_type, destination_config) = match integration {
            Some(integration) => (destination_type_for_kind(integration.kind), integration.config.clone()),
            None => (DestinationType::Webhook, serde_json::json!({})),
        };
        let record = DeadLetterRecord {
            dlq_id: Uuid::new_v4().to_string(),
            tenant_id: job.tenant_id.clone(),
            integration_id: job.integration_id.clone(),
            route_id: job.integration_id.strip_prefix("route:").map(str::to_string),
            original_topic: job.message_ref.clone().unwrap_or_default(),
            payload: job.payload.clone(),
            destination_type,
            destination_config,
            error_message: error.to_string(),
            attempts: job.attempts + 1,
            status: DlqStatus::Failed,
            created_at: Utc::now(),
            replayed_at: None,
        };
        self.store.insert_dlq(scope, record).await
    }
}
