// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`DlqService`]: operator/customer-facing dead-letter operations (§6.2) — list, replay
//! (one or batch), discard, purge older than N days.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{DeadLetterRecord, DeliveryJob, DlqStatus, JobStatus};
use crate::scope::Scope;
use crate::store::{RelationalStore, StoreError};

/// Errors a dead-letter operation can return.
#[derive(Debug, Error)]
pub enum DlqServiceError {
    /// Underlying store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// No dead-letter record exists with the given id, visible through the caller's scope.
    #[error("dead-letter record '{0}' not found")]
    NotFound(String),
    /// The record has already been replayed or discarded.
    #[error("dead-letter record '{0}' is not in a replayable state")]
    NotReplayable(String),
}

/// Dead-letter queue operations, layered over a [`RelationalStore`].
pub struct DlqService {
    store: Arc<dyn RelationalStore>,
}

impl DlqService {
    /// Build a service over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// List dead-letter records visible through `scope`.
    pub async fn list(&self, scope: &Scope) -> Result<Vec<DeadLetterRecord>, DlqServiceError> {
        Ok(self.store.list_dlq(scope).await?)
    }

    /// Replay one dead-letter record: re-enqueues a fresh `PENDING` [`DeliveryJob`] against the
    /// original destination and marks the record `Replayed`. Returns the new job id.
    pub async fn replay_one(&self, scope: &Scope, dlq_id: &str) -> Result<String, DlqServiceError> {
        let record = self
            .store
            .get_dlq(scope, dlq_id)
            .await?
            .ok_or_else(|| DlqServiceError::NotFound(dlq_id.to_string()))?;
        if record.status != DlqStatus::Failed {
            return Err(DlqServiceError::NotReplayable(dlq_id.to_string()));
        }

        let job_id = Uuid::new_v4().to_string();
        let job = DeliveryJob {
            job_id: job_id.clone(),
            tenant_id: record.tenant_id.clone(),
            alert_id: None,
            message_ref: record.route_id.clone(),
            integration_id: record.integration_id.clone(),
            status: JobStatus::Pending,
            attempts: 0,
            next_attempt_at: Utc::now(),
            last_error: None,
            created_at: Utc::now(),
            claim_token: None,
            claim_deadline: None,
            payload: record.payload.clone(),
        };
        self.store.insert_job(scope, job).await?;
        self.store
            .update_dlq_status(scope, dlq_id, DlqStatus::Replayed, Some(Utc::now()))
            .await?;
        Ok(job_id)
    }

    /// Replay every `Failed` record currently visible through `scope`, best-effort: a failure
    /// replaying one record doesn't stop the rest.
    pub async fn replay_batch(&self, scope: &Scope) -> Result<Vec<String>, DlqServiceError> {
        let records = self.list(scope).await?;
        let mut job_ids = Vec::new();
        for record in records.into_iter().filter(|r| r.status == DlqStatus::Failed) {
            match self.replay_one(scope, &record.dlq_id).await {
                Ok(job_id) => job_ids.push(job_id),
                Err(err) => log::warn!("batch replay skipped {}: {err}", record.dlq_id),
            }
        }
        Ok(job_ids)
    }

    /// Mark a record `Discarded`, removing it from future replay consideration without
    /// deleting it.
    pub async fn discard(&self, scope: &Scope, dlq_id: &str) -> Result<(), DlqServiceError> {
        self.store
            .update_dlq_status(scope, dlq_id, DlqStatus::Discarded, None)
            .await?;
        Ok(())
    }

    /// Purge records older than `older_than_days`, returning the count removed.
    pub async fn purge(&self, scope: &Scope, older_than_days: i64) -> Result<usize, DlqServiceError> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        Ok(self.store.purge_dlq_older_than(scope, cutoff).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DestinationType;
    use crate::store::MemoryStore;

    async fn seeded() -> (DlqService, Scope, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let scope = Scope::tenant("t1");
        store
            .insert_dlq(
                &scope,
                DeadLetterRecord {
                    dlq_id: "q1".to_string(),
                    tenant_id: "t1".to_string(),
                    integration_id: "route:r1".to_string(),
                    route_id: Some("r1".to_string()),
                    original_topic: "tenant/t1/device/d1/telemetry".to_string(),
                    payload: serde_json::json!({}),
                    destination_type: DestinationType::Webhook,
                    destination_config: serde_json::json!({}),
                    error_message: "simulated".to_string(),
                    attempts: 5,
                    status: DlqStatus::Failed,
                    created_at: Utc::now(),
                    replayed_at: None,
                },
            )
            .await
            .unwrap();
        (DlqService::new(store.clone()), scope, store)
    }

    #[tokio::test]
    async fn replay_one_enqueues_job_and_marks_replayed() {
        let (service, scope, store) = seeded().await;
        let job_id = service.replay_one(&scope, "q1").await.unwrap();
        assert!(store.get_job(&job_id).await.unwrap().is_some());

        let record = store.get_dlq(&scope, "q1").await.unwrap().unwrap();
        assert_eq!(record.status, DlqStatus::Replayed);
    }

    #[tokio::test]
    async fn cannot_replay_twice() {
        let (service, scope, _store) = seeded().await;
        service.replay_one(&scope, "q1").await.unwrap();
        let err = service.replay_one(&scope, "q1").await.unwrap_err();
        assert!(matches!(err, DlqServiceError::NotReplayable(_)));
    }

    #[tokio::test]
    async fn replay_of_alert_originated_record_targets_real_integration() {
        let store = Arc::new(MemoryStore::new());
        let scope = Scope::tenant("t1");
        store
            .insert_dlq(
                &scope,
                DeadLetterRecord {
                    dlq_id: "q2".to_string(),
                    tenant_id: "t1".to_string(),
                    integration_id: "i-email-1".to_string(),
                    route_id: None,
                    original_topic: String::new(),
                    payload: serde_json::json!({"alertId": "a1"}),
                    destination_type: DestinationType::Webhook,
                    destination_config: serde_json::json!({"to": "oncall@example.com"}),
                    error_message: "simulated".to_string(),
                    attempts: 5,
                    status: DlqStatus::Failed,
                    created_at: Utc::now(),
                    replayed_at: None,
                },
            )
            .await
            .unwrap();
        let service = DlqService::new(store.clone());

        let job_id = service.replay_one(&scope, "q2").await.unwrap();
        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.integration_id, "i-email-1");
    }

    #[tokio::test]
    async fn purge_removes_old_records() {
        let (service, scope, store) = seeded().await;
        let removed = service.purge(&scope, -1).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.list_dlq(&scope).await.unwrap().is_empty());
    }
}
