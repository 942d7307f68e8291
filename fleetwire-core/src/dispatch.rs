// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`Dispatcher`]: converts an event — a newly opened alert, or an envelope matched by a
//! [`crate::routes::RouteEngine`] route — into one or more persisted [`DeliveryJob`]s. Jobs are
//! always written before any network call is attempted (§4.10), so a crash between dispatch
//! and delivery loses no work; the job is simply picked up PENDING on restart.

use std::sync::Arc;

use chrono::Utc;

use crate::model::{DeliveryJob, DestinationType, FleetAlert, JobStatus, MessageRoute};
use crate::scope::Scope;
use crate::store::{RelationalStore, StoreError};

/// Converts alerts and routed messages into persisted delivery jobs.
pub struct Dispatcher {
    store: Arc<dyn RelationalStore>,
}

impl Dispatcher {
    /// Build a dispatcher over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Enqueue a delivery job for `alert` against `integration_id`, unless the alert is
    /// silenced (silencing suppresses dispatch, not visibility; §4.6).
    pub async fn dispatch_alert(
        &self,
        scope: &Scope,
        alert: &FleetAlert,
        integration_id: &str,
    ) -> Result<Option<String>, StoreError> {
        if alert.silenced {
            return Ok(None);
        }
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = DeliveryJob {
            job_id: job_id.clone(),
            tenant_id: alert.tenant_id.clone(),
            alert_id: Some(alert.alert_id.clone()),
            message_ref: None,
            integration_id: integration_id.to_string(),
            status: JobStatus::Pending,
            attempts: 0,
            next_attempt_at: Utc::now(),
            last_error: None,
            created_at: Utc::now(),
            claim_token: None,
            claim_deadline: None,
            payload: serde_json::json!({
                "alertId": alert.alert_id,
                "deviceId": alert.device_id,
                "alertType": alert.alert_type,
                "severity": alert.severity,
                "summary": alert.summary,
                "details": alert.details,
            }),
        };
        self.store.insert_job(scope, job).await?;
        Ok(Some(job_id))
    }

    /// Dispatch a route match: a `webhook` route enqueues a delivery job against a synthetic
    /// integration derived from `destinationConfig`; `mqtt_republish` and `postgresql` routes
    /// are handled by the caller (synchronous publish, or no-op respectively) rather than here,
    /// since they don't produce a durable job.
    pub async fn dispatch_route_match(
        &self,
        scope: &Scope,
        route: &MessageRoute,
        message_ref: &str,
        payload: serde_json::Value,
    ) -> Result<Option<String>, StoreError> {
        if route.destination_type != DestinationType::Webhook {
            return Ok(None);
        }
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = DeliveryJob {
            job_id: job_id.clone(),
            tenant_id: route.tenant_id.clone(),
            alert_id: None,
            message_ref: Some(message_ref.to_string()),
            integration_id: format!("route:{}", route.route_id),
            status: JobStatus::Pending,
            attempts: 0,
            next_attempt_at: Utc::now(),
            last_error: None,
            created_at: Utc::now(),
            claim_token: None,
            claim_deadline: None,
            payload: serde_json::json!({
                "routeId": route.route_id,
                "destinationConfig": route.destination_config,
                "message": payload,
            }),
        };
        self.store.insert_job(scope, job).await?;
        Ok(Some(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertStatus, DestinationType};
    use crate::store::MemoryStore;

    fn alert() -> FleetAlert {
        FleetAlert {
            alert_id: "a1".to_string(),
            tenant_id: "t1".to_string(),
            device_id: "d1".to_string(),
            alert_type: "THRESHOLD".to_string(),
            severity: 3,
            status: AlertStatus::Open,
            silenced: false,
            summary: "temp_c GT 80".to_string(),
            created_at: Utc::now(),
            closed_at: None,
            fingerprint: 1,
            details: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn silenced_alert_produces_no_job() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(store);
        let mut a = alert();
        a.silenced = true;
        let result = dispatcher.dispatch_alert(&Scope::tenant("t1"), &a, "i1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn open_alert_enqueues_job() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(store.clone());
        let job_id = dispatcher
            .dispatch_alert(&Scope::tenant("t1"), &alert(), "i1")
            .await
            .unwrap()
            .unwrap();
        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.alert_id.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn non_webhook_route_produces_no_job() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(store);
        let route = MessageRoute {
            route_id: "r1".to_string(),
            tenant_id: "t1".to_string(),
            name: "r1".to_string(),
            topic_filter: "tenant/+/device/+/telemetry".to_string(),
            destination_type: DestinationType::Postgresql,
            destination_config: serde_json::json!({}),
            payload_filter: None,
            enabled: true,
        };
        let result = dispatcher
            .dispatch_route_match(&Scope::tenant("t1"), &route, "m1", serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
