// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`RelationalStore`] and [`TimeSeriesStore`]: the storage contracts every component depends
//! on, plus in-memory implementations sufficient for tests and for running the whole pipeline
//! without an external database. A real deployment wires a Postgres/Timescale adapter, or a
//! dedicated columnar time-series store, behind these same traits.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    AlertStatus, DeadLetterRecord, DeliveryJob, DlqStatus, FleetAlert, Integration, JobStatus,
    MessageRoute, Tenant, TelemetryPoint,
};
use fleetwire_protocol::MetricValue;

use crate::model::DeviceRegistryRecord;
use crate::scope::Scope;

/// Errors surfaced by a storage adapter. Infrastructure failures (store unreachable, write
/// failed) are distinguished from a denied write (scope does not own the row).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The scope does not permit writing (or in rare adapters, reading) the targeted row.
    #[error("scope does not permit access to tenant '{0}'")]
    ScopeDenied(String),
    /// Referenced a row that does not exist, where existence was required.
    #[error("no such row: {0}")]
    NotFound(String),
    /// Underlying adapter failed (connection error, timeout, etc).
    #[error("store backend error: {0}")]
    Backend(String),
    /// Violated a uniqueness invariant (e.g. duplicate active alert fingerprint).
    #[error("uniqueness violation: {0}")]
    Conflict(String),
}

/// Storage contract for every relational entity (Tenant, DeviceRegistryRecord, AlertRule,
/// FleetAlert, MessageRoute, Integration, DeliveryJob, DeadLetterRecord, AuditRecord).
///
/// Every method takes a [`Scope`]; reads are filtered to the scope's tenant (or unfiltered in
/// operator mode), and writes to a tenant-owned row the scope does not permit are denied.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// List tenants visible through `scope`.
    async fn list_tenants(&self, scope: &Scope) -> Result<Vec<Tenant>, StoreError>;

    /// Fetch a single device registry record, if visible through `scope`.
    async fn get_device(
        &self,
        scope: &Scope,
        device_id: &str,
    ) -> Result<Option<DeviceRegistryRecord>, StoreError>;

    /// List device registry records visible through `scope`.
    async fn list_devices(&self, scope: &Scope) -> Result<Vec<DeviceRegistryRecord>, StoreError>;

    /// Insert or replace a device registry record.
    async fn put_device(&self, scope: &Scope, record: DeviceRegistryRecord) -> Result<(), StoreError>;

    /// List currently-enabled alert rules visible through `scope`.
    async fn list_enabled_rules(&self, scope: &Scope) -> Result<Vec<crate::model::AlertRule>, StoreError>;

    /// Insert or replace an alert rule.
    async fn put_rule(&self, scope: &Scope, rule: crate::model::AlertRule) -> Result<(), StoreError>;

    /// Find an `Open`/`Acknowledged` alert with the given fingerprint, if one exists.
    async fn find_active_alert_by_fingerprint(
        &self,
        scope: &Scope,
        fingerprint: u64,
    ) -> Result<Option<FleetAlert>, StoreError>;

    /// Insert a new alert. Rejected with [`StoreError::Conflict`] if an `Open`/`Acknowledged`
    /// alert with the same fingerprint already exists (enforced here, not only by the caller).
    async fn insert_alert(&self, scope: &Scope, alert: FleetAlert) -> Result<(), StoreError>;

    /// Transition an alert's status (and `closed_at` when closing).
    async fn update_alert_status(
        &self,
        scope: &Scope,
        alert_id: &str,
        status: AlertStatus,
        closed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// List alerts visible through `scope`.
    async fn list_alerts(&self, scope: &Scope) -> Result<Vec<FleetAlert>, StoreError>;

    /// List currently-enabled message routes visible through `scope`.
    async fn list_enabled_routes(&self, scope: &Scope) -> Result<Vec<MessageRoute>, StoreError>;

    /// Insert or replace a message route.
    async fn put_route(&self, scope: &Scope, route: MessageRoute) -> Result<(), StoreError>;

    /// List currently-enabled integrations visible through `scope`, used to fan a newly
    /// opened alert out to every configured delivery channel.
    async fn list_enabled_integrations(&self, scope: &Scope) -> Result<Vec<Integration>, StoreError>;

    /// Fetch an integration, if visible through `scope`.
    async fn get_integration(
        &self,
        scope: &Scope,
        integration_id: &str,
    ) -> Result<Option<Integration>, StoreError>;

    /// Insert or replace an integration.
    async fn put_integration(&self, scope: &Scope, integration: Integration) -> Result<(), StoreError>;

    /// Persist a new delivery job in `Pending` state.
    async fn insert_job(&self, scope: &Scope, job: DeliveryJob) -> Result<(), StoreError>;

    /// Atomically claim one `Pending` job (or a job whose `claim_deadline` has passed),
    /// transitioning it to `InFlight` with `claim_token` and `claim_deadline = now + lease`.
    async fn claim_next_job(
        &self,
        claim_token: &str,
        lease_deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DeliveryJob>, StoreError>;

    /// Mark a job `Delivered`.
    async fn complete_job(&self, job_id: &str, claim_token: &str) -> Result<(), StoreError>;

    /// Record a failed attempt and reschedule the job to `Pending` with `next_attempt_at`.
    async fn retry_job(
        &self,
        job_id: &str,
        claim_token: &str,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a terminal failure, transitioning the job to `Failed`.
    async fn fail_job(&self, job_id: &str, claim_token: &str, error: String) -> Result<(), StoreError>;

    /// Fetch a job by id, regardless of scope (used by the claim-deadline reaper).
    async fn get_job(&self, job_id: &str) -> Result<Option<DeliveryJob>, StoreError>;

    /// Insert a dead-letter record.
    async fn insert_dlq(&self, scope: &Scope, record: DeadLetterRecord) -> Result<(), StoreError>;

    /// Fetch a dead-letter record, if visible through `scope`.
    async fn get_dlq(&self, scope: &Scope, dlq_id: &str) -> Result<Option<DeadLetterRecord>, StoreError>;

    /// List dead-letter records visible through `scope`.
    async fn list_dlq(&self, scope: &Scope) -> Result<Vec<DeadLetterRecord>, StoreError>;

    /// Update a dead-letter record's status.
    async fn update_dlq_status(
        &self,
        scope: &Scope,
        dlq_id: &str,
        status: DlqStatus,
        replayed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Purge dead-letter records older than `cutoff`, returning the count removed.
    async fn purge_dlq_older_than(&self, scope: &Scope, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Result of [`TimeSeriesStore::write_batch`]: which points (if any) of the submitted batch
/// were individually rejected by the backend, alongside the reason. A batch that writes
/// successfully minus its rejects still returns `Ok`; `Err` is reserved for failures affecting
/// the whole batch (connection loss, timeout), which [`crate::batch::BatchWriter`] retries or
/// quarantines wholesale.
#[derive(Debug, Default, Clone)]
pub struct BatchWriteOutcome {
    /// Points the backend rejected, paired with why, in submission order.
    pub rejected: Vec<(TelemetryPoint, String)>,
}

impl BatchWriteOutcome {
    /// Every point in the batch was accepted.
    #[must_use]
    pub fn all_accepted() -> Self {
        Self::default()
    }
}

/// Storage contract for time-series telemetry points (§4.2): write accepted points, query the
/// latest sample per device for a set of metric names, query an inclusive time range, and count
/// samples since a timestamp for rate calculations.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Append a batch of points. A point is only ever individually rejected (reported via
    /// [`BatchWriteOutcome::rejected`]) for a reason intrinsic to that point (e.g. a
    /// backend-side constraint violation); an infrastructure failure affecting the whole batch
    /// is returned as `Err` instead, so [`crate::batch::BatchWriter`] can retry or quarantine it
    /// as a unit.
    async fn write_batch(&self, points: Vec<TelemetryPoint>) -> Result<BatchWriteOutcome, StoreError>;

    /// Query the latest sample for each of `metric_names` (all metrics, if empty) per device
    /// matching `device_id` (all devices, if `None`), returning at most `count` samples per
    /// `(device_id, metric_name)` pair, newest first.
    async fn query_latest(
        &self,
        tenant_id: &str,
        device_id: Option<&str>,
        metric_names: &[String],
        count: usize,
    ) -> Result<Vec<TelemetryPoint>, StoreError>;

    /// Query points for one device within `[start_ts, end_ts]` (inclusive both ends), ascending
    /// by timestamp, capped at `limit`.
    async fn query_range(
        &self,
        tenant_id: &str,
        device_id: &str,
        metric_names: &[String],
        start_ts: DateTime<Utc>,
        end_ts: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TelemetryPoint>, StoreError>;

    /// Count samples of `metric_name` for one device at or after `since_ts`, used for
    /// rate-of-change calculations.
    async fn count_since(
        &self,
        tenant_id: &str,
        device_id: &str,
        metric_name: &str,
        since_ts: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}

#[derive(Default)]
struct RelationalInner {
    tenants: Vec<Tenant>,
    devices: HashMap<(String, String), DeviceRegistryRecord>,
    rules: HashMap<(String, String), crate::model::AlertRule>,
    alerts: HashMap<String, FleetAlert>,
    routes: HashMap<(String, String), MessageRoute>,
    integrations: HashMap<(String, String), Integration>,
    jobs: HashMap<String, DeliveryJob>,
    dlq: HashMap<String, DeadLetterRecord>,
}

/// In-memory [`RelationalStore`], sufficient for tests and for running the whole pipeline
/// without an external database.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<RelationalInner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant. Test/bootstrap convenience; not part of the `RelationalStore`
    /// contract since tenant CRUD is out of scope (§1 non-goals: control-plane CRUD).
    pub fn seed_tenant(&self, tenant: Tenant) {
        self.inner.lock().unwrap().tenants.push(tenant);
    }
}

fn denied(tenant_id: &str) -> StoreError {
    StoreError::ScopeDenied(tenant_id.to_string())
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn list_tenants(&self, scope: &Scope) -> Result<Vec<Tenant>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tenants
            .iter()
            .filter(|t| scope.permits(&t.tenant_id))
            .cloned()
            .collect())
    }

    async fn get_device(
        &self,
        scope: &Scope,
        device_id: &str,
    ) -> Result<Option<DeviceRegistryRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .devices
            .values()
            .find(|d| d.device_id == device_id && scope.permits(&d.tenant_id))
            .cloned())
    }

    async fn list_devices(&self, scope: &Scope) -> Result<Vec<DeviceRegistryRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .devices
            .values()
            .filter(|d| scope.permits(&d.tenant_id))
            .cloned()
            .collect())
    }

    async fn put_device(&self, scope: &Scope, record: DeviceRegistryRecord) -> Result<(), StoreError> {
        if !scope.permits(&record.tenant_id) {
            return Err(denied(&record.tenant_id));
        }
        let key = (record.tenant_id.clone(), record.device_id.clone());
        self.inner.lock().unwrap().devices.insert(key, record);
        Ok(())
    }

    async fn list_enabled_rules(&self, scope: &Scope) -> Result<Vec<crate::model::AlertRule>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .rules
            .values()
            .filter(|r| r.enabled && scope.permits(&r.tenant_id))
            .cloned()
            .collect())
    }

    async fn put_rule(&self, scope: &Scope, rule: crate::model::AlertRule) -> Result<(), StoreError> {
        if !scope.permits(&rule.tenant_id) {
            return Err(denied(&rule.tenant_id));
        }
        let key = (rule.tenant_id.clone(), rule.rule_id.clone());
        self.inner.lock().unwrap().rules.insert(key, rule);
        Ok(())
    }

    async fn find_active_alert_by_fingerprint(
        &self,
        scope: &Scope,
        fingerprint: u64,
    ) -> Result<Option<FleetAlert>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .alerts
            .values()
            .find(|a| {
                a.fingerprint == fingerprint
                    && matches!(a.status, AlertStatus::Open | AlertStatus::Acknowledged)
                    && scope.permits(&a.tenant_id)
            })
            .cloned())
    }

    async fn insert_alert(&self, scope: &Scope, alert: FleetAlert) -> Result<(), StoreError> {
        if !scope.permits(&alert.tenant_id) {
            return Err(denied(&alert.tenant_id));
        }
        let mut inner = self.inner.lock().unwrap();
        let conflict = inner.alerts.values().any(|a| {
            a.fingerprint == alert.fingerprint
                && matches!(a.status, AlertStatus::Open | AlertStatus::Acknowledged)
        });
        if conflict {
            return Err(StoreError::Conflict(format!(
                "active alert already exists for fingerprint {}",
                alert.fingerprint
            )));
        }
        inner.alerts.insert(alert.alert_id.clone(), alert);
        Ok(())
    }

    async fn update_alert_status(
        &self,
        scope: &Scope,
        alert_id: &str,
        status: AlertStatus,
        closed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let alert = inner
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| StoreError::NotFound(alert_id.to_string()))?;
        if !scope.permits(&alert.tenant_id) {
            return Err(denied(&alert.tenant_id));
        }
        alert.status = status;
        if let Some(closed_at) = closed_at {
            alert.closed_at = Some(closed_at);
        }
        Ok(())
    }

    async fn list_alerts(&self, scope: &Scope) -> Result<Vec<FleetAlert>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .alerts
            .values()
            .filter(|a| scope.permits(&a.tenant_id))
            .cloned()
            .collect())
    }

    async fn list_enabled_routes(&self, scope: &Scope) -> Result<Vec<MessageRoute>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .routes
            .values()
            .filter(|r| r.enabled && scope.permits(&r.tenant_id))
            .cloned()
            .collect())
    }

    async fn put_route(&self, scope: &Scope, route: MessageRoute) -> Result<(), StoreError> {
        if !scope.permits(&route.tenant_id) {
            return Err(denied(&route.tenant_id));
        }
        let key = (route.tenant_id.clone(), route.route_id.clone());
        self.inner.lock().unwrap().routes.insert(key, route);
        Ok(())
    }

    async fn list_enabled_integrations(&self, scope: &Scope) -> Result<Vec<Integration>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .integrations
            .values()
            .filter(|i| i.enabled && scope.permits(&i.tenant_id))
            .cloned()
            .collect())
    }

    async fn get_integration(
        &self,
        scope: &Scope,
        integration_id: &str,
    ) -> Result<Option<Integration>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .integrations
            .values()
            .find(|i| i.integration_id == integration_id && scope.permits(&i.tenant_id))
            .cloned())
    }

    async fn put_integration(&self, scope: &Scope, integration: Integration) -> Result<(), StoreError> {
        if !scope.permits(&integration.tenant_id) {
            return Err(denied(&integration.tenant_id));
        }
        let key = (integration.tenant_id.clone(), integration.integration_id.clone());
        self.inner.lock().unwrap().integrations.insert(key, integration);
        Ok(())
    }

    async fn insert_job(&self, scope: &Scope, job: DeliveryJob) -> Result<(), StoreError> {
        if !scope.permits(&job.tenant_id) {
            return Err(denied(&job.tenant_id));
        }
        self.inner.lock().unwrap().jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn claim_next_job(
        &self,
        claim_token: &str,
        lease_deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DeliveryJob>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let candidate = inner
            .jobs
            .values_mut()
            .filter(|j| {
                j.status == JobStatus::Pending
                    || (j.status == JobStatus::InFlight
                        && j.claim_deadline.is_some_and(|d| d <= now))
            })
            .filter(|j| j.next_attempt_at <= now)
            .min_by_key(|j| j.created_at);

        let Some(job) = candidate else {
            return Ok(None);
        };
        job.status = JobStatus::InFlight;
        job.claim_token = Some(claim_token.to_string());
        job.claim_deadline = Some(lease_deadline);
        Ok(Some(job.clone()))
    }

    async fn complete_job(&self, job_id: &str, claim_token: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        if job.claim_token.as_deref() != Some(claim_token) {
            return Err(StoreError::Conflict(format!("claim token mismatch for job {job_id}")));
        }
        job.status = JobStatus::Delivered;
        job.claim_token = None;
        job.claim_deadline = None;
        Ok(())
    }

    async fn retry_job(
        &self,
        job_id: &str,
        claim_token: &str,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        if job.claim_token.as_deref() != Some(claim_token) {
            return Err(StoreError::Conflict(format!("claim token mismatch for job {job_id}")));
        }
        job.attempts += 1;
        job.last_error = Some(error);
        job.next_attempt_at = next_attempt_at;
        job.status = JobStatus::Pending;
        job.claim_token = None;
        job.claim_deadline = None;
        Ok(())
    }

    async fn fail_job(&self, job_id: &str, claim_token: &str, error: String) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        if job.claim_token.as_deref() != Some(claim_token) {
            return Err(StoreError::Conflict(format!("claim token mismatch for job {job_id}")));
        }
        job.attempts += 1;
        job.last_error = Some(error);
        job.status = JobStatus::Failed;
        job.claim_token = None;
        job.claim_deadline = None;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<DeliveryJob>, StoreError> {
        Ok(self.inner.lock().unwrap().jobs.get(job_id).cloned())
    }

    async fn insert_dlq(&self, scope: &Scope, record: DeadLetterRecord) -> Result<(), StoreError> {
        if !scope.permits(&record.tenant_id) {
            return Err(denied(&record.tenant_id));
        }
        self.inner.lock().unwrap().dlq.insert(record.dlq_id.clone(), record);
        Ok(())
    }

    async fn get_dlq(&self, scope: &Scope, dlq_id: &str) -> Result<Option<DeadLetterRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .dlq
            .get(dlq_id)
            .filter(|r| scope.permits(&r.tenant_id))
            .cloned())
    }

    async fn list_dlq(&self, scope: &Scope) -> Result<Vec<DeadLetterRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .dlq
            .values()
            .filter(|r| scope.permits(&r.tenant_id))
            .cloned()
            .collect())
    }

    async fn update_dlq_status(
        &self,
        scope: &Scope,
        dlq_id: &str,
        status: DlqStatus,
        replayed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .dlq
            .get_mut(dlq_id)
            .ok_or_else(|| StoreError::NotFound(dlq_id.to_string()))?;
        if !scope.permits(&record.tenant_id) {
            return Err(denied(&record.tenant_id));
        }
        record.status = status;
        if replayed_at.is_some() {
            record.replayed_at = replayed_at;
        }
        Ok(())
    }

    async fn purge_dlq_older_than(&self, scope: &Scope, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.dlq.len();
        inner
            .dlq
            .retain(|_, r| !(scope.permits(&r.tenant_id) && r.created_at < cutoff));
        Ok(before - inner.dlq.len())
    }
}

/// In-memory [`TimeSeriesStore`], sufficient for tests and for running the whole pipeline
/// without an external database.
#[derive(Default)]
pub struct MemoryTimeSeriesStore {
    points: Mutex<Vec<TelemetryPoint>>,
}

impl MemoryTimeSeriesStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryTimeSeriesStore {
    async fn write_batch(&self, points: Vec<TelemetryPoint>) -> Result<BatchWriteOutcome, StoreError> {
        self.points.lock().unwrap().extend(points);
        Ok(BatchWriteOutcome::all_accepted())
    }

    async fn query_latest(
        &self,
        tenant_id: &str,
        device_id: Option<&str>,
        metric_names: &[String],
        count: usize,
    ) -> Result<Vec<TelemetryPoint>, StoreError> {
        let points = self.points.lock().unwrap();
        let mut matches: Vec<&TelemetryPoint> = points
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .filter(|p| device_id.is_none_or(|d| p.device_id == d))
            .filter(|p| metric_names.is_empty() || metric_names.iter().any(|m| m == &p.metric_name))
            .collect();
        matches.sort_by(|a, b| b.ts.cmp(&a.ts));

        let mut out = Vec::new();
        let mut per_key: HashMap<(String, String), usize> = HashMap::new();
        for point in matches {
            let key = (point.device_id.clone(), point.metric_name.clone());
            let seen = per_key.entry(key).or_insert(0);
            if *seen < count {
                out.push(point.clone());
                *seen += 1;
            }
        }
        Ok(out)
    }

    async fn query_range(
        &self,
        tenant_id: &str,
        device_id: &str,
        metric_names: &[String],
        start_ts: DateTime<Utc>,
        end_ts: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TelemetryPoint>, StoreError> {
        let points = self.points.lock().unwrap();
        let mut matches: Vec<TelemetryPoint> = points
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.device_id == device_id)
            .filter(|p| metric_names.is_empty() || metric_names.iter().any(|m| m == &p.metric_name))
            .filter(|p| p.ts >= start_ts && p.ts <= end_ts)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.ts.cmp(&b.ts));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn count_since(
        &self,
        tenant_id: &str,
        device_id: &str,
        metric_name: &str,
        since_ts: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let points = self.points.lock().unwrap();
        Ok(points
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.device_id == device_id)
            .filter(|p| p.metric_name == metric_name)
            .filter(|p| p.ts >= since_ts)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertStatus, DeviceStatus, FleetAlert, Tenant, TenantStatus};

    fn scope_t1() -> Scope {
        Scope::tenant("t1")
    }

    #[tokio::test]
    async fn device_listing_is_scoped_by_tenant() {
        let store = MemoryStore::new();
        store
            .put_device(
                &scope_t1(),
                DeviceRegistryRecord {
                    tenant_id: "t1".to_string(),
                    device_id: "d1".to_string(),
                    site_id: "s1".to_string(),
                    status: DeviceStatus::Active,
                    provisioning_secret: "secret".to_string(),
                    created_at: Utc::now(),
                    decommissioned_at: None,
                },
            )
            .await
            .unwrap();
        store
            .put_device(
                &Scope::tenant("t2"),
                DeviceRegistryRecord {
                    tenant_id: "t2".to_string(),
                    device_id: "d2".to_string(),
                    site_id: "s1".to_string(),
                    status: DeviceStatus::Active,
                    provisioning_secret: "secret".to_string(),
                    created_at: Utc::now(),
                    decommissioned_at: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(store.list_devices(&scope_t1()).await.unwrap().len(), 1);
        assert_eq!(store.list_devices(&Scope::tenant("")).await.unwrap().len(), 0);

        let audit = crate::audit::AuditLog::new();
        let operator = Scope::operator("op1", "list_devices", None, "127.0.0.1", &audit);
        assert_eq!(store.list_devices(&operator).await.unwrap().len(), 2);
        assert_eq!(audit.all().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_active_fingerprint_is_rejected() {
        let store = MemoryStore::new();
        let scope = scope_t1();
        let base = FleetAlert {
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
            fingerprint: 42,
            details: serde_json::json!({}),
        };
        store.insert_alert(&scope, base.clone()).await.unwrap();

        let mut duplicate = base.clone();
        duplicate.alert_id = "a2".to_string();
        let err = store.insert_alert(&scope, duplicate).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store
            .update_alert_status(&scope, "a1", AlertStatus::Closed, Some(Utc::now()))
            .await
            .unwrap();

        let mut reopened = base;
        reopened.alert_id = "a3".to_string();
        store.insert_alert(&scope, reopened).await.unwrap();
    }

    #[tokio::test]
    async fn job_claim_is_exclusive_until_completed() {
        let store = MemoryStore::new();
        let scope = scope_t1();
        let now = Utc::now();
        store
            .insert_job(
                &scope,
                DeliveryJob {
                    job_id: "j1".to_string(),
                    tenant_id: "t1".to_string(),
                    alert_id: Some("a1".to_string()),
                    message_ref: None,
                    integration_id: "i1".to_string(),
                    status: JobStatus::Pending,
                    attempts: 0,
                    next_attempt_at: now,
                    last_error: None,
                    created_at: now,
                    claim_token: None,
                    claim_deadline: None,
                    payload: serde_json::json!({}),
                },
            )
            .await
            .unwrap();

        let claimed = store
            .claim_next_job("worker-1", now + chrono::Duration::seconds(60), now)
            .await
            .unwrap()
            .expect("job should be claimable");
        assert_eq!(claimed.status, JobStatus::InFlight);

        assert!(store
            .claim_next_job("worker-2", now + chrono::Duration::seconds(60), now)
            .await
            .unwrap()
            .is_none());

        store.complete_job("j1", "worker-1").await.unwrap();
        assert_eq!(
            store.get_job("j1").await.unwrap().unwrap().status,
            JobStatus::Delivered
        );
    }

    #[tokio::test]
    async fn expired_claim_is_reclaimable() {
        let store = MemoryStore::new();
        let scope = scope_t1();
        let now = Utc::now();
        store
            .insert_job(
                &scope,
                DeliveryJob {
                    job_id: "j1".to_string(),
                    tenant_id: "t1".to_string(),
                    alert_id: None,
                    message_ref: Some("m1".to_string()),
                    integration_id: "i1".to_string(),
                    status: JobStatus::Pending,
                    attempts: 0,
                    next_attempt_at: now,
                    last_error: None,
                    created_at: now,
                    claim_token: None,
                    claim_deadline: None,
                    payload: serde_json::json!({}),
                },
            )
            .await
            .unwrap();

        store
            .claim_next_job("worker-1", now - chrono::Duration::seconds(1), now)
            .await
            .unwrap();

        let reclaimed = store
            .claim_next_job("worker-2", now + chrono::Duration::seconds(60), now)
            .await
            .unwrap();
        assert!(reclaimed.is_some());
    }

    #[tokio::test]
    async fn query_latest_caps_per_device_metric() {
        let ts_store = MemoryTimeSeriesStore::new();
        let mut points = Vec::new();
        for i in 0..5 {
            points.push(TelemetryPoint {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                ts: Utc::now() + chrono::Duration::seconds(i),
                metric_name: "temp_c".to_string(),
                value: MetricValue::Numeric(20.0 + i as f64),
            });
        }
        ts_store.write_batch(points).await.unwrap();

        let latest = ts_store
            .query_latest("t1", Some("d1"), &["temp_c".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].value, MetricValue::Numeric(24.0));
    }

    #[tokio::test]
    async fn query_range_is_ascending_and_inclusive() {
        let ts_store = MemoryTimeSeriesStore::new();
        let base = Utc::now();
        let mut points = Vec::new();
        for i in 0..5 {
            points.push(TelemetryPoint {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                ts: base + chrono::Duration::seconds(i),
                metric_name: "temp_c".to_string(),
                value: MetricValue::Numeric(20.0 + i as f64),
            });
        }
        ts_store.write_batch(points).await.unwrap();

        let range = ts_store
            .query_range(
                "t1",
                "d1",
                &["temp_c".to_string()],
                base + chrono::Duration::seconds(1),
                base + chrono::Duration::seconds(3),
                10,
            )
            .await
            .unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[0].value, MetricValue::Numeric(21.0));
        assert_eq!(range[2].value, MetricValue::Numeric(23.0));
    }

    #[tokio::test]
    async fn count_since_counts_matching_points() {
        let ts_store = MemoryTimeSeriesStore::new();
        let base = Utc::now();
        let mut points = Vec::new();
        for i in 0..4 {
            points.push(TelemetryPoint {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                ts: base + chrono::Duration::seconds(i),
                metric_name: "temp_c".to_string(),
                value: MetricValue::Numeric(20.0),
            });
        }
        ts_store.write_batch(points).await.unwrap();

        let count = ts_store
            .count_since("t1", "d1", "temp_c", base + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn seeded_tenant_is_visible() {
        let store = MemoryStore::new();
        store.seed_tenant(Tenant {
            tenant_id: "t1".to_string(),
            status: TenantStatus::Active,
        });
        assert_eq!(store.inner.lock().unwrap().tenants.len(), 1);
    }
}
