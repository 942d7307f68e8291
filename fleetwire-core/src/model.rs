// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Data-model types shared across the ingestion, rule, routing, and delivery components.
//!
//! Exact physical layout is left to the storage adapter; these are the in-memory
//! representations the rest of the crate, and [`crate::store::MemoryStore`], operate on.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fleetwire_protocol::MetricValue;

/// Lifecycle of a [`Tenant`]. Deletion is logical; data is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantStatus {
    /// Tenant is in normal operation.
    Active,
    /// Tenant is temporarily suspended; ingestion and delivery are paused.
    Suspended,
    /// Tenant is logically deleted. Rows are retained for retention purposes.
    Deleted,
}

/// An opaque tenant identifier. Always a string, max 64 bytes, URL-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tenant {
    /// The tenant's identifier.
    pub tenant_id: String,
    /// Current lifecycle state.
    pub status: TenantStatus,
}

/// Lifecycle of a [`DeviceRegistryRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Device is provisioned and may ingest.
    Active,
    /// Device's credentials have been revoked; ingestion must be rejected.
    Revoked,
    /// Device is logically deleted.
    Deleted,
}

/// Registry record for a provisioned device, keyed by `(tenant_id, device_id)`.
#[derive(Debug, Clone)]
pub struct DeviceRegistryRecord {
    /// Owning tenant.
    pub tenant_id: String,
    /// Device identifier within the tenant.
    pub device_id: String,
    /// Site the device is installed at.
    pub site_id: String,
    /// Current lifecycle state.
    pub status: DeviceStatus,
    /// Opaque provisioning secret checked against `X-Provision-Token` / MQTT password.
    pub provisioning_secret: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the device was decommissioned, if it has been.
    pub decommissioned_at: Option<DateTime<Utc>>,
}

/// A single stored time-series sample: `(tenant_id, device_id, ts, metric_name) -> value`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TelemetryPoint {
    /// Owning tenant.
    pub tenant_id: String,
    /// Reporting device.
    pub device_id: String,
    /// Sample timestamp.
    pub ts: DateTime<Utc>,
    /// Metric name.
    pub metric_name: String,
    /// Sample value.
    pub value: MetricValue,
}

/// Connectivity status derived from recent ingest/heartbeat activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceConnStatus {
    /// Telemetry or heartbeat seen within the stale threshold.
    Online,
    /// Nothing seen within the stale threshold, but within the offline threshold.
    Stale,
    /// Nothing seen within the offline threshold.
    Offline,
    /// Device registry record is revoked.
    Revoked,
}

/// Latest observed snapshot per `(tenant_id, device_id)`.
#[derive(Debug, Clone)]
pub struct DeviceState {
    /// Owning tenant.
    pub tenant_id: String,
    /// Device identifier.
    pub device_id: String,
    /// Current connectivity status.
    pub status: DeviceConnStatus,
    /// Timestamp of the last heartbeat message, if any.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Timestamp of the last telemetry message, if any.
    pub last_telemetry_at: Option<DateTime<Utc>>,
    /// Most recent metric readings.
    pub latest_metrics: HashMap<String, MetricValue>,
}

/// Reason a [`TelemetryEnvelope`](fleetwire_protocol::TelemetryEnvelope) (or an HTTP/MQTT
/// ingest request) was rejected. `Copy` and exhaustively matchable, per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Raw payload exceeded the 8 KiB size limit.
    PayloadTooLarge,
    /// Envelope declared an unrecognized `version`.
    UnsupportedVersion,
    /// `siteId` did not match the device registry record.
    SiteMismatch,
    /// More than 50 metric entries.
    TooManyMetrics,
    /// A metric name failed the name grammar.
    MetricKeyInvalid,
    /// A metric name exceeded 128 bytes.
    MetricKeyTooLong,
    /// A metric value was non-finite, or otherwise malformed.
    MetricValueInvalid,
    /// `seq` was missing.
    SeqMissing,
    /// The device exceeded its rate-limit quota.
    RateLimited,
    /// Authentication token was present but did not match.
    TokenInvalid,
    /// Authentication token was required but absent.
    TokenMissing,
    /// Device registry record status is `Revoked`.
    DeviceRevoked,
    /// No device registry record exists for `(tenant_id, device_id)`.
    DeviceUnknown,
}

impl RejectReason {
    /// The machine-readable reason-code string, as used in HTTP error bodies and
    /// [`QuarantineRecord`].
    #[must_use]
    pub fn as_code(self) -> &'static str {
        match self {
            RejectReason::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            RejectReason::UnsupportedVersion => "UNSUPPORTED_VERSION",
            RejectReason::SiteMismatch => "SITE_MISMATCH",
            RejectReason::TooManyMetrics => "TOO_MANY_METRICS",
            RejectReason::MetricKeyInvalid => "METRIC_KEY_INVALID",
            RejectReason::MetricKeyTooLong => "METRIC_KEY_TOO_LONG",
            RejectReason::MetricValueInvalid => "METRIC_VALUE_INVALID",
            RejectReason::SeqMissing => "SEQ_MISSING",
            RejectReason::RateLimited => "RATE_LIMITED",
            RejectReason::TokenInvalid => "TOKEN_INVALID",
            RejectReason::TokenMissing => "TOKEN_MISSING",
            RejectReason::DeviceRevoked => "DEVICE_REVOKED",
            RejectReason::DeviceUnknown => "DEVICE_UNKNOWN",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Append-only record of a rejected envelope.
#[derive(Debug, Clone)]
pub struct QuarantineRecord {
    /// Tenant, if it could be determined before rejection.
    pub tenant_id: Option<String>,
    /// Source topic (MQTT) or request path (HTTP) the envelope arrived on.
    pub topic: String,
    /// Why the envelope was rejected.
    pub reason: RejectReason,
    /// Captured payload, truncated to 8 KiB.
    pub payload: Vec<u8>,
    /// When the rejection was recorded.
    pub captured_at: DateTime<Utc>,
}

/// Comparison operator for an [`AlertRule`] threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl CompareOp {
    /// Evaluate `value <op> threshold`. NaN operands always yield `false`
    /// (callers must ignore the observation rather than treat this as a close).
    #[must_use]
    pub fn eval(self, value: f64, threshold: f64) -> bool {
        if value.is_nan() || threshold.is_nan() {
            return false;
        }
        match self {
            CompareOp::Gt => value > threshold,
            CompareOp::Gte => value >= threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Lte => value <= threshold,
            CompareOp::Eq => value == threshold,
            CompareOp::Ne => value != threshold,
        }
    }
}

/// Per-tenant threshold rule evaluated by the [`crate::rules`] loop.
#[derive(Debug, Clone)]
pub struct AlertRule {
    /// Rule identifier, unique within the tenant.
    pub rule_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Human-readable name.
    pub name: String,
    /// Metric this rule samples.
    pub metric_name: String,
    /// Comparison operator.
    pub operator: CompareOp,
    /// Threshold compared against the sampled value.
    pub threshold: f64,
    /// Severity, 1-5.
    pub severity: u8,
    /// If set, only devices at one of these sites are evaluated.
    pub site_filter: Option<Vec<String>>,
    /// Whether the rule is currently evaluated.
    pub enabled: bool,
}

/// Lifecycle state of a [`FleetAlert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    /// Newly raised, undismissed.
    Open,
    /// Acknowledged by an operator but not yet closed.
    Acknowledged,
    /// Closed; terminal.
    Closed,
}

/// A raised fleet alert. At most one `Open`/`Acknowledged` alert may exist per `fingerprint`
/// at a time — enforced at the store level, not only by the rule engine.
#[derive(Debug, Clone)]
pub struct FleetAlert {
    /// Alert identifier.
    pub alert_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Device the alert concerns.
    pub device_id: String,
    /// Alert type, e.g. `"THRESHOLD"`.
    pub alert_type: String,
    /// Severity, 1-5.
    pub severity: u8,
    /// Current lifecycle status.
    pub status: AlertStatus,
    /// Whether dispatch is suppressed while remaining visible (orthogonal to `status`).
    pub silenced: bool,
    /// Human-readable summary.
    pub summary: String,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
    /// When the alert was closed, if it has been.
    pub closed_at: Option<DateTime<Utc>>,
    /// Dedup key: `hash(tenant_id, device_id, rule_id)`.
    pub fingerprint: u64,
    /// Structured detail blob (rule snapshot + observation).
    pub details: serde_json::Value,
}

/// Destination kind for a [`MessageRoute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationType {
    /// Deliver to a webhook integration.
    Webhook,
    /// Republish to the broker at a templated topic.
    MqttRepublish,
    /// No-op: default persistence already wrote the point.
    Postgresql,
}

/// A scalar or comparison-operator predicate value for [`PayloadFilter`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Exact-match scalar.
    Scalar(serde_json::Value),
    /// `{ "$gt": ..., "$lte": ... }`-style operator object; all keys present must hold (AND).
    Operators(HashMap<String, serde_json::Value>),
}

/// A payload predicate: mapping from key to [`FilterValue`]. All entries must hold (AND).
pub type PayloadFilter = HashMap<String, FilterValue>;

/// Per-tenant rule that matches ingested envelopes by MQTT topic pattern and payload predicate.
#[derive(Debug, Clone)]
pub struct MessageRoute {
    /// Route identifier.
    pub route_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Human-readable name.
    pub name: String,
    /// MQTT topic filter (`+`/`#` wildcards).
    pub topic_filter: String,
    /// Destination kind.
    pub destination_type: DestinationType,
    /// Destination-kind-specific configuration.
    pub destination_config: serde_json::Value,
    /// Optional payload predicate.
    pub payload_filter: Option<PayloadFilter>,
    /// Whether the route is currently evaluated.
    pub enabled: bool,
}

/// Kind of external channel an [`Integration`] delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrationKind {
    /// HTTP webhook, optionally HMAC-signed.
    Webhook,
    /// SMTP email.
    Email,
    /// SNMP trap/inform.
    Snmp,
    /// MQTT publish.
    Mqtt,
}

/// A configured delivery channel for a tenant.
#[derive(Debug, Clone)]
pub struct Integration {
    /// Integration identifier.
    pub integration_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Channel kind.
    pub kind: IntegrationKind,
    /// Kind-specific configuration.
    pub config: serde_json::Value,
    /// Whether the integration currently accepts deliveries.
    pub enabled: bool,
}

/// Lifecycle state of a [`DeliveryJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker, in progress.
    InFlight,
    /// Delivered successfully; terminal.
    Delivered,
    /// Exhausted retries; terminal, DLQ record written.
    Failed,
}

/// A unit of outbound delivery work: an alert notification or a routed raw message.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    /// Job identifier.
    pub job_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Alert this job delivers, if it is an alert notification.
    pub alert_id: Option<String>,
    /// Opaque reference to the routed message this job delivers, if not an alert.
    pub message_ref: Option<String>,
    /// Destination integration.
    pub integration_id: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Number of attempts made so far.
    pub attempts: u32,
    /// Earliest time the next attempt may be made.
    pub next_attempt_at: DateTime<Utc>,
    /// Error from the most recent attempt, if any.
    pub last_error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// Opaque claim token held by the worker that currently owns this job while `InFlight`.
    pub claim_token: Option<String>,
    /// Deadline by which the claim must be renewed or released, else it is reaped to `Pending`.
    pub claim_deadline: Option<DateTime<Utc>>,
    /// JSON payload body to deliver (event or routed message).
    pub payload: serde_json::Value,
}

/// Lifecycle state of a [`DeadLetterRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqStatus {
    /// Exhausted retries; awaiting operator action.
    Failed,
    /// Successfully redelivered by an operator.
    Replayed,
    /// Discarded by an operator; terminal.
    Discarded,
}

/// A delivery job that exhausted its retry budget, retained for inspection and replay.
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    /// Dead-letter record identifier.
    pub dlq_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Route that produced this delivery, if any (severed to `None` if the route is deleted).
    pub route_id: Option<String>,
    /// The integration (or `route:{routeId}` synthetic id) the job was attempted against;
    /// carried so replay can re-target the same destination without guessing it back from
    /// `route_id`.
    pub integration_id: String,
    /// Original ingest topic/request path.
    pub original_topic: String,
    /// Snapshot of the payload that failed to deliver.
    pub payload: serde_json::Value,
    /// Destination kind at time of failure.
    pub destination_type: DestinationType,
    /// Snapshot of the destination configuration at time of failure.
    pub destination_config: serde_json::Value,
    /// Error message from the final attempt.
    pub error_message: String,
    /// Number of attempts made before giving up.
    pub attempts: u32,
    /// Current status.
    pub status: DlqStatus,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was replayed, if it has been.
    pub replayed_at: Option<DateTime<Utc>>,
}

/// Append-only record of an operator action, in particular every cross-tenant (`operator`
/// scope) access. Never filtered by tenant.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// When the action occurred.
    pub timestamp: DateTime<Utc>,
    /// Operator principal performing the action.
    pub operator_id: String,
    /// Action name, e.g. `"list_devices"`.
    pub action: String,
    /// Tenant the action targeted, if any (`None` for global actions).
    pub target_tenant: Option<String>,
    /// Request source IP.
    pub request_ip: String,
    /// Outcome code (e.g. an HTTP-style status).
    pub result_code: u16,
}
