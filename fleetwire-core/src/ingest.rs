// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`IngestPipeline`]: fans incoming envelopes out across `N` workers, pinning each device to
//! exactly one worker by `hash(deviceId) mod N` so the rate limiter's per-device counters never
//! need cross-worker coordination. Each worker owns a bounded queue; a full queue backpressures
//! the caller rather than growing unboundedly.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use fleetwire_protocol::TelemetryEnvelope;

use crate::auth_cache::AuthCache;
use crate::batch::BatchWriter;
use crate::device_state::{ActivityKind, DeviceStateTracker};
use crate::dispatch::Dispatcher;
use crate::health::HealthCounters;
use crate::model::{DestinationType, DeviceStatus, RejectReason, TelemetryPoint};
use crate::quarantine::Quarantine;
use crate::rate_limit::RateLimiter;
use crate::routes::RouteEngine;
use crate::scope::Scope;
use crate::senders::{DeliveryRequest, Sender};
use crate::store::StoreError;
use crate::stream::StreamingBus;
use crate::validate::validate;

/// A raw envelope plus the metadata an ingress listener captured about where it arrived.
pub struct IngestRequest {
    /// Tenant claimed by the source (topic path segment or URL path segment).
    pub tenant_id: String,
    /// Device claimed by the source.
    pub device_id: String,
    /// Source topic (MQTT) or request path (HTTP), recorded on rejection.
    pub source: String,
    /// `X-Provision-Token` presented by an HTTP caller, checked against the device registry
    /// record's `provisioning_secret`. `None` for MQTT-originated requests, whose
    /// authentication already happened at broker connect time via username/password (§6.1).
    pub provisioning_token: Option<String>,
    /// Raw request body, pre-decode.
    pub raw: Vec<u8>,
}

/// Outcome of pushing one request through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Accepted and queued for a worker.
    Enqueued,
    /// Rejected before queueing (validation, auth, or rate limit failure).
    Rejected(RejectReason),
    /// The target worker's queue is full.
    Backpressured,
}

struct WorkerHandles {
    senders: Vec<mpsc::Sender<IngestRequest>>,
}

/// The N-worker ingest fan-out.
pub struct IngestPipeline {
    workers: WorkerHandles,
    auth_cache: Arc<AuthCache>,
    rate_limiter: Arc<RateLimiter>,
    batch_writer: Arc<BatchWriter>,
    quarantine: Arc<Quarantine>,
    health: Arc<HealthCounters>,
    stream_bus: Arc<StreamingBus>,
    route_engine: Arc<RouteEngine>,
    dispatcher: Arc<Dispatcher>,
    mqtt_republisher: Arc<dyn Sender>,
    device_state: Arc<DeviceStateTracker>,
    cancel: CancellationToken,
    worker_count: usize,
}

fn worker_index(device_id: &str, worker_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    device_id.hash(&mut hasher);
    (hasher.finish() as usize) % worker_count
}

impl IngestPipeline {
    /// Spawn `worker_count` workers, each polling a queue of depth `queue_depth`.
    #[must_use]
    pub fn start(
        worker_count: usize,
        queue_depth: usize,
        auth_cache: Arc<AuthCache>,
        rate_limiter: Arc<RateLimiter>,
        batch_writer: Arc<BatchWriter>,
        quarantine: Arc<Quarantine>,
        health: Arc<HealthCounters>,
        stream_bus: Arc<StreamingBus>,
        route_engine: Arc<RouteEngine>,
        dispatcher: Arc<Dispatcher>,
        mqtt_republisher: Arc<dyn Sender>,
        device_state: Arc<DeviceStateTracker>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        let mut senders = Vec::with_capacity(worker_count);
        let mut receivers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, rx) = mpsc::channel(queue_depth);
            senders.push(tx);
            receivers.push(rx);
        }

        let pipeline = Arc::new(Self {
            workers: WorkerHandles { senders },
            auth_cache,
            rate_limiter,
            batch_writer,
            quarantine,
            health,
            stream_bus,
            route_engine,
            dispatcher,
            mqtt_republisher,
            device_state,
            cancel,
            worker_count,
        });

        for (worker_id, rx) in receivers.into_iter().enumerate() {
            tokio::spawn(Self::run_worker(worker_id, rx, pipeline.clone()));
        }

        pipeline
    }

    async fn run_worker(worker_id: usize, mut rx: mpsc::Receiver<IngestRequest>, pipeline: Arc<Self>) {
        loop {
            tokio::select! {
                biased;
                () = pipeline.cancel.cancelled() => {
                    rx.close();
                    while let Some(request) = rx.recv().await {
                        pipeline.process(request).await;
                    }
                    log::info!("ingest worker {worker_id} drained and stopped");
                    return;
                }
                request = rx.recv() => {
                    match request {
                        Some(request) => { pipeline.process(request).await; }
                        None => return,
                    }
                }
            }
        }
    }

    async fn process(&self, request: IngestRequest) -> IngestOutcome {
        let outcome = self.process_inner(&request).await;
        match &outcome {
            IngestOutcome::Enqueued => self.health.record_ingested(),
            IngestOutcome::Rejected(reason) => {
                self.health.record_rejected();
                self.health.record_quarantined();
                self.quarantine.record(
                    Some(request.tenant_id.clone()),
                    request.source.clone(),
                    *reason,
                    request.raw.clone(),
                );
            }
            IngestOutcome::Backpressured => {}
        }
        outcome
    }

    async fn process_inner(&self, request: &IngestRequest) -> IngestOutcome {
        let device = match self.auth_cache.resolve(&request.tenant_id, &request.device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => return IngestOutcome::Rejected(RejectReason::DeviceUnknown),
            Err(err) => {
                log::error!("auth cache lookup failed: {err}");
                return IngestOutcome::Rejected(RejectReason::DeviceUnknown);
            }
        };
        if device.status != DeviceStatus::Active {
            return IngestOutcome::Rejected(RejectReason::DeviceRevoked);
        }

        if let Some(token) = &request.provisioning_token {
            if *token != device.provisioning_secret {
                return IngestOutcome::Rejected(RejectReason::TokenInvalid);
            }
        }

        if !self.rate_limiter.check(&request.tenant_id, &request.device_id, Utc::now()) {
            return IngestOutcome::Rejected(RejectReason::RateLimited);
        }

        // Malformed JSON has no dedicated reason code; it fails the same stage-5 "well-formed
        // metrics" check a structurally valid-but-garbage envelope would.
        let envelope = match TelemetryEnvelope::decode(&request.raw) {
            Ok(envelope) => envelope,
            Err(_) => return IngestOutcome::Rejected(RejectReason::MetricValueInvalid),
        };

        if let Err(reason) = validate(&envelope, request.raw.len(), &device) {
            return IngestOutcome::Rejected(reason);
        }

        let ingest_time = Utc::now();
        let ts = envelope.effective_timestamp(ingest_time);
        let payload_root = serde_json::to_value(&envelope).unwrap_or_else(|_| serde_json::json!({}));

        let activity_kind = if request.source.ends_with("/heartbeat") {
            ActivityKind::Heartbeat
        } else {
            ActivityKind::Telemetry
        };
        self.device_state.record_activity(
            &request.tenant_id,
            &request.device_id,
            activity_kind,
            ingest_time,
            envelope.metrics.iter().map(|(name, value)| (name.clone(), *value)),
        );

        for (metric_name, value) in &envelope.metrics {
            let point = TelemetryPoint {
                tenant_id: request.tenant_id.clone(),
                device_id: request.device_id.clone(),
                ts,
                metric_name: metric_name.clone(),
                value: *value,
            };
            self.stream_bus.publish(&point);
            self.batch_writer.push(point).await;
        }

        if let Err(err) = self.evaluate_routes(request, &envelope, &payload_root).await {
            log::error!("route evaluation failed: {err}");
        }

        IngestOutcome::Enqueued
    }

    /// Evaluate the tenant's enabled routes against this envelope (§4.9) and act on every
    /// match: a `webhook` route enqueues a durable [`crate::model::DeliveryJob`] through
    /// [`Dispatcher`]; an `mqtt_republish` route publishes synchronously through
    /// `mqtt_republisher` instead, since a republish isn't a durable job (§4.9's caller-handled
    /// destination types); `postgresql` is a no-op, since default persistence already wrote the
    /// point via `batch_writer`.
    async fn evaluate_routes(
        &self,
        request: &IngestRequest,
        envelope: &TelemetryEnvelope,
        payload_root: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let scope = Scope::tenant(request.tenant_id.clone());
        let routes = self
            .route_engine
            .matching_routes(&request.tenant_id, &request.source, &envelope.metrics, payload_root)
            .await?;

        for route in routes {
            match route.destination_type {
                DestinationType::Webhook => {
                    if let Err(err) = self
                        .dispatcher
                        .dispatch_route_match(&scope, &route, &request.source, payload_root.clone())
                        .await
                    {
                        log::error!("failed to dispatch route {} match: {err}", route.route_id);
                    }
                }
                DestinationType::MqttRepublish => {
                    let outcome = self
                        .mqtt_republisher
                        .send(&DeliveryRequest {
                            payload: payload_root.clone(),
                            destination_config: route.destination_config.clone(),
                        })
                        .await;
                    if !outcome.success {
                        log::warn!("mqtt republish for route {} failed: {:?}", route.route_id, outcome.error);
                    }
                }
                DestinationType::Postgresql => {}
            }
        }
        Ok(())
    }

    /// Submit a request, routing it to the device's pinned worker. Returns
    /// [`IngestOutcome::Backpressured`] if that worker's queue is full rather than blocking the
    /// caller indefinitely.
    pub async fn submit(&self, request: IngestRequest) -> IngestOutcome {
        let idx = worker_index(&request.device_id, self.worker_count);
        match self.workers.senders[idx].try_send(request) {
            Ok(()) => IngestOutcome::Enqueued,
            Err(mpsc::error::TrySendError::Full(_)) => IngestOutcome::Backpressured,
            Err(mpsc::error::TrySendError::Closed(_)) => IngestOutcome::Backpressured,
        }
    }

    /// Process a request to completion and return its real outcome, bypassing the worker
    /// queue entirely. The HTTP ingest endpoint needs this rather than `submit`: §6.1 requires
    /// a synchronous `400`/`401`/`403`/`429` on rejection, which `submit`'s fire-and-forget
    /// queueing can't report (by the time a worker rejects it, the HTTP response has already
    /// been sent as `202`). Every per-device mutable component (`rate_limiter`, `batch_writer`,
    /// `auth_cache`) is already synchronized for concurrent access, so skipping the per-device
    /// worker pinning costs nothing but the ordering guarantee across messages from one device,
    /// which an HTTP caller sending one request at a time doesn't need.
    pub async fn submit_sync(&self, request: IngestRequest) -> IngestOutcome {
        self.process(request).await
    }

    /// The connectivity snapshot tracker this pipeline updates on every accepted envelope.
    #[must_use]
    pub fn device_state(&self) -> &Arc<DeviceStateTracker> {
        &self.device_state
    }

    /// Signal shutdown; each worker closes its queue, drains whatever was already enqueued,
    /// and exits. `drain_deadline` bounds how long callers should wait before assuming drain
    /// is complete, since worker tasks are detached and not joined here.
    pub async fn shutdown(&self, drain_deadline: Duration) {
        self.cancel.cancel();
        let _ = timeout(drain_deadline, tokio::time::sleep(drain_deadline)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceRegistryRecord;
    use crate::scope::Scope;
    use crate::store::{MemoryStore, MemoryTimeSeriesStore};
    use std::time::Duration as StdDuration;

    async fn build_pipeline() -> (Arc<IngestPipeline>, Arc<MemoryTimeSeriesStore>, Arc<Quarantine>, Arc<MemoryStore>, Arc<StreamingBus>) {
        let relational = Arc::new(MemoryStore::new());
        relational
            .put_device(
                &Scope::tenant("t1"),
                DeviceRegistryRecord {
                    tenant_id: "t1".to_string(),
                    device_id: "d1".to_string(),
                    site_id: "site-a".to_string(),
                    status: DeviceStatus::Active,
                    provisioning_secret: "secret".to_string(),
                    created_at: Utc::now(),
                    decommissioned_at: None,
                },
            )
            .await
            .unwrap();

        let ts_store = Arc::new(MemoryTimeSeriesStore::new());
        let quarantine = Arc::new(Quarantine::new());
        let auth_cache = Arc::new(AuthCache::new(relational.clone(), StdDuration::from_secs(60)));
        let rate_limiter = Arc::new(RateLimiter::new(1, 1000));
        let batch_writer = Arc::new(BatchWriter::new(
            ts_store.clone(),
            quarantine.clone(),
            Arc::new(HealthCounters::new()),
            1024,
            StdDuration::from_millis(50),
        ));
        let route_engine = Arc::new(RouteEngine::new(relational.clone(), StdDuration::from_secs(30)));
        let dispatcher = Arc::new(Dispatcher::new(relational.clone()));
        let stream_bus = Arc::new(StreamingBus::new(100, 10));

        let pipeline = IngestPipeline::start(
            2,
            16,
            auth_cache,
            rate_limiter,
            batch_writer,
            quarantine.clone(),
            Arc::new(HealthCounters::new()),
            stream_bus.clone(),
            route_engine,
            dispatcher,
            Arc::new(NoopSender),
            Arc::new(crate::device_state::DeviceStateTracker::new(120, 600)),
            CancellationToken::new(),
        );
        (pipeline, ts_store, quarantine, relational, stream_bus)
    }

    struct NoopSender;
    #[async_trait::async_trait]
    impl crate::senders::Sender for NoopSender {
        async fn send(&self, _request: &DeliveryRequest) -> crate::senders::DeliveryOutcome {
            crate::senders::DeliveryOutcome::ok()
        }
    }

    #[tokio::test]
    async fn accepted_envelope_is_written_through_batch() {
        let (pipeline, ts_store, _quarantine, _relational, _stream_bus) = build_pipeline().await;
        let raw = serde_json::json!({
            "version": "1",
            "tenantId": "t1",
            "deviceId": "d1",
            "siteId": "site-a",
            "seq": 1,
            "metrics": {"temp_c": 21.5}
        })
        .to_string()
        .into_bytes();

        let outcome = pipeline
            .submit(IngestRequest {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                source: "tenant/t1/device/d1/telemetry".to_string(),
                provisioning_token: None,
                raw,
            })
            .await;
        assert_eq!(outcome, IngestOutcome::Enqueued);

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        let latest = ts_store
            .query_latest("t1", Some("d1"), &["temp_c".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
    }

    #[tokio::test]
    async fn unknown_device_is_quarantined() {
        let (pipeline, _ts_store, quarantine, _relational, _stream_bus) = build_pipeline().await;
        let raw = serde_json::json!({
            "version": "1",
            "tenantId": "t1",
            "deviceId": "unknown",
            "siteId": "site-a",
            "seq": 1,
            "metrics": {}
        })
        .to_string()
        .into_bytes();

        pipeline
            .submit(IngestRequest {
                tenant_id: "t1".to_string(),
                device_id: "unknown".to_string(),
                source: "tenant/t1/device/unknown/telemetry".to_string(),
                provisioning_token: None,
                raw,
            })
            .await;

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(quarantine.len(), 1);
        assert_eq!(quarantine.all()[0].reason, RejectReason::DeviceUnknown);
    }

    #[tokio::test]
    async fn wrong_provision_token_is_rejected() {
        let (pipeline, _ts_store, quarantine, _relational, _stream_bus) = build_pipeline().await;
        let raw = serde_json::json!({
            "version": "1",
            "tenantId": "t1",
            "deviceId": "d1",
            "siteId": "site-a",
            "seq": 1,
            "metrics": {"temp_c": 21.5}
        })
        .to_string()
        .into_bytes();

        pipeline
            .submit(IngestRequest {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                source: "tenant/t1/device/d1/telemetry".to_string(),
                provisioning_token: Some("wrong-secret".to_string()),
                raw,
            })
            .await;

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(quarantine.len(), 1);
        assert_eq!(quarantine.all()[0].reason, RejectReason::TokenInvalid);
    }

    #[test]
    fn worker_index_is_stable_for_a_device() {
        assert_eq!(worker_index("d1", 8), worker_index("d1", 8));
    }

    #[tokio::test]
    async fn accepted_envelope_updates_device_state() {
        let (pipeline, _ts_store, _quarantine, _relational, _stream_bus) = build_pipeline().await;
        let raw = serde_json::json!({
            "version": "1",
            "tenantId": "t1",
            "deviceId": "d1",
            "siteId": "site-a",
            "seq": 1,
            "metrics": {"temp_c": 21.5}
        })
        .to_string()
        .into_bytes();

        pipeline
            .submit(IngestRequest {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                source: "tenant/t1/device/d1/telemetry".to_string(),
                provisioning_token: None,
                raw,
            })
            .await;

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        let state = pipeline.device_state().state("t1", "d1", Utc::now(), false).unwrap();
        assert_eq!(state.status, crate::model::DeviceConnStatus::Online);
        assert!(state.latest_metrics.contains_key("temp_c"));
    }

    #[tokio::test]
    async fn accepted_envelope_is_published_to_stream_bus() {
        let (pipeline, _ts_store, _quarantine, _relational, stream_bus) = build_pipeline().await;
        let mut sub = stream_bus.subscribe("t1", crate::stream::StreamFilter::default()).unwrap();
        let raw = serde_json::json!({
            "version": "1",
            "tenantId": "t1",
            "deviceId": "d1",
            "siteId": "site-a",
            "seq": 1,
            "metrics": {"temp_c": 21.5}
        })
        .to_string()
        .into_bytes();

        pipeline
            .submit(IngestRequest {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                source: "tenant/t1/device/d1/telemetry".to_string(),
                provisioning_token: None,
                raw,
            })
            .await;

        let point = sub.recv().await.unwrap();
        assert_eq!(point.device_id, "d1");
        assert_eq!(point.metric_name, "temp_c");
    }

    #[tokio::test]
    async fn matching_webhook_route_enqueues_delivery_job() {
        let (pipeline, _ts_store, _quarantine, relational, _stream_bus) = build_pipeline().await;
        relational
            .put_route(
                &Scope::tenant("t1"),
                crate::model::MessageRoute {
                    route_id: "r1".to_string(),
                    tenant_id: "t1".to_string(),
                    name: "hot devices".to_string(),
                    topic_filter: "tenant/+/device/+/telemetry".to_string(),
                    destination_type: DestinationType::Webhook,
                    destination_config: serde_json::json!({"url": "https://example.com/hook"}),
                    payload_filter: None,
                    enabled: true,
                },
            )
            .await
            .unwrap();

        let raw = serde_json::json!({
            "version": "1",
            "tenantId": "t1",
            "deviceId": "d1",
            "siteId": "site-a",
            "seq": 1,
            "metrics": {"temp_c": 21.5}
        })
        .to_string()
        .into_bytes();

        pipeline
            .submit(IngestRequest {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                source: "tenant/t1/device/d1/telemetry".to_string(),
                provisioning_token: None,
                raw,
            })
            .await;

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        let claimed = relational
            .claim_next_job("verify", Utc::now() + chrono::Duration::seconds(60), Utc::now())
            .await
            .unwrap()
            .expect("route match should have enqueued a delivery job");
        assert_eq!(claimed.integration_id, "route:r1");
    }
}
