// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Device-facing HTTPS ingest endpoint and the `/health` status surface (spec §6.1).

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use fleetwire_core::health::HealthCounters;
use fleetwire_core::ingest::{IngestOutcome, IngestPipeline, IngestRequest};
use fleetwire_core::model::RejectReason;

const PROVISION_TOKEN_HEADER: &str = "x-provision-token";
const MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<IngestPipeline>,
    health: Arc<HealthCounters>,
    rate_limit_window_secs: u64,
}

/// Build the device-facing ingest router: `POST
/// /ingest/v1/tenant/{tenantId}/device/{deviceId}/telemetry` plus `GET /health`.
#[must_use]
pub fn router(pipeline: Arc<IngestPipeline>, health: Arc<HealthCounters>, rate_limit_window_secs: u64) -> Router {
    let state = AppState { pipeline, health, rate_limit_window_secs };
    Router::new()
        .route(
            "/ingest/v1/tenant/:tenant_id/device/:device_id/telemetry",
            post(ingest_telemetry),
        )
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.snapshot())
}

async fn ingest_telemetry(
    State(state): State<AppState>,
    Path((tenant_id, device_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let source = format!("/ingest/v1/tenant/{tenant_id}/device/{device_id}/telemetry");

    let Some(token_header) = headers.get(PROVISION_TOKEN_HEADER) else {
        return reject_response(RejectReason::TokenMissing, state.rate_limit_window_secs);
    };
    let Ok(token) = token_header.to_str() else {
        return reject_response(RejectReason::TokenMissing, state.rate_limit_window_secs);
    };

    let request = IngestRequest {
        tenant_id,
        device_id,
        source,
        provisioning_token: Some(token.to_string()),
        raw: body.to_vec(),
    };

    match state.pipeline.submit_sync(request).await {
        IngestOutcome::Enqueued => StatusCode::ACCEPTED.into_response(),
        IngestOutcome::Rejected(reason) => reject_response(reason, state.rate_limit_window_secs),
        IngestOutcome::Backpressured => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Map a [`RejectReason`] to its HTTP status per §6.1: input/metric errors are `400`, bad or
/// missing tokens are `401`, device-identity errors (revoked, unknown, wrong site) are `403`,
/// and rate limiting is `429` with `Retry-After`.
fn reject_response(reason: RejectReason, rate_limit_window_secs: u64) -> Response {
    let status = match reason {
        RejectReason::PayloadTooLarge
        | RejectReason::UnsupportedVersion
        | RejectReason::TooManyMetrics
        | RejectReason::MetricKeyInvalid
        | RejectReason::MetricKeyTooLong
        | RejectReason::MetricValueInvalid
        | RejectReason::SeqMissing => StatusCode::BAD_REQUEST,
        RejectReason::TokenInvalid | RejectReason::TokenMissing => StatusCode::UNAUTHORIZED,
        RejectReason::DeviceRevoked | RejectReason::SiteMismatch | RejectReason::DeviceUnknown => {
            StatusCode::FORBIDDEN
        }
        RejectReason::RateLimited => StatusCode::TOO_MANY_REQUESTS,
    };

    let body = Json(serde_json::json!({ "reason": reason.as_code() }));
    if reason == RejectReason::RateLimited {
        (status, [("Retry-After", rate_limit_window_secs.to_string())], body).into_response()
    } else {
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use fleetwire_core::auth_cache::AuthCache;
    use fleetwire_core::batch::BatchWriter;
    use fleetwire_core::dispatch::Dispatcher;
    use fleetwire_core::model::{DeviceRegistryRecord, DeviceStatus};
    use fleetwire_core::quarantine::Quarantine;
    use fleetwire_core::rate_limit::RateLimiter;
    use fleetwire_core::routes::RouteEngine;
    use fleetwire_core::scope::Scope;
    use fleetwire_core::senders::{DeliveryOutcome, DeliveryRequest, Sender};
    use fleetwire_core::store::{MemoryStore, MemoryTimeSeriesStore};
    use fleetwire_core::stream::StreamingBus;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct NullSender;
    #[async_trait::async_trait]
    impl Sender for NullSender {
        async fn send(&self, _request: &DeliveryRequest) -> DeliveryOutcome {
            DeliveryOutcome::ok()
        }
    }

    async fn test_app() -> Router {
        let relational = Arc::new(MemoryStore::new());
        let scope = Scope::tenant("t1");
        relational
            .put_device(
                &scope,
                DeviceRegistryRecord {
                    tenant_id: "t1".to_string(),
                    device_id: "d1".to_string(),
                    site_id: "site-a".to_string(),
                    status: DeviceStatus::Active,
                    provisioning_secret: "s3cret".to_string(),
                    created_at: chrono::Utc::now(),
                    decommissioned_at: None,
                },
            )
            .await
            .unwrap();

        let time_series = Arc::new(MemoryTimeSeriesStore::new());
        let health = Arc::new(HealthCounters::new());
        let quarantine = Arc::new(Quarantine::new());
        let auth_cache = Arc::new(AuthCache::new(relational.clone(), Duration::from_secs(60)));
        let rate_limiter = Arc::new(RateLimiter::new(1, 10));
        let batch_writer = Arc::new(BatchWriter::new(
            time_series,
            quarantine.clone(),
            health.clone(),
            1024 * 1024,
            Duration::from_millis(500),
        ));
        let stream_bus = Arc::new(StreamingBus::new(100, 10));
        let route_engine = Arc::new(RouteEngine::new(relational.clone(), Duration::from_secs(30)));
        let dispatcher = Arc::new(Dispatcher::new(relational.clone()));

        let pipeline = IngestPipeline::start(
            2,
            16,
            auth_cache,
            rate_limiter,
            batch_writer,
            quarantine,
            health.clone(),
            stream_bus,
            route_engine,
            dispatcher,
            Arc::new(NullSender),
            Arc::new(fleetwire_core::device_state::DeviceStateTracker::new(120, 600)),
            CancellationToken::new(),
        );

        router(pipeline, health, 1)
    }

    #[tokio::test]
    async fn missing_token_is_rejected_with_401() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/v1/tenant/t1/device/d1/telemetry")
                    .body(Body::from(r#"{"version":"1","tenantId":"t1","deviceId":"d1","siteId":"site-a","seq":1,"metrics":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_envelope_is_accepted_with_202() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/v1/tenant/t1/device/d1/telemetry")
                    .header("X-Provision-Token", "s3cret")
                    .body(Body::from(r#"{"version":"1","tenantId":"t1","deviceId":"d1","siteId":"site-a","seq":1,"metrics":{"temp_c":21.0}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn wrong_token_is_rejected_with_401() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/v1/tenant/t1/device/d1/telemetry")
                    .header("X-Provision-Token", "wrong")
                    .body(Body::from(r#"{"version":"1","tenantId":"t1","deviceId":"d1","siteId":"site-a","seq":1,"metrics":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_device_is_rejected_with_403() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/v1/tenant/t1/device/dX/telemetry")
                    .header("X-Provision-Token", "whatever")
                    .body(Body::from(r#"{"version":"1","tenantId":"t1","deviceId":"dX","siteId":"site-a","seq":1,"metrics":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn health_endpoint_reports_a_snapshot() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
