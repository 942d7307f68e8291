// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Process entry point: wires every `fleetwire-core` component together over an MQTT broker
//! connection and an HTTPS ingest listener, then drives them until shutdown.

mod config_env;
mod http;
mod mqtt_ingest;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use fleetwire_core::audit::AuditLog;
use fleetwire_core::auth_cache::AuthCache;
use fleetwire_core::batch::BatchWriter;
use fleetwire_core::delivery::DeliveryWorker;
use fleetwire_core::device_state::DeviceStateTracker;
use fleetwire_core::dispatch::Dispatcher;
use fleetwire_core::dlq::DlqService;
use fleetwire_core::health::HealthCounters;
use fleetwire_core::model::IntegrationKind;
use fleetwire_core::quarantine::Quarantine;
use fleetwire_core::rate_limit::RateLimiter;
use fleetwire_core::routes::RouteEngine;
use fleetwire_core::rules::RuleEngine;
use fleetwire_core::scope::Scope;
use fleetwire_core::senders::mqtt_sender::MqttSender;
use fleetwire_core::senders::smtp_sender::SmtpSender;
use fleetwire_core::senders::snmp_sender::SnmpSender;
use fleetwire_core::senders::webhook_sender::WebhookSender;
use fleetwire_core::senders::Sender;
use fleetwire_core::store::{MemoryStore, MemoryTimeSeriesStore, RelationalStore, TimeSeriesStore};
use fleetwire_mqtt::session::{ExponentialBackoffWithJitter, Session};

/// Delivery workers aren't individually configurable (spec §6.4 names no such knob); a fixed
/// small pool is enough to keep one slow destination from starving the claim loop, without
/// adding an operational surface nothing in the spec calls for.
const DELIVERY_WORKER_COUNT: usize = 4;
const DELIVERY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const DLQ_REAPER_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const DEVICE_TOPIC_FILTER: &str = "tenant/+/device/+/+";

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .filter_module("rumqttc", log::LevelFilter::Warn)
        .init();

    let loaded = config_env::load_engine_config();
    let config = Arc::new(loaded.engine);
    let fresh_window = if loaded.fresh_window_overridden {
        Duration::from_secs(config.fresh_window_secs)
    } else {
        Duration::from_secs(3 * config.eval_interval_secs)
    };

    let relational: Arc<dyn RelationalStore> = Arc::new(MemoryStore::new());
    let time_series: Arc<dyn TimeSeriesStore> = Arc::new(MemoryTimeSeriesStore::new());
    let health = Arc::new(HealthCounters::new());
    let quarantine = Arc::new(Quarantine::new());
    let audit = Arc::new(AuditLog::new());

    let auth_cache = Arc::new(AuthCache::new(relational.clone(), Duration::from_secs(config.auth_cache_ttl_secs)));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_window_secs, config.rate_limit_quota));
    let batch_writer = Arc::new(BatchWriter::new(
        time_series.clone(),
        quarantine.clone(),
        health.clone(),
        config.batch_max_bytes,
        Duration::from_millis(config.batch_max_millis),
    ));
    let stream_bus = Arc::new(fleetwire_core::stream::StreamingBus::new(
        config.stream_subscriber_capacity,
        config.stream_max_subscribers_per_tenant,
    ));
    let route_engine = Arc::new(RouteEngine::new(relational.clone(), Duration::from_secs(config.route_cache_ttl_secs)));
    let dispatcher = Arc::new(Dispatcher::new(relational.clone()));
    let device_state = Arc::new(DeviceStateTracker::new(config.stale_threshold_secs, config.offline_threshold_secs));

    let mqtt_settings = config_env::load_mqtt_settings(&config);
    let session = match Session::new(&mqtt_settings, Box::new(ExponentialBackoffWithJitter::default())) {
        Ok(session) => session,
        Err(err) => {
            log::error!("failed to construct mqtt session: {err}");
            std::process::exit(1);
        }
    };
    let mut session = session;
    let exit_handle = session.create_exit_handle();
    let managed_client = session.create_managed_client();
    let mqtt_sender: Arc<dyn Sender> = Arc::new(MqttSender::new(managed_client));

    let device_pub_receiver = match session.create_filtered_pub_receiver(DEVICE_TOPIC_FILTER, true) {
        Ok(receiver) => receiver,
        Err(err) => {
            log::error!("failed to register device topic receiver: {err}");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();

    let pipeline = fleetwire_core::ingest::IngestPipeline::start(
        config.ingest_workers,
        config.ingest_queue_depth,
        auth_cache,
        rate_limiter,
        batch_writer.clone(),
        quarantine,
        health.clone(),
        stream_bus,
        route_engine,
        dispatcher.clone(),
        mqtt_sender.clone(),
        device_state,
        cancel.clone(),
    );

    let rule_engine = Arc::new(RuleEngine::new(
        relational.clone(),
        time_series,
        dispatcher,
        health.clone(),
        Duration::from_secs(config.eval_interval_secs),
        fresh_window,
    ));

    let mut senders: HashMap<IntegrationKind, Arc<dyn Sender>> = HashMap::new();
    senders.insert(IntegrationKind::Webhook, Arc::new(WebhookSender::new(Duration::from_secs(config.webhook_timeout_secs))));
    senders.insert(IntegrationKind::Email, Arc::new(SmtpSender::new()));
    senders.insert(IntegrationKind::Snmp, Arc::new(SnmpSender::new()));
    senders.insert(IntegrationKind::Mqtt, mqtt_sender);

    let delivery_worker = Arc::new(DeliveryWorker::new(
        relational.clone(),
        senders,
        health.clone(),
        config.delivery_max_attempts,
        Duration::from_secs(config.delivery_claim_lease_secs),
        DELIVERY_POLL_INTERVAL,
    ));

    let mut background = Vec::new();
    background.push(tokio::spawn(mqtt_ingest::run(device_pub_receiver, pipeline.clone(), cancel.clone())));
    background.push(tokio::spawn({
        let rule_engine = rule_engine.clone();
        let cancel = cancel.clone();
        async move { rule_engine.run(cancel).await }
    }));
    for worker_id in 0..DELIVERY_WORKER_COUNT {
        let delivery_worker = delivery_worker.clone();
        let cancel = cancel.clone();
        background.push(tokio::spawn(async move {
            log::info!("delivery worker {worker_id} starting");
            delivery_worker.run(cancel).await;
        }));
    }
    background.push(tokio::spawn({
        let dlq_service = Arc::new(DlqService::new(relational.clone()));
        let retention_days = config.dlq_retention_days;
        let audit = audit.clone();
        let cancel = cancel.clone();
        async move { run_dlq_reaper(dlq_service, retention_days, audit, cancel).await }
    }));

    let app = http::router(pipeline, health, config.rate_limit_window_secs);
    let listener = match tokio::net::TcpListener::bind(&config.https_bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("failed to bind {}: {err}", config.https_bind_address);
            std::process::exit(1);
        }
    };
    log::info!(
        "fleetwire-server listening for device ingest on {} (mqtt broker {})",
        config.https_bind_address, config.mqtt_broker_address
    );

    let http_cancel = cancel.clone();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_cancel.cancelled().await })
            .await
    });

    tokio::select! {
        result = session.run() => {
            if let Err(err) = result {
                log::error!("mqtt session ended: {err}");
            }
        }
        () = shutdown_signal() => {
            log::info!("shutdown signal received");
        }
    }

    shutdown(cancel, exit_handle, batch_writer, http_handle, background).await;
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Cancel every background task in the dependency order named by the concurrency model:
/// accept stops, pipeline workers drain, the batch writer flushes, the rule engine stops,
/// delivery workers finish their in-flight attempt, then everything is joined under one
/// final-drain deadline.
async fn shutdown(
    cancel: CancellationToken,
    exit_handle: fleetwire_mqtt::session::SessionExitHandle,
    batch_writer: Arc<BatchWriter>,
    http_handle: tokio::task::JoinHandle<std::io::Result<()>>,
    background: Vec<tokio::task::JoinHandle<()>>,
) {
    cancel.cancel();
    if let Err(err) = exit_handle.try_exit_timeout(Duration::from_secs(5)).await {
        log::warn!("mqtt session did not exit gracefully: {err}");
    }

    let drain = async {
        let _ = http_handle.await;
        // Give the ingest workers a moment to observe cancellation and drain their queues
        // before forcing the batch writer's final flush.
        tokio::time::sleep(Duration::from_millis(200)).await;
        batch_writer.flush().await;
        for handle in background {
            let _ = handle.await;
        }
    };

    if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
        log::warn!("shutdown drain deadline ({SHUTDOWN_DRAIN_TIMEOUT:?}) exceeded, forcing exit");
    }
}

/// Purge dead-letter records past their retention window once a day, across every tenant.
async fn run_dlq_reaper(dlq_service: Arc<DlqService>, retention_days: i64, audit: Arc<AuditLog>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(DLQ_REAPER_INTERVAL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let scope = Scope::operator("system:dlq-reaper", "purge_dlq", None, "internal", &audit);
                match dlq_service.purge(&scope, retention_days).await {
                    Ok(count) => log::info!("dlq reaper purged {count} records older than {retention_days} days"),
                    Err(err) => log::error!("dlq reaper failed: {err}"),
                }
            }
        }
    }
}
