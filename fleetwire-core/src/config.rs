// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`EngineConfig`]: every tunable named in the engine's operational surface, with the
//! defaults called out alongside each field. `fleetwire-server` overlays `FLEETWIRE_*`
//! environment variables on top of these defaults before building the engine.

use derive_builder::Builder;

fn default_ingest_workers() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get().max(4))
}

/// Engine-wide configuration. Built with [`EngineConfigBuilder`]; every field has a default
/// matching the values documented in the operational surface, so only the overrides an
/// operator actually wants need to be set.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(error = "derive_builder::UninitializedFieldError"))]
pub struct EngineConfig {
    /// Address the MQTT broker listens on (host:port) that the ingest workers subscribe from.
    #[builder(default = "\"127.0.0.1:1883\".to_string()")]
    pub mqtt_broker_address: String,

    /// Address the HTTPS ingest endpoint binds to.
    #[builder(default = "\"0.0.0.0:8443\".to_string()")]
    pub https_bind_address: String,

    /// Path to the TLS certificate chain used by the HTTPS ingest endpoint.
    #[builder(default = "\"/etc/fleetwire/tls/cert.pem\".to_string()")]
    pub tls_cert_path: String,

    /// Path to the TLS private key used by the HTTPS ingest endpoint.
    #[builder(default = "\"/etc/fleetwire/tls/key.pem\".to_string()")]
    pub tls_key_path: String,

    /// Number of ingest pipeline workers. Default: `max(4, available_parallelism)`.
    #[builder(default = "default_ingest_workers()")]
    pub ingest_workers: usize,

    /// Depth of each worker's bounded queue before ingest backpressures.
    #[builder(default = "1024")]
    pub ingest_queue_depth: usize,

    /// Maximum bytes buffered by a batch writer before it flushes. Default 1 MiB.
    #[builder(default = "1024 * 1024")]
    pub batch_max_bytes: usize,

    /// Maximum time a batch writer holds points before it flushes, in milliseconds.
    #[builder(default = "500")]
    pub batch_max_millis: u64,

    /// Rate limit sliding window width, in seconds.
    #[builder(default = "1")]
    pub rate_limit_window_secs: u64,

    /// Rate limit quota per device per window.
    #[builder(default = "10")]
    pub rate_limit_quota: u32,

    /// Interval between threshold rule evaluation passes, in seconds.
    #[builder(default = "15")]
    pub eval_interval_secs: u64,

    /// Window after which a device's last reading is considered stale for rule evaluation
    /// missing-data policy, in seconds.
    #[builder(default = "120")]
    pub fresh_window_secs: u64,

    /// Maximum delivery attempts before a job is moved to the dead-letter queue.
    #[builder(default = "5")]
    pub delivery_max_attempts: u32,

    /// Base delay for delivery retry exponential backoff, in seconds.
    #[builder(default = "2")]
    pub delivery_backoff_base_secs: u64,

    /// Cap on delivery retry backoff, in seconds.
    #[builder(default = "300")]
    pub delivery_backoff_cap_secs: u64,

    /// Lease duration granted to a worker claiming a delivery job, in seconds.
    #[builder(default = "30")]
    pub delivery_claim_lease_secs: u64,

    /// Timeout applied to outbound webhook requests, in seconds.
    #[builder(default = "10")]
    pub webhook_timeout_secs: u64,

    /// TTL of a cached auth-cache entry before it's considered stale, in seconds.
    #[builder(default = "60")]
    pub auth_cache_ttl_secs: u64,

    /// Threshold after which a device with no heartbeat is considered `Stale`, in seconds.
    #[builder(default = "120")]
    pub stale_threshold_secs: u64,

    /// Threshold after which a device with no heartbeat is considered `Offline`, in seconds.
    #[builder(default = "600")]
    pub offline_threshold_secs: u64,

    /// Default bounded channel capacity for a live telemetry stream subscriber.
    #[builder(default = "100")]
    pub stream_subscriber_capacity: usize,

    /// Maximum concurrent live-stream subscribers per tenant.
    #[builder(default = "10")]
    pub stream_max_subscribers_per_tenant: usize,

    /// Route cache TTL, in seconds.
    #[builder(default = "30")]
    pub route_cache_ttl_secs: u64,

    /// Retention period for dead-letter records before they're eligible for purge, in days.
    #[builder(default = "30")]
    pub dlq_retention_days: i64,
}

impl EngineConfig {
    /// Start building a config from defaults.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}
