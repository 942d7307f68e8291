// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! `FLEETWIRE_*` environment-variable overlay onto [`EngineConfig`] and
//! [`MqttConnectionSettings`]. Every variable is optional; an unset one leaves the
//! corresponding field at its builder default.

use fleetwire_core::config::{EngineConfig, EngineConfigBuilder};
use fleetwire_mqtt::{MqttConnectionSettings, MqttConnectionSettingsBuilder};

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    match env_value(key) {
        Some(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring {key}={raw:?}: failed to parse, using default");
                None
            }
        },
        None => None,
    }
}

/// The result of applying the environment overlay: the built [`EngineConfig`], plus whether
/// `FLEETWIRE_FRESH_WINDOW_SECS` was actually set. `main` needs the latter to decide between
/// the operator's explicit override and the rule engine's own `3 * eval_interval` default
/// (Design Notes §9, decision 5) — once built, `EngineConfig` itself no longer distinguishes
/// "left at 120 by default" from "explicitly set to 120".
pub struct LoadedConfig {
    pub engine: EngineConfig,
    pub fresh_window_overridden: bool,
}

/// Build an [`EngineConfig`] from defaults overlaid with any `FLEETWIRE_*` variables present
/// in the process environment.
#[must_use]
pub fn load_engine_config() -> LoadedConfig {
    let mut builder = EngineConfigBuilder::default();

    if let Some(v) = env_value("FLEETWIRE_MQTT_BROKER_ADDRESS") {
        builder.mqtt_broker_address(v);
    }
    if let Some(v) = env_value("FLEETWIRE_HTTPS_BIND_ADDRESS") {
        builder.https_bind_address(v);
    }
    if let Some(v) = env_value("FLEETWIRE_TLS_CERT_PATH") {
        builder.tls_cert_path(v);
    }
    if let Some(v) = env_value("FLEETWIRE_TLS_KEY_PATH") {
        builder.tls_key_path(v);
    }
    if let Some(v) = env_parse::<usize>("FLEETWIRE_INGEST_WORKERS") {
        builder.ingest_workers(v);
    }
    if let Some(v) = env_parse::<usize>("FLEETWIRE_INGEST_QUEUE_DEPTH") {
        builder.ingest_queue_depth(v);
    }
    if let Some(v) = env_parse::<usize>("FLEETWIRE_BATCH_MAX_BYTES") {
        builder.batch_max_bytes(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_BATCH_MAX_MILLIS") {
        builder.batch_max_millis(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_RATE_LIMIT_WINDOW_SECS") {
        builder.rate_limit_window_secs(v);
    }
    if let Some(v) = env_parse::<u32>("FLEETWIRE_RATE_LIMIT_QUOTA") {
        builder.rate_limit_quota(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_EVAL_INTERVAL_SECS") {
        builder.eval_interval_secs(v);
    }
    let fresh_window_overridden = env_value("FLEETWIRE_FRESH_WINDOW_SECS").is_some();
    if let Some(v) = env_parse::<u64>("FLEETWIRE_FRESH_WINDOW_SECS") {
        builder.fresh_window_secs(v);
    }
    if let Some(v) = env_parse::<u32>("FLEETWIRE_DELIVERY_MAX_ATTEMPTS") {
        builder.delivery_max_attempts(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_DELIVERY_BACKOFF_BASE_SECS") {
        builder.delivery_backoff_base_secs(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_DELIVERY_BACKOFF_CAP_SECS") {
        builder.delivery_backoff_cap_secs(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_DELIVERY_CLAIM_LEASE_SECS") {
        builder.delivery_claim_lease_secs(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_WEBHOOK_TIMEOUT_SECS") {
        builder.webhook_timeout_secs(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_AUTH_CACHE_TTL_SECS") {
        builder.auth_cache_ttl_secs(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_STALE_THRESHOLD_SECS") {
        builder.stale_threshold_secs(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_OFFLINE_THRESHOLD_SECS") {
        builder.offline_threshold_secs(v);
    }
    if let Some(v) = env_parse::<usize>("FLEETWIRE_STREAM_SUBSCRIBER_CAPACITY") {
        builder.stream_subscriber_capacity(v);
    }
    if let Some(v) = env_parse::<usize>("FLEETWIRE_STREAM_MAX_SUBSCRIBERS_PER_TENANT") {
        builder.stream_max_subscribers_per_tenant(v);
    }
    if let Some(v) = env_parse::<u64>("FLEETWIRE_ROUTE_CACHE_TTL_SECS") {
        builder.route_cache_ttl_secs(v);
    }
    if let Some(v) = env_parse::<i64>("FLEETWIRE_DLQ_RETENTION_DAYS") {
        builder.dlq_retention_days(v);
    }

    let engine = builder.build().expect("every EngineConfig field carries a default");
    LoadedConfig { engine, fresh_window_overridden }
}

/// Build device-facing MQTT connection settings (spec §6.1: TLS on 8883, device
/// username/password) from `FLEETWIRE_MQTT_*` variables, falling back to the broker's
/// `host:port` from [`EngineConfig::mqtt_broker_address`] when `FLEETWIRE_MQTT_HOST_NAME` /
/// `FLEETWIRE_MQTT_PORT` aren't set directly.
#[must_use]
pub fn load_mqtt_settings(engine: &EngineConfig) -> MqttConnectionSettings {
    let (default_host, default_port) = engine
        .mqtt_broker_address
        .rsplit_once(':')
        .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host.to_string(), port)))
        .unwrap_or_else(|| (engine.mqtt_broker_address.clone(), 8883));

    let mut builder = MqttConnectionSettingsBuilder::default();
    builder.client_id(env_value("FLEETWIRE_MQTT_CLIENT_ID").unwrap_or_else(|| "fleetwire-server".to_string()));
    builder.host_name(env_value("FLEETWIRE_MQTT_HOST_NAME").unwrap_or(default_host));
    builder.tcp_port(env_parse::<u16>("FLEETWIRE_MQTT_PORT").unwrap_or(default_port));
    if let Some(v) = env_parse::<bool>("FLEETWIRE_MQTT_USE_TLS") {
        builder.use_tls(v);
    }
    if let Some(v) = env_value("FLEETWIRE_MQTT_CA_FILE") {
        builder.ca_file(Some(v));
    }
    if let Some(v) = env_value("FLEETWIRE_MQTT_USERNAME") {
        builder.username(Some(v));
    }
    if let Some(v) = env_value("FLEETWIRE_MQTT_PASSWORD") {
        builder.password(Some(v));
    }
    if let Some(v) = env_parse::<u16>("FLEETWIRE_MQTT_KEEP_ALIVE_SECS") {
        builder.keep_alive_secs(v);
    }
    builder.build().expect("host_name and client_id are always set above")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        temp_env::with_vars_unset(
            vec!["FLEETWIRE_RATE_LIMIT_QUOTA", "FLEETWIRE_MQTT_BROKER_ADDRESS"],
            || {
                let loaded = load_engine_config();
                assert_eq!(loaded.engine.rate_limit_quota, 10);
                assert!(!loaded.fresh_window_overridden);
            },
        );
    }

    #[test]
    fn overlay_applies_set_variables() {
        temp_env::with_vars(
            vec![
                ("FLEETWIRE_RATE_LIMIT_QUOTA", Some("250")),
                ("FLEETWIRE_FRESH_WINDOW_SECS", Some("600")),
                ("FLEETWIRE_MQTT_BROKER_ADDRESS", Some("broker.internal:8883")),
            ],
            || {
                let loaded = load_engine_config();
                assert_eq!(loaded.engine.rate_limit_quota, 250);
                assert_eq!(loaded.engine.fresh_window_secs, 600);
                assert!(loaded.fresh_window_overridden);
                assert_eq!(loaded.engine.mqtt_broker_address, "broker.internal:8883");
            },
        );
    }

    #[test]
    fn malformed_value_falls_back_to_default() {
        temp_env::with_var("FLEETWIRE_RATE_LIMIT_QUOTA", Some("not-a-number"), || {
            let loaded = load_engine_config();
            assert_eq!(loaded.engine.rate_limit_quota, 10);
        });
    }

    #[test]
    fn mqtt_settings_derive_host_and_port_from_broker_address() {
        let engine = EngineConfig::builder()
            .mqtt_broker_address("broker.internal:8884")
            .build()
            .unwrap();
        temp_env::with_vars_unset(
            vec!["FLEETWIRE_MQTT_HOST_NAME", "FLEETWIRE_MQTT_PORT"],
            || {
                let settings = load_mqtt_settings(&engine);
                assert_eq!(settings.host_name, "broker.internal");
                assert_eq!(settings.tcp_port, 8884);
            },
        );
    }
}
