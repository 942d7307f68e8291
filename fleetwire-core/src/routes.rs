// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`RouteEngine`]: matches an accepted envelope against a tenant's enabled
//! [`MessageRoute`]s (§4.9) — topic filter, then payload predicate — with a 30 s TTL cache on
//! the per-tenant route list so evaluating a route doesn't round-trip the store per envelope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use fleetwire_mqtt::topic::{TopicFilter, TopicName};
use fleetwire_protocol::MetricValue;

use crate::model::{FilterValue, MessageRoute, PayloadFilter};
use crate::scope::Scope;
use crate::store::{RelationalStore, StoreError};

struct CacheEntry {
    routes: Vec<MessageRoute>,
    fetched_at: chrono::DateTime<Utc>,
}

/// Caches and matches a tenant's enabled routes against accepted envelopes.
pub struct RouteEngine {
    store: Arc<dyn RelationalStore>,
    ttl: chrono::Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl RouteEngine {
    /// Build a route engine over `store`, caching per-tenant route lists for `ttl`.
    #[must_use]
    pub fn new(store: Arc<dyn RelationalStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30)),
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn enabled_routes(&self, tenant_id: &str) -> Result<Vec<MessageRoute>, StoreError> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(tenant_id) {
                if Utc::now() - entry.fetched_at < self.ttl {
                    return Ok(entry.routes.clone());
                }
            }
        }
        let scope = Scope::tenant(tenant_id);
        let routes = self.store.list_enabled_routes(&scope).await?;
        self.cache.lock().await.insert(
            tenant_id.to_string(),
            CacheEntry {
                routes: routes.clone(),
                fetched_at: Utc::now(),
            },
        );
        Ok(routes)
    }

    /// Return every enabled route for `tenant_id` whose `topicFilter` matches `topic` and whose
    /// `payloadFilter` (if any) is satisfied by `metrics`/`payload_root`.
    pub async fn matching_routes(
        &self,
        tenant_id: &str,
        topic: &str,
        metrics: &HashMap<String, MetricValue>,
        payload_root: &serde_json::Value,
    ) -> Result<Vec<MessageRoute>, StoreError> {
        let routes = self.enabled_routes(tenant_id).await?;
        let Ok(topic_name) = TopicName::from_string(topic.to_string()) else {
            return Ok(Vec::new());
        };

        Ok(routes
            .into_iter()
            .filter(|route| topic_matches(&route.topic_filter, &topic_name))
            .filter(|route| payload_matches(route.payload_filter.as_ref(), metrics, payload_root))
            .collect())
    }
}

fn topic_matches(filter: &str, topic: &TopicName) -> bool {
    TopicFilter::parse(filter).is_ok_and(|f| f.matches_topic_name(topic))
}

fn payload_matches(
    filter: Option<&PayloadFilter>,
    metrics: &HashMap<String, MetricValue>,
    payload_root: &serde_json::Value,
) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter.iter().all(|(key, predicate)| {
        let Some(resolved) = resolve_key(key, metrics, payload_root) else {
            return false;
        };
        predicate_holds(predicate, &resolved)
    })
}

fn resolve_key(
    key: &str,
    metrics: &HashMap<String, MetricValue>,
    payload_root: &serde_json::Value,
) -> Option<serde_json::Value> {
    if let Some(metric) = metrics.get(key) {
        return Some(match metric {
            MetricValue::Numeric(v) => serde_json::json!(v),
            MetricValue::Boolean(b) => serde_json::json!(b),
        });
    }
    payload_root.get(key).cloned()
}

fn predicate_holds(predicate: &FilterValue, actual: &serde_json::Value) -> bool {
    match predicate {
        FilterValue::Scalar(expected) => expected == actual,
        FilterValue::Operators(ops) => ops.iter().all(|(op, operand)| apply_operator(op, actual, operand)),
    }
}

fn apply_operator(op: &str, actual: &serde_json::Value, operand: &serde_json::Value) -> bool {
    let (Some(a), Some(b)) = (actual.as_f64(), operand.as_f64()) else {
        return op == "$eq" && actual == operand || op == "$ne" && actual != operand;
    };
    match op {
        "$gt" => a > b,
        "$gte" => a >= b,
        "$lt" => a < b,
        "$lte" => a <= b,
        "$eq" => a == b,
        "$ne" => a != b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DestinationType;
    use crate::store::MemoryStore;

    fn route(topic_filter: &str, payload_filter: Option<PayloadFilter>) -> MessageRoute {
        MessageRoute {
            route_id: "r1".to_string(),
            tenant_id: "t1".to_string(),
            name: "r1".to_string(),
            topic_filter: topic_filter.to_string(),
            destination_type: DestinationType::Webhook,
            destination_config: serde_json::json!({}),
            payload_filter,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn matches_wildcard_topic() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_route(&Scope::tenant("t1"), route("tenant/+/device/+/telemetry", None))
            .await
            .unwrap();
        let engine = RouteEngine::new(store, Duration::from_secs(30));

        let matches = engine
            .matching_routes(
                "t1",
                "tenant/t1/device/d1/telemetry",
                &HashMap::new(),
                &serde_json::json!({}),
            )
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn payload_filter_operator_and_scalar() {
        let store = Arc::new(MemoryStore::new());
        let mut filter = PayloadFilter::new();
        filter.insert(
            "temp_c".to_string(),
            FilterValue::Operators(HashMap::from([("$gt".to_string(), serde_json::json!(80))])),
        );
        filter.insert("siteId".to_string(), FilterValue::Scalar(serde_json::json!("site-a")));
        store
            .put_route(&Scope::tenant("t1"), route("tenant/+/device/+/telemetry", Some(filter)))
            .await
            .unwrap();
        let engine = RouteEngine::new(store, Duration::from_secs(30));

        let mut metrics = HashMap::new();
        metrics.insert("temp_c".to_string(), MetricValue::Numeric(95.0));
        let payload_root = serde_json::json!({"siteId": "site-a"});

        let matches = engine
            .matching_routes("t1", "tenant/t1/device/d1/telemetry", &metrics, &payload_root)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);

        let mut low_metrics = HashMap::new();
        low_metrics.insert("temp_c".to_string(), MetricValue::Numeric(10.0));
        let no_matches = engine
            .matching_routes("t1", "tenant/t1/device/d1/telemetry", &low_metrics, &payload_root)
            .await
            .unwrap();
        assert!(no_matches.is_empty());
    }

    #[tokio::test]
    async fn missing_predicate_key_fails_filter() {
        let store = Arc::new(MemoryStore::new());
        let mut filter = PayloadFilter::new();
        filter.insert("humidity".to_string(), FilterValue::Scalar(serde_json::json!(50)));
        store
            .put_route(&Scope::tenant("t1"), route("tenant/+/device/+/telemetry", Some(filter)))
            .await
            .unwrap();
        let engine = RouteEngine::new(store, Duration::from_secs(30));

        let matches = engine
            .matching_routes(
                "t1",
                "tenant/t1/device/d1/telemetry",
                &HashMap::new(),
                &serde_json::json!({}),
            )
            .await
            .unwrap();
        assert!(matches.is_empty());
    }
}
