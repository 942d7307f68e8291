// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`StreamingBus`]: in-process, non-durable publish/subscribe for live-stream endpoints
//! (§4.14). Subscribers register a per-tenant filter and get a bounded queue (default 100);
//! publish never blocks — a full subscriber queue drops the message and increments a counter
//! rather than backpressuring the publisher. A per-tenant subscriber cap (default 10) bounds
//! fan-out cost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::model::TelemetryPoint;

/// What a subscriber wants to see: restrict by device id and/or metric name. `None` in either
/// field means "no restriction on that dimension".
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    /// Only points from these devices, if set.
    pub device_ids: Option<Vec<String>>,
    /// Only these metrics, if set.
    pub metric_names: Option<Vec<String>>,
}

impl StreamFilter {
    fn matches(&self, point: &TelemetryPoint) -> bool {
        let device_ok = self.device_ids.as_ref().is_none_or(|ids| ids.iter().any(|d| d == &point.device_id));
        let metric_ok = self
            .metric_names
            .as_ref()
            .is_none_or(|names| names.iter().any(|m| m == &point.metric_name));
        device_ok && metric_ok
    }
}

struct Subscriber {
    tenant_id: String,
    filter: StreamFilter,
    sender: mpsc::Sender<TelemetryPoint>,
    dropped: Arc<AtomicU64>,
}

/// A live subscription handle; dropping it unregisters the subscriber.
pub struct Subscription {
    id: String,
    bus: Arc<StreamingBusInner>,
    receiver: mpsc::Receiver<TelemetryPoint>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Receive the next point matching this subscription's filter, or `None` if the bus has
    /// been dropped.
    pub async fn recv(&mut self) -> Option<TelemetryPoint> {
        self.receiver.recv().await
    }

    /// Count of points dropped for this subscriber because its queue was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.lock().unwrap().remove(&self.id);
    }
}

struct StreamingBusInner {
    subscribers: Mutex<HashMap<String, Subscriber>>,
    capacity: usize,
    max_per_tenant: usize,
}

/// Shared handle to the bus; cheap to clone.
#[derive(Clone)]
pub struct StreamingBus {
    inner: Arc<StreamingBusInner>,
}

/// Error returned when a tenant is already at its subscriber cap.
#[derive(Debug, thiserror::Error)]
#[error("tenant '{0}' has reached its subscriber cap")]
pub struct SubscriberCapExceeded(pub String);

impl StreamingBus {
    /// Build a bus with the given per-subscriber queue `capacity` and `max_per_tenant` cap.
    #[must_use]
    pub fn new(capacity: usize, max_per_tenant: usize) -> Self {
        Self {
            inner: Arc::new(StreamingBusInner {
                subscribers: Mutex::new(HashMap::new()),
                capacity,
                max_per_tenant,
            }),
        }
    }

    /// Register a new subscriber for `tenant_id` matching `filter`.
    pub fn subscribe(&self, tenant_id: &str, filter: StreamFilter) -> Result<Subscription, SubscriberCapExceeded> {
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        let current = subscribers.values().filter(|s| s.tenant_id == tenant_id).count();
        if current >= self.inner.max_per_tenant {
            return Err(SubscriberCapExceeded(tenant_id.to_string()));
        }

        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = Uuid::new_v4().to_string();
        let dropped = Arc::new(AtomicU64::new(0));
        subscribers.insert(
            id.clone(),
            Subscriber {
                tenant_id: tenant_id.to_string(),
                filter,
                sender: tx,
                dropped: dropped.clone(),
            },
        );

        Ok(Subscription {
            id,
            bus: self.inner.clone(),
            receiver: rx,
            dropped,
        })
    }

    /// Publish a point to every matching subscriber of its tenant. Never blocks; a full
    /// subscriber queue drops the point for that subscriber only.
    pub fn publish(&self, point: &TelemetryPoint) {
        let subscribers = self.inner.subscribers.lock().unwrap();
        for subscriber in subscribers.values() {
            if subscriber.tenant_id != point.tenant_id || !subscriber.filter.matches(point) {
                continue;
            }
            if subscriber.sender.try_send(point.clone()).is_err() {
                subscriber.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Current subscriber count for `tenant_id`.
    #[must_use]
    pub fn subscriber_count(&self, tenant_id: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetwire_protocol::MetricValue;

    fn point(device_id: &str, metric: &str) -> TelemetryPoint {
        TelemetryPoint {
            tenant_id: "t1".to_string(),
            device_id: device_id.to_string(),
            ts: Utc::now(),
            metric_name: metric.to_string(),
            value: MetricValue::Numeric(1.0),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_matching_points() {
        let bus = StreamingBus::new(10, 10);
        let mut sub = bus.subscribe("t1", StreamFilter::default()).unwrap();
        bus.publish(&point("d1", "temp_c"));
        let received = sub.recv().await.unwrap();
        assert_eq!(received.device_id, "d1");
    }

    #[tokio::test]
    async fn filter_excludes_non_matching_device() {
        let bus = StreamingBus::new(10, 10);
        let sub = bus
            .subscribe(
                "t1",
                StreamFilter {
                    device_ids: Some(vec!["d2".to_string()]),
                    metric_names: None,
                },
            )
            .unwrap();
        bus.publish(&point("d1", "temp_c"));
        // The non-matching point was never enqueued, so the subscriber's dropped counter
        // (which only increments on a full queue) stays at zero.
        assert_eq!(sub.dropped_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_cap_is_enforced() {
        let bus = StreamingBus::new(10, 1);
        let _first = bus.subscribe("t1", StreamFilter::default()).unwrap();
        assert!(bus.subscribe("t1", StreamFilter::default()).is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let bus = StreamingBus::new(1, 10);
        let mut sub = bus.subscribe("t1", StreamFilter::default()).unwrap();
        bus.publish(&point("d1", "temp_c"));
        bus.publish(&point("d1", "temp_c"));
        assert_eq!(sub.dropped_count(), 1);
        sub.recv().await.unwrap();
    }
}
