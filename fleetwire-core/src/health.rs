// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Process-wide health counters exposed through the `/health` endpoint: cheap atomics updated
//! from the ingest, rule-evaluation, and delivery hot paths, read out as a snapshot for
//! reporting. No external metrics backend — the teacher's own health surface is the same shape
//! (atomic counters behind a snapshot struct), just covering different fields.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Shared counters, cheap to clone and pass to every long-running task.
#[derive(Clone, Default)]
pub struct HealthCounters {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    messages_ingested: AtomicU64,
    messages_rejected: AtomicU64,
    messages_quarantined: AtomicU64,
    batches_flushed: AtomicU64,
    batch_write_failures: AtomicU64,
    alerts_opened: AtomicU64,
    alerts_closed: AtomicU64,
    deliveries_succeeded: AtomicU64,
    deliveries_retried: AtomicU64,
    deliveries_dead_lettered: AtomicU64,
    rule_eval_cycles: AtomicU64,
}

/// Point-in-time snapshot suitable for JSON serialization on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub messages_ingested: u64,
    pub messages_rejected: u64,
    pub messages_quarantined: u64,
    pub batches_flushed: u64,
    pub batch_write_failures: u64,
    pub alerts_opened: u64,
    pub alerts_closed: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_retried: u64,
    pub deliveries_dead_lettered: u64,
    pub rule_eval_cycles: u64,
}

macro_rules! counter_methods {
    ($($incr:ident => $field:ident),+ $(,)?) => {
        $(
            pub fn $incr(&self) {
                self.inner.$field.fetch_add(1, Ordering::Relaxed);
            }
        )+
    };
}

impl HealthCounters {
    /// Build a fresh, zeroed set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter_methods! {
        record_ingested => messages_ingested,
        record_rejected => messages_rejected,
        record_quarantined => messages_quarantined,
        record_batch_flushed => batches_flushed,
        record_batch_write_failure => batch_write_failures,
        record_alert_opened => alerts_opened,
        record_alert_closed => alerts_closed,
        record_delivery_succeeded => deliveries_succeeded,
        record_delivery_retried => deliveries_retried,
        record_delivery_dead_lettered => deliveries_dead_lettered,
        record_rule_eval_cycle => rule_eval_cycles,
    }

    /// Take a point-in-time snapshot of every counter.
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        HealthSnapshot {
            messages_ingested: load(&self.inner.messages_ingested),
            messages_rejected: load(&self.inner.messages_rejected),
            messages_quarantined: load(&self.inner.messages_quarantined),
            batches_flushed: load(&self.inner.batches_flushed),
            batch_write_failures: load(&self.inner.batch_write_failures),
            alerts_opened: load(&self.inner.alerts_opened),
            alerts_closed: load(&self.inner.alerts_closed),
            deliveries_succeeded: load(&self.inner.deliveries_succeeded),
            deliveries_retried: load(&self.inner.deliveries_retried),
            deliveries_dead_lettered: load(&self.inner.deliveries_dead_lettered),
            rule_eval_cycles: load(&self.inner.rule_eval_cycles),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let counters = HealthCounters::new();
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.messages_ingested, 0);
        assert_eq!(snapshot.deliveries_dead_lettered, 0);
    }

    #[test]
    fn increments_are_reflected_in_snapshot() {
        let counters = HealthCounters::new();
        counters.record_ingested();
        counters.record_ingested();
        counters.record_alert_opened();
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.messages_ingested, 2);
        assert_eq!(snapshot.alerts_opened, 1);
    }

    #[test]
    fn clone_shares_the_same_counters() {
        let counters = HealthCounters::new();
        let clone = counters.clone();
        clone.record_delivery_succeeded();
        assert_eq!(counters.snapshot().deliveries_succeeded, 1);
    }
}
