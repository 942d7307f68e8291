// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`DeviceStateTracker`]: the latest-observed-snapshot view of connectivity per device (§3).
//! Status is derived lazily from elapsed time on read rather than transitioned by a background
//! timer, so a device that stops publishing without anyone querying it costs nothing to track.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fleetwire_protocol::MetricValue;

use crate::model::{DeviceConnStatus, DeviceState};

#[derive(Clone)]
struct Snapshot {
    last_heartbeat_at: Option<DateTime<Utc>>,
    last_telemetry_at: Option<DateTime<Utc>>,
    latest_metrics: HashMap<String, MetricValue>,
}

/// The kind of ingest activity a device state update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    /// A telemetry envelope was accepted.
    Telemetry,
    /// A heartbeat envelope was accepted.
    Heartbeat,
}

/// In-process map of `(tenant_id, device_id)` to its latest connectivity snapshot.
pub struct DeviceStateTracker {
    stale_threshold: chrono::Duration,
    offline_threshold: chrono::Duration,
    snapshots: Mutex<HashMap<(String, String), Snapshot>>,
}

impl DeviceStateTracker {
    /// Build a tracker deriving ONLINE/STALE/OFFLINE from `stale_threshold_secs` and
    /// `offline_threshold_secs` (§6.4's `staleThresholdSecs`/`offlineThresholdSecs`).
    #[must_use]
    pub fn new(stale_threshold_secs: u64, offline_threshold_secs: u64) -> Self {
        Self {
            stale_threshold: chrono::Duration::seconds(stale_threshold_secs as i64),
            offline_threshold: chrono::Duration::seconds(offline_threshold_secs as i64),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Record that a device was just heard from, updating its last-seen timestamp and latest
    /// metrics. Called on every accepted envelope, telemetry or heartbeat alike.
    pub fn record_activity(
        &self,
        tenant_id: &str,
        device_id: &str,
        kind: ActivityKind,
        at: DateTime<Utc>,
        metrics: impl IntoIterator<Item = (String, MetricValue)>,
    ) {
        let key = (tenant_id.to_string(), device_id.to_string());
        let mut snapshots = self.snapshots.lock().unwrap();
        let snapshot = snapshots.entry(key).or_insert_with(|| Snapshot {
            last_heartbeat_at: None,
            last_telemetry_at: None,
            latest_metrics: HashMap::new(),
        });

        match kind {
            ActivityKind::Telemetry => snapshot.last_telemetry_at = Some(at),
            ActivityKind::Heartbeat => snapshot.last_heartbeat_at = Some(at),
        }
        for (metric_name, value) in metrics {
            snapshot.latest_metrics.insert(metric_name, value);
        }
    }

    /// Read the current [`DeviceState`] for a device, deriving its connectivity status from how
    /// long it's been since the most recent telemetry or heartbeat. Returns `None` if nothing
    /// has been recorded for this device yet.
    ///
    /// `revoked` overrides the derived status with [`DeviceConnStatus::Revoked`] regardless of
    /// recency, per §3's "status derived from recent ingest activity... unless revoked" rule.
    #[must_use]
    pub fn state(&self, tenant_id: &str, device_id: &str, now: DateTime<Utc>, revoked: bool) -> Option<DeviceState> {
        let key = (tenant_id.to_string(), device_id.to_string());
        let snapshots = self.snapshots.lock().unwrap();
        let snapshot = snapshots.get(&key)?;

        let last_seen = match (snapshot.last_telemetry_at, snapshot.last_heartbeat_at) {
            (Some(t), Some(h)) => Some(t.max(h)),
            (Some(t), None) => Some(t),
            (None, Some(h)) => Some(h),
            (None, None) => None,
        };

        let status = if revoked {
            DeviceConnStatus::Revoked
        } else {
            match last_seen {
                Some(seen) if now - seen < self.stale_threshold => DeviceConnStatus::Online,
                Some(seen) if now - seen < self.offline_threshold => DeviceConnStatus::Stale,
                _ => DeviceConnStatus::Offline,
            }
        };

        Some(DeviceState {
            tenant_id: tenant_id.to_string(),
            device_id: device_id.to_string(),
            status,
            last_heartbeat_at: snapshot.last_heartbeat_at,
            last_telemetry_at: snapshot.last_telemetry_at,
            latest_metrics: snapshot.latest_metrics.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricValue;

    #[test]
    fn unobserved_device_has_no_state() {
        let tracker = DeviceStateTracker::new(120, 600);
        assert!(tracker.state("t1", "d1", Utc::now(), false).is_none());
    }

    #[test]
    fn recent_activity_is_online() {
        let tracker = DeviceStateTracker::new(120, 600);
        let now = Utc::now();
        tracker.record_activity("t1", "d1", ActivityKind::Telemetry, now, [("temp_c".to_string(), MetricValue::Numeric(21.0))]);
        let state = tracker.state("t1", "d1", now, false).unwrap();
        assert_eq!(state.status, DeviceConnStatus::Online);
        assert_eq!(state.latest_metrics.get("temp_c"), Some(&MetricValue::Numeric(21.0)));
    }

    #[test]
    fn activity_past_stale_threshold_is_stale() {
        let tracker = DeviceStateTracker::new(120, 600);
        let seen = Utc::now() - chrono::Duration::seconds(200);
        tracker.record_activity("t1", "d1", ActivityKind::Heartbeat, seen, []);
        let state = tracker.state("t1", "d1", Utc::now(), false).unwrap();
        assert_eq!(state.status, DeviceConnStatus::Stale);
    }

    #[test]
    fn activity_past_offline_threshold_is_offline() {
        let tracker = DeviceStateTracker::new(120, 600);
        let seen = Utc::now() - chrono::Duration::seconds(700);
        tracker.record_activity("t1", "d1", ActivityKind::Telemetry, seen, []);
        let state = tracker.state("t1", "d1", Utc::now(), false).unwrap();
        assert_eq!(state.status, DeviceConnStatus::Offline);
    }

    #[test]
    fn revoked_overrides_recency() {
        let tracker = DeviceStateTracker::new(120, 600);
        let now = Utc::now();
        tracker.record_activity("t1", "d1", ActivityKind::Telemetry, now, []);
        let state = tracker.state("t1", "d1", now, true).unwrap();
        assert_eq!(state.status, DeviceConnStatus::Revoked);
    }
}
