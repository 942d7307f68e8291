// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Per-device sliding-window rate limiter: each admitted check is timestamped, and a check
//! only counts against the quota if its timestamp still falls within `window` of `now` — unlike
//! a tumbling/fixed window, a device can never burst to 2x quota by straddling a window
//! boundary. Memory per device is bounded by `quota` timestamps, not unbounded history.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Sliding-window limiter keyed by `(tenant_id, device_id)`.
pub struct RateLimiter {
    window: chrono::Duration,
    quota: u32,
    windows: Mutex<HashMap<(String, String), VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    /// Build a limiter allowing `quota` admits per any `window_secs`-second span per device.
    #[must_use]
    pub fn new(window_secs: u64, quota: u32) -> Self {
        Self {
            window: chrono::Duration::seconds(window_secs as i64),
            quota,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a message from `device_id` at `now` is admitted, consuming one unit of
    /// quota if so. Returns `true` if admitted, `false` if the device already has `quota`
    /// admits within the trailing `window`.
    pub fn check(&self, tenant_id: &str, device_id: &str, now: DateTime<Utc>) -> bool {
        let key = (tenant_id.to_string(), device_id.to_string());
        let mut windows = self.windows.lock().unwrap();
        let timestamps = windows.entry(key).or_default();

        let cutoff = now - self.window;
        while matches!(timestamps.front(), Some(ts) if *ts <= cutoff) {
            timestamps.pop_front();
        }

        if timestamps.len() as u32 >= self.quota {
            return false;
        }
        timestamps.push_back(now);
        true
    }
}
