// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`AuthCache`]: TTL cache of `(tenant_id, device_id) -> DeviceRegistryRecord`, with
//! single-flight refresh so a cache-miss storm against the same device collapses into one
//! store lookup, and stale-while-revalidate so an expired entry still serves the prior value
//! immediately while a refresh runs in the background, rather than blocking ingest on the
//! store round trip. Capped by an LRU eviction policy so a tenant with many devices can't grow
//! the cache unbounded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::model::DeviceRegistryRecord;
use crate::scope::Scope;
use crate::store::{RelationalStore, StoreError};

/// Default cap on cached entries before the least-recently-accessed one is evicted.
const DEFAULT_MAX_ENTRIES: usize = 100_000;

type Key = (String, String);

#[derive(Clone)]
struct Entry {
    record: Option<DeviceRegistryRecord>,
    fetched_at: chrono::DateTime<Utc>,
    last_accessed_at: chrono::DateTime<Utc>,
}

struct Shared {
    store: Arc<dyn RelationalStore>,
    ttl: chrono::Duration,
    max_entries: usize,
    entries: Mutex<HashMap<Key, Entry>>,
    in_flight: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

/// TTL-cached front end for device registry lookups.
pub struct AuthCache {
    shared: Arc<Shared>,
}

impl AuthCache {
    /// Build a cache in front of `store` with the given entry TTL and the default
    /// (100,000-entry) LRU cap.
    #[must_use]
    pub fn new(store: Arc<dyn RelationalStore>, ttl: Duration) -> Self {
        Self::with_capacity(store, ttl, DEFAULT_MAX_ENTRIES)
    }

    /// As [`Self::new`], with an explicit cap on cached entries.
    #[must_use]
    pub fn with_capacity(store: Arc<dyn RelationalStore>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
                max_entries,
                entries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve a device registry record.
    ///
    /// A fresh cache hit returns immediately. A present-but-expired hit also returns
    /// immediately (the prior value), while a refresh against the store is spawned in the
    /// background — the caller is never blocked on that round trip. A cold miss has nothing to
    /// serve yet, so it blocks on a single-flighted store lookup shared across any concurrent
    /// callers racing for the same key.
    pub async fn resolve(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceRegistryRecord>, StoreError> {
        let key = (tenant_id.to_string(), device_id.to_string());

        if let Some(entry) = Self::touch(&self.shared, &key).await {
            if Utc::now() - entry.fetched_at < self.shared.ttl {
                return Ok(entry.record);
            }
            let shared = self.shared.clone();
            let tenant_id = tenant_id.to_string();
            let device_id = device_id.to_string();
            tokio::spawn(async move {
                if let Err(err) = Self::refresh(&shared, &tenant_id, &device_id).await {
                    log::warn!(
                        "background auth cache refresh failed, keeping stale entry: tenant_id={tenant_id} device_id={device_id} err={err}"
                    );
                }
            });
            return Ok(entry.record);
        }

        Self::refresh(&self.shared, tenant_id, device_id).await
    }

    /// Bump an entry's recency and return a clone if present, without blocking on the store.
    async fn touch(shared: &Arc<Shared>, key: &Key) -> Option<Entry> {
        let mut entries = shared.entries.lock().await;
        let entry = entries.get_mut(key)?;
        entry.last_accessed_at = Utc::now();
        Some(entry.clone())
    }

    /// Single-flighted store refresh: only one concurrent caller per key actually calls the
    /// store, the rest wait on the same lock and then re-check the cache it just populated.
    async fn refresh(
        shared: &Arc<Shared>,
        tenant_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceRegistryRecord>, StoreError> {
        let key = (tenant_id.to_string(), device_id.to_string());

        let flight = {
            let mut in_flight = shared.in_flight.lock().await;
            in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = flight.lock().await;

        // Another task may have refreshed this key while we waited on the single-flight lock.
        if let Some(entry) = Self::touch(shared, &key).await {
            if Utc::now() - entry.fetched_at < shared.ttl {
                return Ok(entry.record);
            }
        }

        let scope = Scope::tenant(tenant_id);
        match shared.store.get_device(&scope, device_id).await {
            Ok(record) => {
                let now = Utc::now();
                let mut entries = shared.entries.lock().await;
                entries.insert(
                    key,
                    Entry {
                        record: record.clone(),
                        fetched_at: now,
                        last_accessed_at: now,
                    },
                );
                Self::evict_if_over_capacity(&mut entries, shared.max_entries);
                Ok(record)
            }
            Err(err) => {
                log::warn!(
                    "auth cache refresh failed, serving stale if present: tenant_id={tenant_id} device_id={device_id} err={err}"
                );
                match shared.entries.lock().await.get(&key) {
                    Some(entry) => Ok(entry.record.clone()),
                    None => Err(err),
                }
            }
        }
    }

    /// Evict the least-recently-accessed entry until the map is back at or under capacity.
    fn evict_if_over_capacity(entries: &mut HashMap<Key, Entry>, max_entries: usize) {
        while entries.len() > max_entries {
            let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed_at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&oldest_key);
        }
    }

    /// Evict a single entry, forcing the next `resolve` to hit the store.
    pub async fn invalidate(&self, tenant_id: &str, device_id: &str) {
        self.shared
            .entries
            .lock()
            .await
            .remove(&(tenant_id.to_string(), device_id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceStatus;
    use crate::store::MemoryStore;

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .put_device(
                &Scope::tenant("t1"),
                DeviceRegistryRecord {
                    tenant_id: "t1".to_string(),
                    device_id: "d1".to_string(),
                    site_id: "s1".to_string(),
                    status: DeviceStatus::Active,
                    provisioning_secret: "secret".to_string(),
                    created_at: Utc::now(),
                    decommissioned_at: None,
                },
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn resolves_and_caches() {
        let store = seeded_store().await;
        let cache = AuthCache::new(store.clone(), Duration::from_secs(60));

        let first = cache.resolve("t1", "d1").await.unwrap();
        assert!(first.is_some());

        let second = cache.resolve("t1", "d1").await.unwrap();
        assert_eq!(second.unwrap().device_id, "d1");
    }

    #[tokio::test]
    async fn missing_device_resolves_to_none() {
        let store = seeded_store().await;
        let cache = AuthCache::new(store, Duration::from_secs(60));
        assert!(cache.resolve("t1", "unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let store = seeded_store().await;
        let cache = AuthCache::new(store.clone(), Duration::from_secs(60));
        cache.resolve("t1", "d1").await.unwrap();
        cache.invalidate("t1", "d1").await;
        let after = cache.resolve("t1", "d1").await.unwrap();
        assert!(after.is_some());
    }

    #[tokio::test]
    async fn stale_hit_returns_prior_value_without_blocking_on_store() {
        let store = seeded_store().await;
        let cache = AuthCache::new(store.clone(), Duration::from_millis(1));
        let first = cache.resolve("t1", "d1").await.unwrap();
        assert!(first.is_some());

        tokio::time::sleep(Duration::from_millis(5)).await;

        // The entry is now stale; resolve must still return the cached value immediately
        // (a background refresh is spawned rather than awaited inline).
        let second = cache.resolve("t1", "d1").await.unwrap();
        assert_eq!(second.unwrap().device_id, "d1");
    }

    #[tokio::test]
    async fn evicts_least_recently_accessed_entry_over_capacity() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            store
                .put_device(
                    &Scope::tenant("t1"),
                    DeviceRegistryRecord {
                        tenant_id: "t1".to_string(),
                        device_id: format!("d{i}"),
                        site_id: "s1".to_string(),
                        status: DeviceStatus::Active,
                        provisioning_secret: "secret".to_string(),
                        created_at: Utc::now(),
                        decommissioned_at: None,
                    },
                )
                .await
                .unwrap();
        }
        let cache = AuthCache::with_capacity(store, Duration::from_secs(60), 2);

        cache.resolve("t1", "d0").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.resolve("t1", "d1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.resolve("t1", "d2").await.unwrap();

        let entries = cache.shared.entries.lock().await;
        assert_eq!(entries.len(), 2);
        assert!(!entries.contains_key(&("t1".to_string(), "d0".to_string())));
    }
}
