//! In-memory TTL cache for detection queries.
//!
//! Expired entries are kept (not evicted) so they can be served as stale
//! fallback when the rate limiter says no or the upstream call fails. Only
//! `invalidate_all` removes entries.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::clock::SharedClock;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Diagnostics row for one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub cache: &'static str,
    pub key: String,
    /// Negative once the entry is stale.
    pub expires_in_ms: i64,
    pub data_count: usize,
}

pub struct TtlCache<T> {
    name: &'static str,
    ttl: Duration,
    clock: SharedClock,
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(name: &'static str, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            name,
            ttl,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry for `key`, fresh or stale; callers decide with `is_fresh`.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        let g = self.entries.read().unwrap_or_else(|p| p.into_inner());
        g.get(key).cloned()
    }

    /// Store with the instance TTL.
    pub fn put(&self, key: &str, data: T) -> CacheEntry<T> {
        self.put_with_ttl(key, data, self.ttl)
    }

    pub fn put_with_ttl(&self, key: &str, data: T, ttl: Duration) -> CacheEntry<T> {
        let now = self.clock.now();
        let entry = CacheEntry {
            data,
            cached_at: now,
            expires_at: now + ttl,
        };
        let mut g = self.entries.write().unwrap_or_else(|p| p.into_inner());
        g.insert(key.to_string(), entry.clone());
        entry
    }

    /// Full clear under the write lock: readers see all-or-nothing.
    pub fn invalidate_all(&self) {
        let mut g = self.entries.write().unwrap_or_else(|p| p.into_inner());
        g.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<U: Clone> TtlCache<Vec<U>> {
    pub fn status(&self) -> Vec<CacheStatus> {
        let now = self.clock.now();
        let g = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let mut rows: Vec<CacheStatus> = g
            .iter()
            .map(|(k, e)| CacheStatus {
                cache: self.name,
                key: k.clone(),
                expires_in_ms: (e.expires_at - now).num_milliseconds(),
                data_count: e.data.len(),
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }
}

/// Deterministic key from a station-id set: sorted, deduplicated, joined.
pub fn cache_key<S: AsRef<str>>(kind: &str, station_ids: &[S]) -> String {
    let mut ids: Vec<&str> = station_ids.iter().map(AsRef::as_ref).collect();
    ids.sort_unstable();
    ids.dedup();
    format!("{}_{}", kind, ids.join("_"))
}
