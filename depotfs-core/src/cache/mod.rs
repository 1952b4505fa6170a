//! Caches for depot-backed data.
//!
//! Every cache here populates through [`SingleFlight`], so concurrent misses
//! for one key issue a single remote call. Failed loads are never stored.

mod single_flight;
mod snapshot;

pub use single_flight::SingleFlight;
pub use snapshot::{RemoteSnapshot, RemoteSnapshotCache, SnapshotKey};

use crate::error::DepotError;
use dashmap::DashMap;
use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hit/miss counters shared by the caches.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    failed_loads: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failed_loads: self.failed_loads.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`CacheCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub failed_loads: u64,
}

/// Unbounded, populate-once cache.
///
/// Only used for values that cannot change for the session (content and
/// sizes of depot files at a fixed changelist), so entries never expire.
pub struct FlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    values: DashMap<K, V>,
    flights: SingleFlight<K, V, DepotError>,
    counters: CacheCounters,
}

impl<K, V> FlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            flights: SingleFlight::new(),
            counters: CacheCounters::default(),
        }
    }

    /// Returns the cached value for `key`, running `load` on a miss.
    pub fn get_or_load<F>(&self, key: &K, load: F) -> Result<V, DepotError>
    where
        F: FnOnce() -> Result<V, DepotError>,
    {
        if let Some(value) = self.values.get(key) {
            self.counters.record_hit();
            return Ok(value.clone());
        }

        self.flights.work(key, || {
            // Another leader may have finished between our lookup and joining.
            if let Some(value) = self.values.get(key) {
                return Ok(value.clone());
            }
            self.counters.record_miss();
            match load() {
                Ok(value) => {
                    self.values.insert(key.clone(), value.clone());
                    Ok(value)
                }
                Err(err) => {
                    self.counters.record_failure();
                    Err(err)
                }
            }
        })
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.values.get(key).map(|value| value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}

impl<K, V> Default for FlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
