//! Process-local dataset memo with explicit invalidation.
//!
//! # Responsibility
//! - Memoize the last fetched dataset per entity for a bounded TTL.
//! - Drop entries immediately when a write in this process succeeds.
//!
//! # Invariants
//! - The cache is an injected object; nothing here is global state.
//! - Entries never outlive the configured TTL, so other processes' writes
//!   become visible within one TTL.
//! - A zero TTL disables memoization entirely.

use crate::model::record::Record;
use crate::model::versioned::Versioned;
use log::debug;
use moka::sync::Cache;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

const MAX_CACHED_DATASETS: u64 = 64;

type CachedValue = Arc<dyn Any + Send + Sync>;

/// Memo of fetched datasets keyed by entity root path.
#[derive(Clone)]
pub struct DatasetCache {
    entries: Option<Cache<String, CachedValue>>,
    ttl: Duration,
}

impl DatasetCache {
    pub fn new(ttl: Duration) -> Self {
        let entries = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(MAX_CACHED_DATASETS)
                .time_to_live(ttl)
                .build()
        });
        Self { entries, ttl }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a memoized dataset of type `T`, if present and fresh.
    pub fn get<T: Record>(&self, key: &str) -> Option<Versioned<Vec<T>>> {
        let entries = self.entries.as_ref()?;
        let hit = entries
            .get(key)
            .and_then(|value| value.downcast_ref::<Versioned<Vec<T>>>().cloned());
        debug!(
            "event=cache_lookup module=cache status=ok key={key} hit={}",
            hit.is_some()
        );
        hit
    }

    pub fn insert<T: Record>(&self, key: &str, dataset: &Versioned<Vec<T>>) {
        if let Some(entries) = &self.entries {
            entries.insert(key.to_string(), Arc::new(dataset.clone()));
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Some(entries) = &self.entries {
            entries.invalidate(key);
            debug!("event=cache_invalidate module=cache status=ok key={key}");
        }
    }
}

impl Default for DatasetCache {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CACHE_TTL)
    }
}
