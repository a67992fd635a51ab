//! Bounded TTL store
//!
//! The concurrent map underneath one cache. Expiry is lazy on read plus a
//! periodic purge; entry count is bounded by evicting the oldest write.
//! Every removal is reported to the stats and the listener after the shard
//! lock has been released.

use std::sync::Arc;
use std::time::Duration;

use super::entry::{CacheEntry, RemovalCause};
use super::key::CacheKey;
use super::listener::RemovalListener;
use super::metrics::CacheStats;
use super::shard::{ShardedMap, Weighted};

impl Weighted for Arc<CacheEntry> {
    fn weight(&self) -> u64 {
        self.footprint()
    }
}

/// Concurrent map with expire-after-write and a maximum entry count
pub struct TtlStore {
    name: Arc<str>,
    map: ShardedMap<CacheKey, Arc<CacheEntry>>,
    expire_after: Duration,
    max_capacity: u64,
    stats: Arc<CacheStats>,
    listener: Option<Arc<dyn RemovalListener>>,
}

impl TtlStore {
    pub fn new(
        name: Arc<str>,
        init_capacity: usize,
        max_capacity: u64,
        expire_after: Duration,
        stats: Arc<CacheStats>,
        listener: Option<Arc<dyn RemovalListener>>,
    ) -> Self {
        Self {
            name,
            map: ShardedMap::with_capacity(init_capacity),
            expire_after,
            max_capacity,
            stats,
            listener,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Summed footprint of all entries
    pub fn weight(&self) -> u64 {
        self.map.weight()
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.age() >= self.expire_after
    }

    /// Live entry for `key`; an expired one is removed on the way
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entry = self.map.get(key)?;
        if self.is_expired(&entry) {
            self.remove_exact(&entry, RemovalCause::Expired);
            return None;
        }
        Some(entry)
    }

    pub fn insert(&self, entry: Arc<CacheEntry>) {
        if let Some(old) = self.map.insert(entry.key().clone(), entry) {
            self.notify(&old, RemovalCause::Replaced);
        }
        self.enforce_capacity();
    }

    /// Swap in `fresh` only if `current` is still the mapped entry
    pub fn replace_if_same(&self, current: &Arc<CacheEntry>, fresh: Arc<CacheEntry>) -> bool {
        let key = fresh.key().clone();
        match self.map.replace_if(key, fresh, |v| Arc::ptr_eq(v, current)) {
            Some(old) => {
                self.notify(&old, RemovalCause::Replaced);
                true
            }
            None => false,
        }
    }

    /// Remove `entry` only if it is still the mapped entry for its key
    pub fn remove_exact(&self, entry: &Arc<CacheEntry>, cause: RemovalCause) -> bool {
        match self.map.remove_if(entry.key(), |v| Arc::ptr_eq(v, entry)) {
            Some(old) => {
                self.notify(&old, cause);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `key` if `pred` accepts it
    pub fn remove_where<F>(&self, key: &CacheKey, pred: F, cause: RemovalCause) -> bool
    where
        F: FnOnce(&Arc<CacheEntry>) -> bool,
    {
        match self.map.remove_if(key, pred) {
            Some(old) => {
                self.notify(&old, cause);
                true
            }
            None => false,
        }
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        match self.map.remove(key) {
            Some(old) => {
                self.notify(&old, RemovalCause::Explicit);
                true
            }
            None => false,
        }
    }

    pub fn invalidate_all(&self) -> u64 {
        let removed = self.map.drain_where(|_| true);
        for entry in &removed {
            self.notify(entry, RemovalCause::Explicit);
        }
        removed.len() as u64
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> u64 {
        let expire_after = self.expire_after;
        let removed = self.map.drain_where(|e| e.age() >= expire_after);
        for entry in &removed {
            self.notify(entry, RemovalCause::Expired);
        }
        removed.len() as u64
    }

    /// Snapshot of the current entries
    pub fn entries(&self) -> Vec<Arc<CacheEntry>> {
        self.map.values()
    }

    fn enforce_capacity(&self) {
        while self.map.len() as u64 > self.max_capacity {
            let oldest = self.map.values().into_iter().max_by_key(|e| e.age());
            match oldest {
                Some(victim) => {
                    self.remove_exact(&victim, RemovalCause::Size);
                }
                None => break,
            }
        }
    }

    fn notify(&self, entry: &Arc<CacheEntry>, cause: RemovalCause) {
        if cause.is_eviction() {
            self.stats.record_eviction();
        }
        if let Some(listener) = &self.listener {
            let value = entry.peek();
            listener.on_removal(&self.name, entry.key(), value.as_deref(), cause);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
