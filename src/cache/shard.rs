//! Sharded Map Implementation
//!
//! Concurrent hashmap split into independently locked shards. Each shard
//! tracks its entry count and the summed weight of its values so that a
//! cache's estimated byte usage is available without a scan.
//!
//! # Design
//!
//! - Each shard has its own RwLock; reads on different shards never contend
//! - Power-of-2 shard count enables fast modulo via bitwise AND
//! - Conditional operations (`replace_if`, `remove_if`) run under the shard
//!   lock, so callers can compare-and-swap whole values

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Values that report an estimated byte weight
pub trait Weighted {
    fn weight(&self) -> u64;
}

/// Default shard count
pub const DEFAULT_SHARDS: usize = 16;

/// Single shard containing a hashmap and statistics
pub struct Shard<K, V> {
    map: RwLock<HashMap<K, V>>,
    count: AtomicU64,
    weight: AtomicU64,
}

impl<K, V> Shard<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            map: RwLock::new(HashMap::with_capacity(capacity)),
            count: AtomicU64::new(0),
            weight: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed weight of values in this shard
    pub fn weight(&self) -> u64 {
        self.weight.load(Ordering::Relaxed)
    }

    fn added(&self, weight: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.weight.fetch_add(weight, Ordering::Relaxed);
    }

    fn removed(&self, weight: u64) {
        self.count.fetch_sub(1, Ordering::Relaxed);
        self.weight.fetch_sub(weight, Ordering::Relaxed);
    }
}

impl<K: Eq + Hash, V: Weighted> Shard<K, V> {
    fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.map.read().get(key).cloned()
    }

    fn insert(&self, key: K, value: V) -> Option<V> {
        let weight = value.weight();
        let mut guard = self.map.write();
        let old = guard.insert(key, value);

        match &old {
            Some(prev) => {
                self.weight.fetch_add(weight, Ordering::Relaxed);
                self.weight.fetch_sub(prev.weight(), Ordering::Relaxed);
            }
            None => self.added(weight),
        }

        old
    }

    fn replace_if<F>(&self, key: K, value: V, pred: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        let mut guard = self.map.write();
        let current = guard.get(&key)?;
        if !pred(current) {
            return None;
        }

        let weight = value.weight();
        let old = guard.insert(key, value)?;
        self.weight.fetch_add(weight, Ordering::Relaxed);
        self.weight.fetch_sub(old.weight(), Ordering::Relaxed);
        Some(old)
    }

    fn remove(&self, key: &K) -> Option<V> {
        let removed = self.map.write().remove(key);
        if let Some(value) = &removed {
            self.removed(value.weight());
        }
        removed
    }

    fn remove_if<F>(&self, key: &K, pred: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        let mut guard = self.map.write();
        if !guard.get(key).is_some_and(pred) {
            return None;
        }
        let removed = guard.remove(key);
        if let Some(value) = &removed {
            self.removed(value.weight());
        }
        removed
    }

    fn drain_where<F>(&self, pred: &mut F) -> Vec<V>
    where
        F: FnMut(&V) -> bool,
    {
        let mut guard = self.map.write();
        let mut out = Vec::new();
        for (key, value) in std::mem::take(&mut *guard) {
            if pred(&value) {
                self.removed(value.weight());
                out.push(value);
            } else {
                guard.insert(key, value);
            }
        }
        out
    }

    fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.map.read().values().cloned().collect()
    }
}

/// Sharded map with configurable shard count
pub struct ShardedMap<K, V, const N: usize = DEFAULT_SHARDS> {
    shards: Box<[Shard<K, V>]>,
}

impl<K, V, const N: usize> Default for ShardedMap<K, V, N> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<K, V, const N: usize> ShardedMap<K, V, N> {
    /// Create a map pre-sized for roughly `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert!(N.is_power_of_two());
        let per_shard = capacity.div_ceil(N);
        let shards: Vec<Shard<K, V>> = (0..N).map(|_| Shard::with_capacity(per_shard)).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    /// Total entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Total weight across all shards
    pub fn weight(&self) -> u64 {
        self.shards.iter().map(|s| s.weight()).sum()
    }
}

impl<K: Eq + Hash, V: Weighted, const N: usize> ShardedMap<K, V, N> {
    #[inline]
    fn shard(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (N - 1)]
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).get(key)
    }

    /// Insert a value, returning the one it replaced
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard(&key).insert(key, value)
    }

    /// Replace the current value only if `pred` accepts it
    pub fn replace_if<F>(&self, key: K, value: V, pred: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        self.shard(&key).replace_if(key, value, pred)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).remove(key)
    }

    /// Remove the current value only if `pred` accepts it
    pub fn remove_if<F>(&self, key: &K, pred: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        self.shard(key).remove_if(key, pred)
    }

    /// Remove every value matching `pred`
    pub fn drain_where<F>(&self, mut pred: F) -> Vec<V>
    where
        F: FnMut(&V) -> bool,
    {
        self.shards
            .iter()
            .flat_map(|s| s.drain_where(&mut pred))
            .collect()
    }

    /// Point-in-time copy of all values
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.shards.iter().flat_map(|s| s.values()).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
