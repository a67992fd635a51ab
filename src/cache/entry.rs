//! Cache Entries
//!
//! An entry is written once and never mutated in place: a refresh builds a
//! new entry and swaps it into the map. The only mutable state is access
//! bookkeeping and the collectible payload slot.
//!
//! # Collectible payloads
//!
//! The result object lives in a [`Collectible`] slot that can be emptied
//! under memory pressure without touching the map. Emptying the slot posts
//! a [`CollectedNotice`] to the collection queue so the sweeper can remove
//! the now-hollow entry later.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::key::CacheKey;
use crate::clock;

/// Type-erased cached result
pub trait CachedValue: Any + fmt::Debug + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + fmt::Debug + Send + Sync> CachedValue for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Shared handle to a cached result
pub type Payload = Arc<dyn CachedValue>;

/// Recomputes a value for background refresh
pub type Reloader = Arc<dyn Fn() -> Result<LoadedValue, String> + Send + Sync>;

/// A freshly computed value with its measured sizes
pub struct LoadedValue {
    pub payload: Payload,
    /// Serialized length used for value-size limits
    pub value_len: usize,
    /// Estimated in-memory cost
    pub value_bytes: u64,
}

/// Why an entry left its cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Invalidated by the application
    Explicit,
    /// Overwritten by a newer value for the same key
    Replaced,
    /// Expire-after-write elapsed
    Expired,
    /// Entry count exceeded the cache's maximum capacity
    Size,
    /// Removed by a memory-budget reclamation pass
    Budget,
    /// Payload was discarded under memory pressure
    Collected,
}

impl RemovalCause {
    /// Whether the removal was the engine's decision rather than the caller's
    pub fn is_eviction(&self) -> bool {
        !matches!(self, RemovalCause::Explicit | RemovalCause::Replaced)
    }
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemovalCause::Explicit => "explicit",
            RemovalCause::Replaced => "replaced",
            RemovalCause::Expired => "expired",
            RemovalCause::Size => "size",
            RemovalCause::Budget => "budget",
            RemovalCause::Collected => "collected",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Collection queue
// =============================================================================

/// Posted when a payload is discarded
#[derive(Debug, Clone)]
pub struct CollectedNotice {
    pub cache: Arc<str>,
    pub key: CacheKey,
}

/// Unbounded queue of collected-payload notices
#[derive(Clone)]
pub struct CollectionQueue {
    sender: Sender<CollectedNotice>,
    receiver: Receiver<CollectedNotice>,
}

impl Default for CollectionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionQueue {
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> Sender<CollectedNotice> {
        self.sender.clone()
    }

    pub fn receiver(&self) -> Receiver<CollectedNotice> {
        self.receiver.clone()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// A payload slot that can be emptied independently of the map
pub struct Collectible {
    slot: RwLock<Option<Payload>>,
    queue: Sender<CollectedNotice>,
}

impl Collectible {
    pub fn new(payload: Payload, queue: Sender<CollectedNotice>) -> Self {
        Self {
            slot: RwLock::new(Some(payload)),
            queue,
        }
    }

    pub fn get(&self) -> Option<Payload> {
        self.slot.read().clone()
    }

    pub fn is_collected(&self) -> bool {
        self.slot.read().is_none()
    }

    /// Drop the payload and post `notice`. Returns false if already empty.
    pub fn discard(&self, notice: CollectedNotice) -> bool {
        let taken = self.slot.write().take();
        if taken.is_none() {
            return false;
        }
        // The receiver lives as long as the engine; a send error means shutdown
        let _ = self.queue.send(notice);
        true
    }
}

// =============================================================================
// CacheEntry
// =============================================================================

/// One cached result plus its bookkeeping
pub struct CacheEntry {
    key: CacheKey,
    cache: Arc<str>,
    payload: Collectible,
    value_len: usize,
    value_bytes: u64,
    written_at: Instant,
    /// Nanoseconds on the process clock
    last_access: AtomicU64,
    refreshing: AtomicBool,
    stale: AtomicBool,
    reloader: Option<Reloader>,
}

impl CacheEntry {
    pub fn new(
        cache: Arc<str>,
        key: CacheKey,
        loaded: LoadedValue,
        queue: Sender<CollectedNotice>,
        reloader: Option<Reloader>,
    ) -> Self {
        Self {
            key,
            cache,
            payload: Collectible::new(loaded.payload, queue),
            value_len: loaded.value_len,
            value_bytes: loaded.value_bytes,
            written_at: Instant::now(),
            last_access: AtomicU64::new(clock::now_nanos()),
            refreshing: AtomicBool::new(false),
            stale: AtomicBool::new(false),
            reloader,
        }
    }

    #[inline]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    #[inline]
    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    /// Read the payload and mark the entry as accessed
    pub fn value(&self) -> Option<Payload> {
        let payload = self.payload.get();
        if payload.is_some() {
            self.touch();
        }
        payload
    }

    /// Read the payload without touching access time
    pub fn peek(&self) -> Option<Payload> {
        self.payload.get()
    }

    #[inline]
    pub fn touch(&self) {
        self.last_access
            .store(clock::now_nanos(), Ordering::Relaxed);
    }

    pub fn is_collected(&self) -> bool {
        self.payload.is_collected()
    }

    /// Discard the payload as the runtime would under memory pressure
    pub fn discard(&self) -> bool {
        self.payload.discard(CollectedNotice {
            cache: Arc::clone(&self.cache),
            key: self.key.clone(),
        })
    }

    pub fn value_len(&self) -> usize {
        self.value_len
    }

    pub fn value_bytes(&self) -> u64 {
        self.value_bytes
    }

    /// Estimated cost of key plus value
    #[inline]
    pub fn footprint(&self) -> u64 {
        self.key.estimated_bytes() + self.value_bytes
    }

    pub fn age(&self) -> Duration {
        self.written_at.elapsed()
    }

    pub fn last_access_nanos(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Time since the last read
    pub fn idle_nanos(&self) -> u64 {
        clock::now_nanos().saturating_sub(self.last_access_nanos())
    }

    pub fn reloader(&self) -> Option<Reloader> {
        self.reloader.clone()
    }

    /// Claim the right to refresh this entry. Only one caller wins.
    pub fn begin_refresh(&self) -> bool {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_refresh(&self) {
        self.refreshing.store(false, Ordering::Release);
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Refresh could not be scheduled; the next reader recomputes inline
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("cache", &self.cache)
            .field("key", &self.key)
            .field("value_bytes", &self.value_bytes)
            .field("collected", &self.is_collected())
            .field("stale", &self.is_stale())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
