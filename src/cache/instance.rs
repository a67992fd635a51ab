//! Cache instances
//!
//! One per registered cache: the descriptor it was built from, its TTL
//! store and statistics, and the refresh wiring when refresh-after-write is
//! enabled.

use crossbeam::channel::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::descriptor::CacheDescriptor;
use super::entry::{CacheEntry, CollectedNotice, LoadedValue, Reloader, RemovalCause};
use super::key::CacheKey;
use super::listener::RemovalListener;
use super::metrics::{CacheStats, StatsSnapshot};
use super::store::TtlStore;
use crate::pool::WorkerPool;

/// Background refresh wiring
struct Refresh {
    after: Duration,
    pool: Arc<WorkerPool>,
}

pub struct CacheInstance {
    name: Arc<str>,
    descriptor: CacheDescriptor,
    store: TtlStore,
    stats: Arc<CacheStats>,
    queue: Sender<CollectedNotice>,
    refresh: Option<Refresh>,
}

impl CacheInstance {
    pub fn new(
        name: &str,
        descriptor: CacheDescriptor,
        pool: Arc<WorkerPool>,
        queue: Sender<CollectedNotice>,
        listener: Option<Arc<dyn RemovalListener>>,
    ) -> Self {
        let name: Arc<str> = Arc::from(name);
        let stats = Arc::new(CacheStats::new());
        let store = TtlStore::new(
            Arc::clone(&name),
            descriptor.init_capacity,
            descriptor.max_capacity,
            descriptor.expire_after(),
            Arc::clone(&stats),
            listener,
        );
        let refresh = descriptor
            .refresh_after()
            .map(|after| Refresh { after, pool });

        Self {
            name,
            descriptor,
            store,
            stats,
            queue,
            refresh,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &CacheDescriptor {
        &self.descriptor
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats
            .snapshot(self.store.len() as u64, self.store.weight())
    }

    /// Estimated bytes held by this cache
    pub fn usage_bytes(&self) -> u64 {
        self.store.weight()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn entries(&self) -> Vec<Arc<CacheEntry>> {
        self.store.entries()
    }

    pub fn refresh_enabled(&self) -> bool {
        self.refresh.is_some()
    }

    /// Usable entry for `key`.
    ///
    /// Expired, collected and stale entries all read as absent; the caller
    /// recomputes and overwrites them.
    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entry = self.store.get(key)?;
        if entry.is_stale() || entry.is_collected() {
            return None;
        }
        Some(entry)
    }

    /// Build an entry owned by this cache
    pub fn make_entry(
        &self,
        key: CacheKey,
        loaded: LoadedValue,
        reloader: Option<Reloader>,
    ) -> Arc<CacheEntry> {
        let reloader = if self.refresh.is_some() { reloader } else { None };
        Arc::new(CacheEntry::new(
            Arc::clone(&self.name),
            key,
            loaded,
            self.queue.clone(),
            reloader,
        ))
    }

    pub fn put(&self, entry: Arc<CacheEntry>) {
        self.store.insert(entry);
    }

    /// Schedule a background reload if `entry` is past its refresh time.
    ///
    /// A rejected task marks the entry stale so the next reader reloads it
    /// inline instead.
    pub fn refresh_if_due(self: &Arc<Self>, entry: &Arc<CacheEntry>) {
        let Some(refresh) = &self.refresh else {
            return;
        };
        if entry.age() < refresh.after || entry.reloader().is_none() || !entry.begin_refresh() {
            return;
        }

        let instance = Arc::clone(self);
        let target = Arc::clone(entry);
        if let Err(e) = refresh
            .pool
            .submit(move || instance.complete_refresh(&target))
        {
            debug!(cache = %self.name, error = %e, "Refresh rejected, entry marked stale");
            entry.mark_stale();
            entry.end_refresh();
        }
    }

    /// Run the reload for `entry` and swap the result in
    pub fn complete_refresh(&self, entry: &Arc<CacheEntry>) {
        let Some(reloader) = entry.reloader() else {
            entry.end_refresh();
            return;
        };

        let started = Instant::now();
        match reloader() {
            Ok(loaded) => {
                self.stats.record_load_success(started.elapsed());
                let fresh = self.make_entry(entry.key().clone(), loaded, Some(reloader));
                if !self.store.replace_if_same(entry, fresh) {
                    debug!(cache = %self.name, "Refreshed value superseded, discarding");
                }
            }
            Err(reason) => {
                self.stats.record_load_failure(started.elapsed());
                warn!(cache = %self.name, error = %reason, "Background refresh failed");
                entry.end_refresh();
            }
        }
    }

    /// Remove `entry` for a budget reclamation
    pub fn evict(&self, entry: &Arc<CacheEntry>) -> bool {
        self.store.remove_exact(entry, RemovalCause::Budget)
    }

    /// Remove the entry for `key` if its payload has been collected
    pub fn evict_collected(&self, key: &CacheKey) -> bool {
        self.store
            .remove_where(key, |e| e.is_collected(), RemovalCause::Collected)
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.store.invalidate(key)
    }

    pub fn invalidate_all(&self) -> u64 {
        self.store.invalidate_all()
    }

    pub fn purge_expired(&self) -> u64 {
        self.store.purge_expired()
    }
}

impl std::fmt::Debug for CacheInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInstance")
            .field("name", &self.name)
            .field("entries", &self.store.len())
            .field("bytes", &self.store.weight())
            .field("refresh", &self.refresh.as_ref().map(|r| r.after))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
