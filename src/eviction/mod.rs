//! Eviction Policies
//!
//! Victim selection for memory-budget reclamation. Policies scan a snapshot
//! of a cache's entries instead of maintaining an ordered structure on every
//! access: a budget breach is normally small, so a linear scan per removal
//! is cheaper than exact bookkeeping on the hot path. Results are
//! approximate under concurrent writes.
//!
//! Reclamation loops are bounded by [`MAX_RECLAIM_ATTEMPTS`] iterations that
//! free nothing, so concurrent removals cannot make them spin forever.

mod largest_first;
mod lru;
mod random;

pub use largest_first::LargestFirstPolicy;
pub use lru::LruPolicy;
pub use random::RandomPolicy;

use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheEntry, CacheInstance};
use crate::config::EvictionStrategy;

/// Iterations without progress before a reclamation pass gives up
pub const MAX_RECLAIM_ATTEMPTS: u32 = 1000;

pub trait EvictionPolicy: Send + Sync {
    fn strategy(&self) -> EvictionStrategy;

    /// Pick a victim from a snapshot of entries
    fn choose(&self, entries: &[Arc<CacheEntry>]) -> Option<Arc<CacheEntry>>;

    fn select_victim(&self, instance: &CacheInstance) -> Option<Arc<CacheEntry>> {
        self.choose(&instance.entries())
    }

    /// Evict from `instance` until `target_bytes` are freed or no victim is
    /// left. Returns the bytes actually freed.
    fn reclaim(&self, instance: &CacheInstance, current_bytes: u64, target_bytes: u64) -> u64 {
        let mut freed = 0u64;
        let mut evicted = 0u64;
        let mut attempts = MAX_RECLAIM_ATTEMPTS;

        while freed < target_bytes && attempts > 0 {
            let Some(victim) = self.select_victim(instance) else {
                break;
            };
            let footprint = victim.footprint();
            if instance.evict(&victim) && footprint > 0 {
                freed += footprint;
                evicted += 1;
            } else {
                attempts -= 1;
            }
        }

        debug!(
            cache = instance.name(),
            strategy = %self.strategy(),
            current_bytes,
            target_bytes,
            freed,
            evicted,
            "Reclaimed cache memory"
        );
        freed
    }
}

/// Shared policy instance for a strategy
pub fn policy_for(strategy: EvictionStrategy) -> &'static dyn EvictionPolicy {
    static LRU: LruPolicy = LruPolicy;
    static LARGEST_FIRST: LargestFirstPolicy = LargestFirstPolicy;
    static RANDOM: RandomPolicy = RandomPolicy;

    match strategy {
        EvictionStrategy::Lru => &LRU,
        EvictionStrategy::LargestFirst => &LARGEST_FIRST,
        EvictionStrategy::Random => &RANDOM,
    }
}

/// Reclaim `target_bytes` across several caches.
///
/// Caches exempt from the global budget are left alone. Each step samples a
/// random remaining cache and evicts one victim from it.
pub fn reclaim_across(
    policy: &dyn EvictionPolicy,
    caches: &[Arc<CacheInstance>],
    target_bytes: u64,
) -> u64 {
    let candidates: Vec<&Arc<CacheInstance>> = caches
        .iter()
        .filter(|c| !c.descriptor().skip_global_budget)
        .collect();
    if candidates.is_empty() || target_bytes == 0 {
        return 0;
    }

    let mut rng = rand::thread_rng();
    let mut freed = 0u64;
    let mut attempts = MAX_RECLAIM_ATTEMPTS;

    while freed < target_bytes && attempts > 0 {
        let Some(cache) = candidates.choose(&mut rng) else {
            break;
        };

        let step = match policy.select_victim(cache) {
            Some(victim) if cache.evict(&victim) => victim.footprint(),
            _ => 0,
        };

        if step == 0 {
            attempts -= 1;
        } else {
            freed += step;
        }
    }

    debug!(
        strategy = %policy.strategy(),
        caches = candidates.len(),
        target_bytes,
        freed,
        exhausted = attempts == 0,
        "Reclaimed memory across caches"
    );
    freed
}

// =============================================================================
// Test helpers
// =============================================================================
