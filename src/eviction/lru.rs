//! Approximate LRU: the entry idle for the longest time goes first.

use std::sync::Arc;

use super::EvictionPolicy;
use crate::cache::CacheEntry;
use crate::config::EvictionStrategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn strategy(&self) -> EvictionStrategy {
        EvictionStrategy::Lru
    }

    fn choose(&self, entries: &[Arc<CacheEntry>]) -> Option<Arc<CacheEntry>> {
        entries
            .iter()
            .min_by_key(|e| e.last_access_nanos())
            .cloned()
    }
}
