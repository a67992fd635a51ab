//! Largest-first: the heaviest entry goes first.

use std::sync::Arc;

use super::EvictionPolicy;
use crate::cache::CacheEntry;
use crate::config::EvictionStrategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct LargestFirstPolicy;

impl EvictionPolicy for LargestFirstPolicy {
    fn strategy(&self) -> EvictionStrategy {
        EvictionStrategy::LargestFirst
    }

    fn choose(&self, entries: &[Arc<CacheEntry>]) -> Option<Arc<CacheEntry>> {
        entries.iter().max_by_key(|e| e.footprint()).cloned()
    }
}
