//! Random victim from the current snapshot.

use rand::seq::SliceRandom;
use std::sync::Arc;

use super::EvictionPolicy;
use crate::cache::CacheEntry;
use crate::config::EvictionStrategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPolicy;

impl EvictionPolicy for RandomPolicy {
    fn strategy(&self) -> EvictionStrategy {
        EvictionStrategy::Random
    }

    fn choose(&self, entries: &[Arc<CacheEntry>]) -> Option<Arc<CacheEntry>> {
        entries.choose(&mut rand::thread_rng()).cloned()
    }
}
