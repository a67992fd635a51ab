//! Collected-value sweeper
//!
//! Drains the collection queue and removes the map entries whose payloads
//! were discarded, so entry counts and byte accounting stop including
//! values that no longer exist.

use crossbeam::channel::Receiver;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CollectedNotice, Registry};

pub struct CollectedSweeper {
    registry: Arc<Registry>,
    receiver: Receiver<CollectedNotice>,
}

impl CollectedSweeper {
    pub fn new(registry: Arc<Registry>, receiver: Receiver<CollectedNotice>) -> Self {
        Self { registry, receiver }
    }

    /// Notices waiting to be processed
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Process every queued notice. Returns the number of entries removed.
    pub fn sweep(&self) -> u64 {
        let mut removed = 0;
        let mut seen = 0;
        for notice in self.receiver.try_iter() {
            seen += 1;
            match self.registry.get(&notice.cache) {
                Some(instance) if instance.evict_collected(&notice.key) => removed += 1,
                Some(_) => {}
                None => debug!(cache = %notice.cache, "Collected value for unknown cache"),
            }
        }
        if seen > 0 {
            debug!(seen, removed, "Swept collected values");
        }
        removed
    }
}
