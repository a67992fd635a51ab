//! Removal listeners
//!
//! Called once per logical removal, outside any map lock.

use tracing::{debug, info};

use super::entry::{CachedValue, RemovalCause};
use super::key::CacheKey;
use crate::logging::LogPolicy;

/// Observer for entries leaving a cache
pub trait RemovalListener: Send + Sync {
    /// `value` is `None` when the payload had already been collected
    fn on_removal(
        &self,
        cache: &str,
        key: &CacheKey,
        value: Option<&dyn CachedValue>,
        cause: RemovalCause,
    );
}

/// Logs every removal through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRemovalListener {
    policy: LogPolicy,
}

impl LoggingRemovalListener {
    pub fn new(policy: LogPolicy) -> Self {
        Self { policy }
    }
}

impl RemovalListener for LoggingRemovalListener {
    fn on_removal(
        &self,
        cache: &str,
        key: &CacheKey,
        value: Option<&dyn CachedValue>,
        cause: RemovalCause,
    ) {
        let key = self.policy.render(key);
        let value = match value {
            Some(v) => self.policy.render(v),
            None => "<collected>".to_string(),
        };

        if cause.is_eviction() {
            info!(cache, %cause, key = %key, value = %value, "Cache entry evicted");
        } else {
            debug!(cache, %cause, key = %key, value = %value, "Cache entry removed");
        }
    }
}
