//! Per-operation cache configuration
//!
//! A descriptor is supplied on the first call of an operation and validated
//! once, when the cache is created. Defaults mirror a small, short-lived
//! cache: 128 initial slots, 1024 entries, three seconds to live.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EvictionStrategy;
use crate::copy::CopyStrategy;
use crate::error::{Error, Result};
use crate::size::ByteSize;

/// Sentinel for "refresh disabled"
pub const REFRESH_DISABLED: i64 = -1;

/// Smallest accepted expire-after-write
pub const MIN_EXPIRE: Duration = Duration::from_millis(50);

/// Required gap between refresh and expiry
pub const MIN_REFRESH_GAP: Duration = Duration::from_millis(100);

/// Unit for the descriptor's durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Millis,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert a non-negative amount to a `Duration`
    pub fn to_duration(self, amount: i64) -> Duration {
        let amount = amount.max(0) as u64;
        match self {
            TimeUnit::Millis => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(86_400)),
        }
    }
}

/// Configuration bundle for one operation's cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDescriptor {
    /// Cache name; defaults to the operation key
    pub name: Option<String>,
    pub init_capacity: usize,
    pub max_capacity: u64,
    pub expire_after_write: i64,
    /// [`REFRESH_DISABLED`] or any non-positive value turns refresh off
    pub refresh_after_write: i64,
    pub time_unit: TimeUnit,
    /// Largest serialized key admitted (0 = unbounded)
    pub max_key_bytes: usize,
    /// Largest serialized value admitted (0 = unbounded)
    pub max_value_bytes: usize,
    pub memory_budget: Option<ByteSize>,
    /// Overrides the engine's default strategy
    pub eviction_strategy: Option<EvictionStrategy>,
    /// Exempt from the aggregate budget; the cache's own budget still applies
    pub skip_global_budget: bool,
    pub verbose_log: bool,
    pub copy_strategy: CopyStrategy,
}

impl Default for CacheDescriptor {
    fn default() -> Self {
        Self {
            name: None,
            init_capacity: 128,
            max_capacity: 1024,
            expire_after_write: 3,
            refresh_after_write: REFRESH_DISABLED,
            time_unit: TimeUnit::Seconds,
            max_key_bytes: 0,
            max_value_bytes: 0,
            memory_budget: None,
            eviction_strategy: None,
            skip_global_budget: false,
            verbose_log: false,
            copy_strategy: CopyStrategy::None,
        }
    }
}

impl CacheDescriptor {
    /// Descriptor expiring `expire_after_write` units after each write
    pub fn new(expire_after_write: i64, time_unit: TimeUnit) -> Self {
        Self {
            expire_after_write,
            time_unit,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_capacity(mut self, init_capacity: usize, max_capacity: u64) -> Self {
        self.init_capacity = init_capacity;
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_refresh(mut self, refresh_after_write: i64) -> Self {
        self.refresh_after_write = refresh_after_write;
        self
    }

    pub fn with_key_limit(mut self, max_key_bytes: usize) -> Self {
        self.max_key_bytes = max_key_bytes;
        self
    }

    pub fn with_value_limit(mut self, max_value_bytes: usize) -> Self {
        self.max_value_bytes = max_value_bytes;
        self
    }

    pub fn with_memory_budget(mut self, budget: impl Into<ByteSize>) -> Self {
        self.memory_budget = Some(budget.into());
        self
    }

    pub fn with_eviction_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.eviction_strategy = Some(strategy);
        self
    }

    pub fn with_copy_strategy(mut self, strategy: CopyStrategy) -> Self {
        self.copy_strategy = strategy;
        self
    }

    pub fn skip_global_budget(mut self) -> Self {
        self.skip_global_budget = true;
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose_log = true;
        self
    }

    /// Name the cache is registered under
    pub fn cache_name(&self, operation: &str) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => operation.to_string(),
        }
    }

    pub fn expire_after(&self) -> Duration {
        self.time_unit.to_duration(self.expire_after_write)
    }

    /// `None` when refresh is disabled
    pub fn refresh_after(&self) -> Option<Duration> {
        (self.refresh_after_write > 0).then(|| self.time_unit.to_duration(self.refresh_after_write))
    }

    pub fn budget_bytes(&self) -> Option<u64> {
        self.memory_budget.map(ByteSize::bytes)
    }

    /// Check the descriptor before a cache is built from it
    pub fn validate(&self, cache: &str) -> Result<()> {
        let invalid = |reason: String| Error::InvalidDescriptor {
            cache: cache.to_string(),
            reason,
        };

        if self.init_capacity < 1 {
            return Err(invalid("init_capacity must be >= 1".to_string()));
        }
        if self.init_capacity as u64 > self.max_capacity {
            return Err(invalid(format!(
                "init_capacity ({}) must not exceed max_capacity ({})",
                self.init_capacity, self.max_capacity
            )));
        }
        if self.expire_after_write < 1 {
            return Err(invalid("expire_after_write must be >= 1".to_string()));
        }

        let expire = self.expire_after();
        if expire < MIN_EXPIRE {
            return Err(invalid(format!(
                "expire_after_write must be at least {}ms, got {}ms",
                MIN_EXPIRE.as_millis(),
                expire.as_millis()
            )));
        }

        if let Some(refresh) = self.refresh_after() {
            if refresh >= expire {
                return Err(invalid(format!(
                    "refresh_after_write ({}ms) must be less than expire_after_write ({}ms)",
                    refresh.as_millis(),
                    expire.as_millis()
                )));
            }
            if expire - refresh <= MIN_REFRESH_GAP {
                return Err(invalid(format!(
                    "expire_after_write must exceed refresh_after_write by more than {}ms",
                    MIN_REFRESH_GAP.as_millis()
                )));
            }
        }

        if self.memory_budget == Some(ByteSize(0)) {
            return Err(invalid("memory_budget must be > 0 when set".to_string()));
        }

        Ok(())
    }
}
