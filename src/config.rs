//! Global engine configuration
//!
//! Loaded from YAML (every field optional) or built in code from
//! [`EngineConfig::default`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::size::ByteSize;

/// Victim selection strategy used when a budget is exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvictionStrategy {
    /// Evict the entry idle the longest
    #[default]
    Lru,
    /// Evict the entry with the largest estimated size
    #[serde(alias = "SIZE_MAX_FIRST")]
    LargestFirst,
    /// Evict a uniformly random entry
    Random,
}

impl fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionStrategy::Lru => "LRU",
            EvictionStrategy::LargestFirst => "LARGEST_FIRST",
            EvictionStrategy::Random => "RANDOM",
        };
        f.write_str(name)
    }
}

impl FromStr for EvictionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "LRU" => Ok(EvictionStrategy::Lru),
            "LARGEST_FIRST" | "SIZE_MAX_FIRST" => Ok(EvictionStrategy::LargestFirst),
            "RANDOM" => Ok(EvictionStrategy::Random),
            other => Err(Error::Config(format!("unknown eviction strategy: {}", other))),
        }
    }
}

/// Which removal listener caches get by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalListenerKind {
    /// Log every removal through `tracing`
    #[default]
    Log,
    /// No listener
    Silent,
}

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log per-operation diagnostics for every cache
    pub enable_log: bool,
    /// Run the periodic statistics monitor
    pub monitor_enabled: bool,
    /// Bypass the engine entirely; every call runs its loader
    pub disabled: bool,

    /// Worker threads kept alive permanently
    pub worker_pool_core_size: usize,
    /// Upper bound on worker threads
    pub worker_pool_max_size: usize,
    /// Pending task capacity before extra threads are started
    pub worker_pool_queue_size: usize,
    /// Thread name prefix for pool workers
    pub worker_thread_name_prefix: String,
    /// Idle time after which non-core workers exit
    pub worker_keep_alive_secs: u64,

    /// Budget applied to every cache on top of its own
    pub per_cache_memory_budget: Option<ByteSize>,
    /// Aggregate budget across all non-exempt caches
    pub global_memory_budget: Option<ByteSize>,
    /// Strategy for caches that do not pick one
    pub default_eviction_strategy: EvictionStrategy,
    /// Default removal listener
    pub removal_listener: RemovalListenerKind,
    /// Maximum characters of a rendered key or value in log lines
    pub log_truncation_length: Option<usize>,
    /// Largest serialized key admitted to any cache (0 = unbounded)
    pub global_max_key_bytes: usize,
    /// Largest serialized value admitted to any cache (0 = unbounded)
    pub global_max_value_bytes: usize,

    /// Period of the per-cache budget sweep
    pub reclaim_interval_ms: u64,
    /// Delay before the first global budget sweep
    pub global_reclaim_initial_delay_ms: u64,
    /// Period of the collected-value sweep
    pub sweep_interval_ms: u64,
    /// Period of the statistics monitor
    pub monitor_interval_ms: u64,
    /// Period of the expired-entry purge
    pub maintenance_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_log: true,
            monitor_enabled: true,
            disabled: false,
            worker_pool_core_size: 8,
            worker_pool_max_size: 64,
            worker_pool_queue_size: 1024,
            worker_thread_name_prefix: "memocache".to_string(),
            worker_keep_alive_secs: 600,
            per_cache_memory_budget: None,
            global_memory_budget: None,
            default_eviction_strategy: EvictionStrategy::Lru,
            removal_listener: RemovalListenerKind::Log,
            log_truncation_length: None,
            global_max_key_bytes: 0,
            global_max_value_bytes: 0,
            reclaim_interval_ms: 60_000,
            global_reclaim_initial_delay_ms: 10,
            sweep_interval_ms: 60_000,
            monitor_interval_ms: 60_000,
            maintenance_interval_ms: 1_000,
        }
    }
}

const MIN_INTERVAL_MS: u64 = 10;

impl EngineConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_core_size == 0 {
            return Err(Error::Config("worker_pool_core_size must be >= 1".into()));
        }
        if self.worker_pool_max_size < self.worker_pool_core_size {
            return Err(Error::Config(format!(
                "worker_pool_max_size ({}) must be >= worker_pool_core_size ({})",
                self.worker_pool_max_size, self.worker_pool_core_size
            )));
        }
        if self.worker_pool_queue_size == 0 {
            return Err(Error::Config("worker_pool_queue_size must be >= 1".into()));
        }

        let intervals = [
            ("reclaim_interval_ms", self.reclaim_interval_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
            ("maintenance_interval_ms", self.maintenance_interval_ms),
        ];
        for (name, value) in intervals {
            if value < MIN_INTERVAL_MS {
                return Err(Error::Config(format!(
                    "{} must be >= {}ms, got {}",
                    name, MIN_INTERVAL_MS, value
                )));
            }
        }

        if self.log_truncation_length == Some(0) {
            return Err(Error::Config("log_truncation_length must be > 0".into()));
        }

        Ok(())
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }

    pub fn global_reclaim_initial_delay(&self) -> Duration {
        Duration::from_millis(self.global_reclaim_initial_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}
