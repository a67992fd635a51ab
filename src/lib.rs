//! memocache - In-Process Memoizing Cache Engine
//!
//! Memoizes expensive operations keyed by the operation's identity plus its
//! argument values, with expire-after-write, background refresh and
//! memory-budget enforcement across many independent caches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Engine                               │
//! │                     get_or_compute / stats                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Registry   │───▶│   Budget     │───▶│   Eviction   │       │
//! │  │  (caches)    │    │   Enforcer   │    │   Policies   │       │
//! │  └──────┬───────┘    └──────▲───────┘    └──────────────┘       │
//! │         │                   │ signal limiter                    │
//! │  ┌──────▼───────┐    ┌──────┴───────┐    ┌──────────────┐       │
//! │  │ Worker Pool  │    │  Background  │───▶│   Monitor    │       │
//! │  │  (refresh)   │    │    Loops     │    │ (read-only)  │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             ▼                                   │
//! │                    Collected-value sweeper                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Keys, entries, descriptors, instances and the registry
//! - [`eviction`] - LRU-approximate, largest-first and random policies
//! - [`reclaim`] - Budget enforcement, rate limiting and background loops
//! - [`monitoring`] - Per-cache reports and Prometheus gauges
//! - [`engine`] - The public memoization surface
//! - [`config`] - Engine-wide configuration
//! - [`error`] - Error types

pub mod cache;
pub mod clock;
pub mod config;
pub mod copy;
pub mod engine;
pub mod error;
pub mod eviction;
pub mod logging;
pub mod monitoring;
pub mod pool;
pub mod reclaim;
pub mod size;

// Re-export commonly used types
pub use cache::{
    Arg, CacheDescriptor, CacheEquals, CacheKey, RemovalCause, RemovalListener, StatsSnapshot,
    TimeUnit,
};
pub use config::{EngineConfig, EvictionStrategy, RemovalListenerKind};
pub use copy::CopyStrategy;
pub use engine::{CacheValue, Engine, EngineBuilder, PutValueTrigger};
pub use error::{Error, Result};
pub use monitoring::CacheReport;
pub use size::{ByteSize, SizeEstimator};
