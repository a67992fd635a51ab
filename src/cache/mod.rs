//! Cache data model and storage
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Registry                            │
//! │        name → CacheInstance   (lazy, double-checked)         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  CacheInstance                                               │
//! │  ┌───────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//! │  │ TtlStore      │  │ CacheStats   │  │ Refresh wiring   │   │
//! │  │ (ShardedMap)  │  │ (atomics)    │  │ (WorkerPool)     │   │
//! │  └───────┬───────┘  └──────────────┘  └──────────────────┘   │
//! │          │                                                   │
//! │   CacheKey → Arc<CacheEntry> → Collectible payload           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads and writes on an existing instance never take the registry's
//! creation lock.

mod descriptor;
mod entry;
mod instance;
mod key;
mod listener;
mod metrics;
mod registry;
mod shard;
mod store;

pub use descriptor::{CacheDescriptor, TimeUnit, MIN_EXPIRE, MIN_REFRESH_GAP, REFRESH_DISABLED};
pub use entry::{
    CacheEntry, CachedValue, Collectible, CollectedNotice, CollectionQueue, LoadedValue, Payload,
    Reloader, RemovalCause,
};
pub use instance::CacheInstance;
pub use key::{Arg, CacheEquals, CacheKey, Fingerprint};
pub use listener::{LoggingRemovalListener, RemovalListener};
pub use metrics::{CacheStats, StatsSnapshot};
pub use registry::{InstanceWiring, Registry};
pub use shard::{ShardedMap, Weighted};
pub use store::TtlStore;
