//! Error types for the cache engine
//!
//! Loader failures never travel through this type: they are handed back to
//! the caller exactly as the loader produced them.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the cache engine
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Invalid global configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Descriptor rejected at cache creation time
    #[error("Invalid descriptor for cache {cache}: {reason}")]
    InvalidDescriptor { cache: String, reason: String },

    /// A different instance is already bound to this name
    #[error("Cache {0} is already registered with a different instance")]
    DuplicateCache(String),

    /// No cache registered under this name
    #[error("Cache not found: {0}")]
    CacheNotFound(String),

    /// Size estimator failed for a value
    #[error("Size estimation failed: {0}")]
    SizeEstimation(String),

    /// Copy-on-read hook failed
    #[error("Failed to copy cached value: {0}")]
    Copy(String),

    /// A reclamation pass aborted
    #[error("Reclamation failed for cache {cache}: {reason}")]
    Reclamation { cache: String, reason: String },

    /// Worker pool queue and threads are exhausted
    #[error("Worker pool saturated: {0}")]
    PoolSaturated(String),

    /// Worker pool no longer accepts work
    #[error("Worker pool is shut down")]
    PoolShutdown,

    /// Size literal parse error
    #[error("Failed to parse size: {0}")]
    SizeParse(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error came from user-supplied configuration
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::InvalidDescriptor { .. } | Error::SizeParse(_) | Error::Yaml(_)
        )
    }

    /// Whether retrying later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::PoolSaturated(_) | Error::Reclamation { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================
