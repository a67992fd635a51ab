//! Copy-on-read strategies
//!
//! Cached values are shared. A cache can hand each caller its own copy so
//! that mutation through interior mutability cannot leak between callers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::{Error, Result};

/// How a cached value is returned to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStrategy {
    /// Return the shared value
    #[default]
    None,
    /// Return a `Clone` of the value
    Clone,
    /// Round-trip the value through JSON
    Serialization,
}

impl CopyStrategy {
    /// Produce the value handed to the caller.
    ///
    /// A failed copy is logged and the shared value is returned instead.
    pub fn apply<T>(&self, value: Arc<T>) -> Arc<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        match self {
            CopyStrategy::None => value,
            CopyStrategy::Clone => Arc::new(T::clone(&value)),
            CopyStrategy::Serialization => match serialization_copy(value.as_ref()) {
                Ok(copy) => Arc::new(copy),
                Err(e) => {
                    warn!(error = %e, "Serialization copy failed, returning shared value");
                    value
                }
            },
        }
    }
}

fn serialization_copy<T>(value: &T) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let encoded = serde_json::to_vec(value).map_err(|e| Error::Copy(e.to_string()))?;
    serde_json::from_slice(&encoded).map_err(|e| Error::Copy(e.to_string()))
}
