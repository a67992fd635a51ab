//! Byte sizes and value size estimation
//!
//! Budgets are configured either as plain byte counts or as size literals
//! such as `"10MB"`. Units are binary multiples and case-insensitive.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::Any;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

// =============================================================================
// Size Parsing
// =============================================================================

/// Parse a size literal ("512", "64KB", "1.5GB") into bytes
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::SizeParse("empty size string".to_string()));
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| Error::SizeParse(format!("invalid number in size: {}", s)))?;

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => KB,
        "M" | "MB" => MB,
        "G" | "GB" => GB,
        "T" | "TB" => TB,
        other => {
            return Err(Error::SizeParse(format!("unknown size unit: {}", other)));
        }
    };

    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(Error::SizeParse(format!("size out of range: {}", s)));
    }

    Ok(bytes.round() as u64)
}

/// Render a byte count with the largest unit that keeps it above 1
pub fn format_size(bytes: u64) -> String {
    let (unit, divisor) = match bytes {
        b if b >= TB => ("TB", TB),
        b if b >= GB => ("GB", GB),
        b if b >= MB => ("MB", MB),
        b if b >= KB => ("KB", KB),
        _ => return format!("{}B", bytes),
    };
    format!("{:.2}{}", bytes as f64 / divisor as f64, unit)
}

// =============================================================================
// ByteSize
// =============================================================================

/// A byte count that deserializes from a number or a size literal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub const fn kib(n: u64) -> Self {
        Self(n * KB)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n * MB)
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

impl FromStr for ByteSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_size(s).map(ByteSize)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_size(self.0))
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Literal(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(n) => Ok(ByteSize(n)),
            Raw::Literal(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// =============================================================================
// Size Estimation
// =============================================================================

/// Estimates the in-memory cost of a cached value
///
/// `encoded` is the value's canonical JSON encoding, already computed by the
/// engine for value-length limits. Errors are treated as a zero-byte value.
pub trait SizeEstimator: Send + Sync {
    fn estimate(&self, value: &dyn Any, encoded: &[u8]) -> Result<u64>;
}

/// Default estimator: serialized length doubled (two bytes per character)
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSizeEstimator;

impl SizeEstimator for JsonSizeEstimator {
    fn estimate(&self, _value: &dyn Any, encoded: &[u8]) -> Result<u64> {
        Ok(encoded.len() as u64 * 2)
    }
}
