//! Process-wide monotonic clock
//!
//! Entries and rate limiters store timestamps in atomics, so time is kept as
//! an integer offset from a fixed process epoch.

use once_cell::sync::Lazy;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds elapsed since the process epoch
#[inline]
pub fn now_nanos() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Milliseconds elapsed since the process epoch
#[inline]
pub fn now_millis() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}
