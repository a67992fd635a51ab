//! Cache Statistics
//!
//! Lock-free counters recorded on the request path, and the snapshot type
//! handed to callers and the monitor.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-cache counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    load_successes: AtomicU64,
    load_failures: AtomicU64,
    total_load_nanos: AtomicU64,
    evictions: AtomicU64,
    /// Exponential moving average of load latency (microseconds)
    load_latency_ema_us: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_success(&self, elapsed: Duration) {
        self.load_successes.fetch_add(1, Ordering::Relaxed);
        self.record_load_time(elapsed);
    }

    pub fn record_load_failure(&self, elapsed: Duration) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
        self.record_load_time(elapsed);
    }

    fn record_load_time(&self, elapsed: Duration) {
        self.total_load_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.update_latency_ema(elapsed);
    }

    fn update_latency_ema(&self, elapsed: Duration) {
        let new_us = elapsed.as_micros() as u64;
        let alpha = 0.1;

        loop {
            let current = self.load_latency_ema_us.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if self
                .load_latency_ema_us
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Build a snapshot; entry count and bytes come from the store
    pub fn snapshot(&self, estimated_entries: u64, estimated_bytes: u64) -> StatsSnapshot {
        let loads = self.load_successes.load(Ordering::Relaxed)
            + self.load_failures.load(Ordering::Relaxed);
        let total_nanos = self.total_load_nanos.load(Ordering::Relaxed);
        let avg_load_millis = if loads == 0 {
            0.0
        } else {
            total_nanos as f64 / loads as f64 / 1_000_000.0
        };

        let hit_count = self.hits();
        let miss_count = self.misses();

        StatsSnapshot {
            request_count: hit_count + miss_count,
            hit_count,
            miss_count,
            eviction_count: self.evictions(),
            load_success_count: self.load_successes.load(Ordering::Relaxed),
            load_failure_count: self.load_failures.load(Ordering::Relaxed),
            avg_load_millis,
            recent_load_micros: self.load_latency_ema_us.load(Ordering::Relaxed),
            estimated_entries,
            estimated_bytes,
        }
    }
}

/// Point-in-time statistics for one cache
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub request_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    pub load_success_count: u64,
    pub load_failure_count: u64,
    pub avg_load_millis: f64,
    /// Moving average of recent loads
    pub recent_load_micros: u64,
    pub estimated_entries: u64,
    pub estimated_bytes: u64,
}

impl StatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.request_count == 0 {
            1.0
        } else {
            self.hit_count as f64 / self.request_count as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.miss_count as f64 / self.request_count as f64
        }
    }

    /// Average estimated bytes per entry
    pub fn avg_entry_bytes(&self) -> u64 {
        if self.estimated_entries == 0 {
            0
        } else {
            self.estimated_bytes / self.estimated_entries
        }
    }
}
