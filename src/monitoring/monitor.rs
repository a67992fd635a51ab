//! Cache Monitor
//!
//! Builds one [`CacheReport`] per cache from its statistics. Never mutates a
//! cache; a failure while reporting one cache is logged and the rest are
//! still reported.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, instrument};

use super::exporter::PrometheusExporter;
use crate::cache::{CacheInstance, Registry};
use crate::config::EvictionStrategy;
use crate::size::format_size;

/// Point-in-time statistics for one cache
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheReport {
    pub name: String,
    pub request_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    pub hit_rate: f64,
    pub avg_load_millis: f64,
    pub estimated_entries: u64,
    pub estimated_bytes: u64,
    pub avg_entry_bytes: u64,
    pub max_capacity: u64,
    pub expire_after_millis: u64,
    pub refresh_after_millis: Option<u64>,
    pub budget_bytes: Option<u64>,
    pub eviction_strategy: Option<EvictionStrategy>,
}

impl CacheReport {
    pub fn from_instance(instance: &CacheInstance) -> Self {
        let stats = instance.snapshot();
        let descriptor = instance.descriptor();
        Self {
            name: instance.name().to_string(),
            request_count: stats.request_count,
            hit_count: stats.hit_count,
            miss_count: stats.miss_count,
            eviction_count: stats.eviction_count,
            hit_rate: stats.hit_rate(),
            avg_load_millis: stats.avg_load_millis,
            estimated_entries: stats.estimated_entries,
            estimated_bytes: stats.estimated_bytes,
            avg_entry_bytes: stats.avg_entry_bytes(),
            max_capacity: descriptor.max_capacity,
            expire_after_millis: descriptor.expire_after().as_millis() as u64,
            refresh_after_millis: descriptor.refresh_after().map(|d| d.as_millis() as u64),
            budget_bytes: descriptor.budget_bytes(),
            eviction_strategy: descriptor.eviction_strategy,
        }
    }
}

pub struct Monitor {
    registry: Arc<Registry>,
    exporter: Option<Arc<PrometheusExporter>>,
}

impl Monitor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            exporter: None,
        }
    }

    /// Mirror every report into Prometheus gauges
    pub fn with_exporter(mut self, exporter: Arc<PrometheusExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn exporter(&self) -> Option<&Arc<PrometheusExporter>> {
        self.exporter.as_ref()
    }

    /// Reports for every cache, sorted by name
    pub fn collect(&self) -> Vec<CacheReport> {
        let mut instances = self.registry.instances();
        instances.sort_by(|a, b| a.name().cmp(b.name()));

        instances
            .iter()
            .filter_map(|instance| {
                panic::catch_unwind(AssertUnwindSafe(|| CacheReport::from_instance(instance)))
                    .map_err(|_| error!(cache = instance.name(), "Failed to build cache report"))
                    .ok()
            })
            .collect()
    }

    /// Collect, log and export one round of reports
    #[instrument(skip(self))]
    pub fn report(&self) -> Vec<CacheReport> {
        let reports = self.collect();
        for r in &reports {
            info!(
                cache = %r.name,
                hit_rate = format!("{:.2}%", r.hit_rate * 100.0),
                bytes = %format_size(r.estimated_bytes),
                avg_entry = %format_size(r.avg_entry_bytes),
                entries = r.estimated_entries,
                requests = r.request_count,
                hits = r.hit_count,
                misses = r.miss_count,
                evictions = r.eviction_count,
                avg_load_ms = format!("{:.3}", r.avg_load_millis),
                "Cache report"
            );
        }

        let total: u64 = reports.iter().map(|r| r.estimated_bytes).sum();
        info!(caches = reports.len(), total = %format_size(total), "Cache totals");

        if let Some(exporter) = &self.exporter {
            exporter.observe(&reports);
        }
        reports
    }
}
