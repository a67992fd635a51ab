//! Prometheus exposition of cache reports

use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};

use super::monitor::CacheReport;
use crate::error::{Error, Result};

const LABEL: &str = "cache";

/// Gauges mirroring the latest [`CacheReport`] of every cache.
///
/// Uses its own registry so several engines in one process do not collide.
pub struct PrometheusExporter {
    registry: Registry,
    requests: IntGaugeVec,
    hits: IntGaugeVec,
    misses: IntGaugeVec,
    evictions: IntGaugeVec,
    entries: IntGaugeVec,
    bytes: IntGaugeVec,
    avg_load_millis: GaugeVec,
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), &[LABEL])?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let avg_load_millis = GaugeVec::new(
            Opts::new("memocache_avg_load_millis", "Average loader latency in milliseconds"),
            &[LABEL],
        )?;
        registry.register(Box::new(avg_load_millis.clone()))?;

        Ok(Self {
            requests: int_gauge(&registry, "memocache_requests", "Lookups served")?,
            hits: int_gauge(&registry, "memocache_hits", "Lookups answered from cache")?,
            misses: int_gauge(&registry, "memocache_misses", "Lookups that ran the loader")?,
            evictions: int_gauge(&registry, "memocache_evictions", "Entries removed by the engine")?,
            entries: int_gauge(&registry, "memocache_entries", "Estimated entry count")?,
            bytes: int_gauge(&registry, "memocache_bytes", "Estimated memory usage in bytes")?,
            avg_load_millis,
            registry,
        })
    }

    pub fn observe(&self, reports: &[CacheReport]) {
        for r in reports {
            let labels = [r.name.as_str()];
            self.requests.with_label_values(&labels).set(r.request_count as i64);
            self.hits.with_label_values(&labels).set(r.hit_count as i64);
            self.misses.with_label_values(&labels).set(r.miss_count as i64);
            self.evictions.with_label_values(&labels).set(r.eviction_count as i64);
            self.entries.with_label_values(&labels).set(r.estimated_entries as i64);
            self.bytes.with_label_values(&labels).set(r.estimated_bytes as i64);
            self.avg_load_millis
                .with_label_values(&labels)
                .set(r.avg_load_millis);
        }
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}
