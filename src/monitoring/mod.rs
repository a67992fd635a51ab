//! Monitoring module
//!
//! Read-only reporting over the registered caches: periodic log reports
//! and an optional Prometheus mirror of the same numbers.

mod exporter;
mod monitor;

pub use exporter::PrometheusExporter;
pub use monitor::{CacheReport, Monitor};
