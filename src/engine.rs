//! Cache Engine
//!
//! The public surface consumed by call-interception layers. An [`Engine`]
//! owns the registry, the worker pool, the budget enforcer, the collected
//! value sweeper and the monitor, and exposes memoization through
//! [`Engine::get_or_compute`].
//!
//! The engine is never the reason a call fails: when a cache cannot be
//! created or used, the loader is invoked directly. Only the loader's own
//! error reaches the caller, unmodified.
//!
//! # Example
//!
//! ```no_run
//! use memocache::{Arg, CacheDescriptor, Engine, EngineConfig, TimeUnit};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let descriptor = CacheDescriptor::new(10, TimeUnit::Seconds);
//! let parsed = engine
//!     .get_or_compute("Parser::parse", &descriptor, vec![Arg::new("1")], || {
//!         "1".parse::<i64>()
//!     })
//!     .unwrap();
//! assert_eq!(*parsed, 1);
//! ```

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{
    Arg, CacheDescriptor, CacheEntry, CacheInstance, CacheKey, CollectionQueue, InstanceWiring,
    LoadedValue, Payload, Registry, Reloader, RemovalListener, StatsSnapshot,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::logging::LogPolicy;
use crate::monitoring::{CacheReport, Monitor, PrometheusExporter};
use crate::pool::{PoolConfig, PoolStats, WorkerPool};
use crate::reclaim::{BackgroundTasks, BudgetEnforcer, BudgetTrigger, CollectedSweeper};
use crate::size::{JsonSizeEstimator, SizeEstimator};

/// Values the engine can cache
pub trait CacheValue: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> CacheValue for T where
    T: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
}

/// Hook run synchronously after every cache write.
///
/// Implementations must not block or perform I/O.
pub trait PutValueTrigger: Send + Sync {
    fn on_put(
        &self,
        operation: &str,
        descriptor: &CacheDescriptor,
        key: &CacheKey,
        entry: &Arc<CacheEntry>,
    );
}

// =============================================================================
// Builder
// =============================================================================

pub struct EngineBuilder {
    config: EngineConfig,
    estimator: Arc<dyn SizeEstimator>,
    listener: Option<Arc<dyn RemovalListener>>,
    triggers: Vec<Arc<dyn PutValueTrigger>>,
    prometheus: bool,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            estimator: Arc::new(JsonSizeEstimator),
            listener: None,
            triggers: Vec::new(),
            prometheus: false,
        }
    }

    pub fn with_size_estimator(mut self, estimator: Arc<dyn SizeEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Listener attached to every cache, replacing the configured one
    pub fn with_removal_listener(mut self, listener: Arc<dyn RemovalListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn PutValueTrigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Mirror monitor reports into Prometheus gauges
    pub fn with_prometheus(mut self) -> Self {
        self.prometheus = true;
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let log = LogPolicy::new(config.enable_log, config.log_truncation_length);
        let pool = Arc::new(WorkerPool::new(PoolConfig::from(&config))?);
        let queue = CollectionQueue::new();

        let registry = Arc::new(Registry::new(InstanceWiring {
            pool: Arc::clone(&pool),
            queue: queue.sender(),
            log,
            listener_kind: config.removal_listener,
            custom_listener: self.listener,
        }));
        let enforcer = Arc::new(BudgetEnforcer::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            &config,
        )?);
        let sweeper = CollectedSweeper::new(Arc::clone(&registry), queue.receiver());

        let mut monitor = Monitor::new(Arc::clone(&registry));
        if self.prometheus {
            monitor = monitor.with_exporter(Arc::new(PrometheusExporter::new()?));
        }

        let mut triggers = self.triggers;
        triggers.push(Arc::new(BudgetTrigger::new(
            Arc::clone(&enforcer),
            Arc::clone(&registry),
        )));

        info!(
            disabled = config.disabled,
            workers = config.worker_pool_core_size,
            global_budget = ?config.global_memory_budget,
            per_cache_budget = ?config.per_cache_memory_budget,
            "Cache engine initialized"
        );

        Ok(Engine {
            inner: Arc::new(Inner {
                config,
                log,
                pool,
                registry,
                enforcer,
                sweeper,
                monitor,
                estimator: self.estimator,
                triggers,
            }),
        })
    }
}

// =============================================================================
// Engine
// =============================================================================

struct Inner {
    config: EngineConfig,
    log: LogPolicy,
    pool: Arc<WorkerPool>,
    registry: Arc<Registry>,
    enforcer: Arc<BudgetEnforcer>,
    sweeper: CollectedSweeper,
    monitor: Monitor,
    estimator: Arc<dyn SizeEstimator>,
    triggers: Vec<Arc<dyn PutValueTrigger>>,
}

/// Memoizing cache engine; cheap to clone
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

/// Smallest non-zero limit; 0 means unbounded
fn combined_limit(global: usize, own: usize) -> Option<usize> {
    match (global, own) {
        (0, 0) => None,
        (0, limit) | (limit, 0) => Some(limit),
        (a, b) => Some(a.min(b)),
    }
}

/// Encode and size a freshly loaded value
fn measure<T: CacheValue>(estimator: &dyn SizeEstimator, value: Arc<T>) -> LoadedValue {
    let encoded = serde_json::to_vec(value.as_ref()).unwrap_or_else(|e| {
        debug!(error = %e, "Value is not serializable, length unknown");
        Vec::new()
    });
    let value_bytes = estimator
        .estimate(value.as_ref() as &dyn Any, &encoded)
        .unwrap_or_else(|e| {
            warn!(error = %e, "Size estimation failed, counting value as zero bytes");
            0
        });

    LoadedValue {
        payload: value as Payload,
        value_len: encoded.len(),
        value_bytes,
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Return the cached result for `args`, computing it with `loader` on a
    /// miss.
    ///
    /// A hit past the refresh point returns the current value and schedules
    /// a background reload. Loader errors are returned as they are and
    /// nothing is cached.
    pub fn get_or_compute<T, E, F>(
        &self,
        operation: &str,
        descriptor: &CacheDescriptor,
        args: Vec<Arg>,
        loader: F,
    ) -> std::result::Result<Arc<T>, E>
    where
        T: CacheValue,
        E: fmt::Display + 'static,
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        if self.inner.config.disabled {
            return loader().map(Arc::new);
        }

        let instance = match self.inner.registry.get_or_create(operation, descriptor) {
            Ok(instance) => instance,
            Err(e) => {
                warn!(operation, error = %e, "Cache unavailable, calling through");
                return loader().map(Arc::new);
            }
        };
        let verbose = self.inner.log.enabled_for(instance.descriptor());
        let key = CacheKey::new(operation, args);

        if let Some(entry) = instance.lookup(&key) {
            if let Some(payload) = entry.value() {
                return match payload.into_any().downcast::<T>() {
                    Ok(value) => {
                        instance.stats().record_hit();
                        instance.refresh_if_due(&entry);
                        if verbose {
                            debug!(
                                cache = instance.name(),
                                key = %self.inner.log.render(entry.key()),
                                "Cache hit"
                            );
                        }
                        Ok(instance.descriptor().copy_strategy.apply(value))
                    }
                    Err(_) => {
                        warn!(
                            cache = instance.name(),
                            "Cached value has a different type, calling through"
                        );
                        loader().map(Arc::new)
                    }
                };
            }
        }

        instance.stats().record_miss();
        let loader = Arc::new(loader);
        let started = Instant::now();
        let value = match loader() {
            Ok(value) => Arc::new(value),
            Err(e) => {
                instance.stats().record_load_failure(started.elapsed());
                warn!(cache = instance.name(), error = %e, "Loader failed");
                return Err(e);
            }
        };
        instance.stats().record_load_success(started.elapsed());

        let loaded = measure(self.inner.estimator.as_ref(), Arc::clone(&value));
        if self.admits(&instance, &key, &loaded) {
            let reloader = instance.refresh_enabled().then(|| {
                let estimator = Arc::clone(&self.inner.estimator);
                let loader = Arc::clone(&loader);
                Arc::new(move || -> std::result::Result<LoadedValue, String> {
                    let fresh = loader().map_err(|e| e.to_string())?;
                    Ok(measure(estimator.as_ref(), Arc::new(fresh)))
                }) as Reloader
            });
            self.write(operation, &instance, key, loaded, reloader, verbose);
        }

        Ok(instance.descriptor().copy_strategy.apply(value))
    }

    /// Key and value length gates
    fn admits(&self, instance: &CacheInstance, key: &CacheKey, loaded: &LoadedValue) -> bool {
        let descriptor = instance.descriptor();
        let config = &self.inner.config;

        if let Some(limit) = combined_limit(config.global_max_key_bytes, descriptor.max_key_bytes) {
            if key.serialized_len() > limit {
                debug!(
                    cache = instance.name(),
                    key_len = key.serialized_len(),
                    limit,
                    "Key too long, result not cached"
                );
                return false;
            }
        }
        if let Some(limit) =
            combined_limit(config.global_max_value_bytes, descriptor.max_value_bytes)
        {
            if loaded.value_len > limit {
                debug!(
                    cache = instance.name(),
                    value_len = loaded.value_len,
                    limit,
                    "Value too long, result not cached"
                );
                return false;
            }
        }
        true
    }

    fn write(
        &self,
        operation: &str,
        instance: &Arc<CacheInstance>,
        key: CacheKey,
        loaded: LoadedValue,
        reloader: Option<Reloader>,
        verbose: bool,
    ) {
        let entry = instance.make_entry(key, loaded, reloader);
        instance.put(Arc::clone(&entry));

        if verbose {
            debug!(
                cache = instance.name(),
                key = %self.inner.log.render(entry.key()),
                bytes = entry.footprint(),
                "Cache write"
            );
        }

        for trigger in &self.inner.triggers {
            let fired = panic::catch_unwind(AssertUnwindSafe(|| {
                trigger.on_put(operation, instance.descriptor(), entry.key(), &entry)
            }));
            if fired.is_err() {
                warn!(cache = instance.name(), "Put trigger panicked");
            }
        }
    }

    /// Remove every entry of the operation's cache
    pub fn invalidate(&self, operation: &str) -> u64 {
        match self.inner.registry.resolve(operation) {
            Some(instance) => instance.invalidate_all(),
            None => 0,
        }
    }

    /// Remove the entry cached for `args`
    pub fn invalidate_key(&self, operation: &str, args: Vec<Arg>) -> bool {
        match self.inner.registry.resolve(operation) {
            Some(instance) => instance.invalidate(&CacheKey::new(operation, args)),
            None => false,
        }
    }

    pub fn stats(&self, operation: &str) -> Option<StatsSnapshot> {
        self.inner.registry.resolve(operation).map(|i| i.snapshot())
    }

    pub fn usage_bytes(&self, operation: &str) -> Option<u64> {
        self.inner.registry.resolve(operation).map(|i| i.usage_bytes())
    }

    pub fn total_usage_bytes(&self) -> u64 {
        self.inner.registry.total_usage_bytes()
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Discard payloads of the least recently used entries across all
    /// caches until `target_bytes` are released, as the runtime would under
    /// memory pressure. Map entries stay until the sweeper runs.
    pub fn shed_payloads(&self, target_bytes: u64) -> u64 {
        let mut entries: Vec<Arc<CacheEntry>> = self
            .inner
            .registry
            .instances()
            .iter()
            .flat_map(|i| i.entries())
            .filter(|e| !e.is_collected())
            .collect();
        entries.sort_by_key(|e| e.last_access_nanos());

        let mut shed = 0;
        for entry in entries {
            if shed >= target_bytes {
                break;
            }
            if entry.discard() {
                shed += entry.footprint();
            }
        }
        debug!(target_bytes, shed, "Shed cached payloads");
        shed
    }

    /// Remove entries whose payloads were discarded
    pub fn sweep_collected(&self) -> u64 {
        self.inner.sweeper.sweep()
    }

    /// Run the per-cache and global budget passes now
    pub fn reclaim(&self) -> Result<u64> {
        let own = self.inner.enforcer.sweep_budgets()?;
        let global = self.inner.enforcer.reclaim_global()?;
        Ok(own + global)
    }

    pub fn purge_expired(&self) -> u64 {
        self.inner
            .registry
            .instances()
            .iter()
            .map(|i| i.purge_expired())
            .sum()
    }

    /// Current report for every cache
    pub fn reports(&self) -> Vec<CacheReport> {
        self.inner.monitor.collect()
    }

    /// Prometheus text exposition of the latest reports
    pub fn render_metrics(&self) -> Result<String> {
        let exporter = self
            .inner
            .monitor
            .exporter()
            .ok_or_else(|| Error::Config("prometheus export is not enabled".into()))?;
        exporter.observe(&self.inner.monitor.collect());
        exporter.render()
    }

    /// Start the background loops. Must be called inside a tokio runtime.
    pub fn start_background(&self) -> Result<BackgroundTasks> {
        let mut tasks = BackgroundTasks::new()?;
        let config = &self.inner.config;
        if config.disabled {
            return Ok(tasks);
        }

        let enforcer = Arc::clone(&self.inner.enforcer);
        tasks.spawn_periodic(
            "budget-sweep",
            config.reclaim_interval(),
            config.reclaim_interval(),
            move || {
                if let Err(e) = enforcer.sweep_budgets() {
                    warn!(error = %e, "Budget sweep aborted");
                }
            },
        );

        if self.inner.enforcer.global_budget().is_some() {
            let enforcer = Arc::clone(&self.inner.enforcer);
            tasks.spawn_periodic(
                "global-sweep",
                config.global_reclaim_initial_delay(),
                config.reclaim_interval(),
                move || {
                    if let Err(e) = enforcer.reclaim_global() {
                        warn!(error = %e, "Global sweep aborted");
                    }
                },
            );
        }

        let engine = self.clone();
        tasks.spawn_periodic(
            "collected-sweep",
            config.sweep_interval(),
            config.sweep_interval(),
            move || {
                engine.sweep_collected();
            },
        );

        let engine = self.clone();
        tasks.spawn_periodic(
            "expiry",
            config.maintenance_interval(),
            config.maintenance_interval(),
            move || {
                engine.purge_expired();
            },
        );

        if config.monitor_enabled {
            let engine = self.clone();
            tasks.spawn_periodic(
                "monitor",
                config.monitor_interval(),
                config.monitor_interval(),
                move || {
                    engine.inner.monitor.report();
                },
            );
        }

        info!(tasks = ?tasks.names(), "Background tasks started");
        Ok(tasks)
    }

    /// Stop accepting refresh and reclamation work
    pub fn shutdown(&self) {
        self.inner.pool.shutdown();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("disabled", &self.inner.config.disabled)
            .field("caches", &self.inner.registry.len())
            .finish()
    }
}

// =============================================================================
// Process-wide instance
// =============================================================================

static GLOBAL: OnceCell<Engine> = OnceCell::new();

/// Install the process-wide engine. Fails if one is already installed.
pub fn install_global(engine: Engine) -> Result<()> {
    GLOBAL
        .set(engine)
        .map_err(|_| Error::Config("a global engine is already installed".into()))
}

/// The process-wide engine, if installed
pub fn global() -> Option<&'static Engine> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TimeUnit;
    use crate::size::ByteSize;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> EngineConfig {
        EngineConfig {
            worker_pool_core_size: 1,
            worker_pool_max_size: 2,
            worker_pool_queue_size: 16,
            ..EngineConfig::default()
        }
    }

    fn counting_loader(
        calls: &Arc<AtomicU32>,
        value: &'static str,
    ) -> impl Fn() -> std::result::Result<String, String> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value.to_string())
        }
    }

    #[test]
    fn test_combined_limit() {
        assert_eq!(combined_limit(0, 0), None);
        assert_eq!(combined_limit(0, 8), Some(8));
        assert_eq!(combined_limit(16, 0), Some(16));
        assert_eq!(combined_limit(16, 8), Some(8));
    }

    #[test]
    fn test_measure_doubles_json_length() {
        let loaded = measure(&JsonSizeEstimator, Arc::new("abc".to_string()));
        // "\"abc\"" is five bytes
        assert_eq!(loaded.value_len, 5);
        assert_eq!(loaded.value_bytes, 10);
    }

    #[test]
    fn test_failing_estimator_counts_zero() {
        struct Broken;
        impl SizeEstimator for Broken {
            fn estimate(&self, _value: &dyn Any, _encoded: &[u8]) -> Result<u64> {
                Err(Error::SizeEstimation("broken".into()))
            }
        }
        let loaded = measure(&Broken, Arc::new(7u32));
        assert_eq!(loaded.value_bytes, 0);
        assert_eq!(loaded.value_len, 1);
    }

    #[test]
    fn test_oversized_value_returned_but_not_cached() {
        let engine = Engine::new(config()).unwrap();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds).with_value_limit(4);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let v = engine
                .get_or_compute("big", &descriptor, vec![Arg::new(1u8)], counting_loader(&calls, "too long"))
                .unwrap();
            assert_eq!(v.as_str(), "too long");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.stats("big").unwrap().estimated_entries, 0);
    }

    #[test]
    fn test_global_key_limit_applies() {
        let mut config = config();
        config.global_max_key_bytes = 3;
        let engine = Engine::new(config).unwrap();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            engine
                .get_or_compute("op", &descriptor, vec![Arg::new("long key")], counting_loader(&calls, "v"))
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        for _ in 0..2 {
            engine
                .get_or_compute("op", &descriptor, vec![Arg::new(1u8)], counting_loader(&calls, "v"))
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_type_mismatch_calls_through() {
        let engine = Engine::new(config()).unwrap();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        engine
            .get_or_compute("op", &descriptor, vec![Arg::new(1u8)], || {
                Ok::<_, String>(5u32)
            })
            .unwrap();

        let v = engine
            .get_or_compute("op", &descriptor, vec![Arg::new(1u8)], || {
                Ok::<_, String>("text".to_string())
            })
            .unwrap();
        assert_eq!(v.as_str(), "text");
    }

    #[test]
    fn test_custom_trigger_sees_writes() {
        #[derive(Default)]
        struct Count(AtomicU32);
        impl PutValueTrigger for Count {
            fn on_put(&self, operation: &str, _: &CacheDescriptor, key: &CacheKey, _: &Arc<CacheEntry>) {
                assert_eq!(operation, key.operation());
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let trigger = Arc::new(Count::default());
        let engine = Engine::builder(config())
            .with_trigger(trigger.clone() as Arc<dyn PutValueTrigger>)
            .build()
            .unwrap();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        for i in 0..3u8 {
            for _ in 0..2 {
                engine
                    .get_or_compute("op", &descriptor, vec![Arg::new(i)], move || Ok::<_, String>(i))
                    .unwrap();
            }
        }
        assert_eq!(trigger.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_shed_then_sweep() {
        let engine = Engine::new(config()).unwrap();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        for i in 0..4u8 {
            engine
                .get_or_compute("op", &descriptor, vec![Arg::new(i)], move || Ok::<_, String>(i))
                .unwrap();
        }
        let before = engine.usage_bytes("op").unwrap();
        let shed = engine.shed_payloads(1);
        assert!(shed > 0);
        // Map entry is still counted until the sweeper runs
        assert_eq!(engine.usage_bytes("op").unwrap(), before);

        assert_eq!(engine.sweep_collected(), 1);
        assert_eq!(engine.usage_bytes("op").unwrap(), before - shed);
        assert_eq!(engine.stats("op").unwrap().eviction_count, 1);
    }

    #[test]
    fn test_render_metrics_requires_exporter() {
        let engine = Engine::new(config()).unwrap();
        assert!(engine.render_metrics().is_err());

        let engine = Engine::builder(config()).with_prometheus().build().unwrap();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds)
            .with_memory_budget(ByteSize::from(1_000u64));
        engine
            .get_or_compute("op", &descriptor, vec![Arg::new(1u8)], || Ok::<_, String>(1u8))
            .unwrap();
        let text = engine.render_metrics().unwrap();
        assert!(text.contains("memocache_misses{cache=\"op\"} 1"));
    }
}
