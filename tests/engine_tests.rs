//! memocache Integration Tests
//!
//! End-to-end behaviour through the public engine surface:
//! - memoization, expiry and background refresh
//! - argument equality precedence
//! - memory budgets and eviction strategies
//! - degradation paths (disabled engine, bad descriptors, loader errors)
//! - background loops

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use memocache::{Arg, CacheDescriptor, Engine, EngineConfig, TimeUnit};

fn config() -> EngineConfig {
    EngineConfig {
        worker_pool_core_size: 2,
        worker_pool_max_size: 4,
        worker_pool_queue_size: 64,
        ..EngineConfig::default()
    }
}

fn engine() -> Engine {
    Engine::new(config()).unwrap()
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Loader returning `value` and counting its invocations
fn counted<T>(calls: &Arc<AtomicU32>, value: T) -> impl Fn() -> Result<T, String> + Send + Sync + 'static
where
    T: Clone + Send + Sync + 'static,
{
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value.clone())
    }
}

// =============================================================================
// Memoization, expiry and refresh
// =============================================================================

mod memoization_tests {
    use super::*;

    #[test]
    fn test_parse_scenario() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(10, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));

        let parse = |input: &'static str| {
            let calls = Arc::clone(&calls);
            engine
                .get_or_compute("Parser::parse", &descriptor, vec![Arg::new(input)], move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    input.parse::<i64>()
                })
                .unwrap()
        };

        assert_eq!(*parse("1"), 1);
        assert_eq!(*parse("2"), 2);
        assert_eq!(*parse("1"), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = engine.stats("Parser::parse").unwrap();
        assert_eq!(stats.request_count, 3);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 2);
        assert_eq!(stats.estimated_entries, 2);
    }

    #[test]
    fn test_recompute_after_expiry() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(100, TimeUnit::Millis);
        let calls = Arc::new(AtomicU32::new(0));

        engine
            .get_or_compute("op", &descriptor, vec![Arg::new(1u8)], counted(&calls, 1u8))
            .unwrap();
        engine
            .get_or_compute("op", &descriptor, vec![Arg::new(1u8)], counted(&calls, 1u8))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(150));
        engine
            .get_or_compute("op", &descriptor, vec![Arg::new(1u8)], counted(&calls, 1u8))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.stats("op").unwrap().eviction_count, 1);
    }

    #[test]
    fn test_greeting_refresh_scenario() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(2_000, TimeUnit::Millis).with_refresh(200);
        let calls = Arc::new(AtomicU32::new(0));

        let say_hi = || {
            let calls = Arc::clone(&calls);
            engine
                .get_or_compute("Greeter::say_hi", &descriptor, vec![Arg::new("Alice")], move || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok::<_, String>(format!("Hi Alice @{}", n))
                })
                .unwrap()
        };

        assert_eq!(say_hi().as_str(), "Hi Alice @1");

        // Past the refresh point the old value comes back at once
        thread::sleep(Duration::from_millis(300));
        let started = Instant::now();
        assert_eq!(say_hi().as_str(), "Hi Alice @1");
        assert!(started.elapsed() < Duration::from_millis(100));

        // Exactly one reload was scheduled
        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2));

        // The first differing read is the refreshed value
        let mut refreshed = None;
        assert!(wait_until(|| {
            let v = say_hi();
            if v.as_str() != "Hi Alice @1" {
                refreshed = Some(v);
                true
            } else {
                false
            }
        }));
        assert_eq!(refreshed.unwrap().as_str(), "Hi Alice @2");
    }

    #[test]
    fn test_concurrent_callers_share_one_cache() {
        let engine = engine();
        let calls = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
                    *engine
                        .get_or_compute("shared", &descriptor, vec![Arg::new(7u32)], counted(&calls, 49u32))
                        .unwrap()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 49);
        }
        assert_eq!(engine.cache_names(), vec!["shared".to_string()]);
        assert_eq!(engine.stats("shared").unwrap().request_count, 8);
    }
}

// =============================================================================
// Argument equality
// =============================================================================

mod equality_tests {
    use super::*;
    use memocache::CacheEquals;
    use serde::Serialize;
    use std::hash::Hasher;

    #[derive(Debug, Serialize)]
    struct Name(String);

    impl CacheEquals for Name {
        fn cache_equals(&self, other: &Self) -> bool {
            self.0.eq_ignore_ascii_case(&other.0)
        }

        fn cache_hash(&self, state: &mut dyn Hasher) {
            state.write(self.0.to_ascii_lowercase().as_bytes());
        }
    }

    #[derive(Debug, Serialize)]
    struct Query {
        table: String,
        limit: u32,
    }

    #[derive(Debug, PartialEq, Eq, Serialize)]
    struct Request {
        id: u32,
        #[serde(skip)]
        attempt: u32,
    }

    #[test]
    fn test_custom_equality_hits() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));

        for name in ["Alice", "ALICE", "alice"] {
            engine
                .get_or_compute(
                    "greet",
                    &descriptor,
                    vec![Arg::custom(Name(name.to_string()))],
                    counted(&calls, 1u8),
                )
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        engine
            .get_or_compute("greet", &descriptor, vec![Arg::custom(Name("Bob".into()))], counted(&calls, 1u8))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fingerprint_equality_hits() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));
        let query = |limit| {
            Arg::opaque(Query {
                table: "users".into(),
                limit,
            })
        };

        engine
            .get_or_compute("select", &descriptor, vec![query(10)], counted(&calls, 0u8))
            .unwrap();
        engine
            .get_or_compute("select", &descriptor, vec![query(10)], counted(&calls, 0u8))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        engine
            .get_or_compute("select", &descriptor, vec![query(20)], counted(&calls, 0u8))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_same_fingerprint_hits_across_kinds() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));

        for i in 0..48 {
            let arg = match i % 3 {
                0 => Arg::new(5u32),
                1 => Arg::opaque(5u32),
                _ => Arg::new(5u64),
            };
            engine
                .get_or_compute("lookup", &descriptor, vec![arg], counted(&calls, 25u32))
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stats("lookup").unwrap().hit_count, 47);
    }

    #[test]
    fn test_structural_inequality_misses() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));

        for attempt in [1, 2, 1] {
            engine
                .get_or_compute(
                    "fetch",
                    &descriptor,
                    vec![Arg::new(Request { id: 9, attempt })],
                    counted(&calls, 0u8),
                )
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.stats("fetch").unwrap().estimated_entries, 2);
    }

    #[test]
    fn test_argument_order_matters() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));

        engine
            .get_or_compute("sub", &descriptor, vec![Arg::new(1i32), Arg::new(2i32)], counted(&calls, -1i32))
            .unwrap();
        engine
            .get_or_compute("sub", &descriptor, vec![Arg::new(2i32), Arg::new(1i32)], counted(&calls, 1i32))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

// =============================================================================
// Memory budgets
// =============================================================================

mod budget_tests {
    use super::*;
    use memocache::{ByteSize, EvictionStrategy};

    /// Every entry is a one-digit u32 key and value: 4 bytes
    fn put_digit(engine: &Engine, descriptor: &CacheDescriptor, calls: &Arc<AtomicU32>, i: u32) {
        engine
            .get_or_compute("digits", descriptor, vec![Arg::new(i)], counted(calls, i))
            .unwrap();
    }

    #[test]
    fn test_lru_budget_evicts_coldest() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds)
            .with_memory_budget(ByteSize(20))
            .with_eviction_strategy(EvictionStrategy::Lru);
        let calls = Arc::new(AtomicU32::new(0));

        for i in 0..5 {
            put_digit(&engine, &descriptor, &calls, i);
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(engine.usage_bytes("digits"), Some(20));

        // 0 becomes the most recently used; 1 is now the coldest
        put_digit(&engine, &descriptor, &calls, 0);
        thread::sleep(Duration::from_millis(2));
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        put_digit(&engine, &descriptor, &calls, 5);
        assert!(wait_until(|| engine.usage_bytes("digits") == Some(20)));
        assert_eq!(engine.stats("digits").unwrap().eviction_count, 1);

        put_digit(&engine, &descriptor, &calls, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(engine.invalidate_key("digits", vec![Arg::new(2u32)]));
        put_digit(&engine, &descriptor, &calls, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_largest_first_budget_evicts_biggest() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds)
            .with_memory_budget(ByteSize(200))
            .with_eviction_strategy(EvictionStrategy::LargestFirst);
        let calls = Arc::new(AtomicU32::new(0));

        for i in 0..3u32 {
            engine
                .get_or_compute("blobs", &descriptor, vec![Arg::new(i)], counted(&calls, "small".to_string()))
                .unwrap();
        }
        // "\"small\"" is 7 bytes, doubled, plus a 2-byte key
        assert_eq!(engine.usage_bytes("blobs"), Some(48));

        engine
            .get_or_compute("blobs", &descriptor, vec![Arg::new(9u32)], counted(&calls, "x".repeat(80)))
            .unwrap();
        assert!(wait_until(|| engine.usage_bytes("blobs") == Some(48)));

        for i in 0..3u32 {
            engine
                .get_or_compute("blobs", &descriptor, vec![Arg::new(i)], counted(&calls, "small".to_string()))
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_random_budget_meets_target() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds)
            .with_memory_budget(ByteSize(20))
            .with_eviction_strategy(EvictionStrategy::Random);
        let calls = Arc::new(AtomicU32::new(0));

        for i in 0..10 {
            put_digit(&engine, &descriptor, &calls, i);
        }
        engine.reclaim().unwrap();
        assert!(engine.usage_bytes("digits").unwrap() <= 20);
    }

    #[test]
    fn test_global_budget_spares_exempt_caches() {
        let mut config = config();
        config.global_memory_budget = Some(ByteSize(40));
        let engine = Engine::new(config).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let plain = CacheDescriptor::new(60, TimeUnit::Seconds);
        let exempt = CacheDescriptor::new(60, TimeUnit::Seconds)
            .with_name("exempt")
            .skip_global_budget();

        for i in 0..10u32 {
            for op in ["a", "b"] {
                engine
                    .get_or_compute(op, &plain, vec![Arg::new(i)], counted(&calls, i))
                    .unwrap();
            }
            engine
                .get_or_compute("c", &exempt, vec![Arg::new(i)], counted(&calls, i))
                .unwrap();
        }

        let freed = engine.reclaim().unwrap();
        assert!(freed >= 40);
        let remaining = engine.usage_bytes("a").unwrap() + engine.usage_bytes("b").unwrap();
        assert!(remaining <= 40);
        assert_eq!(engine.usage_bytes("exempt"), Some(40));
        assert_eq!(engine.usage_bytes("c"), Some(40));
    }

    #[test]
    fn test_per_cache_budget_from_config() {
        let mut config = config();
        config.per_cache_memory_budget = Some(ByteSize(12));
        let engine = Engine::new(config).unwrap();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds).with_memory_budget(ByteSize(1_000));
        let calls = Arc::new(AtomicU32::new(0));

        for i in 0..3 {
            put_digit(&engine, &descriptor, &calls, i);
        }
        put_digit(&engine, &descriptor, &calls, 3);
        assert!(wait_until(|| engine.usage_bytes("digits").unwrap() <= 12));
    }
}

// =============================================================================
// Degradation paths
// =============================================================================

mod degradation_tests {
    use super::*;

    #[test]
    fn test_disabled_engine_always_loads() {
        let mut config = config();
        config.disabled = true;
        let engine = Engine::new(config).unwrap();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let v = engine
                .get_or_compute("op", &descriptor, vec![Arg::new(1u8)], counted(&calls, 5u8))
                .unwrap();
            assert_eq!(*v, 5);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(engine.cache_names().is_empty());
    }

    #[test]
    fn test_invalid_descriptor_calls_through() {
        let engine = engine();
        // refresh must be shorter than expiry
        let descriptor = CacheDescriptor::new(1, TimeUnit::Seconds).with_refresh(5);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let v = engine
                .get_or_compute("bad", &descriptor, vec![Arg::new(1u8)], counted(&calls, 9u8))
                .unwrap();
            assert_eq!(*v, 9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(engine.stats("bad").is_none());
    }

    #[test]
    fn test_loader_error_is_returned_unchanged() {
        #[derive(Debug, PartialEq)]
        struct Backend(u16);
        impl std::fmt::Display for Backend {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "backend returned {}", self.0)
            }
        }

        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let c = Arc::clone(&calls);
            let result = engine.get_or_compute("op", &descriptor, vec![Arg::new(1u8)], move || {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u8, _>(Backend(503))
            });
            assert_eq!(result.unwrap_err(), Backend(503));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = engine.stats("op").unwrap();
        assert_eq!(stats.load_failure_count, 2);
        assert_eq!(stats.estimated_entries, 0);
    }

    #[test]
    fn test_collected_payload_recomputed() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));

        engine
            .get_or_compute("op", &descriptor, vec![Arg::new(1u8)], counted(&calls, 1u8))
            .unwrap();
        assert!(engine.shed_payloads(u64::MAX) > 0);

        engine
            .get_or_compute("op", &descriptor, vec![Arg::new(1u8)], counted(&calls, 1u8))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // The overwrite already replaced the hollow entry
        assert_eq!(engine.sweep_collected(), 0);
        assert_eq!(engine.stats("op").unwrap().estimated_entries, 1);
    }
}

// =============================================================================
// Invalidation, naming, listeners and copies
// =============================================================================

mod surface_tests {
    use super::*;
    use memocache::cache::CachedValue;
    use memocache::{CacheKey, CopyStrategy, RemovalCause, RemovalListener};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, RemovalCause)>>);

    impl RemovalListener for Recorder {
        fn on_removal(
            &self,
            cache: &str,
            _key: &CacheKey,
            _value: Option<&dyn CachedValue>,
            cause: RemovalCause,
        ) {
            self.0.lock().push((cache.to_string(), cause));
        }
    }

    #[test]
    fn test_invalidate_reports_to_listener() {
        let recorder = Arc::new(Recorder::default());
        let engine = Engine::builder(config())
            .with_removal_listener(recorder.clone() as Arc<dyn RemovalListener>)
            .build()
            .unwrap();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds);
        let calls = Arc::new(AtomicU32::new(0));

        for i in 0..3u8 {
            engine
                .get_or_compute("op", &descriptor, vec![Arg::new(i)], counted(&calls, i))
                .unwrap();
        }
        assert!(engine.invalidate_key("op", vec![Arg::new(0u8)]));
        assert!(!engine.invalidate_key("op", vec![Arg::new(0u8)]));
        assert_eq!(engine.invalidate("op"), 2);
        assert_eq!(engine.invalidate("missing"), 0);

        let seen = recorder.0.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen
            .iter()
            .all(|(cache, cause)| cache == "op" && *cause == RemovalCause::Explicit));
    }

    #[test]
    fn test_named_cache_shared_by_operations() {
        let engine = engine();
        let descriptor = CacheDescriptor::new(60, TimeUnit::Seconds).with_name("users");
        let calls = Arc::new(AtomicU32::new(0));

        engine
            .get_or_compute("UserRepo::by_id", &descriptor, vec![Arg::new(1u32)], counted(&calls, 1u8))
            .unwrap();
        engine
            .get_or_compute("UserRepo::by_name", &descriptor, vec![Arg::new(1u32)], counted(&calls, 2u8))
            .unwrap();

        // Same argument, different operation: separate entries
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.cache_names(), vec!["users".to_string()]);
        assert_eq!(engine.stats("UserRepo::by_id").unwrap().estimated_entries, 2);
    }

    #[test]
    fn test_copy_strategies() {
        let engine = engine();
        let calls = Arc::new(AtomicU32::new(0));

        let shared = CacheDescriptor::new(60, TimeUnit::Seconds);
        let a = engine
            .get_or_compute("shared", &shared, vec![], counted(&calls, vec![1, 2, 3]))
            .unwrap();
        let b = engine
            .get_or_compute("shared", &shared, vec![], counted(&calls, vec![1, 2, 3]))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let copied = CacheDescriptor::new(60, TimeUnit::Seconds).with_copy_strategy(CopyStrategy::Serialization);
        let c = engine
            .get_or_compute("copied", &copied, vec![], counted(&calls, vec![1, 2, 3]))
            .unwrap();
        let d = engine
            .get_or_compute("copied", &copied, vec![], counted(&calls, vec![1, 2, 3]))
            .unwrap();
        assert!(!Arc::ptr_eq(&c, &d));
        assert_eq!(c, d);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_global_engine_installs_once() {
        let engine = engine();
        memocache::engine::install_global(engine.clone()).unwrap();
        assert!(memocache::engine::install_global(engine).is_err());
        assert!(memocache::engine::global().is_some());
    }
}

// =============================================================================
// Background loops
// =============================================================================

mod background_tests {
    use super::*;
    use memocache::ByteSize;

    async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            reclaim_interval_ms: 20,
            global_reclaim_initial_delay_ms: 10,
            sweep_interval_ms: 20,
            monitor_interval_ms: 20,
            maintenance_interval_ms: 20,
            global_memory_budget: Some(ByteSize(20)),
            ..config()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_loops_maintain_caches() {
        let engine = Engine::new(fast_config()).unwrap();
        let tasks = engine.start_background().unwrap();
        assert_eq!(tasks.len(), 5);

        let calls = Arc::new(AtomicU32::new(0));
        let lasting = CacheDescriptor::new(60, TimeUnit::Seconds);
        for i in 0..10u32 {
            engine
                .get_or_compute("lasting", &lasting, vec![Arg::new(i)], counted(&calls, i))
                .unwrap();
        }
        // Global sweep trims the aggregate
        assert!(eventually(|| engine.total_usage_bytes() <= 20).await);

        // Collected payloads are swept from the map
        engine.shed_payloads(u64::MAX);
        assert!(eventually(|| engine.stats("lasting").unwrap().estimated_entries == 0).await);

        // Expired entries are purged without being read
        let short = CacheDescriptor::new(100, TimeUnit::Millis);
        engine
            .get_or_compute("short", &short, vec![Arg::new(1u8)], counted(&calls, 1u8))
            .unwrap();
        assert!(eventually(|| engine.stats("short").unwrap().estimated_entries == 0).await);

        tasks.shutdown().await;
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_disabled_engine_starts_nothing() {
        let mut config = fast_config();
        config.disabled = true;
        let engine = Engine::new(config).unwrap();
        let tasks = engine.start_background().unwrap();
        assert!(tasks.is_empty());
        tasks.shutdown().await;
    }
}
