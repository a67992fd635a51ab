//! Memory-Budget Enforcer
//!
//! Measures estimated usage against the configured byte budgets and runs an
//! eviction policy when a budget is exceeded. Three paths lead here:
//!
//! - a write to a budgeted cache, rate limited per operation and executed on
//!   the worker pool (never on the caller's thread)
//! - the periodic per-cache sweep
//! - the periodic global sweep across every non-exempt cache
//!
//! All of them take the same reclamation lock, so passes never overlap.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::limiter::SignalLimiter;
use crate::cache::{CacheDescriptor, CacheEntry, CacheInstance, CacheKey, Registry};
use crate::config::{EngineConfig, EvictionStrategy};
use crate::engine::PutValueTrigger;
use crate::error::{Error, Result};
use crate::eviction::{self, EvictionPolicy};
use crate::pool::WorkerPool;

/// Window for per-operation and global reclamation signals
pub const SIGNAL_GAP: Duration = Duration::from_millis(100);

pub struct BudgetEnforcer {
    registry: Arc<Registry>,
    pool: Arc<WorkerPool>,
    per_cache_budget: Option<u64>,
    global_budget: Option<u64>,
    default_strategy: EvictionStrategy,
    reclaim_lock: Mutex<()>,
    signals: DashMap<String, Arc<SignalLimiter>>,
    global_signal: SignalLimiter,
}

impl BudgetEnforcer {
    pub fn new(registry: Arc<Registry>, pool: Arc<WorkerPool>, config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            registry,
            pool,
            per_cache_budget: config.per_cache_memory_budget.map(|b| b.bytes()),
            global_budget: config.global_memory_budget.map(|b| b.bytes()),
            default_strategy: config.default_eviction_strategy,
            reclaim_lock: Mutex::new(()),
            signals: DashMap::new(),
            global_signal: SignalLimiter::new(SIGNAL_GAP, 1)?,
        })
    }

    pub fn global_budget(&self) -> Option<u64> {
        self.global_budget
    }

    /// Budget governing one cache: the smaller of its own and the global
    /// per-cache budget
    pub fn effective_budget(&self, descriptor: &CacheDescriptor) -> Option<u64> {
        match (descriptor.budget_bytes(), self.per_cache_budget) {
            (Some(own), Some(shared)) => Some(own.min(shared)),
            (own, shared) => own.or(shared),
        }
    }

    fn policy_for(&self, descriptor: &CacheDescriptor) -> &'static dyn EvictionPolicy {
        eviction::policy_for(descriptor.eviction_strategy.unwrap_or(self.default_strategy))
    }

    /// Bring one cache back under its budget. Returns bytes freed.
    pub fn reclaim_cache(&self, instance: &CacheInstance) -> Result<u64> {
        let _guard = self.reclaim_lock.lock();
        self.reclaim_locked(instance)
    }

    fn reclaim_locked(&self, instance: &CacheInstance) -> Result<u64> {
        let Some(budget) = self.effective_budget(instance.descriptor()) else {
            return Ok(0);
        };
        let usage = instance.usage_bytes();
        if usage <= budget {
            return Ok(0);
        }

        let policy = self.policy_for(instance.descriptor());
        let target = usage - budget;
        let freed = panic::catch_unwind(AssertUnwindSafe(|| {
            policy.reclaim(instance, usage, target)
        }))
        .map_err(|_| Error::Reclamation {
            cache: instance.name().to_string(),
            reason: "eviction policy panicked".into(),
        })?;

        if freed < target {
            debug!(
                cache = instance.name(),
                budget,
                usage,
                freed,
                "Reclamation fell short of target"
            );
        }
        Ok(freed)
    }

    /// Reclaim every budgeted cache.
    ///
    /// The first failure aborts the pass; the next cycle starts over.
    pub fn sweep_budgets(&self) -> Result<u64> {
        let _guard = self.reclaim_lock.lock();
        let mut freed = 0;
        for instance in self.registry.instances() {
            freed += self.reclaim_locked(&instance)?;
        }
        if freed > 0 {
            info!(freed, "Budget sweep reclaimed memory");
        }
        Ok(freed)
    }

    /// Bytes held by caches that count toward the global budget
    pub fn global_usage(&self) -> u64 {
        self.registry
            .instances()
            .iter()
            .filter(|c| !c.descriptor().skip_global_budget)
            .map(|c| c.usage_bytes())
            .sum()
    }

    /// Enforce the aggregate budget across all non-exempt caches
    pub fn reclaim_global(&self) -> Result<u64> {
        let Some(budget) = self.global_budget else {
            return Ok(0);
        };
        let usage = self.global_usage();
        if usage <= budget || !self.global_signal.try_acquire() {
            return Ok(0);
        }

        let _guard = self.reclaim_lock.lock();
        let caches = self.registry.instances();
        let policy = eviction::policy_for(self.default_strategy);
        let target = usage - budget;
        let freed = panic::catch_unwind(AssertUnwindSafe(|| {
            eviction::reclaim_across(policy, &caches, target)
        }))
        .map_err(|_| Error::Reclamation {
            cache: "*".into(),
            reason: "global eviction panicked".into(),
        })?;

        info!(budget, usage, freed, "Global budget reclaimed memory");
        Ok(freed)
    }

    fn signal_for(&self, name: &str) -> Result<Arc<SignalLimiter>> {
        if let Some(found) = self.signals.get(name) {
            return Ok(Arc::clone(found.value()));
        }
        let entry = self
            .signals
            .entry(name.to_string())
            .or_try_insert_with(|| SignalLimiter::new(SIGNAL_GAP, 1).map(Arc::new))?;
        Ok(Arc::clone(entry.value()))
    }

    /// React to a write: schedule reclamation if the cache is over budget.
    ///
    /// Returns true when a reclamation task was queued.
    pub fn on_write(self: &Arc<Self>, instance: &Arc<CacheInstance>) -> bool {
        let Some(budget) = self.effective_budget(instance.descriptor()) else {
            return false;
        };
        if instance.usage_bytes() <= budget {
            return false;
        }

        let signal = match self.signal_for(instance.name()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(cache = instance.name(), error = %e, "No reclamation signal");
                return false;
            }
        };
        if !signal.try_acquire() {
            return false;
        }

        let enforcer = Arc::clone(self);
        let target = Arc::clone(instance);
        let submitted = self.pool.submit(move || {
            if let Err(e) = enforcer.reclaim_cache(&target) {
                warn!(cache = target.name(), error = %e, "Triggered reclamation failed");
            }
        });
        match submitted {
            Ok(()) => true,
            Err(e) => {
                debug!(cache = instance.name(), error = %e, "Reclamation task rejected");
                false
            }
        }
    }
}

/// Write trigger that hands over-budget caches to the enforcer
pub struct BudgetTrigger {
    enforcer: Arc<BudgetEnforcer>,
    registry: Arc<Registry>,
}

impl BudgetTrigger {
    pub fn new(enforcer: Arc<BudgetEnforcer>, registry: Arc<Registry>) -> Self {
        Self { enforcer, registry }
    }
}

impl PutValueTrigger for BudgetTrigger {
    fn on_put(
        &self,
        _operation: &str,
        _descriptor: &CacheDescriptor,
        _key: &CacheKey,
        entry: &Arc<CacheEntry>,
    ) {
        if let Some(instance) = self.registry.get(entry.cache_name()) {
            self.enforcer.on_write(&instance);
        }
    }
}
