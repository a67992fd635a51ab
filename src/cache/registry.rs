//! Cache Registry
//!
//! Owns every cache instance for the life of the engine. Lookups are
//! lock-free; creation is serialized behind one coarse lock with a second
//! lookup after the lock is taken, so each name is built exactly once.

use crossbeam::channel::Sender;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use super::descriptor::CacheDescriptor;
use super::entry::CollectedNotice;
use super::instance::CacheInstance;
use super::listener::{LoggingRemovalListener, RemovalListener};
use crate::config::RemovalListenerKind;
use crate::error::{Error, Result};
use crate::logging::LogPolicy;
use crate::pool::WorkerPool;

/// Collaborators every new instance is wired to
pub struct InstanceWiring {
    pub pool: Arc<WorkerPool>,
    pub queue: Sender<CollectedNotice>,
    pub log: LogPolicy,
    pub listener_kind: RemovalListenerKind,
    /// Installed on every cache when set, replacing the default listener
    pub custom_listener: Option<Arc<dyn RemovalListener>>,
}

pub struct Registry {
    instances: DashMap<String, Arc<CacheInstance>>,
    /// Instance address to name
    names: DashMap<usize, String>,
    /// Operation key to cache name, for caches with an explicit name
    aliases: DashMap<String, String>,
    creation_lock: Mutex<()>,
    wiring: InstanceWiring,
}

#[inline]
fn address(instance: &Arc<CacheInstance>) -> usize {
    Arc::as_ptr(instance) as usize
}

impl Registry {
    pub fn new(wiring: InstanceWiring) -> Self {
        Self {
            instances: DashMap::new(),
            names: DashMap::new(),
            aliases: DashMap::new(),
            creation_lock: Mutex::new(()),
            wiring,
        }
    }

    /// Instance registered under `name`
    pub fn get(&self, name: &str) -> Option<Arc<CacheInstance>> {
        self.instances.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Instance for an operation key, following explicit cache names
    pub fn resolve(&self, operation: &str) -> Option<Arc<CacheInstance>> {
        if let Some(name) = self.aliases.get(operation).map(|r| r.value().clone()) {
            return self.get(&name);
        }
        self.get(operation)
    }

    /// Instance for `operation`, building it on first use
    pub fn get_or_create(
        &self,
        operation: &str,
        descriptor: &CacheDescriptor,
    ) -> Result<Arc<CacheInstance>> {
        let name = descriptor.cache_name(operation);

        if let Some(found) = self.get(&name) {
            self.remember_alias(operation, &name);
            return Ok(found);
        }

        let _guard = self.creation_lock.lock();

        // Another thread may have finished while we waited
        if let Some(found) = self.get(&name) {
            self.remember_alias(operation, &name);
            return Ok(found);
        }

        descriptor.validate(&name)?;

        let instance = Arc::new(CacheInstance::new(
            &name,
            descriptor.clone(),
            Arc::clone(&self.wiring.pool),
            self.wiring.queue.clone(),
            self.listener_for(descriptor),
        ));
        self.register(&name, Arc::clone(&instance))?;
        self.remember_alias(operation, &name);

        info!(
            cache = %name,
            max_capacity = descriptor.max_capacity,
            expire_ms = descriptor.expire_after().as_millis() as u64,
            refresh = instance.refresh_enabled(),
            "Cache created"
        );
        Ok(instance)
    }

    /// Bind `instance` to `name`.
    ///
    /// Re-registering the same instance is a no-op; a different instance
    /// under a taken name is rejected.
    pub fn register(&self, name: &str, instance: Arc<CacheInstance>) -> Result<()> {
        if let Some(existing) = self.get(name) {
            if Arc::ptr_eq(&existing, &instance) {
                return Ok(());
            }
            return Err(Error::DuplicateCache(name.to_string()));
        }

        self.names.insert(address(&instance), name.to_string());
        self.instances.insert(name.to_string(), instance);
        Ok(())
    }

    /// Reverse lookup
    pub fn name_of(&self, instance: &Arc<CacheInstance>) -> Option<String> {
        self.names.get(&address(instance)).map(|r| r.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn instances(&self) -> Vec<Arc<CacheInstance>> {
        self.instances.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Remove every entry of the named cache
    pub fn invalidate_all(&self, name: &str) -> Result<u64> {
        let instance = self
            .get(name)
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))?;
        let removed = instance.invalidate_all();
        debug!(cache = %name, removed, "Cache invalidated");
        Ok(removed)
    }

    /// Estimated bytes across all caches
    pub fn total_usage_bytes(&self) -> u64 {
        self.instances.iter().map(|r| r.value().usage_bytes()).sum()
    }

    fn remember_alias(&self, operation: &str, name: &str) {
        if operation != name && !self.aliases.contains_key(operation) {
            self.aliases.insert(operation.to_string(), name.to_string());
        }
    }

    fn listener_for(&self, descriptor: &CacheDescriptor) -> Option<Arc<dyn RemovalListener>> {
        if let Some(custom) = &self.wiring.custom_listener {
            return Some(Arc::clone(custom));
        }
        match self.wiring.listener_kind {
            RemovalListenerKind::Log if self.wiring.log.enabled_for(descriptor) => {
                Some(Arc::new(LoggingRemovalListener::new(self.wiring.log)) as Arc<dyn RemovalListener>)
            }
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
