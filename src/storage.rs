//! Singleton storage
//!
//! Uses DashMap for lock-free concurrent reads of created singletons.
//! Creation is serialised by a re-entrant lock so that a supplier may look
//! up other singletons, while re-entering the creation of the bean that is
//! already being built is reported as a circular reference.
//!
//! The store also tracks which bean depends on which so that destruction
//! can take dependents down before the beans they use.

use crate::definition::BeanTypes;
use crate::error::{ContextError, Result};
use crate::factory::BeanInstance;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Deferred destruction of one bean
pub(crate) type DestroyFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// A created singleton and the types it can be viewed as
#[derive(Clone)]
pub(crate) struct SingletonEntry {
    pub instance: BeanInstance,
    pub types: Arc<BeanTypes>,
    /// Registered directly rather than created from a definition
    pub manual: bool,
}

/// Thread-safe singleton registry with dependency tracking
pub(crate) struct SingletonStore {
    singletons: DashMap<String, SingletonEntry, RandomState>,
    /// Registration order
    registered: RwLock<Vec<String>>,
    /// Destruction callbacks in registration order
    disposables: Mutex<Vec<(String, DestroyFn)>>,
    /// bean -> beans that depend on it
    dependents: DashMap<String, Vec<String>, RandomState>,
    /// bean -> beans it depends on
    dependencies: DashMap<String, Vec<String>, RandomState>,
    in_creation: Mutex<HashSet<String>>,
    creation_lock: ReentrantMutex<()>,
    in_destruction: AtomicBool,
}

impl SingletonStore {
    /// Create an empty store with 8 shards per map.
    pub fn new() -> Self {
        Self {
            singletons: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            registered: RwLock::new(Vec::new()),
            disposables: Mutex::new(Vec::new()),
            dependents: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            dependencies: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            in_creation: Mutex::new(HashSet::new()),
            creation_lock: ReentrantMutex::new(()),
            in_destruction: AtomicBool::new(false),
        }
    }

    // ===== Lookup =====

    #[inline]
    pub fn get(&self, name: &str) -> Option<SingletonEntry> {
        self.singletons.get(name).map(|e| e.value().clone())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.singletons.contains_key(name)
    }

    /// Singleton names in registration order
    pub fn names(&self) -> Vec<String> {
        self.registered.read().clone()
    }

    /// Names of manually registered singletons, in registration order
    pub fn manual_names(&self) -> Vec<String> {
        self.registered
            .read()
            .iter()
            .filter(|name| self.singletons.get(*name).is_some_and(|e| e.manual))
            .cloned()
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.singletons.len()
    }

    // ===== Registration =====

    fn add(&self, name: &str, entry: SingletonEntry) {
        let mut registered = self.registered.write();
        if self.singletons.insert(name.to_string(), entry).is_none() {
            registered.push(name.to_string());
        }
    }

    /// Register an externally created singleton
    pub fn register_manual(&self, name: &str, instance: BeanInstance, types: BeanTypes) -> Result<()> {
        let _guard = self.creation_lock.lock();
        if self.contains(name) {
            return Err(ContextError::illegal_state(format!(
                "Could not register object under bean name '{name}': there is already an object bound"
            )));
        }
        self.add(
            name,
            SingletonEntry {
                instance,
                types: Arc::new(types),
                manual: true,
            },
        );

        #[cfg(feature = "logging")]
        trace!(target: "application_context", bean = name, "Registered manual singleton");

        Ok(())
    }

    /// Return the singleton, creating it under the creation lock if absent
    pub fn get_or_create<F>(&self, name: &str, create: F) -> Result<SingletonEntry>
    where
        F: FnOnce() -> Result<SingletonEntry>,
    {
        if let Some(entry) = self.get(name) {
            return Ok(entry);
        }

        let _guard = self.creation_lock.lock();
        if let Some(entry) = self.get(name) {
            return Ok(entry);
        }
        if self.in_destruction.load(Ordering::Acquire) {
            return Err(ContextError::illegal_state(format!(
                "Singleton bean creation not allowed while singletons are in destruction (bean '{name}')"
            )));
        }
        if !self.in_creation.lock().insert(name.to_string()) {
            return Err(ContextError::CurrentlyInCreation {
                name: name.to_string(),
            });
        }

        let result = create();
        self.in_creation.lock().remove(name);
        let entry = result?;
        self.add(name, entry.clone());
        Ok(entry)
    }

    #[inline]
    pub fn is_currently_in_creation(&self, name: &str) -> bool {
        self.in_creation.lock().contains(name)
    }

    pub fn register_disposable(&self, name: &str, destroy: DestroyFn) {
        self.disposables.lock().push((name.to_string(), destroy));
    }

    // ===== Dependencies =====

    /// Record that `dependent` uses `bean`
    pub fn register_dependent(&self, bean: &str, dependent: &str) {
        {
            let mut dependents = self.dependents.entry(bean.to_string()).or_default();
            if !dependents.iter().any(|d| d == dependent) {
                dependents.push(dependent.to_string());
            }
        }
        let mut dependencies = self.dependencies.entry(dependent.to_string()).or_default();
        if !dependencies.iter().any(|d| d == bean) {
            dependencies.push(bean.to_string());
        }
    }

    /// Beans that depend on `name`
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.dependents
            .get(name)
            .map(|d| d.value().clone())
            .unwrap_or_default()
    }

    /// Beans `name` depends on
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.dependencies
            .get(name)
            .map(|d| d.value().clone())
            .unwrap_or_default()
    }

    #[inline]
    pub fn has_dependents(&self, name: &str) -> bool {
        self.dependents.get(name).is_some_and(|d| !d.is_empty())
    }

    /// True if `dependent` depends on `bean`, directly or transitively
    pub fn is_dependent(&self, bean: &str, dependent: &str) -> bool {
        let mut visited = HashSet::new();
        self.is_dependent_inner(bean, dependent, &mut visited)
    }

    fn is_dependent_inner(&self, bean: &str, dependent: &str, visited: &mut HashSet<String>) -> bool {
        if !visited.insert(bean.to_string()) {
            return false;
        }
        let direct = self.dependents_of(bean);
        if direct.iter().any(|d| d == dependent) {
            return true;
        }
        direct
            .iter()
            .any(|d| self.is_dependent_inner(d, dependent, visited))
    }

    // ===== Destruction =====

    /// Destroy every singleton, most recently registered disposable first
    pub fn destroy_singletons(&self) {
        self.in_destruction.store(true, Ordering::Release);

        let names: Vec<String> = self
            .disposables
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect();

        #[cfg(feature = "logging")]
        debug!(
            target: "application_context",
            singletons = self.singletons.len(),
            disposables = names.len(),
            "Destroying singletons"
        );

        for name in names.iter().rev() {
            self.destroy_singleton(name);
        }

        self.singletons.clear();
        self.registered.write().clear();
        self.dependents.clear();
        self.dependencies.clear();
        self.disposables.lock().clear();
        self.in_destruction.store(false, Ordering::Release);
    }

    /// Destroy one singleton and, before it, everything that depends on it
    pub fn destroy_singleton(&self, name: &str) {
        if self.singletons.remove(name).is_some() {
            self.registered.write().retain(|n| n != name);
        }
        let disposable = {
            let mut disposables = self.disposables.lock();
            disposables
                .iter()
                .position(|(n, _)| n == name)
                .map(|idx| disposables.remove(idx).1)
        };
        self.destroy_bean(name, disposable);
    }

    fn destroy_bean(&self, name: &str, disposable: Option<DestroyFn>) {
        if let Some((_, dependents)) = self.dependents.remove(name) {
            #[cfg(feature = "logging")]
            trace!(
                target: "application_context",
                bean = name,
                dependents = ?dependents,
                "Destroying dependent beans first"
            );

            for dependent in dependents {
                self.destroy_singleton(&dependent);
            }
        }

        if let Some(destroy) = disposable {
            if let Err(_err) = destroy() {
                #[cfg(feature = "logging")]
                warn!(
                    target: "application_context",
                    bean = name,
                    error = %_err,
                    "Destruction of bean threw an error"
                );
            }
        }

        for mut entry in self.dependents.iter_mut() {
            entry.value_mut().retain(|d| d != name);
        }
        self.dependencies.remove(name);
    }
}

impl Default for SingletonStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SingletonStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonStore")
            .field("count", &self.len())
            .field("disposables", &self.disposables.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: u32) -> SingletonEntry {
        SingletonEntry {
            instance: Arc::new(value),
            types: Arc::new(BeanTypes::of::<u32>()),
            manual: false,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> DestroyFn {
        let log = Arc::clone(log);
        let name = name.to_string();
        Box::new(move || {
            log.lock().push(name);
            Ok(())
        })
    }

    #[test]
    fn test_get_or_create_once() {
        let store = SingletonStore::new();
        let first = store.get_or_create("a", || Ok(entry(1))).unwrap();
        let second = store.get_or_create("a", || Ok(entry(2))).unwrap();

        assert!(Arc::ptr_eq(&first.instance, &second.instance));
        assert_eq!(store.names(), ["a"]);
    }

    #[test]
    fn test_reentrant_creation_is_circular() {
        let store = SingletonStore::new();
        let Err(err) = store.get_or_create("a", || store.get_or_create("a", || Ok(entry(1)))) else {
            panic!("re-entrant creation of 'a' should fail");
        };

        assert!(matches!(err, ContextError::CurrentlyInCreation { .. }));
        assert!(!store.contains("a"));
        assert!(!store.is_currently_in_creation("a"));
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let store = SingletonStore::new();
        assert!(store.get_or_create("a", || Err(ContextError::other("boom"))).is_err());
        assert!(store.get_or_create("a", || Ok(entry(3))).is_ok());
    }

    #[test]
    fn test_manual_registration_conflict() {
        let store = SingletonStore::new();
        store
            .register_manual("env", Arc::new(1u32), BeanTypes::of::<u32>())
            .unwrap();
        assert!(store
            .register_manual("env", Arc::new(2u32), BeanTypes::of::<u32>())
            .is_err());
        assert_eq!(store.manual_names(), ["env"]);
    }

    #[test]
    fn test_destroy_reverse_order_dependents_first() {
        let store = SingletonStore::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["repo", "service", "cache"] {
            store.get_or_create(name, || Ok(entry(0))).unwrap();
            store.register_disposable(name, recorder(&log, name));
        }
        // repo is used by service; cache is independent
        store.register_dependent("repo", "service");

        store.destroy_singletons();

        assert_eq!(*log.lock(), ["cache", "service", "repo"]);
        assert_eq!(store.len(), 0);
        assert!(store.names().is_empty());
    }

    #[test]
    fn test_destroying_dependency_takes_dependents_down() {
        let store = SingletonStore::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["db", "repo", "web"] {
            store.get_or_create(name, || Ok(entry(0))).unwrap();
            store.register_disposable(name, recorder(&log, name));
        }
        store.register_dependent("db", "repo");
        store.register_dependent("repo", "web");

        assert!(store.is_dependent("db", "web"));
        assert!(!store.is_dependent("web", "db"));

        store.destroy_singleton("db");
        assert_eq!(*log.lock(), ["web", "repo", "db"]);
        assert!(!store.contains("web"));
    }

    #[test]
    fn test_destroy_errors_are_swallowed() {
        let store = SingletonStore::new();
        store.get_or_create("a", || Ok(entry(0))).unwrap();
        store.register_disposable("a", Box::new(|| Err(ContextError::other("close failed"))));
        store.destroy_singletons();
        assert_eq!(store.len(), 0);
    }
}
