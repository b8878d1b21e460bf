//! Bean definition registry
//!
//! Stores named definitions and aliases. Definitions live in a `DashMap`
//! for lock-free reads; registration order is kept separately because
//! pre-instantiation and by-type lookups must follow it. A `TypeId` index is
//! maintained on every registration so that by-type queries never scan.

use crate::definition::BeanDefinition;
use crate::error::{ContextError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

// =============================================================================
// Traits
// =============================================================================

/// Manages aliases for bean names
pub trait AliasRegistry {
    /// Register `alias` for `name`
    fn register_alias(&self, name: &str, alias: &str) -> Result<()>;

    /// Remove an alias
    fn remove_alias(&self, alias: &str) -> Result<()>;

    /// True if `name` is registered as an alias
    fn is_alias(&self, name: &str) -> bool;

    /// All aliases pointing (directly or transitively) at `name`
    fn aliases(&self, name: &str) -> Vec<String>;
}

/// Holds bean definitions by name
pub trait BeanDefinitionRegistry: AliasRegistry + Send + Sync {
    /// Register a definition, validating it first
    fn register_bean_definition(&self, name: &str, definition: BeanDefinition) -> Result<()>;

    /// Remove the definition registered under `name`
    fn remove_bean_definition(&self, name: &str) -> Result<()>;

    /// The definition registered under `name`
    fn bean_definition(&self, name: &str) -> Result<Arc<BeanDefinition>>;

    fn contains_bean_definition(&self, name: &str) -> bool;

    /// Names of all definitions, in registration order
    fn bean_definition_names(&self) -> Vec<String>;

    fn bean_definition_count(&self) -> usize;

    /// True if `name` is used by a definition or an alias
    fn is_bean_name_in_use(&self, name: &str) -> bool;
}

// =============================================================================
// Definition Registry
// =============================================================================

/// Default registry implementation
pub struct DefinitionRegistry {
    definitions: DashMap<String, Arc<BeanDefinition>, RandomState>,
    /// Registration order
    names: RwLock<Vec<String>>,
    /// alias -> name
    aliases: DashMap<String, String, RandomState>,
    /// exposed type -> definition names, in registration order
    type_index: DashMap<TypeId, Vec<String>, RandomState>,
    allow_overriding: AtomicBool,
    frozen: AtomicBool,
}

impl DefinitionRegistry {
    /// Create an empty registry; overriding is allowed by default
    pub fn new() -> Self {
        Self {
            definitions: DashMap::with_capacity_and_hasher_and_shard_amount(
                0,
                RandomState::new(),
                8,
            ),
            names: RwLock::new(Vec::new()),
            aliases: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            type_index: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            allow_overriding: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn allow_definition_overriding(&self) -> bool {
        self.allow_overriding.load(Ordering::Acquire)
    }

    pub fn set_allow_definition_overriding(&self, allow: bool) {
        self.allow_overriding.store(allow, Ordering::Release);
    }

    /// Reject further definition changes
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub(crate) fn unfreeze(&self) {
        self.frozen.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Follow aliases to the registered name
    pub fn canonical_name(&self, name: &str) -> String {
        let mut current = name.to_string();
        // Alias chains are acyclic, registration guarantees it
        while let Some(target) = self.aliases.get(&current).map(|t| t.value().clone()) {
            current = target;
        }
        current
    }

    /// True if following aliases from `name` passes through `alias`
    fn resolves_through(&self, name: &str, alias: &str) -> bool {
        let mut current = name.to_string();
        loop {
            if current == alias {
                return true;
            }
            match self.aliases.get(&current).map(|t| t.value().clone()) {
                Some(target) => current = target,
                None => return false,
            }
        }
    }

    /// Definition lookup without error wrapping
    #[inline]
    pub fn get(&self, name: &str) -> Option<Arc<BeanDefinition>> {
        self.definitions.get(name).map(|d| Arc::clone(d.value()))
    }

    /// Names of definitions exposing the type, in registration order
    pub fn names_for_type(&self, type_id: TypeId) -> Vec<String> {
        self.type_index
            .get(&type_id)
            .map(|names| names.value().clone())
            .unwrap_or_default()
    }

    fn check_not_frozen(&self, name: &str, action: &'static str) -> Result<()> {
        if self.is_frozen() {
            return Err(ContextError::ConfigurationFrozen {
                name: name.to_string(),
                action,
            });
        }
        Ok(())
    }

    fn index(&self, name: &str, definition: &BeanDefinition) {
        for type_id in definition.types().type_ids() {
            let mut names = self.type_index.entry(type_id).or_default();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }

    fn unindex(&self, name: &str, definition: &BeanDefinition) {
        for type_id in definition.types().type_ids() {
            if let Some(mut names) = self.type_index.get_mut(&type_id) {
                names.retain(|n| n != name);
            }
        }
    }

    /// Returns the replaced definition, if any
    pub(crate) fn insert(
        &self,
        name: &str,
        definition: BeanDefinition,
    ) -> Result<Option<Arc<BeanDefinition>>> {
        definition.validate(name)?;
        self.check_not_frozen(name, "register")?;

        let mut names = self.names.write();
        let existing = self.get(name);
        if let Some(existing) = &existing {
            if !self.allow_definition_overriding() {
                return Err(ContextError::DefinitionOverride {
                    name: name.to_string(),
                });
            }

            #[cfg(feature = "logging")]
            debug!(
                target: "application_context",
                bean = name,
                old_type = existing.type_name(),
                new_type = definition.type_name(),
                "Overriding bean definition"
            );

            self.unindex(name, existing);
        } else {
            if self.aliases.contains_key(name) && !self.allow_definition_overriding() {
                return Err(ContextError::DefinitionOverride {
                    name: name.to_string(),
                });
            }
            names.push(name.to_string());
        }

        // A definition takes precedence over an alias of the same name
        self.aliases.remove(name);
        self.index(name, &definition);
        self.definitions.insert(name.to_string(), Arc::new(definition));

        #[cfg(feature = "logging")]
        trace!(
            target: "application_context",
            bean = name,
            count = names.len(),
            "Registered bean definition"
        );

        Ok(existing)
    }

    pub(crate) fn remove(&self, name: &str) -> Result<Arc<BeanDefinition>> {
        self.check_not_frozen(name, "remove")?;

        let mut names = self.names.write();
        let (_, definition) = self
            .definitions
            .remove(name)
            .ok_or_else(|| ContextError::no_such_definition(name))?;
        names.retain(|n| n != name);
        self.unindex(name, &definition);

        #[cfg(feature = "logging")]
        debug!(target: "application_context", bean = name, "Removed bean definition");

        Ok(definition)
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasRegistry for DefinitionRegistry {
    fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        if name.is_empty() || alias.is_empty() {
            return Err(ContextError::illegal_state("Alias and name must not be empty"));
        }
        if alias == name {
            self.aliases.remove(alias);
            return Ok(());
        }
        if let Some(existing) = self.aliases.get(alias).map(|t| t.value().clone()) {
            if existing == name {
                return Ok(());
            }
            if !self.allow_definition_overriding() {
                return Err(ContextError::illegal_state(format!(
                    "Cannot define alias '{alias}' for name '{name}': it is already registered for name '{existing}'"
                )));
            }
        }
        if self.resolves_through(name, alias) {
            return Err(ContextError::illegal_state(format!(
                "Cannot register alias '{alias}' for name '{name}': circular reference"
            )));
        }
        self.aliases.insert(alias.to_string(), name.to_string());
        Ok(())
    }

    fn remove_alias(&self, alias: &str) -> Result<()> {
        self.aliases
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| ContextError::illegal_state(format!("No alias '{alias}' registered")))
    }

    fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    fn aliases(&self, name: &str) -> Vec<String> {
        let canonical = self.canonical_name(name);
        let registered: Vec<String> = self.aliases.iter().map(|e| e.key().clone()).collect();
        let mut result: Vec<String> = registered
            .into_iter()
            .filter(|alias| alias != name && self.canonical_name(alias) == canonical)
            .collect();
        result.sort();
        result
    }
}

impl BeanDefinitionRegistry for DefinitionRegistry {
    fn register_bean_definition(&self, name: &str, definition: BeanDefinition) -> Result<()> {
        self.insert(name, definition).map(|_| ())
    }

    fn remove_bean_definition(&self, name: &str) -> Result<()> {
        self.remove(name).map(|_| ())
    }

    fn bean_definition(&self, name: &str) -> Result<Arc<BeanDefinition>> {
        self.get(name)
            .ok_or_else(|| ContextError::no_such_definition(name))
    }

    fn contains_bean_definition(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    fn bean_definition_names(&self) -> Vec<String> {
        self.names.read().clone()
    }

    fn bean_definition_count(&self) -> usize {
        self.definitions.len()
    }

    fn is_bean_name_in_use(&self, name: &str) -> bool {
        self.is_alias(name) || self.contains_bean_definition(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BeanDefinitionBuilder;
    use std::thread;

    trait Named: Send + Sync {}
    struct Alpha;
    struct Beta;
    impl Named for Alpha {}

    fn alpha() -> BeanDefinition {
        BeanDefinitionBuilder::<Alpha>::new()
            .supplier(|_| Ok(Alpha))
            .view(|a| a as Arc<dyn Named>)
            .build()
    }

    fn beta() -> BeanDefinition {
        BeanDefinitionBuilder::<Beta>::new().supplier(|_| Ok(Beta)).build()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = DefinitionRegistry::new();
        registry.register_bean_definition("alpha", alpha()).unwrap();
        registry.register_bean_definition("beta", beta()).unwrap();

        assert_eq!(registry.bean_definition_count(), 2);
        assert_eq!(registry.bean_definition_names(), ["alpha", "beta"]);
        assert!(registry.contains_bean_definition("alpha"));
        assert!(registry.bean_definition("alpha").unwrap().type_name().ends_with("Alpha"));
        assert!(matches!(
            registry.bean_definition("gamma"),
            Err(ContextError::NoSuchDefinition { .. })
        ));
    }

    #[test]
    fn test_override_keeps_order_and_count() {
        let registry = DefinitionRegistry::new();
        registry.register_bean_definition("a", alpha()).unwrap();
        registry.register_bean_definition("b", beta()).unwrap();
        registry.register_bean_definition("a", beta()).unwrap();

        assert_eq!(registry.bean_definition_count(), 2);
        assert_eq!(registry.bean_definition_names(), ["a", "b"]);
        assert!(registry.bean_definition("a").unwrap().type_name().ends_with("Beta"));
        assert!(registry.names_for_type(TypeId::of::<Alpha>()).is_empty());
        assert_eq!(registry.names_for_type(TypeId::of::<Beta>()), ["a", "b"]);
    }

    #[test]
    fn test_override_disallowed() {
        let registry = DefinitionRegistry::new();
        registry.set_allow_definition_overriding(false);
        registry.register_bean_definition("a", alpha()).unwrap();

        let err = registry.register_bean_definition("a", beta()).unwrap_err();
        assert!(matches!(err, ContextError::DefinitionOverride { .. }));
        assert!(registry.bean_definition("a").unwrap().type_name().ends_with("Alpha"));
    }

    #[test]
    fn test_definition_replacing_alias_needs_overriding() {
        let registry = DefinitionRegistry::new();
        registry.register_bean_definition("a", alpha()).unwrap();
        registry.register_alias("a", "primary").unwrap();
        registry.set_allow_definition_overriding(false);

        let err = registry.register_bean_definition("primary", beta()).unwrap_err();
        assert!(matches!(err, ContextError::DefinitionOverride { .. }));
        assert!(registry.is_alias("primary"));
        assert_eq!(registry.canonical_name("primary"), "a");
        assert_eq!(registry.bean_definition_names(), ["a"]);

        registry.set_allow_definition_overriding(true);
        registry.register_bean_definition("primary", beta()).unwrap();
        assert!(!registry.is_alias("primary"));
        assert_eq!(registry.bean_definition_names(), ["a", "primary"]);
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let registry = DefinitionRegistry::new();
        let err = registry
            .register_bean_definition("a", BeanDefinitionBuilder::<Alpha>::new().build())
            .unwrap_err();
        assert!(matches!(err, ContextError::DefinitionInvalid { .. }));
        assert_eq!(registry.bean_definition_count(), 0);
    }

    #[test]
    fn test_remove() {
        let registry = DefinitionRegistry::new();
        registry.register_bean_definition("a", alpha()).unwrap();
        registry.remove_bean_definition("a").unwrap();

        assert!(!registry.contains_bean_definition("a"));
        assert!(registry.names_for_type(TypeId::of::<dyn Named>()).is_empty());
        assert!(matches!(
            registry.remove_bean_definition("a"),
            Err(ContextError::NoSuchDefinition { .. })
        ));
    }

    #[test]
    fn test_frozen_registry() {
        let registry = DefinitionRegistry::new();
        registry.register_bean_definition("a", alpha()).unwrap();
        registry.freeze();

        assert!(matches!(
            registry.register_bean_definition("b", beta()),
            Err(ContextError::ConfigurationFrozen { .. })
        ));
        assert!(matches!(
            registry.remove_bean_definition("a"),
            Err(ContextError::ConfigurationFrozen { .. })
        ));
    }

    #[test]
    fn test_type_index_includes_views() {
        let registry = DefinitionRegistry::new();
        registry.register_bean_definition("a", alpha()).unwrap();
        registry.register_bean_definition("b", beta()).unwrap();

        assert_eq!(registry.names_for_type(TypeId::of::<dyn Named>()), ["a"]);
        assert_eq!(registry.names_for_type(TypeId::of::<Beta>()), ["b"]);
    }

    #[test]
    fn test_aliases() {
        let registry = DefinitionRegistry::new();
        registry.register_bean_definition("alpha", alpha()).unwrap();
        registry.register_alias("alpha", "first").unwrap();
        registry.register_alias("first", "primary-alpha").unwrap();

        assert!(registry.is_alias("first"));
        assert!(registry.is_bean_name_in_use("first"));
        assert_eq!(registry.canonical_name("primary-alpha"), "alpha");
        assert_eq!(registry.aliases("alpha"), ["first", "primary-alpha"]);

        assert!(registry.register_alias("primary-alpha", "alpha").is_err());

        registry.remove_alias("first").unwrap();
        assert!(!registry.is_alias("first"));
        assert!(registry.remove_alias("first").is_err());
    }

    #[test]
    fn test_repointing_alias_cannot_close_a_cycle() {
        let registry = DefinitionRegistry::new();
        registry.register_alias("a", "b").unwrap();
        registry.register_alias("b", "c").unwrap();

        // c -> b -> a; pointing b at c would loop
        assert!(registry.register_alias("c", "b").is_err());
        assert_eq!(registry.canonical_name("c"), "a");
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(DefinitionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for j in 0..25 {
                        registry
                            .register_bean_definition(&format!("bean-{i}-{j}"), beta())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.bean_definition_count(), 200);
        assert_eq!(registry.bean_definition_names().len(), 200);
        assert_eq!(registry.names_for_type(TypeId::of::<Beta>()).len(), 200);
    }
}
