//! The bean factory
//!
//! [`BeanFactory`] combines a definition registry with singleton storage,
//! scopes and the post-processor chain. It creates beans on demand from
//! their definitions, records which bean used which, and destroys them in
//! dependency order.
//!
//! A factory is always handled through an `Arc`: suppliers, providers and
//! scoped proxies keep `Weak` references back to it.

use crate::conversion::{ConversionService, DefaultConversionService};
use crate::definition::{BeanDefinition, BeanTypes};
use crate::error::{ContextError, Result};
use crate::factory::{BeanArgs, BeanInstance};
use crate::metadata::Annotation;
use crate::processor::{BeanPostProcessor, DisposableBean, InitializingBean, ManagedBean, SmartInitializingSingleton};
use crate::provider::BeanProvider;
use crate::registry::{AliasRegistry, BeanDefinitionRegistry, DefinitionRegistry};
use crate::scope::{BeanScope, Scope, SCOPE_PROTOTYPE, SCOPE_SINGLETON};
use crate::storage::{DestroyFn, SingletonEntry, SingletonStore};
use crate::Injectable;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Resolves `${...}` expressions in string values
pub type EmbeddedValueResolver = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

type ResolvableFn = Arc<dyn Fn() -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;

// =============================================================================
// Creation Tracking
// =============================================================================

thread_local! {
    /// (factory id, bean name) of the beans this thread is creating
    static CREATION_STACK: RefCell<Vec<(usize, String)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a bean as being created on this thread until dropped
struct CreationFrame;

impl CreationFrame {
    fn enter(factory: usize, name: &str) -> Result<Self> {
        CREATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|(f, n)| *f == factory && n == name) {
                return Err(ContextError::CurrentlyInCreation {
                    name: name.to_string(),
                });
            }
            stack.push((factory, name.to_string()));
            Ok(CreationFrame)
        })
    }

    /// Bean currently being created by `factory` on this thread
    fn current(factory: usize) -> Option<String> {
        CREATION_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .filter(|(f, _)| *f == factory)
                .map(|(_, n)| n.clone())
        })
    }
}

impl Drop for CreationFrame {
    fn drop(&mut self) {
        CREATION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

// =============================================================================
// Bean Factory
// =============================================================================

/// Listable, hierarchical bean factory
pub struct BeanFactory {
    self_ref: Weak<BeanFactory>,
    registry: DefinitionRegistry,
    singletons: SingletonStore,
    parent: Option<Arc<BeanFactory>>,
    post_processors: RwLock<Vec<Arc<dyn BeanPostProcessor>>>,
    scopes: DashMap<String, Arc<dyn Scope>, RandomState>,
    resolvable: DashMap<TypeId, ResolvableFn, RandomState>,
    value_resolvers: RwLock<Vec<EmbeddedValueResolver>>,
    conversion_service: RwLock<Option<Arc<dyn ConversionService>>>,
    serialization_id: RwLock<Option<String>>,
    /// (type, include non-singletons) -> names; only used once frozen
    type_cache: DashMap<(TypeId, bool), Vec<String>, RandomState>,
    refresh_mark: RwLock<RefreshMark>,
}

/// Configuration lengths recorded when a refresh attempt starts
#[derive(Debug, Clone, Copy, Default)]
struct RefreshMark {
    post_processors: usize,
    value_resolvers: usize,
}

impl BeanFactory {
    /// Create an empty root factory
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Create a factory that falls back to `parent` for unknown beans
    pub fn with_parent(parent: Arc<BeanFactory>) -> Arc<Self> {
        Self::build(Some(parent))
    }

    fn build(parent: Option<Arc<BeanFactory>>) -> Arc<Self> {
        #[cfg(feature = "logging")]
        debug!(
            target: "application_context",
            has_parent = parent.is_some(),
            "Creating bean factory"
        );

        Arc::new_cyclic(|self_ref| Self {
            self_ref: Weak::clone(self_ref),
            registry: DefinitionRegistry::new(),
            singletons: SingletonStore::new(),
            parent,
            post_processors: RwLock::new(Vec::new()),
            scopes: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            resolvable: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            value_resolvers: RwLock::new(Vec::new()),
            conversion_service: RwLock::new(None),
            serialization_id: RwLock::new(None),
            type_cache: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            refresh_mark: RwLock::new(RefreshMark::default()),
        })
    }

    /// Weak handle to this factory
    #[inline]
    pub fn weak(&self) -> Weak<BeanFactory> {
        Weak::clone(&self.self_ref)
    }

    #[inline]
    fn id(&self) -> usize {
        self as *const Self as usize
    }

    #[inline]
    pub fn parent_bean_factory(&self) -> Option<&Arc<BeanFactory>> {
        self.parent.as_ref()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    #[inline]
    pub fn allow_definition_overriding(&self) -> bool {
        self.registry.allow_definition_overriding()
    }

    pub fn set_allow_definition_overriding(&self, allow: bool) {
        self.registry.set_allow_definition_overriding(allow);
    }

    /// Freeze all definitions; registration and removal fail afterwards
    pub fn freeze_configuration(&self) {
        self.registry.freeze();
        self.type_cache.clear();

        #[cfg(feature = "logging")]
        debug!(
            target: "application_context",
            definitions = self.registry.bean_definition_count(),
            "Bean factory configuration frozen"
        );
    }

    #[inline]
    pub fn is_configuration_frozen(&self) -> bool {
        self.registry.is_frozen()
    }

    /// Id used to identify this factory in logs and registries
    pub fn serialization_id(&self) -> Option<String> {
        self.serialization_id.read().clone()
    }

    pub fn set_serialization_id(&self, id: Option<String>) {
        *self.serialization_id.write() = id;
    }

    /// Drop cached by-type lookups
    pub fn clear_metadata_cache(&self) {
        self.type_cache.clear();
    }

    /// Remember the configuration present before a refresh attempt
    pub(crate) fn mark_refresh_start(&self) {
        *self.refresh_mark.write() = RefreshMark {
            post_processors: self.post_processors.read().len(),
            value_resolvers: self.value_resolvers.read().len(),
        };
    }

    /// Undo the configuration applied by a failed refresh so it can be retried
    pub(crate) fn reset_for_retry(&self) {
        let mark = *self.refresh_mark.read();
        self.post_processors.write().truncate(mark.post_processors);
        self.value_resolvers.write().truncate(mark.value_resolvers);
        self.registry.unfreeze();
        self.type_cache.clear();
    }

    // =========================================================================
    // Post-processors, Scopes, Resolvers
    // =========================================================================

    /// Add a bean post-processor; re-adding moves it to the end
    pub fn add_bean_post_processor(&self, processor: Arc<dyn BeanPostProcessor>) {
        let mut processors = self.post_processors.write();
        let ptr = Arc::as_ptr(&processor) as *const ();
        processors.retain(|p| Arc::as_ptr(p) as *const () != ptr);
        processors.push(processor);
    }

    #[inline]
    pub fn bean_post_processor_count(&self) -> usize {
        self.post_processors.read().len()
    }

    /// Register a custom scope
    pub fn register_scope(&self, name: &str, scope: Arc<dyn Scope>) -> Result<()> {
        if name == SCOPE_SINGLETON || name == SCOPE_PROTOTYPE {
            return Err(ContextError::illegal_state(
                "Cannot replace existing scopes 'singleton' and 'prototype'",
            ));
        }
        self.scopes.insert(name.to_string(), scope);

        #[cfg(feature = "logging")]
        debug!(target: "application_context", scope = name, "Registered custom scope");

        Ok(())
    }

    pub fn registered_scope(&self, name: &str) -> Option<Arc<dyn Scope>> {
        self.scopes.get(name).map(|s| Arc::clone(s.value()))
    }

    pub fn registered_scope_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scopes.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    /// Make `value` injectable by type without registering it as a bean
    pub fn register_resolvable_dependency<T>(&self, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_resolvable_dependency_with::<T, _>(move || Some(Arc::clone(&value)));
    }

    /// Make a lazily supplied value injectable by type
    pub fn register_resolvable_dependency_with<T, F>(&self, f: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Option<Arc<T>> + Send + Sync + 'static,
    {
        self.resolvable.insert(
            TypeId::of::<T>(),
            Arc::new(move || f().map(|v| Box::new(v) as Box<dyn Any + Send + Sync>)),
        );
    }

    fn resolvable_dependency<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let supplier = self
            .resolvable
            .get(&TypeId::of::<T>())
            .map(|f| Arc::clone(f.value()))?;
        supplier()?.downcast::<Arc<T>>().ok().map(|b| *b)
    }

    pub fn add_embedded_value_resolver(&self, resolver: EmbeddedValueResolver) {
        self.value_resolvers.write().push(resolver);
    }

    #[inline]
    pub fn has_embedded_value_resolver(&self) -> bool {
        !self.value_resolvers.read().is_empty()
    }

    #[inline]
    pub fn embedded_value_resolver_count(&self) -> usize {
        self.value_resolvers.read().len()
    }

    /// Run `value` through every embedded value resolver in order
    pub fn resolve_embedded_value(&self, value: &str) -> Result<String> {
        let resolvers = self.value_resolvers.read().clone();
        let mut result = value.to_string();
        for resolver in resolvers {
            result = resolver(&result)?;
        }
        Ok(result)
    }

    pub fn set_conversion_service(&self, service: Arc<dyn ConversionService>) {
        *self.conversion_service.write() = Some(service);
    }

    pub fn conversion_service(&self) -> Option<Arc<dyn ConversionService>> {
        self.conversion_service.read().clone()
    }

    /// Resolve placeholders in `expression` and convert the result to `T`
    pub fn resolve_value<T: Send + Sync + 'static>(&self, expression: &str) -> Result<T> {
        let resolved = self.resolve_embedded_value(expression)?;
        let service: Arc<dyn ConversionService> = match self.conversion_service() {
            Some(service) => service,
            None => DefaultConversionService::shared(),
        };
        service.convert_to::<T>(&resolved)
    }

    // =========================================================================
    // Singleton Registration
    // =========================================================================

    /// Register an existing instance as a singleton bean
    pub fn register_singleton<T: Injectable>(&self, name: &str, instance: Arc<T>) -> Result<()> {
        self.register_singleton_with(name, instance, BeanTypes::of::<T>())
    }

    /// Register an existing instance with explicit types (e.g. extra views)
    pub fn register_singleton_with(&self, name: &str, instance: BeanInstance, types: BeanTypes) -> Result<()> {
        self.singletons.register_manual(name, instance, types)?;
        self.type_cache.clear();
        Ok(())
    }

    #[inline]
    pub fn contains_singleton(&self, name: &str) -> bool {
        self.singletons.contains(name)
    }

    /// Names of created and registered singletons, in registration order
    pub fn singleton_names(&self) -> Vec<String> {
        self.singletons.names()
    }

    #[inline]
    pub fn singleton_count(&self) -> usize {
        self.singletons.len()
    }

    /// The registered name an alias resolves to
    #[inline]
    pub fn canonical_name(&self, name: &str) -> String {
        self.registry.canonical_name(name)
    }

    /// Record that `dependent` uses `bean`; destruction honours it
    pub fn register_dependent_bean(&self, bean: &str, dependent: &str) {
        let bean = self.registry.canonical_name(bean);
        self.singletons.register_dependent(&bean, dependent);
    }

    /// Beans that depend on `name`
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.singletons.dependents_of(&self.registry.canonical_name(name))
    }

    /// Beans `name` depends on
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.singletons.dependencies_of(&self.registry.canonical_name(name))
    }

    // =========================================================================
    // Lookup by Name
    // =========================================================================

    /// Look up a bean by name as an untyped instance
    pub fn get_bean_any(&self, name: &str) -> Result<BeanInstance> {
        self.do_get_bean(name, &BeanArgs::new()).map(|b| b.into_parts().1)
    }

    /// Look up a bean by name together with its types
    pub fn get_managed_bean(&self, name: &str) -> Result<ManagedBean> {
        self.do_get_bean(name, &BeanArgs::new())
    }

    /// Look up a bean by name and view it as `T`
    pub fn get_bean<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let bean = self.do_get_bean(name, &BeanArgs::new())?;
        Self::view_as::<T>(name, &bean)
    }

    /// Look up a bean, passing explicit arguments to its supplier.
    ///
    /// Arguments only matter when a new instance is created; an existing
    /// singleton is returned as-is.
    pub fn get_bean_with_args<T: ?Sized + Send + Sync + 'static>(&self, name: &str, args: &BeanArgs) -> Result<Arc<T>> {
        let bean = self.do_get_bean(name, args)?;
        Self::view_as::<T>(name, &bean)
    }

    fn view_as<T: ?Sized + Send + Sync + 'static>(name: &str, bean: &ManagedBean) -> Result<Arc<T>> {
        bean.view::<T>().ok_or_else(|| ContextError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
            actual: bean.types().type_name(),
        })
    }

    fn do_get_bean(&self, name: &str, args: &BeanArgs) -> Result<ManagedBean> {
        let canonical = self.registry.canonical_name(name);

        if args.is_empty() {
            if let Some(entry) = self.singletons.get(&canonical) {
                #[cfg(feature = "logging")]
                trace!(target: "application_context", bean = %canonical, "Returning cached singleton");

                self.record_dependency(&canonical);
                return Ok(ManagedBean::new(canonical, entry.instance, entry.types));
            }
        }

        let Some(definition) = self.registry.get(&canonical) else {
            if let Some(entry) = self.singletons.get(&canonical) {
                return Ok(ManagedBean::new(canonical, entry.instance, entry.types));
            }
            if let Some(parent) = &self.parent {
                return parent.do_get_bean(name, args);
            }
            return Err(ContextError::no_such_definition(name));
        };

        for dependency in definition.depends_on() {
            if self.singletons.is_dependent(&canonical, dependency) {
                return Err(ContextError::creation(
                    &canonical,
                    ContextError::illegal_state(format!(
                        "Circular depends-on relationship between '{canonical}' and '{dependency}'"
                    )),
                ));
            }
            self.register_dependent_bean(dependency, &canonical);
            self.get_bean_any(dependency)
                .map_err(|e| ContextError::creation(&canonical, e))?;
        }

        let bean = match definition.scope() {
            BeanScope::Singleton => {
                let entry = self.singletons.get_or_create(&canonical, || {
                    let (_, instance, types) = self.create_bean(&canonical, &definition, args)?.into_parts();
                    Ok(SingletonEntry {
                        instance,
                        types,
                        manual: false,
                    })
                })?;
                ManagedBean::new(canonical.clone(), entry.instance, entry.types)
            }
            BeanScope::Prototype => self.create_bean(&canonical, &definition, args)?,
            BeanScope::Custom(scope_name) => {
                let scope = self
                    .registered_scope(scope_name)
                    .ok_or_else(|| ContextError::NoSuchScope {
                        scope: scope_name.clone(),
                    })?;
                let mut create = || {
                    self.create_bean(&canonical, &definition, args)
                        .map(|b| b.into_parts().1)
                };
                let instance = scope.get(&canonical, &mut create)?;
                ManagedBean::new(canonical.clone(), instance, Arc::clone(definition.types()))
            }
        };

        self.record_dependency(&canonical);
        Ok(bean)
    }

    /// If this thread is creating a bean of this factory, it depends on `name`
    fn record_dependency(&self, name: &str) {
        if let Some(current) = CreationFrame::current(self.id()) {
            if current != name {
                self.singletons.register_dependent(name, &current);
            }
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    fn create_bean(&self, name: &str, definition: &BeanDefinition, args: &BeanArgs) -> Result<ManagedBean> {
        let supplier = definition
            .supplier()
            .ok_or_else(|| ContextError::invalid(name, "no instance supplier"))?;

        #[cfg(feature = "logging")]
        trace!(
            target: "application_context",
            bean = name,
            scope = %definition.scope(),
            bean_type = definition.type_name(),
            "Creating instance of bean"
        );

        let instance = {
            let _frame = CreationFrame::enter(self.id(), name)?;
            supplier.supply(self, args)
        }
        .map_err(|e| ContextError::creation(name, e))?;

        let bean = ManagedBean::new(name, instance, Arc::clone(definition.types()));
        let processors = self.post_processors.read().clone();
        let bean = self
            .initialize_bean(bean, definition, &processors)
            .map_err(|e| ContextError::creation(name, e))?;

        self.register_disposable_if_necessary(&bean, definition, &processors)?;
        Ok(bean)
    }

    fn initialize_bean(
        &self,
        mut bean: ManagedBean,
        definition: &BeanDefinition,
        processors: &[Arc<dyn BeanPostProcessor>],
    ) -> Result<ManagedBean> {
        for processor in processors {
            bean = processor.post_process_before_initialization(bean)?;
        }

        if let Some(initializing) = bean.view::<dyn InitializingBean>() {
            initializing.after_properties_set()?;
        }
        if let Some(callback) = definition.init_callback() {
            #[cfg(feature = "logging")]
            trace!(
                target: "application_context",
                bean = bean.name(),
                method = callback.name(),
                "Invoking init method"
            );
            callback.invoke(bean.instance())?;
        }

        for processor in processors {
            bean = processor.post_process_after_initialization(bean)?;
        }
        Ok(bean)
    }

    fn register_disposable_if_necessary(
        &self,
        bean: &ManagedBean,
        definition: &BeanDefinition,
        processors: &[Arc<dyn BeanPostProcessor>],
    ) -> Result<()> {
        if definition.is_prototype() {
            return Ok(());
        }

        let destroyers: Vec<Arc<dyn BeanPostProcessor>> = processors
            .iter()
            .filter(|p| p.requires_destruction(bean))
            .cloned()
            .collect();
        let disposable = bean.view::<dyn DisposableBean>();
        let callback = definition.destroy_callback().cloned();
        if destroyers.is_empty() && disposable.is_none() && callback.is_none() {
            return Ok(());
        }

        let target = bean.clone();
        let destroy: DestroyFn = Box::new(move || {
            let mut first_error = None;
            for processor in &destroyers {
                if let Err(e) = processor.post_process_before_destruction(&target) {
                    first_error.get_or_insert(e);
                }
            }
            if let Some(disposable) = disposable {
                if let Err(e) = disposable.destroy() {
                    first_error.get_or_insert(e);
                }
            }
            if let Some(callback) = callback {
                if let Err(e) = callback.invoke(target.instance()) {
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        });

        match definition.scope() {
            BeanScope::Singleton => self.singletons.register_disposable(bean.name(), destroy),
            BeanScope::Custom(scope_name) => {
                let scope = self
                    .registered_scope(scope_name)
                    .ok_or_else(|| ContextError::NoSuchScope {
                        scope: scope_name.clone(),
                    })?;
                let _name = bean.name().to_string();
                scope.register_destruction_callback(
                    bean.name(),
                    Box::new(move || {
                        if let Err(_err) = destroy() {
                            #[cfg(feature = "logging")]
                            warn!(
                                target: "application_context",
                                bean = %_name,
                                error = %_err,
                                "Destruction of scoped bean threw an error"
                            );
                        }
                    }),
                );
            }
            BeanScope::Prototype => {}
        }
        Ok(())
    }

    // =========================================================================
    // Lookup by Type
    // =========================================================================

    /// Names of beans exposing the type with this id, in registration order.
    ///
    /// Never instantiates anything.
    pub fn bean_names_for_type_id(&self, type_id: TypeId, include_non_singletons: bool) -> Vec<String> {
        let frozen = self.is_configuration_frozen();
        if frozen {
            if let Some(cached) = self.type_cache.get(&(type_id, include_non_singletons)) {
                return cached.value().clone();
            }
        }

        let mut names: Vec<String> = self
            .registry
            .names_for_type(type_id)
            .into_iter()
            .filter(|name| {
                include_non_singletons
                    || self
                        .registry
                        .get(name)
                        .is_some_and(|d| d.is_singleton())
            })
            .collect();

        for name in self.singletons.manual_names() {
            if names.contains(&name) || self.registry.contains_bean_definition(&name) {
                continue;
            }
            if self
                .singletons
                .get(&name)
                .is_some_and(|e| e.types.exposes(type_id))
            {
                names.push(name);
            }
        }

        if frozen {
            self.type_cache
                .insert((type_id, include_non_singletons), names.clone());
        }
        names
    }

    /// Names of beans exposing `T`
    #[inline]
    pub fn bean_names_for_type<T: ?Sized + 'static>(&self, include_non_singletons: bool) -> Vec<String> {
        self.bean_names_for_type_id(TypeId::of::<T>(), include_non_singletons)
    }

    fn is_autowire_candidate(&self, name: &str) -> bool {
        self.registry
            .get(name)
            .is_none_or(|d| d.is_autowire_candidate())
    }

    fn is_primary(&self, name: &str) -> bool {
        self.registry.get(name).is_some_and(|d| d.is_primary())
    }

    /// The single candidate, or the single primary among several
    fn resolve_candidate(&self, type_id: TypeId, type_name: &'static str) -> Result<Option<String>> {
        let candidates: Vec<String> = self
            .bean_names_for_type_id(type_id, true)
            .into_iter()
            .filter(|name| self.is_autowire_candidate(name))
            .collect();

        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.into_iter().next()),
            _ => {
                let primaries: Vec<&String> = candidates.iter().filter(|n| self.is_primary(n)).collect();
                match primaries.as_slice() {
                    [primary] => Ok(Some((*primary).clone())),
                    _ => Err(ContextError::NoUniqueBean {
                        type_name,
                        candidates,
                    }),
                }
            }
        }
    }

    /// Look up the unique (or primary) bean exposing `T`.
    ///
    /// Falls back to resolvable dependencies and then to the parent factory.
    pub fn get_bean_by_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let type_name = std::any::type_name::<T>();
        if let Some(name) = self.resolve_candidate(TypeId::of::<T>(), type_name)? {
            return self.get_bean::<T>(&name);
        }
        if let Some(value) = self.resolvable_dependency::<T>() {
            return Ok(value);
        }
        if let Some(parent) = &self.parent {
            return parent.get_bean_by_type::<T>();
        }

        #[cfg(feature = "logging")]
        debug!(target: "application_context", bean_type = type_name, "No bean of type found");

        Err(ContextError::no_bean_of_type::<T>())
    }

    /// Look up a bean by name, checking that it exposes `T`
    pub fn get_bean_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        if !self.is_type_match::<T>(name)? {
            return Err(ContextError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
                actual: self.get_type_name(name)?,
            });
        }
        self.get_bean::<T>(name)
    }

    /// Deferred by-type lookup
    pub fn get_bean_provider<T: ?Sized + Send + Sync + 'static>(&self) -> BeanProvider<T> {
        BeanProvider::new(self.weak())
    }

    /// Every local bean exposing `T`, creating them as needed
    pub fn beans_of_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<(String, Arc<T>)>> {
        self.bean_names_for_type::<T>(true)
            .into_iter()
            .map(|name| {
                let bean = self.get_bean::<T>(&name)?;
                Ok((name, bean))
            })
            .collect()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Definition registered under `name` (after alias resolution)
    pub fn bean_definition_if_present(&self, name: &str) -> Option<Arc<BeanDefinition>> {
        self.registry.get(&self.registry.canonical_name(name))
    }

    /// True if this factory or an ancestor knows the bean
    pub fn contains_bean(&self, name: &str) -> bool {
        if self.contains_local_bean(name) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.contains_bean(name))
    }

    /// True if this factory itself knows the bean
    pub fn contains_local_bean(&self, name: &str) -> bool {
        let canonical = self.registry.canonical_name(name);
        self.singletons.contains(&canonical) || self.registry.contains_bean_definition(&canonical)
    }

    pub fn is_singleton(&self, name: &str) -> Result<bool> {
        let canonical = self.registry.canonical_name(name);
        if let Some(definition) = self.registry.get(&canonical) {
            return Ok(definition.is_singleton());
        }
        if self.singletons.contains(&canonical) {
            return Ok(true);
        }
        match &self.parent {
            Some(parent) => parent.is_singleton(name),
            None => Err(ContextError::no_such_definition(name)),
        }
    }

    pub fn is_prototype(&self, name: &str) -> Result<bool> {
        let canonical = self.registry.canonical_name(name);
        if let Some(definition) = self.registry.get(&canonical) {
            return Ok(definition.is_prototype());
        }
        if self.singletons.contains(&canonical) {
            return Ok(false);
        }
        match &self.parent {
            Some(parent) => parent.is_prototype(name),
            None => Err(ContextError::no_such_definition(name)),
        }
    }

    fn local_types(&self, name: &str) -> Option<Arc<BeanTypes>> {
        let canonical = self.registry.canonical_name(name);
        if let Some(entry) = self.singletons.get(&canonical) {
            return Some(entry.types);
        }
        self.registry.get(&canonical).map(|d| Arc::clone(d.types()))
    }

    /// True if the bean can be viewed as `T`; never instantiates
    pub fn is_type_match<T: ?Sized + 'static>(&self, name: &str) -> Result<bool> {
        match self.local_types(name) {
            Some(types) => Ok(types.exposes_type::<T>()),
            None => match &self.parent {
                Some(parent) => parent.is_type_match::<T>(name),
                None => Err(ContextError::no_such_definition(name)),
            },
        }
    }

    /// Concrete type name of the bean; never instantiates
    pub fn get_type_name(&self, name: &str) -> Result<&'static str> {
        match self.local_types(name) {
            Some(types) => Ok(types.type_name()),
            None => match &self.parent {
                Some(parent) => parent.get_type_name(name),
                None => Err(ContextError::no_such_definition(name)),
            },
        }
    }

    /// Names of definitions whose metadata carries the annotation
    pub fn bean_names_for_annotation(&self, annotation: &str) -> Vec<String> {
        self.registry
            .bean_definition_names()
            .into_iter()
            .filter(|name| {
                self.registry
                    .get(name)
                    .is_some_and(|d| d.metadata().has_annotation(annotation))
            })
            .collect()
    }

    /// Beans whose metadata carries the annotation, creating them as needed
    pub fn beans_with_annotation(&self, annotation: &str) -> Result<Vec<(String, BeanInstance)>> {
        self.bean_names_for_annotation(annotation)
            .into_iter()
            .map(|name| {
                let bean = self.get_bean_any(&name)?;
                Ok((name, bean))
            })
            .collect()
    }

    /// The annotation declared on the bean's component, if any
    pub fn find_annotation_on_bean(&self, name: &str, annotation: &str) -> Result<Option<Annotation>> {
        let canonical = self.registry.canonical_name(name);
        if let Some(definition) = self.registry.get(&canonical) {
            return Ok(definition.metadata().annotation(annotation).cloned());
        }
        if self.singletons.contains(&canonical) {
            return Ok(None);
        }
        match &self.parent {
            Some(parent) => parent.find_annotation_on_bean(name, annotation),
            None => Err(ContextError::no_such_definition(name)),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create every non-lazy singleton, then notify
    /// [`SmartInitializingSingleton`] beans
    pub fn pre_instantiate_singletons(&self) -> Result<()> {
        let names = self.registry.bean_definition_names();

        #[cfg(feature = "logging")]
        debug!(
            target: "application_context",
            definitions = names.len(),
            "Pre-instantiating singletons"
        );

        for name in &names {
            let Some(definition) = self.registry.get(name) else {
                continue;
            };
            if definition.is_singleton() && !definition.is_lazy_init() {
                self.get_bean_any(name)?;
            }
        }

        for name in &names {
            if let Some(entry) = self.singletons.get(name) {
                if let Some(smart) = entry.types.view::<dyn SmartInitializingSingleton>(&entry.instance) {
                    smart
                        .after_singletons_instantiated()
                        .map_err(|e| ContextError::creation(name, e))?;
                }
            }
        }
        Ok(())
    }

    /// Destroy all singletons in reverse creation order, dependents first
    pub fn destroy_singletons(&self) {
        self.singletons.destroy_singletons();
        self.type_cache.clear();
    }

    /// Destroy one singleton (and its dependents)
    pub fn destroy_singleton(&self, name: &str) {
        self.singletons.destroy_singleton(&self.registry.canonical_name(name));
    }
}

// =============================================================================
// Registry Delegation
// =============================================================================

impl AliasRegistry for BeanFactory {
    fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        self.registry.register_alias(name, alias)
    }

    fn remove_alias(&self, alias: &str) -> Result<()> {
        self.registry.remove_alias(alias)
    }

    fn is_alias(&self, name: &str) -> bool {
        self.registry.is_alias(name)
    }

    fn aliases(&self, name: &str) -> Vec<String> {
        self.registry.aliases(name)
    }
}

impl BeanDefinitionRegistry for BeanFactory {
    fn register_bean_definition(&self, name: &str, definition: BeanDefinition) -> Result<()> {
        let replaced = self.registry.insert(name, definition)?;
        if replaced.is_some() || self.singletons.contains(name) {
            // Drop the instance built from (or registered before) the old definition
            self.singletons.destroy_singleton(name);
        }
        self.type_cache.clear();
        Ok(())
    }

    fn remove_bean_definition(&self, name: &str) -> Result<()> {
        self.registry.remove(name)?;
        self.singletons.destroy_singleton(name);
        self.type_cache.clear();
        Ok(())
    }

    fn bean_definition(&self, name: &str) -> Result<Arc<BeanDefinition>> {
        self.registry.bean_definition(name)
    }

    fn contains_bean_definition(&self, name: &str) -> bool {
        self.registry.contains_bean_definition(name)
    }

    fn bean_definition_names(&self) -> Vec<String> {
        self.registry.bean_definition_names()
    }

    fn bean_definition_count(&self) -> usize {
        self.registry.bean_definition_count()
    }

    fn is_bean_name_in_use(&self, name: &str) -> bool {
        self.registry.is_bean_name_in_use(name)
            || self.contains_local_bean(name)
            || self.singletons.has_dependents(name)
    }
}

impl fmt::Debug for BeanFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanFactory")
            .field("serialization_id", &self.serialization_id())
            .field("definitions", &self.registry.bean_definition_count())
            .field("singletons", &self.singletons.len())
            .field("frozen", &self.is_configuration_frozen())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BeanDefinitionBuilder;
    use crate::scope::SimpleScope;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Repository: Send + Sync {
        fn name(&self) -> &str;
    }

    struct SqlRepository;
    impl Repository for SqlRepository {
        fn name(&self) -> &str {
            "sql"
        }
    }

    struct MemoryRepository;
    impl Repository for MemoryRepository {
        fn name(&self) -> &str {
            "memory"
        }
    }

    struct Service {
        repo: Arc<dyn Repository>,
    }

    fn sql() -> BeanDefinition {
        BeanDefinitionBuilder::<SqlRepository>::new()
            .supplier(|_| Ok(SqlRepository))
            .view(|r| r as Arc<dyn Repository>)
            .build()
    }

    fn memory() -> BeanDefinitionBuilder<MemoryRepository> {
        BeanDefinitionBuilder::<MemoryRepository>::new()
            .supplier(|_| Ok(MemoryRepository))
            .view(|r| r as Arc<dyn Repository>)
    }

    #[test]
    fn test_singleton_is_shared() {
        let factory = BeanFactory::new();
        factory.register_bean_definition("repo", sql()).unwrap();

        let a = factory.get_bean::<SqlRepository>("repo").unwrap();
        let b = factory.get_bean::<SqlRepository>("repo").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.get_bean::<dyn Repository>("repo").unwrap().name(), "sql");
    }

    #[test]
    fn test_prototype_is_new_each_time() {
        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "counter",
                BeanDefinitionBuilder::<AtomicUsize>::new()
                    .supplier(|_| Ok(AtomicUsize::new(0)))
                    .scope(BeanScope::Prototype)
                    .build(),
            )
            .unwrap();

        let a = factory.get_bean::<AtomicUsize>("counter").unwrap();
        let b = factory.get_bean::<AtomicUsize>("counter").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(factory.is_prototype("counter").unwrap());
    }

    #[test]
    fn test_type_mismatch() {
        let factory = BeanFactory::new();
        factory.register_bean_definition("repo", sql()).unwrap();
        assert!(matches!(
            factory.get_bean::<String>("repo"),
            Err(ContextError::TypeMismatch { .. })
        ));
        assert!(matches!(
            factory.get_bean_named::<String>("repo"),
            Err(ContextError::TypeMismatch { .. })
        ));
        // the failed typed lookup did not instantiate anything
        assert!(!factory.contains_singleton("repo"));
    }

    #[test]
    fn test_by_type_with_primary() {
        let factory = BeanFactory::new();
        factory.register_bean_definition("sql", sql()).unwrap();
        factory
            .register_bean_definition("memory", memory().build())
            .unwrap();

        let err = factory.get_bean_by_type::<dyn Repository>().err().unwrap();
        assert!(matches!(err, ContextError::NoUniqueBean { ref candidates, .. } if candidates.len() == 2));

        factory
            .register_bean_definition("memory", memory().primary(true).build())
            .unwrap();
        assert_eq!(
            factory.get_bean_by_type::<dyn Repository>().unwrap().name(),
            "memory"
        );
        assert_eq!(factory.bean_names_for_type::<dyn Repository>(true), ["sql", "memory"]);
    }

    #[test]
    fn test_non_candidates_are_skipped() {
        let factory = BeanFactory::new();
        factory.register_bean_definition("sql", sql()).unwrap();
        factory
            .register_bean_definition("memory", memory().autowire_candidate(false).build())
            .unwrap();
        assert_eq!(
            factory.get_bean_by_type::<dyn Repository>().unwrap().name(),
            "sql"
        );
    }

    #[test]
    fn test_supplier_resolves_collaborators() {
        let factory = BeanFactory::new();
        factory.register_bean_definition("repo", sql()).unwrap();
        factory
            .register_bean_definition(
                "service",
                BeanDefinitionBuilder::<Service>::new()
                    .supplier(|f| {
                        Ok(Service {
                            repo: f.get_bean_by_type::<dyn Repository>()?,
                        })
                    })
                    .build(),
            )
            .unwrap();

        let service = factory.get_bean::<Service>("service").unwrap();
        assert_eq!(service.repo.name(), "sql");
        assert_eq!(factory.dependents_of("repo"), ["service"]);
        assert_eq!(factory.dependencies_of("service"), ["repo"]);
    }

    #[test]
    fn test_circular_reference_detected() {
        struct A;
        struct B;
        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "a",
                BeanDefinitionBuilder::<A>::new()
                    .supplier(|f| {
                        f.get_bean::<B>("b")?;
                        Ok(A)
                    })
                    .build(),
            )
            .unwrap();
        factory
            .register_bean_definition(
                "b",
                BeanDefinitionBuilder::<B>::new()
                    .supplier(|f| {
                        f.get_bean::<A>("a")?;
                        Ok(B)
                    })
                    .build(),
            )
            .unwrap();

        let err = factory.get_bean::<A>("a").err().unwrap();
        assert!(matches!(err.root_cause(), ContextError::CurrentlyInCreation { name } if name == "a"));
        assert_eq!(factory.singleton_count(), 0);
    }

    #[test]
    fn test_prototype_circular_reference_detected() {
        struct Loop;
        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "loop",
                BeanDefinitionBuilder::<Loop>::new()
                    .supplier(|f| {
                        f.get_bean::<Loop>("loop")?;
                        Ok(Loop)
                    })
                    .scope(BeanScope::Prototype)
                    .build(),
            )
            .unwrap();
        let err = factory.get_bean::<Loop>("loop").err().unwrap();
        assert!(matches!(err.root_cause(), ContextError::CurrentlyInCreation { .. }));
    }

    #[test]
    fn test_depends_on_initializes_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let factory = BeanFactory::new();

        let log = Arc::clone(&order);
        factory
            .register_bean_definition(
                "schema",
                BeanDefinitionBuilder::<u8>::new()
                    .supplier(move |_| {
                        log.lock().push("schema");
                        Ok(1)
                    })
                    .build(),
            )
            .unwrap();
        let log = Arc::clone(&order);
        factory
            .register_bean_definition(
                "app",
                BeanDefinitionBuilder::<u16>::new()
                    .supplier(move |_| {
                        log.lock().push("app");
                        Ok(2)
                    })
                    .depends_on("schema")
                    .build(),
            )
            .unwrap();

        factory.get_bean::<u16>("app").unwrap();
        assert_eq!(*order.lock(), ["schema", "app"]);
        assert_eq!(factory.dependents_of("schema"), ["app"]);
    }

    #[test]
    fn test_init_and_destroy_callbacks() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let factory = BeanFactory::new();

        let (on_init, on_destroy) = (Arc::clone(&events), Arc::clone(&events));
        factory
            .register_bean_definition(
                "pool",
                BeanDefinitionBuilder::<SqlRepository>::new()
                    .supplier(|_| Ok(SqlRepository))
                    .init_method("open", move |_| {
                        on_init.lock().push("open");
                        Ok(())
                    })
                    .destroy_method("close", move |_| {
                        on_destroy.lock().push("close");
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();

        factory.pre_instantiate_singletons().unwrap();
        assert_eq!(*events.lock(), ["open"]);

        factory.destroy_singletons();
        assert_eq!(*events.lock(), ["open", "close"]);
        assert_eq!(factory.singleton_count(), 0);
    }

    #[test]
    fn test_lazy_singletons_are_not_preinstantiated() {
        let factory = BeanFactory::new();
        factory
            .register_bean_definition("eager", sql())
            .unwrap();
        factory
            .register_bean_definition("lazy", memory().lazy_init(true).build())
            .unwrap();

        factory.pre_instantiate_singletons().unwrap();
        assert!(factory.contains_singleton("eager"));
        assert!(!factory.contains_singleton("lazy"));
    }

    #[test]
    fn test_parent_fallback() {
        let parent = BeanFactory::new();
        parent.register_bean_definition("repo", sql()).unwrap();
        let child = BeanFactory::with_parent(Arc::clone(&parent));

        assert!(child.contains_bean("repo"));
        assert!(!child.contains_local_bean("repo"));
        assert_eq!(child.get_bean::<dyn Repository>("repo").unwrap().name(), "sql");
        assert_eq!(child.get_bean_by_type::<dyn Repository>().unwrap().name(), "sql");
        assert!(child.is_type_match::<dyn Repository>("repo").unwrap());
    }

    #[test]
    fn test_manual_singletons_participate_in_type_lookup() {
        let factory = BeanFactory::new();
        factory
            .register_singleton("greeting", Arc::new(String::from("hi")))
            .unwrap();

        assert_eq!(*factory.get_bean_by_type::<String>().unwrap(), "hi");
        assert!(factory.is_singleton("greeting").unwrap());
        assert!(factory
            .register_singleton("greeting", Arc::new(String::from("again")))
            .is_err());
    }

    #[test]
    fn test_resolvable_dependency() {
        let factory = BeanFactory::new();
        factory.register_resolvable_dependency::<dyn Repository>(Arc::new(MemoryRepository));
        assert_eq!(
            factory.get_bean_by_type::<dyn Repository>().unwrap().name(),
            "memory"
        );
        assert!(factory.bean_names_for_type::<dyn Repository>(true).is_empty());
    }

    #[test]
    fn test_custom_scope() {
        let factory = BeanFactory::new();
        let scope = Arc::new(SimpleScope::new());
        factory.register_scope("request", scope.clone()).unwrap();
        assert!(factory.register_scope("singleton", scope.clone()).is_err());

        factory
            .register_bean_definition(
                "ctx",
                BeanDefinitionBuilder::<AtomicUsize>::new()
                    .supplier(|_| Ok(AtomicUsize::new(0)))
                    .scope(BeanScope::Custom("request".into()))
                    .build(),
            )
            .unwrap();

        let a = factory.get_bean::<AtomicUsize>("ctx").unwrap();
        let b = factory.get_bean::<AtomicUsize>("ctx").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        scope.reset();
        let c = factory.get_bean::<AtomicUsize>("ctx").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_unknown_scope() {
        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "ctx",
                BeanDefinitionBuilder::<u8>::new()
                    .supplier(|_| Ok(0))
                    .scope(BeanScope::Custom("session".into()))
                    .build(),
            )
            .unwrap();
        assert!(matches!(
            factory.get_bean::<u8>("ctx"),
            Err(ContextError::NoSuchScope { .. })
        ));
    }

    #[test]
    fn test_override_replaces_singleton() {
        let factory = BeanFactory::new();
        factory.register_bean_definition("repo", sql()).unwrap();
        assert_eq!(factory.get_bean::<dyn Repository>("repo").unwrap().name(), "sql");

        factory
            .register_bean_definition("repo", memory().build())
            .unwrap();
        assert_eq!(factory.get_bean::<dyn Repository>("repo").unwrap().name(), "memory");
        assert_eq!(factory.bean_definition_count(), 1);
    }

    #[test]
    fn test_aliases_resolve() {
        let factory = BeanFactory::new();
        factory.register_bean_definition("repo", sql()).unwrap();
        factory.register_alias("repo", "repository").unwrap();

        let a = factory.get_bean::<SqlRepository>("repository").unwrap();
        let b = factory.get_bean::<SqlRepository>("repo").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(factory.is_bean_name_in_use("repository"));
        assert_eq!(factory.aliases("repo"), ["repository"]);
    }

    #[test]
    fn test_bean_args_for_prototypes() {
        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "greeting",
                BeanDefinitionBuilder::<String>::new()
                    .supplier_with_args(|_, args| Ok(format!("hello {}", args.get::<String>(0)?)))
                    .scope(BeanScope::Prototype)
                    .build(),
            )
            .unwrap();

        let args = BeanArgs::new().with(String::from("bob"));
        assert_eq!(
            *factory.get_bean_with_args::<String>("greeting", &args).unwrap(),
            "hello bob"
        );
    }

    #[test]
    fn test_resolve_value_with_embedded_resolver() {
        let factory = BeanFactory::new();
        factory.add_embedded_value_resolver(Arc::new(|s: &str| Ok::<_, ContextError>(s.replace("${port}", "8080"))));
        assert_eq!(factory.resolve_value::<u16>("${port}").unwrap(), 8080);
        assert!(factory.resolve_value::<u16>("nope").is_err());
    }

    #[test]
    fn test_reset_for_retry_keeps_configuration_from_before_the_attempt() {
        struct Passthrough;
        impl BeanPostProcessor for Passthrough {}

        let factory = BeanFactory::new();
        factory.add_bean_post_processor(Arc::new(Passthrough));
        factory.add_embedded_value_resolver(Arc::new(|s: &str| Ok::<_, ContextError>(s.replace("${port}", "8080"))));

        factory.mark_refresh_start();
        factory.add_bean_post_processor(Arc::new(Passthrough));
        factory.add_embedded_value_resolver(Arc::new(|s: &str| Ok::<_, ContextError>(s.to_string())));
        factory.freeze_configuration();
        factory.reset_for_retry();

        assert_eq!(factory.bean_post_processor_count(), 1);
        assert_eq!(factory.embedded_value_resolver_count(), 1);
        assert_eq!(factory.resolve_value::<u16>("${port}").unwrap(), 8080);
        assert!(factory.register_bean_definition("repo", sql()).is_ok());
    }

    #[test]
    fn test_frozen_factory_rejects_definitions() {
        let factory = BeanFactory::new();
        factory.register_bean_definition("repo", sql()).unwrap();
        factory.freeze_configuration();
        assert!(matches!(
            factory.register_bean_definition("other", memory().build()),
            Err(ContextError::ConfigurationFrozen { .. })
        ));
        // cached type lookup stays correct
        assert_eq!(factory.bean_names_for_type::<dyn Repository>(true), ["repo"]);
        assert_eq!(factory.bean_names_for_type::<dyn Repository>(true), ["repo"]);
    }

    #[test]
    fn test_smart_initializing_singleton() {
        struct Warmup(AtomicUsize);
        impl SmartInitializingSingleton for Warmup {
            fn after_singletons_instantiated(&self) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "warmup",
                BeanDefinitionBuilder::<Warmup>::new()
                    .supplier(|_| Ok(Warmup(AtomicUsize::new(0))))
                    .view(|w| w as Arc<dyn SmartInitializingSingleton>)
                    .build(),
            )
            .unwrap();

        factory.pre_instantiate_singletons().unwrap();
        assert_eq!(factory.get_bean::<Warmup>("warmup").unwrap().0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_annotation_queries() {
        use crate::metadata::{names, AnnotationMetadata};

        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "repo",
                BeanDefinitionBuilder::<SqlRepository>::new()
                    .supplier(|_| Ok(SqlRepository))
                    .metadata(AnnotationMetadata::new().with(Annotation::with_value(names::QUALIFIER, "main")))
                    .build(),
            )
            .unwrap();
        factory.register_bean_definition("other", memory().build()).unwrap();

        assert_eq!(factory.bean_names_for_annotation(names::QUALIFIER), ["repo"]);
        assert_eq!(factory.beans_with_annotation(names::QUALIFIER).unwrap().len(), 1);
        assert_eq!(
            factory
                .find_annotation_on_bean("repo", names::QUALIFIER)
                .unwrap()
                .and_then(|a| a.value().map(String::from)),
            Some("main".to_string())
        );
        assert!(factory.find_annotation_on_bean("missing", names::QUALIFIER).is_err());
    }
}
