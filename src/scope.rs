//! Bean scopes
//!
//! Built-in scopes (`singleton`, `prototype`), the [`Scope`] trait for
//! custom scopes, scope metadata resolution for the annotated reader and
//! scoped proxies.

use crate::container::BeanFactory;
use crate::definition::{BeanDefinition, BeanDefinitionBuilder};
use crate::error::{ContextError, Result};
use crate::factory::BeanInstance;
use crate::metadata::names;
use crate::Injectable;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::debug;

/// Name of the shared-instance scope
pub const SCOPE_SINGLETON: &str = "singleton";

/// Name of the new-instance-per-lookup scope
pub const SCOPE_PROTOTYPE: &str = "prototype";

/// Prefix of the bean name under which a scoped-proxy target is registered
pub const SCOPED_TARGET_PREFIX: &str = "scopedTarget.";

/// Attribute of the `scope` annotation carrying the proxy mode
pub const PROXY_MODE_ATTRIBUTE: &str = "proxy_mode";

// =============================================================================
// Bean Scope
// =============================================================================

/// Scope of a bean definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum BeanScope {
    /// One shared instance per factory
    #[default]
    Singleton,
    /// A new instance on every lookup
    Prototype,
    /// Delegated to a registered [`Scope`]
    Custom(String),
}

impl BeanScope {
    /// Parse a scope name; the empty string means singleton
    pub fn from_name(name: &str) -> Self {
        match name {
            "" | SCOPE_SINGLETON => Self::Singleton,
            SCOPE_PROTOTYPE => Self::Prototype,
            other => Self::Custom(other.to_string()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        match self {
            Self::Singleton => SCOPE_SINGLETON,
            Self::Prototype => SCOPE_PROTOTYPE,
            Self::Custom(name) => name,
        }
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::Singleton)
    }

    #[inline]
    pub fn is_prototype(&self) -> bool {
        matches!(self, Self::Prototype)
    }
}

impl fmt::Display for BeanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Scope Metadata
// =============================================================================

/// Whether and how a scoped bean is fronted by a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScopedProxyMode {
    /// Use the resolver's default
    Default,
    /// No proxy
    #[default]
    No,
    /// Proxy exposing the bean's interfaces
    Interfaces,
    /// Proxy standing in for the concrete type
    TargetClass,
}

impl ScopedProxyMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::Default),
            "no" => Some(Self::No),
            "interfaces" => Some(Self::Interfaces),
            "target_class" => Some(Self::TargetClass),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::No => "no",
            Self::Interfaces => "interfaces",
            Self::TargetClass => "target_class",
        }
    }
}

/// Resolved scope name and proxy mode of a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeMetadata {
    scope_name: String,
    scoped_proxy_mode: ScopedProxyMode,
}

impl ScopeMetadata {
    pub fn new(scope_name: impl Into<String>, scoped_proxy_mode: ScopedProxyMode) -> Self {
        Self {
            scope_name: scope_name.into(),
            scoped_proxy_mode,
        }
    }

    #[inline]
    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    #[inline]
    pub fn scoped_proxy_mode(&self) -> ScopedProxyMode {
        self.scoped_proxy_mode
    }

    pub fn set_scope_name(&mut self, scope_name: impl Into<String>) {
        self.scope_name = scope_name.into();
    }

    pub fn set_scoped_proxy_mode(&mut self, mode: ScopedProxyMode) {
        self.scoped_proxy_mode = mode;
    }
}

impl Default for ScopeMetadata {
    fn default() -> Self {
        Self::new(SCOPE_SINGLETON, ScopedProxyMode::No)
    }
}

/// Strategy deciding the scope of a candidate definition
pub trait ScopeMetadataResolver: Send + Sync {
    fn resolve_scope_metadata(&self, definition: &BeanDefinition) -> ScopeMetadata;
}

/// Reads the `scope` annotation of the component metadata
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationScopeMetadataResolver {
    default_proxy_mode: ScopedProxyMode,
}

impl AnnotationScopeMetadataResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Proxy mode applied when a component asks for `Default`
    pub fn with_default_proxy_mode(default_proxy_mode: ScopedProxyMode) -> Self {
        Self { default_proxy_mode }
    }
}

impl ScopeMetadataResolver for AnnotationScopeMetadataResolver {
    fn resolve_scope_metadata(&self, definition: &BeanDefinition) -> ScopeMetadata {
        let Some(annotation) = definition.metadata().annotation(names::SCOPE) else {
            // Programmatic definitions keep the scope they were built with
            return ScopeMetadata::new(definition.scope().name(), ScopedProxyMode::No);
        };
        let scope_name = annotation.value().unwrap_or(SCOPE_SINGLETON);
        let mut mode = annotation
            .get(PROXY_MODE_ATTRIBUTE)
            .and_then(ScopedProxyMode::from_name)
            .unwrap_or(ScopedProxyMode::Default);
        if mode == ScopedProxyMode::Default {
            mode = self.default_proxy_mode;
        }
        if mode == ScopedProxyMode::Default {
            mode = ScopedProxyMode::No;
        }
        ScopeMetadata::new(scope_name, mode)
    }
}

// =============================================================================
// Custom Scopes
// =============================================================================

/// Callback run when a scope discards a bean
pub type DestructionCallback = Box<dyn FnOnce() + Send>;

/// A custom scope such as request or session
pub trait Scope: Send + Sync {
    /// Return the scoped instance, creating it with `create` if absent
    fn get(&self, name: &str, create: &mut dyn FnMut() -> Result<BeanInstance>) -> Result<BeanInstance>;

    /// Remove the named instance without running its destruction callback
    fn remove(&self, name: &str) -> Option<BeanInstance>;

    /// Run `callback` when the scope discards the named instance
    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback);

    /// Identifier of the current underlying conversation, if any
    fn conversation_id(&self) -> Option<String> {
        None
    }
}

/// Unique scope generation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// In-memory scope whose contents live until [`SimpleScope::reset`].
///
/// Useful for request-like units of work: register it under a name, let
/// definitions use that scope, and reset it when the unit of work ends.
pub struct SimpleScope {
    generation: AtomicU64,
    objects: DashMap<String, BeanInstance, RandomState>,
    callbacks: Mutex<Vec<(String, DestructionCallback)>>,
}

impl SimpleScope {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(ScopeId::new().id()),
            objects: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Current generation; changes on every reset
    #[inline]
    pub fn generation(&self) -> ScopeId {
        ScopeId(self.generation.load(Ordering::Acquire))
    }

    /// Number of live instances
    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Discard every instance, running destruction callbacks in reverse
    /// registration order
    pub fn reset(&self) {
        let callbacks = std::mem::take(&mut *self.callbacks.lock());

        #[cfg(feature = "logging")]
        debug!(
            target: "application_context",
            scope = %self.generation(),
            instances = self.objects.len(),
            callbacks = callbacks.len(),
            "Resetting scope"
        );

        self.objects.clear();
        for (_, callback) in callbacks.into_iter().rev() {
            callback();
        }
        self.generation.store(ScopeId::new().id(), Ordering::Release);
    }
}

impl Default for SimpleScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope for SimpleScope {
    fn get(&self, name: &str, create: &mut dyn FnMut() -> Result<BeanInstance>) -> Result<BeanInstance> {
        if let Some(existing) = self.objects.get(name) {
            return Ok(Arc::clone(existing.value()));
        }
        // Created outside the map guard: the supplier may look up other
        // beans of this scope
        let created = create()?;
        Ok(Arc::clone(
            self.objects.entry(name.to_string()).or_insert(created).value(),
        ))
    }

    fn remove(&self, name: &str) -> Option<BeanInstance> {
        self.callbacks.lock().retain(|(n, _)| n != name);
        self.objects.remove(name).map(|(_, v)| v)
    }

    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback) {
        self.callbacks.lock().push((name.to_string(), callback));
    }

    fn conversation_id(&self) -> Option<String> {
        Some(self.generation().to_string())
    }
}

// =============================================================================
// Scoped Proxies
// =============================================================================

/// Name under which the target of a scoped proxy is registered
#[inline]
pub fn scoped_target_name(name: &str) -> String {
    format!("{SCOPED_TARGET_PREFIX}{name}")
}

/// True for names produced by [`scoped_target_name`]
#[inline]
pub fn is_scoped_target(name: &str) -> bool {
    name.starts_with(SCOPED_TARGET_PREFIX)
}

/// Singleton stand-in for a scoped bean.
///
/// Each [`ScopedProxy::get`] goes back to the factory, so callers always see
/// the instance of the scope that is current at call time.
pub struct ScopedProxy<T: ?Sized> {
    factory: Weak<BeanFactory>,
    target_name: String,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ScopedProxy<T> {
    pub fn new(factory: Weak<BeanFactory>, target_name: impl Into<String>) -> Self {
        Self {
            factory,
            target_name: target_name.into(),
            _marker: PhantomData,
        }
    }

    /// Bean name of the proxied target
    #[inline]
    pub fn target_bean_name(&self) -> &str {
        &self.target_name
    }

    /// The target instance for the current scope
    pub fn get(&self) -> Result<Arc<T>> {
        let factory = self.factory.upgrade().ok_or(ContextError::FactoryDropped)?;
        factory.get_bean::<T>(&self.target_name)
    }
}

impl<T: ?Sized> fmt::Debug for ScopedProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedProxy")
            .field("target", &self.target_name)
            .finish()
    }
}

/// Split a scoped definition into a hidden target and a singleton proxy.
///
/// Returns `[(target_name, target), (name, proxy)]`. The target stops being
/// an autowire candidate and loses its primary flag; the proxy takes both
/// over together with the qualifiers.
pub fn create_scoped_proxy<T: Injectable>(
    name: &str,
    mut target: BeanDefinition,
) -> [(String, BeanDefinition); 2] {
    let target_name = scoped_target_name(name);
    let lookup_name = target_name.clone();

    let mut proxy = BeanDefinitionBuilder::<ScopedProxy<T>>::new()
        .supplier(move |factory| Ok(ScopedProxy::<T>::new(factory.weak(), lookup_name.clone())))
        .primary(target.is_primary())
        .autowire_candidate(target.is_autowire_candidate())
        .role(target.role())
        .build();
    for qualifier in target.qualifiers() {
        proxy.add_qualifier(qualifier.clone());
    }
    proxy.set_metadata(target.metadata().clone());

    target.set_autowire_candidate(false);
    target.set_primary(false);

    [(target_name, target), (name.to_string(), proxy)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Annotation, AnnotationMetadata};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_bean_scope_names() {
        assert_eq!(BeanScope::from_name(""), BeanScope::Singleton);
        assert_eq!(BeanScope::from_name("prototype"), BeanScope::Prototype);
        assert_eq!(
            BeanScope::from_name("request"),
            BeanScope::Custom("request".into())
        );
        assert_eq!(BeanScope::Custom("session".into()).to_string(), "session");
    }

    #[test]
    fn test_scope_metadata_defaults() {
        let metadata = ScopeMetadata::default();
        assert_eq!(metadata.scope_name(), "singleton");
        assert_eq!(metadata.scoped_proxy_mode(), ScopedProxyMode::No);
    }

    #[test]
    fn test_resolver_reads_annotation() {
        let mut definition = BeanDefinitionBuilder::<u8>::new().supplier(|_| Ok(1)).build();
        definition.set_metadata(AnnotationMetadata::new().with(
            Annotation::with_value(names::SCOPE, "request").attribute(PROXY_MODE_ATTRIBUTE, "default"),
        ));

        let plain = AnnotationScopeMetadataResolver::new().resolve_scope_metadata(&definition);
        assert_eq!(plain.scope_name(), "request");
        assert_eq!(plain.scoped_proxy_mode(), ScopedProxyMode::No);

        let proxied =
            AnnotationScopeMetadataResolver::with_default_proxy_mode(ScopedProxyMode::TargetClass)
                .resolve_scope_metadata(&definition);
        assert_eq!(proxied.scoped_proxy_mode(), ScopedProxyMode::TargetClass);
    }

    #[test]
    fn test_simple_scope_reset() {
        let scope = SimpleScope::new();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let generation = scope.generation();

        let first = scope.get("a", &mut || Ok(Arc::new(1u32) as BeanInstance)).unwrap();
        let again = scope.get("a", &mut || Ok(Arc::new(2u32) as BeanInstance)).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let counter = Arc::clone(&destroyed);
        scope.register_destruction_callback(
            "a",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        scope.reset();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(scope.is_empty());
        assert_ne!(scope.generation(), generation);

        let fresh = scope.get("a", &mut || Ok(Arc::new(3u32) as BeanInstance)).unwrap();
        assert_eq!(fresh.downcast_ref::<u32>(), Some(&3));
    }

    #[test]
    fn test_scoped_proxy_definitions() {
        let target = BeanDefinitionBuilder::<u8>::new()
            .supplier(|_| Ok(1))
            .primary(true)
            .qualifier("fast")
            .build();
        let [(target_name, target), (name, proxy)] = create_scoped_proxy::<u8>("counter", target);

        assert_eq!(target_name, "scopedTarget.counter");
        assert!(is_scoped_target(&target_name));
        assert_eq!(name, "counter");
        assert!(!target.is_autowire_candidate());
        assert!(!target.is_primary());
        assert!(proxy.is_primary());
        assert!(proxy.has_qualifier("fast"));
        assert!(proxy.types().exposes_type::<ScopedProxy<u8>>());
    }
}
