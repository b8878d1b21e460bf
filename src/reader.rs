//! Annotated bean definition reader
//!
//! Turns [`Component`] types into registered bean definitions. For each
//! component the reader evaluates its conditions, applies its scope and
//! common annotations, derives a bean name and hands the result to the
//! registry, wrapping it in a scoped proxy when the scope asks for one.
//!
//! ```rust
//! use application_context::component::Component;
//! use application_context::reader::AnnotatedBeanDefinitionReader;
//! use application_context::{BeanDefinitionRegistry, BeanFactory, Environment, Result};
//! use std::sync::Arc;
//!
//! struct UserRepository;
//!
//! impl Component for UserRepository {
//!     type Dependencies = ();
//!     fn create(_: ()) -> Result<Self> { Ok(UserRepository) }
//! }
//!
//! let factory = BeanFactory::new();
//! let reader = AnnotatedBeanDefinitionReader::new(factory.clone(), Arc::new(Environment::empty()));
//! let name = reader.register::<UserRepository>().unwrap();
//! assert_eq!(name.as_deref(), Some("userRepository"));
//! assert!(factory.contains_bean_definition("userRepository"));
//! ```

use crate::cache::IntrospectionCache;
use crate::component::{Component, component_definition};
use crate::condition::{Condition, ConditionEvaluator};
use crate::container::BeanFactory;
use crate::definition::{BeanDefinition, BeanDefinitionBuilder, BeanRole};
use crate::environment::Environment;
use crate::error::Result;
use crate::metadata::{AnnotationMetadata, names};
use crate::registry::BeanDefinitionRegistry;
use crate::scope::{
    AnnotationScopeMetadataResolver, BeanScope, ScopeMetadataResolver, ScopedProxyMode, create_scoped_proxy,
};
use crate::Injectable;
use parking_lot::RwLock;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use crate::component::Resolvable;
#[cfg(feature = "logging")]
use tracing::debug;

/// Qualifier that marks the definition primary instead
pub const PRIMARY_QUALIFIER: &str = "primary";

/// Qualifier that marks the definition lazy instead
pub const LAZY_QUALIFIER: &str = "lazy";

/// Adjusts a definition right before it is registered
pub type BeanDefinitionCustomizer<'a> = &'a dyn Fn(&mut BeanDefinition);

// =============================================================================
// Bean Name Generation
// =============================================================================

/// Strategy deriving a bean name from a definition
pub trait BeanNameGenerator: Send + Sync {
    fn generate_bean_name(&self, definition: &BeanDefinition, registry: &dyn BeanDefinitionRegistry) -> String;
}

/// Explicit component name, else the decapitalized short type name
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationBeanNameGenerator;

impl AnnotationBeanNameGenerator {
    /// Name from the `component` annotation, if one is given
    pub fn explicit_name(metadata: &AnnotationMetadata) -> Option<&str> {
        metadata
            .value_of(names::COMPONENT)
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    fn type_name(definition: &BeanDefinition) -> &'static str {
        definition.metadata().type_name().unwrap_or_else(|| definition.type_name())
    }
}

impl BeanNameGenerator for AnnotationBeanNameGenerator {
    fn generate_bean_name(&self, definition: &BeanDefinition, _registry: &dyn BeanDefinitionRegistry) -> String {
        if let Some(name) = Self::explicit_name(definition.metadata()) {
            return name.to_string();
        }
        decapitalize(short_type_name(Self::type_name(definition)))
    }
}

/// Explicit component name, else the full type path
#[derive(Debug, Clone, Copy, Default)]
pub struct FullyQualifiedAnnotationBeanNameGenerator;

impl BeanNameGenerator for FullyQualifiedAnnotationBeanNameGenerator {
    fn generate_bean_name(&self, definition: &BeanDefinition, _registry: &dyn BeanDefinitionRegistry) -> String {
        if let Some(name) = AnnotationBeanNameGenerator::explicit_name(definition.metadata()) {
            return name.to_string();
        }
        AnnotationBeanNameGenerator::type_name(definition).to_string()
    }
}

/// Last path segment of a type name, without generic arguments
pub fn short_type_name(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

/// Lowercase the first character unless the first two are uppercase
pub fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) if first.is_uppercase() && second.is_uppercase() => name.to_string(),
        (Some(first), _) => {
            let mut result: String = first.to_lowercase().collect();
            result.push_str(&name[first.len_utf8()..]);
            result
        }
        (None, _) => String::new(),
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Registers components as bean definitions
pub struct AnnotatedBeanDefinitionReader {
    factory: Arc<BeanFactory>,
    environment: Arc<Environment>,
    name_generator: RwLock<Arc<dyn BeanNameGenerator>>,
    scope_resolver: RwLock<Arc<dyn ScopeMetadataResolver>>,
    cache: Arc<IntrospectionCache>,
}

impl AnnotatedBeanDefinitionReader {
    pub fn new(factory: Arc<BeanFactory>, environment: Arc<Environment>) -> Self {
        Self::with_cache(factory, environment, IntrospectionCache::shared())
    }

    pub fn with_cache(factory: Arc<BeanFactory>, environment: Arc<Environment>, cache: Arc<IntrospectionCache>) -> Self {
        Self {
            factory,
            environment,
            name_generator: RwLock::new(Arc::new(AnnotationBeanNameGenerator)),
            scope_resolver: RwLock::new(Arc::new(AnnotationScopeMetadataResolver::new())),
            cache,
        }
    }

    #[inline]
    pub fn factory(&self) -> &Arc<BeanFactory> {
        &self.factory
    }

    #[inline]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn set_bean_name_generator(&self, generator: Arc<dyn BeanNameGenerator>) {
        *self.name_generator.write() = generator;
    }

    pub fn set_scope_metadata_resolver(&self, resolver: Arc<dyn ScopeMetadataResolver>) {
        *self.scope_resolver.write() = resolver;
    }

    /// Register a component under its generated name.
    ///
    /// Returns the bean name, or `None` when a condition skipped it.
    pub fn register<C: Component>(&self) -> Result<Option<String>> {
        self.register_bean::<C>(None, &[], &[])
    }

    /// Register a component under an explicit name
    pub fn register_named<C: Component>(&self, name: &str) -> Result<Option<String>> {
        self.register_bean::<C>(Some(name), &[], &[])
    }

    /// Register a component with extra qualifiers; `primary` and `lazy`
    /// set the matching flags instead
    pub fn register_with_qualifiers<C: Component>(&self, qualifiers: &[&str]) -> Result<Option<String>> {
        self.register_bean::<C>(None, qualifiers, &[])
    }

    /// Register any type with an explicit supplier instead of a component
    /// constructor
    pub fn register_with_supplier<T, F>(&self, name: Option<&str>, supplier: F) -> Result<Option<String>>
    where
        T: Injectable,
        F: Fn(&BeanFactory) -> Result<T> + Send + Sync + 'static,
    {
        let definition = BeanDefinitionBuilder::<T>::new().supplier(supplier).build();
        let metadata = self
            .cache
            .metadata_for(TypeId::of::<T>(), AnnotationMetadata::for_type::<T>);
        self.do_register::<T>(definition, metadata, &[], name, &[], &[])
    }

    /// Register a component with every option
    pub fn register_bean<C: Component>(
        &self,
        name: Option<&str>,
        qualifiers: &[&str],
        customizers: &[BeanDefinitionCustomizer<'_>],
    ) -> Result<Option<String>> {
        let metadata = self.cache.metadata_for(TypeId::of::<C>(), C::metadata);

        #[cfg(feature = "logging")]
        debug!(
            target: "application_context",
            component = std::any::type_name::<C>(),
            dependencies = ?<C::Dependencies as Resolvable>::dependency_names(),
            "Reading component"
        );

        self.do_register::<C>(
            component_definition::<C>(),
            metadata,
            &C::conditions(),
            name,
            qualifiers,
            customizers,
        )
    }

    fn do_register<T: Injectable>(
        &self,
        mut definition: BeanDefinition,
        metadata: Arc<AnnotationMetadata>,
        conditions: &[Arc<dyn Condition>],
        name: Option<&str>,
        qualifiers: &[&str],
        customizers: &[BeanDefinitionCustomizer<'_>],
    ) -> Result<Option<String>> {
        let evaluator = ConditionEvaluator::new(&self.factory, &self.environment);
        if evaluator.should_skip(&metadata, conditions) {
            #[cfg(feature = "logging")]
            debug!(
                target: "application_context",
                component = std::any::type_name::<T>(),
                "Skipping component: conditions did not match"
            );
            return Ok(None);
        }
        definition.set_shared_metadata(metadata);

        let scope_metadata = self.scope_resolver.read().resolve_scope_metadata(&definition);
        definition.set_scope(BeanScope::from_name(scope_metadata.scope_name()));

        let name = match name {
            Some(name) => name.to_string(),
            None => self
                .name_generator
                .read()
                .generate_bean_name(&definition, self.factory.as_ref()),
        };

        apply_common_annotations(&mut definition);
        for qualifier in qualifiers {
            match *qualifier {
                PRIMARY_QUALIFIER => definition.set_primary(true),
                LAZY_QUALIFIER => definition.set_lazy_init(true),
                other => definition.add_qualifier(other),
            }
        }
        for customize in customizers {
            customize(&mut definition);
        }

        let registrations: Vec<(String, BeanDefinition)> = match scope_metadata.scoped_proxy_mode() {
            ScopedProxyMode::No | ScopedProxyMode::Default => vec![(name.clone(), definition)],
            _ => create_scoped_proxy::<T>(&name, definition).into_iter().collect(),
        };

        if registrations.iter().all(|(n, d)| self.is_registered_equivalent(n, d)) {
            #[cfg(feature = "logging")]
            debug!(target: "application_context", bean = %name, "Equivalent definition already registered");
            return Ok(Some(name));
        }

        for (bean_name, bean_definition) in registrations {
            self.factory.register_bean_definition(&bean_name, bean_definition)?;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "application_context",
            bean = %name,
            scope = %scope_metadata.scope_name(),
            proxy = scope_metadata.scoped_proxy_mode().as_str(),
            "Registered annotated bean definition"
        );

        Ok(Some(name))
    }

    fn is_registered_equivalent(&self, name: &str, definition: &BeanDefinition) -> bool {
        self.factory
            .bean_definition_if_present(name)
            .is_some_and(|existing| existing.is_equivalent(definition))
    }
}

impl fmt::Debug for AnnotatedBeanDefinitionReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotatedBeanDefinitionReader")
            .field("factory", &self.factory)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Copy lazy, primary, depends-on, role, description and qualifier
/// annotations onto the definition
pub fn apply_common_annotations(definition: &mut BeanDefinition) {
    let metadata = definition.metadata().clone();

    if let Some(lazy) = metadata.annotation(names::LAZY) {
        definition.set_lazy_init(lazy.value().is_none_or(|v| !v.eq_ignore_ascii_case("false")));
    }
    if metadata.has_annotation(names::PRIMARY) {
        definition.set_primary(true);
    }
    for depends_on in metadata.annotations_named(names::DEPENDS_ON) {
        for name in depends_on.value().unwrap_or_default().split(',').map(str::trim) {
            if !name.is_empty() {
                definition.add_depends_on(name);
            }
        }
    }
    if let Some(role) = metadata.value_of(names::ROLE).and_then(BeanRole::from_name) {
        definition.set_role(role);
    }
    if let Some(description) = metadata.value_of(names::DESCRIPTION) {
        definition.set_description(description);
    }
    for qualifier in metadata.annotations_named(names::QUALIFIER) {
        if let Some(value) = qualifier.value() {
            definition.add_qualifier(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{OnMissingBean, OnProperty};
    use crate::environment::MapPropertySource;
    use crate::metadata::Annotation;
    use crate::scope::{PROXY_MODE_ATTRIBUTE, ScopedProxy, SimpleScope, scoped_target_name};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reader() -> AnnotatedBeanDefinitionReader {
        AnnotatedBeanDefinitionReader::with_cache(
            BeanFactory::new(),
            Arc::new(Environment::empty()),
            Arc::new(IntrospectionCache::new()),
        )
    }

    struct UserRepository;

    impl Component for UserRepository {
        type Dependencies = ();

        fn create(_: ()) -> Result<Self> {
            Ok(UserRepository)
        }
    }

    struct Mailer;

    impl Component for Mailer {
        type Dependencies = ();

        fn create(_: ()) -> Result<Self> {
            Ok(Mailer)
        }

        fn metadata() -> AnnotationMetadata {
            AnnotationMetadata::for_type::<Self>()
                .with(Annotation::with_value(names::COMPONENT, "mailService"))
                .with(Annotation::new(names::LAZY))
                .with(Annotation::new(names::PRIMARY))
                .with(Annotation::with_value(names::DEPENDS_ON, "userRepository, clock"))
                .with(Annotation::with_value(names::ROLE, "support"))
                .with(Annotation::with_value(names::DESCRIPTION, "Sends mail"))
                .with(Annotation::with_value(names::QUALIFIER, "smtp"))
        }
    }

    #[test]
    fn test_name_generation() {
        assert_eq!(short_type_name("app::repo::UserRepository"), "UserRepository");
        assert_eq!(short_type_name("app::Wrapper<app::Inner>"), "Wrapper");
        assert_eq!(decapitalize("UserRepository"), "userRepository");
        assert_eq!(decapitalize("URLParser"), "URLParser");
        assert_eq!(decapitalize("A"), "a");
        assert_eq!(decapitalize(""), "");

        let reader = reader();
        let definition = component_definition::<UserRepository>();
        let full = FullyQualifiedAnnotationBeanNameGenerator.generate_bean_name(&definition, reader.factory().as_ref());
        assert!(full.ends_with("::UserRepository"));
    }

    #[test]
    fn test_register_twice_is_idempotent() {
        let reader = reader();
        reader.factory().set_allow_definition_overriding(false);

        assert_eq!(reader.register::<UserRepository>().unwrap().as_deref(), Some("userRepository"));
        assert_eq!(reader.register::<UserRepository>().unwrap().as_deref(), Some("userRepository"));
        assert_eq!(reader.factory().bean_definition_count(), 1);
    }

    #[test]
    fn test_common_annotations() {
        let reader = reader();
        let name = reader.register::<Mailer>().unwrap().unwrap();
        assert_eq!(name, "mailService");

        let definition = reader.factory().bean_definition("mailService").unwrap();
        assert!(definition.is_lazy_init());
        assert!(definition.is_primary());
        assert_eq!(definition.depends_on(), ["userRepository", "clock"]);
        assert_eq!(definition.role(), BeanRole::Support);
        assert_eq!(definition.description(), Some("Sends mail"));
        assert!(definition.has_qualifier("smtp"));
    }

    #[test]
    fn test_explicit_name_and_qualifiers() {
        let reader = reader();
        reader
            .register_bean::<UserRepository>(Some("users"), &["primary", "lazy", "readonly"], &[])
            .unwrap();

        let definition = reader.factory().bean_definition("users").unwrap();
        assert!(definition.is_primary());
        assert!(definition.is_lazy_init());
        assert!(definition.has_qualifier("readonly"));
        assert!(!definition.has_qualifier("primary"));
    }

    #[test]
    fn test_customizers_run_last() {
        let reader = reader();
        let describe = |d: &mut BeanDefinition| d.set_description("customized");
        reader
            .register_bean::<UserRepository>(None, &[], &[&describe])
            .unwrap();
        assert_eq!(
            reader.factory().bean_definition("userRepository").unwrap().description(),
            Some("customized")
        );
    }

    struct Cache;

    impl Component for Cache {
        type Dependencies = ();

        fn create(_: ()) -> Result<Self> {
            Ok(Cache)
        }

        fn conditions() -> Vec<Arc<dyn Condition>> {
            vec![
                Arc::new(OnProperty::new("cache.enabled")),
                Arc::new(OnMissingBean::named("cache")),
            ]
        }
    }

    #[test]
    fn test_failing_condition_skips_silently() {
        let reader = reader();
        assert_eq!(reader.register::<Cache>().unwrap(), None);
        assert_eq!(reader.factory().bean_definition_count(), 0);

        reader
            .environment()
            .add_first(Arc::new(MapPropertySource::new("test", [("cache.enabled", "true")])));
        assert_eq!(reader.register::<Cache>().unwrap().as_deref(), Some("cache"));
    }

    struct DevOnly;

    impl Component for DevOnly {
        type Dependencies = ();

        fn create(_: ()) -> Result<Self> {
            Ok(DevOnly)
        }

        fn metadata() -> AnnotationMetadata {
            AnnotationMetadata::for_type::<Self>().with(Annotation::with_value(names::PROFILE, "dev"))
        }
    }

    #[test]
    fn test_profile_annotation() {
        let reader = reader();
        assert_eq!(reader.register::<DevOnly>().unwrap(), None);
        reader.environment().set_active_profiles(["dev"]);
        assert!(reader.register::<DevOnly>().unwrap().is_some());
    }

    static SESSIONS: AtomicUsize = AtomicUsize::new(0);

    struct ShoppingCart(usize);

    impl Component for ShoppingCart {
        type Dependencies = ();

        fn create(_: ()) -> Result<Self> {
            Ok(ShoppingCart(SESSIONS.fetch_add(1, Ordering::SeqCst)))
        }

        fn metadata() -> AnnotationMetadata {
            AnnotationMetadata::for_type::<Self>().with(
                Annotation::with_value(names::SCOPE, "session").attribute(PROXY_MODE_ATTRIBUTE, "target_class"),
            )
        }
    }

    #[test]
    fn test_scoped_proxy_registration() {
        let reader = reader();
        let scope = Arc::new(SimpleScope::new());
        reader.factory().register_scope("session", scope.clone()).unwrap();

        let name = reader.register::<ShoppingCart>().unwrap().unwrap();
        assert_eq!(name, "shoppingCart");
        let target_name = scoped_target_name("shoppingCart");

        let target = reader.factory().bean_definition(&target_name).unwrap();
        assert_eq!(target.scope(), &BeanScope::Custom("session".into()));
        assert!(!target.is_autowire_candidate());
        assert!(reader.factory().bean_definition("shoppingCart").unwrap().is_singleton());

        let proxy = reader.factory().get_bean::<ScopedProxy<ShoppingCart>>("shoppingCart").unwrap();
        let first = proxy.get().unwrap();
        assert!(Arc::ptr_eq(&first, &proxy.get().unwrap()));
        scope.reset();
        assert_ne!(first.0, proxy.get().unwrap().0);

        // registering again leaves both definitions in place
        reader.register::<ShoppingCart>().unwrap();
        assert_eq!(reader.factory().bean_definition_count(), 2);
    }

    #[test]
    fn test_register_with_supplier() {
        let reader = reader();
        let name = reader
            .register_with_supplier(Some("answer"), |_| Ok(42u32))
            .unwrap()
            .unwrap();
        assert_eq!(name, "answer");
        assert_eq!(*reader.factory().get_bean::<u32>("answer").unwrap(), 42);

        let generated = reader.register_with_supplier(None, |_| Ok(String::from("x"))).unwrap();
        assert_eq!(generated.as_deref(), Some("string"));
    }
}
