//! Bean definitions
//!
//! A [`BeanDefinition`] is the recipe for one named bean: which types it
//! exposes, how to supply the instance, its scope and the flags that steer
//! autowiring and initialization. Definitions are immutable once registered
//! and are shared as `Arc<BeanDefinition>`.

use crate::container::BeanFactory;
use crate::error::{ContextError, Result};
use crate::factory::{BeanArgs, BeanInstance, InstanceSupplier};
use crate::metadata::AnnotationMetadata;
use crate::scope::BeanScope;
use crate::Injectable;
use std::any::{Any, TypeId};
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

// =============================================================================
// Bean Types
// =============================================================================

type ViewCaster = Arc<dyn Fn(&BeanInstance) -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;

#[derive(Clone)]
struct TypeView {
    type_id: TypeId,
    type_name: &'static str,
    cast: ViewCaster,
}

/// The concrete type of a bean plus the trait-object views it exposes.
///
/// Every bean is visible as its own concrete type. Additional views are
/// registered with [`BeanTypes::with_view`] so that by-type lookups for
/// `dyn Trait` can find the bean without reflection.
#[derive(Clone)]
pub struct BeanTypes {
    type_id: TypeId,
    type_name: &'static str,
    views: Vec<TypeView>,
}

impl BeanTypes {
    /// Types of a bean whose concrete type is `T`
    pub fn of<T: Injectable>() -> Self {
        let cast: ViewCaster = Arc::new(|instance: &BeanInstance| {
            Arc::clone(instance)
                .downcast::<T>()
                .ok()
                .map(|bean| Box::new(bean) as Box<dyn Any + Send + Sync>)
        });
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            views: vec![TypeView {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                cast,
            }],
        }
    }

    /// Expose the bean as `I` as well, usually a `dyn Trait`
    pub fn with_view<T, I, F>(mut self, f: F) -> Self
    where
        T: Injectable,
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<I>();
        self.views.retain(|v| v.type_id != type_id);
        self.views.push(TypeView {
            type_id,
            type_name: std::any::type_name::<I>(),
            cast: Arc::new(move |instance: &BeanInstance| {
                Arc::clone(instance)
                    .downcast::<T>()
                    .ok()
                    .map(|bean| Box::new(f(bean)) as Box<dyn Any + Send + Sync>)
            }),
        });
        self
    }

    /// TypeId of the concrete type
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the concrete type
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if the bean can be viewed as the type with this id
    #[inline]
    pub fn exposes(&self, type_id: TypeId) -> bool {
        self.views.iter().any(|v| v.type_id == type_id)
    }

    /// Returns true if the bean can be viewed as `I`
    #[inline]
    pub fn exposes_type<I: ?Sized + 'static>(&self) -> bool {
        self.exposes(TypeId::of::<I>())
    }

    /// Ids of all exposed types, concrete type first
    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.views.iter().map(|v| v.type_id)
    }

    /// Names of all exposed types, concrete type first
    pub fn type_names(&self) -> Vec<&'static str> {
        self.views.iter().map(|v| v.type_name).collect()
    }

    /// View `instance` as `I`
    pub fn view<I: ?Sized + Send + Sync + 'static>(&self, instance: &BeanInstance) -> Option<Arc<I>> {
        let type_id = TypeId::of::<I>();
        let view = self.views.iter().find(|v| v.type_id == type_id)?;
        let boxed = (view.cast)(instance)?;
        boxed.downcast::<Arc<I>>().ok().map(|b| *b)
    }
}

impl fmt::Debug for BeanTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanTypes")
            .field("type_name", &self.type_name)
            .field("views", &self.type_names())
            .finish()
    }
}

// =============================================================================
// Callbacks and Roles
// =============================================================================

pub(crate) type CallbackFn = Arc<dyn Fn(&BeanInstance) -> Result<()> + Send + Sync>;

/// A named init or destroy method
#[derive(Clone)]
pub struct BeanCallback {
    name: String,
    call: CallbackFn,
}

impl BeanCallback {
    /// Method name, as shown in logs and errors
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn invoke(&self, instance: &BeanInstance) -> Result<()> {
        (self.call)(instance)
    }

    fn typed<T: Injectable, F>(name: String, f: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        let method = name.clone();
        Self {
            name,
            call: Arc::new(move |instance: &BeanInstance| match instance.downcast_ref::<T>() {
                Some(bean) => f(bean),
                None => Err(ContextError::illegal_state(format!(
                    "Cannot invoke '{method}': bean is no longer a {}",
                    std::any::type_name::<T>()
                ))),
            }),
        }
    }
}

impl fmt::Debug for BeanCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BeanCallback").field(&self.name).finish()
    }
}

/// What a bean is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BeanRole {
    /// Part of the application
    #[default]
    Application,
    /// Supporting part of a larger configuration
    Support,
    /// Framework-internal bean
    Infrastructure,
}

impl BeanRole {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "application" => Some(Self::Application),
            "support" => Some(Self::Support),
            "infrastructure" => Some(Self::Infrastructure),
            _ => None,
        }
    }
}

// =============================================================================
// Bean Definition
// =============================================================================

/// Everything the factory needs to create one named bean
#[derive(Clone)]
pub struct BeanDefinition {
    types: Arc<BeanTypes>,
    supplier: Option<InstanceSupplier>,
    scope: BeanScope,
    lazy_init: bool,
    primary: bool,
    autowire_candidate: bool,
    depends_on: Vec<String>,
    qualifiers: BTreeSet<String>,
    init_callback: Option<BeanCallback>,
    destroy_callback: Option<BeanCallback>,
    role: BeanRole,
    description: Option<String>,
    metadata: Arc<AnnotationMetadata>,
}

impl BeanDefinition {
    /// Definition with the given types and supplier and default attributes
    pub fn new(types: BeanTypes, supplier: Option<InstanceSupplier>) -> Self {
        Self {
            types: Arc::new(types),
            supplier,
            scope: BeanScope::Singleton,
            lazy_init: false,
            primary: false,
            autowire_candidate: true,
            depends_on: Vec::new(),
            qualifiers: BTreeSet::new(),
            init_callback: None,
            destroy_callback: None,
            role: BeanRole::Application,
            description: None,
            metadata: Arc::new(AnnotationMetadata::new()),
        }
    }

    /// Typed builder for a bean of type `T`
    #[inline]
    pub fn builder<T: Injectable>() -> BeanDefinitionBuilder<T> {
        BeanDefinitionBuilder::new()
    }

    // ----- accessors -----

    #[inline]
    pub fn types(&self) -> &Arc<BeanTypes> {
        &self.types
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.types.type_name()
    }

    #[inline]
    pub fn supplier(&self) -> Option<&InstanceSupplier> {
        self.supplier.as_ref()
    }

    #[inline]
    pub fn scope(&self) -> &BeanScope {
        &self.scope
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.scope.is_singleton()
    }

    #[inline]
    pub fn is_prototype(&self) -> bool {
        self.scope.is_prototype()
    }

    #[inline]
    pub fn is_lazy_init(&self) -> bool {
        self.lazy_init
    }

    #[inline]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    #[inline]
    pub fn is_autowire_candidate(&self) -> bool {
        self.autowire_candidate
    }

    #[inline]
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    #[inline]
    pub fn qualifiers(&self) -> &BTreeSet<String> {
        &self.qualifiers
    }

    #[inline]
    pub fn has_qualifier(&self, qualifier: &str) -> bool {
        self.qualifiers.contains(qualifier)
    }

    #[inline]
    pub fn init_callback(&self) -> Option<&BeanCallback> {
        self.init_callback.as_ref()
    }

    #[inline]
    pub fn destroy_callback(&self) -> Option<&BeanCallback> {
        self.destroy_callback.as_ref()
    }

    #[inline]
    pub fn role(&self) -> BeanRole {
        self.role
    }

    #[inline]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[inline]
    pub fn metadata(&self) -> &AnnotationMetadata {
        &self.metadata
    }

    // ----- mutators (before registration only) -----

    pub fn set_scope(&mut self, scope: BeanScope) {
        self.scope = scope;
    }

    pub fn set_lazy_init(&mut self, lazy_init: bool) {
        self.lazy_init = lazy_init;
    }

    pub fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }

    pub fn set_autowire_candidate(&mut self, candidate: bool) {
        self.autowire_candidate = candidate;
    }

    pub fn add_depends_on(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.depends_on.contains(&name) {
            self.depends_on.push(name);
        }
    }

    pub fn add_qualifier(&mut self, qualifier: impl Into<String>) {
        self.qualifiers.insert(qualifier.into());
    }

    pub fn set_role(&mut self, role: BeanRole) {
        self.role = role;
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn set_metadata(&mut self, metadata: AnnotationMetadata) {
        self.metadata = Arc::new(metadata);
    }

    /// Share metadata already introspected for another definition
    pub fn set_shared_metadata(&mut self, metadata: Arc<AnnotationMetadata>) {
        self.metadata = metadata;
    }

    pub fn set_supplier(&mut self, supplier: InstanceSupplier) {
        self.supplier = Some(supplier);
    }

    /// Structural validation performed on registration
    pub fn validate(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ContextError::invalid(name, "bean name must not be empty"));
        }
        let Some(supplier) = &self.supplier else {
            return Err(ContextError::invalid(
                name,
                format!("no instance supplier for type '{}'", self.type_name()),
            ));
        };
        if supplier.is_instance() && !self.scope.is_singleton() {
            return Err(ContextError::invalid(
                name,
                format!("a pre-built instance requires singleton scope, not '{}'", self.scope),
            ));
        }
        if let BeanScope::Custom(scope) = &self.scope {
            if scope.trim().is_empty() {
                return Err(ContextError::invalid(name, "scope name must not be empty"));
            }
        }
        if self.depends_on.iter().any(|d| d == name) {
            return Err(ContextError::invalid(name, "a bean cannot depend on itself"));
        }
        Ok(())
    }

    /// True when `other` describes the same bean (suppliers are not compared)
    pub fn is_equivalent(&self, other: &BeanDefinition) -> bool {
        self.types.type_id() == other.types.type_id()
            && self.scope == other.scope
            && self.lazy_init == other.lazy_init
            && self.primary == other.primary
            && self.autowire_candidate == other.autowire_candidate
            && self.depends_on == other.depends_on
            && self.qualifiers == other.qualifiers
            && self.role == other.role
            && self.description == other.description
            && self.init_callback.as_ref().map(BeanCallback::name)
                == other.init_callback.as_ref().map(BeanCallback::name)
            && self.destroy_callback.as_ref().map(BeanCallback::name)
                == other.destroy_callback.as_ref().map(BeanCallback::name)
            && self.supplier.as_ref().map(InstanceSupplier::is_instance)
                == other.supplier.as_ref().map(InstanceSupplier::is_instance)
            && self.metadata == other.metadata
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("type", &self.type_name())
            .field("scope", &self.scope)
            .field("lazy_init", &self.lazy_init)
            .field("primary", &self.primary)
            .field("autowire_candidate", &self.autowire_candidate)
            .field("depends_on", &self.depends_on)
            .field("qualifiers", &self.qualifiers)
            .field("role", &self.role)
            .finish()
    }
}

// =============================================================================
// Typed Builder
// =============================================================================

/// Builds a [`BeanDefinition`] for a bean of type `T`
///
/// ```rust
/// use application_context::{BeanDefinitionBuilder, BeanScope};
///
/// struct Counter(u32);
///
/// let definition = BeanDefinitionBuilder::<Counter>::new()
///     .supplier(|_| Ok(Counter(0)))
///     .scope(BeanScope::Prototype)
///     .build();
/// assert!(definition.is_prototype());
/// ```
pub struct BeanDefinitionBuilder<T: Injectable> {
    definition: BeanDefinition,
    types: BeanTypes,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Injectable> BeanDefinitionBuilder<T> {
    pub fn new() -> Self {
        let mut definition = BeanDefinition::new(BeanTypes::of::<T>(), None);
        definition.metadata = Arc::new(AnnotationMetadata::for_type::<T>());
        Self {
            definition,
            types: BeanTypes::of::<T>(),
            _marker: PhantomData,
        }
    }

    /// Create the bean with a factory function
    pub fn supplier<F>(mut self, f: F) -> Self
    where
        F: Fn(&BeanFactory) -> Result<T> + Send + Sync + 'static,
    {
        self.definition.supplier = Some(InstanceSupplier::factory(f));
        self
    }

    /// Create the bean with a factory function receiving explicit arguments
    pub fn supplier_with_args<F>(mut self, f: F) -> Self
    where
        F: Fn(&BeanFactory, &BeanArgs) -> Result<T> + Send + Sync + 'static,
    {
        self.definition.supplier = Some(InstanceSupplier::factory_with_args(f));
        self
    }

    /// Use a pre-built instance (singleton scope only)
    pub fn instance(mut self, value: T) -> Self {
        self.definition.supplier = Some(InstanceSupplier::instance(value));
        self
    }

    /// Use a pre-built shared instance (singleton scope only)
    pub fn from_arc(mut self, value: Arc<T>) -> Self {
        self.definition.supplier = Some(InstanceSupplier::from_arc(value));
        self
    }

    pub fn scope(mut self, scope: BeanScope) -> Self {
        self.definition.scope = scope;
        self
    }

    pub fn lazy_init(mut self, lazy: bool) -> Self {
        self.definition.lazy_init = lazy;
        self
    }

    pub fn primary(mut self, primary: bool) -> Self {
        self.definition.primary = primary;
        self
    }

    pub fn autowire_candidate(mut self, candidate: bool) -> Self {
        self.definition.autowire_candidate = candidate;
        self
    }

    /// Beans that must be initialized before this one
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.definition.add_depends_on(name);
        self
    }

    pub fn qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.definition.add_qualifier(qualifier);
        self
    }

    pub fn role(mut self, role: BeanRole) -> Self {
        self.definition.role = role;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = Some(description.into());
        self
    }

    pub fn metadata(mut self, metadata: AnnotationMetadata) -> Self {
        self.definition.metadata = Arc::new(metadata);
        self
    }

    /// Expose the bean as `I` for by-type lookups
    ///
    /// ```rust
    /// use application_context::BeanDefinitionBuilder;
    /// use std::sync::Arc;
    ///
    /// trait Greeter: Send + Sync {
    ///     fn greet(&self) -> String;
    /// }
    /// struct English;
    /// impl Greeter for English {
    ///     fn greet(&self) -> String { "hello".into() }
    /// }
    ///
    /// let definition = BeanDefinitionBuilder::<English>::new()
    ///     .supplier(|_| Ok(English))
    ///     .view(|b| b as Arc<dyn Greeter>)
    ///     .build();
    /// assert!(definition.types().exposes_type::<dyn Greeter>());
    /// ```
    pub fn view<I, F>(mut self, f: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        self.types = self.types.with_view::<T, I, F>(f);
        self
    }

    /// Method run after the bean is created and post-processed
    pub fn init_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.definition.init_callback = Some(BeanCallback::typed::<T, F>(name.into(), f));
        self
    }

    /// Method run when the owning scope destroys the bean
    pub fn destroy_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.definition.destroy_callback = Some(BeanCallback::typed::<T, F>(name.into(), f));
        self
    }

    pub fn build(mut self) -> BeanDefinition {
        self.definition.types = Arc::new(self.types);
        self.definition
    }
}

impl<T: Injectable> Default for BeanDefinitionBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Shape: Send + Sync {
        fn area(&self) -> f64;
    }

    struct Square(f64);

    impl Shape for Square {
        fn area(&self) -> f64 {
            self.0 * self.0
        }
    }

    #[test]
    fn test_views_cast_instances() {
        let types = BeanTypes::of::<Square>().with_view(|s: Arc<Square>| s as Arc<dyn Shape>);
        let instance: BeanInstance = Arc::new(Square(3.0));

        assert!(types.exposes_type::<Square>());
        assert!(types.exposes_type::<dyn Shape>());
        assert!(!types.exposes_type::<String>());

        let shape = types.view::<dyn Shape>(&instance).unwrap();
        assert_eq!(shape.area(), 9.0);
        assert!(types.view::<String>(&instance).is_none());

        let wrong: BeanInstance = Arc::new(1u32);
        assert!(types.view::<dyn Shape>(&wrong).is_none());
    }

    #[test]
    fn test_validation() {
        let missing = BeanDefinitionBuilder::<Square>::new().build();
        assert!(matches!(
            missing.validate("square"),
            Err(ContextError::DefinitionInvalid { .. })
        ));

        let ok = BeanDefinitionBuilder::<Square>::new()
            .supplier(|_| Ok(Square(1.0)))
            .build();
        assert!(ok.validate("square").is_ok());
        assert!(ok.validate("  ").is_err());

        let prototype_instance = BeanDefinitionBuilder::<Square>::new()
            .instance(Square(1.0))
            .scope(BeanScope::Prototype)
            .build();
        assert!(prototype_instance.validate("square").is_err());

        let self_dependent = BeanDefinitionBuilder::<Square>::new()
            .supplier(|_| Ok(Square(1.0)))
            .depends_on("square")
            .build();
        assert!(self_dependent.validate("square").is_err());
    }

    #[test]
    fn test_equivalence_ignores_supplier_identity() {
        let a = BeanDefinitionBuilder::<Square>::new()
            .supplier(|_| Ok(Square(1.0)))
            .primary(true)
            .build();
        let b = BeanDefinitionBuilder::<Square>::new()
            .supplier(|_| Ok(Square(2.0)))
            .primary(true)
            .build();
        let c = BeanDefinitionBuilder::<Square>::new()
            .supplier(|_| Ok(Square(2.0)))
            .build();

        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&c));
    }

    #[test]
    fn test_callbacks_are_named() {
        let def = BeanDefinitionBuilder::<Square>::new()
            .supplier(|_| Ok(Square(1.0)))
            .init_method("check", |s| {
                if s.0 > 0.0 {
                    Ok(())
                } else {
                    Err(ContextError::other("negative"))
                }
            })
            .build();

        let callback = def.init_callback().unwrap();
        assert_eq!(callback.name(), "check");
        assert!(callback.invoke(&(Arc::new(Square(2.0)) as BeanInstance)).is_ok());
        assert!(callback.invoke(&(Arc::new(Square(-1.0)) as BeanInstance)).is_err());
        assert!(callback.invoke(&(Arc::new(7u8) as BeanInstance)).is_err());
    }
}
