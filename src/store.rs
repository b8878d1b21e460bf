//! Where a context keeps its bean factory
//!
//! [`GenericStore`] holds one factory for the life of the context;
//! definitions are registered on it directly and it can be refreshed once
//! (again only after a failed attempt). Asking an already refreshed store
//! for another refresh leaves the running context untouched. [`RefreshableStore`] builds a new
//! factory on every refresh and fills it from its [`DefinitionLoader`]s.

use crate::cache::IntrospectionCache;
use crate::component::{Component, ComponentModule};
use crate::container::BeanFactory;
use crate::definition::BeanDefinition;
use crate::environment::Environment;
use crate::error::{ContextError, Result};
use crate::reader::AnnotatedBeanDefinitionReader;
use crate::registry::BeanDefinitionRegistry;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "logging")]
use tracing::debug;

/// What a store gets when asked for a fresh factory
pub struct RefreshRequest<'a> {
    pub id: &'a str,
    /// Factory of the parent context, if any
    pub parent: Option<Arc<BeanFactory>>,
    pub environment: &'a Arc<Environment>,
    pub cache: &'a Arc<IntrospectionCache>,
}

/// Strategy for obtaining the bean factory of a context
pub trait BackingStore: Send + Sync {
    /// Fails if the store cannot serve another refresh; checked before the
    /// context changes any state
    fn ensure_can_refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Prepare the factory for a refresh (phase 2)
    fn refresh_bean_factory(&self, request: &RefreshRequest<'_>) -> Result<Arc<BeanFactory>>;

    /// The current factory
    fn bean_factory(&self) -> Option<Arc<BeanFactory>>;

    /// A factory accepting registrations outside of refresh, if any
    fn definition_registry(&self) -> Option<Arc<BeanFactory>> {
        None
    }

    /// Undo what `refresh_bean_factory` did after a failed refresh
    fn cancel_refresh(&self);

    /// Release the factory once its singletons were destroyed
    fn close_bean_factory(&self);

    fn is_refreshable(&self) -> bool;
}

// =============================================================================
// Generic Store
// =============================================================================

/// One factory, registered on directly
pub struct GenericStore {
    factory: Arc<BeanFactory>,
    refreshed: AtomicBool,
}

impl GenericStore {
    pub fn new(parent: Option<Arc<BeanFactory>>) -> Self {
        Self::with_factory(match parent {
            Some(parent) => BeanFactory::with_parent(parent),
            None => BeanFactory::new(),
        })
    }

    /// Wrap an existing factory
    pub fn with_factory(factory: Arc<BeanFactory>) -> Self {
        Self {
            factory,
            refreshed: AtomicBool::new(false),
        }
    }
}

fn already_refreshed() -> ContextError {
    ContextError::illegal_state("GenericStore does not support multiple refresh attempts: just call 'refresh' once")
}

impl BackingStore for GenericStore {
    fn ensure_can_refresh(&self) -> Result<()> {
        if self.refreshed.load(Ordering::Acquire) {
            return Err(already_refreshed());
        }
        Ok(())
    }

    fn refresh_bean_factory(&self, request: &RefreshRequest<'_>) -> Result<Arc<BeanFactory>> {
        if self
            .refreshed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(already_refreshed());
        }
        self.factory.mark_refresh_start();
        self.factory.set_serialization_id(Some(request.id.to_string()));
        Ok(Arc::clone(&self.factory))
    }

    fn bean_factory(&self) -> Option<Arc<BeanFactory>> {
        Some(Arc::clone(&self.factory))
    }

    fn definition_registry(&self) -> Option<Arc<BeanFactory>> {
        Some(Arc::clone(&self.factory))
    }

    // Only reached by the attempt that passed `ensure_can_refresh`, so the
    // flag was set by that same attempt
    fn cancel_refresh(&self) {
        self.factory.reset_for_retry();
        self.factory.set_serialization_id(None);
        self.refreshed.store(false, Ordering::Release);
    }

    fn close_bean_factory(&self) {
        self.factory.set_serialization_id(None);
    }

    fn is_refreshable(&self) -> bool {
        false
    }
}

impl fmt::Debug for GenericStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericStore")
            .field("refreshed", &self.refreshed.load(Ordering::Relaxed))
            .field("definitions", &self.factory.bean_definition_count())
            .finish()
    }
}

// =============================================================================
// Refreshable Store
// =============================================================================

/// Registers definitions into a freshly built factory
pub trait DefinitionLoader: Send + Sync {
    fn load_bean_definitions(&self, reader: &AnnotatedBeanDefinitionReader) -> Result<()>;
}

impl<F> DefinitionLoader for F
where
    F: Fn(&AnnotatedBeanDefinitionReader) -> Result<()> + Send + Sync,
{
    fn load_bean_definitions(&self, reader: &AnnotatedBeanDefinitionReader) -> Result<()> {
        self(reader)
    }
}

type LoadStep = Box<dyn Fn(&AnnotatedBeanDefinitionReader) -> Result<()> + Send + Sync>;

/// A loader assembled from components, modules and plain definitions
///
/// ```rust
/// use application_context::component::Component;
/// use application_context::store::{ComponentLoader, DefinitionLoader, RefreshableStore};
/// use application_context::{ApplicationContext, Result};
/// use std::sync::Arc;
///
/// struct Clock;
///
/// impl Component for Clock {
///     type Dependencies = ();
///     fn create(_: ()) -> Result<Self> { Ok(Clock) }
/// }
///
/// let loader = ComponentLoader::new().component::<Clock>();
/// let context = ApplicationContext::builder()
///     .store(Arc::new(RefreshableStore::new(vec![Arc::new(loader) as Arc<dyn DefinitionLoader>])))
///     .build();
/// context.refresh().unwrap();
/// assert!(context.get_bean::<Clock>("clock").is_ok());
/// ```
#[derive(Default)]
pub struct ComponentLoader {
    steps: Vec<LoadStep>,
}

impl ComponentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component<C: Component>(mut self) -> Self {
        self.steps.push(Box::new(|reader: &AnnotatedBeanDefinitionReader| {
            reader.register::<C>().map(drop)
        }));
        self
    }

    pub fn module<M: ComponentModule>(mut self) -> Self {
        self.steps.push(Box::new(|reader: &AnnotatedBeanDefinitionReader| M::register(reader)));
        self
    }

    /// A definition built anew for every refresh
    pub fn definition<F>(mut self, name: impl Into<String>, definition: F) -> Self
    where
        F: Fn() -> BeanDefinition + Send + Sync + 'static,
    {
        let name = name.into();
        self.steps.push(Box::new(move |reader: &AnnotatedBeanDefinitionReader| {
            reader.factory().register_bean_definition(&name, definition())
        }));
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl DefinitionLoader for ComponentLoader {
    fn load_bean_definitions(&self, reader: &AnnotatedBeanDefinitionReader) -> Result<()> {
        for step in &self.steps {
            step(reader)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ComponentLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentLoader").field("steps", &self.steps.len()).finish()
    }
}

/// Builds a new factory on every refresh
pub struct RefreshableStore {
    loaders: Vec<Arc<dyn DefinitionLoader>>,
    factory: RwLock<Option<Arc<BeanFactory>>>,
    allow_definition_overriding: Option<bool>,
}

impl RefreshableStore {
    pub fn new(loaders: Vec<Arc<dyn DefinitionLoader>>) -> Self {
        Self {
            loaders,
            factory: RwLock::new(None),
            allow_definition_overriding: None,
        }
    }

    /// Applied to every factory this store builds
    pub fn with_allow_definition_overriding(mut self, allow: bool) -> Self {
        self.allow_definition_overriding = Some(allow);
        self
    }

    pub fn has_bean_factory(&self) -> bool {
        self.factory.read().is_some()
    }
}

impl BackingStore for RefreshableStore {
    fn refresh_bean_factory(&self, request: &RefreshRequest<'_>) -> Result<Arc<BeanFactory>> {
        if let Some(previous) = self.factory.write().take() {
            #[cfg(feature = "logging")]
            debug!(target: "application_context", context = request.id, "Destroying previous bean factory");

            previous.destroy_singletons();
            previous.set_serialization_id(None);
        }

        let factory = match &request.parent {
            Some(parent) => BeanFactory::with_parent(Arc::clone(parent)),
            None => BeanFactory::new(),
        };
        factory.set_serialization_id(Some(request.id.to_string()));
        if let Some(allow) = self.allow_definition_overriding {
            factory.set_allow_definition_overriding(allow);
        }

        let reader = AnnotatedBeanDefinitionReader::with_cache(
            Arc::clone(&factory),
            Arc::clone(request.environment),
            Arc::clone(request.cache),
        );
        for loader in &self.loaders {
            loader.load_bean_definitions(&reader)?;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "application_context",
            context = request.id,
            definitions = factory.bean_definition_count(),
            "Loaded bean definitions"
        );

        *self.factory.write() = Some(Arc::clone(&factory));
        Ok(factory)
    }

    fn bean_factory(&self) -> Option<Arc<BeanFactory>> {
        self.factory.read().clone()
    }

    fn cancel_refresh(&self) {
        if let Some(factory) = self.factory.read().as_ref() {
            factory.set_serialization_id(None);
        }
    }

    fn close_bean_factory(&self) {
        if let Some(factory) = self.factory.write().take() {
            factory.set_serialization_id(None);
        }
    }

    fn is_refreshable(&self) -> bool {
        true
    }
}

impl fmt::Debug for RefreshableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshableStore")
            .field("loaders", &self.loaders.len())
            .field("has_bean_factory", &self.has_bean_factory())
            .finish()
    }
}
