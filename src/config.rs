//! Context configuration
//!
//! [`ApplicationContextBuilder`] collects everything a context is built
//! from. Unset values fall back to a generic store, a fresh
//! [`Environment`] (merged with the parent's), the filesystem resource
//! loader and the process-wide shutdown hook registry, introspection cache
//! and live view.
//!
//! ```rust
//! use application_context::ApplicationContext;
//! use application_context::multicaster::ListenerErrorPolicy;
//! use std::time::Duration;
//!
//! let context = ApplicationContext::builder()
//!     .id("orders")
//!     .display_name("Orders service")
//!     .allow_definition_overriding(false)
//!     .listener_error_policy(ListenerErrorPolicy::LogAndContinue)
//!     .lifecycle_timeout(Duration::from_secs(5))
//!     .build();
//!
//! assert_eq!(context.id(), "orders");
//! assert!(!context.is_active());
//! ```

use crate::cache::IntrospectionCache;
use crate::context::{ApplicationContext, ContextExtension, ContextParts};
use crate::environment::Environment;
use crate::event::ApplicationListener;
use crate::multicaster::ListenerErrorPolicy;
use crate::processor::BeanFactoryPostProcessor;
use crate::resource::{FileSystemResourceLoader, ResourceLoader};
use crate::shutdown::ShutdownHookRegistry;
use crate::live::LiveContextsView;
use crate::store::{BackingStore, DefinitionLoader, GenericStore, RefreshableStore};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Which bean factory strategy the context uses
enum StoreKind {
    Generic,
    Refreshable(Vec<Arc<dyn DefinitionLoader>>),
    Custom(Arc<dyn BackingStore>),
}

/// Builder for [`ApplicationContext`]
pub struct ApplicationContextBuilder {
    id: Option<String>,
    display_name: Option<String>,
    parent: Option<ApplicationContext>,
    environment: Option<Arc<Environment>>,
    store: StoreKind,
    allow_definition_overriding: Option<bool>,
    listener_error_policy: ListenerErrorPolicy,
    lifecycle_timeout: Option<Duration>,
    extensions: Vec<Arc<dyn ContextExtension>>,
    listeners: Vec<Arc<dyn ApplicationListener>>,
    factory_post_processors: Vec<Arc<dyn BeanFactoryPostProcessor>>,
    resource_loader: Option<Arc<dyn ResourceLoader>>,
    shutdown_hooks: Option<Arc<ShutdownHookRegistry>>,
    cache: Option<Arc<IntrospectionCache>>,
    live_view: Option<Arc<LiveContextsView>>,
}

impl ApplicationContextBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            display_name: None,
            parent: None,
            environment: None,
            store: StoreKind::Generic,
            allow_definition_overriding: None,
            listener_error_policy: ListenerErrorPolicy::default(),
            lifecycle_timeout: None,
            extensions: Vec::new(),
            listeners: Vec::new(),
            factory_post_processors: Vec::new(),
            resource_loader: None,
            shutdown_hooks: None,
            cache: None,
            live_view: None,
        }
    }

    /// Unique id; generated when unset
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Name used in logs and errors; defaults to the id
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn parent(mut self, parent: ApplicationContext) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn environment(mut self, environment: Arc<Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// One factory, refreshed once (the default)
    pub fn generic(mut self) -> Self {
        self.store = StoreKind::Generic;
        self
    }

    /// A new factory on every refresh, filled by `loaders`
    pub fn refreshable(mut self, loaders: Vec<Arc<dyn DefinitionLoader>>) -> Self {
        self.store = StoreKind::Refreshable(loaders);
        self
    }

    /// Add a loader, switching to a refreshable store
    pub fn loader(mut self, loader: Arc<dyn DefinitionLoader>) -> Self {
        match &mut self.store {
            StoreKind::Refreshable(loaders) => loaders.push(loader),
            _ => self.store = StoreKind::Refreshable(vec![loader]),
        }
        self
    }

    pub fn store(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.store = StoreKind::Custom(store);
        self
    }

    pub fn allow_definition_overriding(mut self, allow: bool) -> Self {
        self.allow_definition_overriding = Some(allow);
        self
    }

    pub fn listener_error_policy(mut self, policy: ListenerErrorPolicy) -> Self {
        self.listener_error_policy = policy;
        self
    }

    /// Bound for each lifecycle stop phase; overrides the environment
    pub fn lifecycle_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle_timeout = Some(timeout);
        self
    }

    pub fn extension(mut self, extension: Arc<dyn ContextExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ApplicationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn bean_factory_post_processor(mut self, processor: Arc<dyn BeanFactoryPostProcessor>) -> Self {
        self.factory_post_processors.push(processor);
        self
    }

    pub fn resource_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.resource_loader = Some(loader);
        self
    }

    pub fn shutdown_hooks(mut self, registry: Arc<ShutdownHookRegistry>) -> Self {
        self.shutdown_hooks = Some(registry);
        self
    }

    pub fn introspection_cache(mut self, cache: Arc<IntrospectionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn live_view(mut self, view: Arc<LiveContextsView>) -> Self {
        self.live_view = Some(view);
        self
    }

    pub fn build(self) -> ApplicationContext {
        let id = self
            .id
            .unwrap_or_else(|| format!("application-context-{}", NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed)));
        let display_name = self.display_name.unwrap_or_else(|| id.clone());

        let environment = self.environment.unwrap_or_else(|| Arc::new(Environment::new()));
        if let Some(parent) = &self.parent {
            environment.merge(parent.environment());
        }

        let parent_factory = self.parent.as_ref().and_then(|p| p.bean_factory().ok());
        let store: Arc<dyn BackingStore> = match self.store {
            StoreKind::Generic => {
                let store = GenericStore::new(parent_factory);
                if let (Some(allow), Some(factory)) = (self.allow_definition_overriding, store.bean_factory()) {
                    factory.set_allow_definition_overriding(allow);
                }
                Arc::new(store)
            }
            StoreKind::Refreshable(loaders) => {
                let store = RefreshableStore::new(loaders);
                Arc::new(match self.allow_definition_overriding {
                    Some(allow) => store.with_allow_definition_overriding(allow),
                    None => store,
                })
            }
            StoreKind::Custom(store) => store,
        };

        ApplicationContext::from_parts(ContextParts {
            id,
            display_name,
            parent: self.parent,
            environment,
            store,
            listener_error_policy: self.listener_error_policy,
            lifecycle_timeout: self.lifecycle_timeout,
            extensions: self.extensions,
            listeners: self.listeners,
            factory_post_processors: self.factory_post_processors,
            resource_loader: self
                .resource_loader
                .unwrap_or_else(|| Arc::new(FileSystemResourceLoader::new()) as Arc<dyn ResourceLoader>),
            shutdown_hooks: self.shutdown_hooks.unwrap_or_else(ShutdownHookRegistry::shared),
            cache: self.cache.unwrap_or_else(IntrospectionCache::shared),
            live_view: self.live_view.unwrap_or_else(LiveContextsView::shared),
        })
    }
}

impl Default for ApplicationContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ApplicationContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = match &self.store {
            StoreKind::Generic => "generic",
            StoreKind::Refreshable(_) => "refreshable",
            StoreKind::Custom(_) => "custom",
        };
        f.debug_struct("ApplicationContextBuilder")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("store", &store)
            .field("extensions", &self.extensions.len())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BeanDefinitionBuilder;
    use crate::environment::MapPropertySource;
    use crate::error::ContextError;
    use crate::registry::BeanDefinitionRegistry;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ApplicationContextBuilder::new().build();
        let b = ApplicationContextBuilder::new().build();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.display_name(), a.id());
    }

    #[test]
    fn test_child_environment_sees_parent_properties() {
        let parent_env = Arc::new(Environment::empty());
        parent_env.add_first(Arc::new(MapPropertySource::new("parent", [("region", "eu")])));
        let parent = ApplicationContext::builder().environment(parent_env).build();

        let child = ApplicationContext::builder()
            .environment(Arc::new(Environment::empty()))
            .parent(parent)
            .build();
        assert_eq!(child.environment().get_property("region").as_deref(), Some("eu"));
    }

    #[test]
    fn test_overriding_can_be_disabled() {
        let context = ApplicationContext::builder().allow_definition_overriding(false).build();
        let definition = || BeanDefinitionBuilder::<u8>::new().supplier(|_| Ok(1)).build();

        context.register_bean_definition("one", definition()).unwrap();
        let err = context.register_bean_definition("one", definition()).unwrap_err();
        assert!(matches!(err, ContextError::DefinitionOverride { .. }));
    }

    #[test]
    fn test_overriding_replaces_by_default() {
        let context = ApplicationContext::builder().build();
        context
            .register_bean_definition("value", BeanDefinitionBuilder::<u8>::new().supplier(|_| Ok(1)).build())
            .unwrap();
        context
            .register_bean_definition("value", BeanDefinitionBuilder::<u16>::new().supplier(|_| Ok(2)).build())
            .unwrap();

        assert_eq!(context.bean_definition_count(), 1);
        assert!(context.bean_definition("value").unwrap().type_name().ends_with("u16"));
    }

    #[test]
    fn test_loader_switches_to_refreshable_store() {
        let context = ApplicationContext::builder()
            .loader(Arc::new(|_: &crate::reader::AnnotatedBeanDefinitionReader| Ok(())))
            .build();
        assert!(context.register_singleton("x", Arc::new(1u8)).is_err());
        assert!(context.bean_factory().is_err());
    }
}
