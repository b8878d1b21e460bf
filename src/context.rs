//! The application context
//!
//! An [`ApplicationContext`] owns a bean factory (through a
//! [`BackingStore`]) and drives it through the twelve phases of
//! [`refresh`](ApplicationContext::refresh):
//!
//! 1. prepare refresh: startup date, flags, property sources, listener
//!    baseline, early event buffer
//! 2. obtain a fresh bean factory from the store
//! 3. prepare the bean factory: aware processors, resolvable dependencies,
//!    environment singletons
//! 4. extension hook on the factory
//! 5. invoke bean factory post-processors
//! 6. register bean post-processors
//! 7. initialize the message source
//! 8. initialize the event multicaster
//! 9. extension hook `on_refresh`
//! 10. register listeners and drain the early events
//! 11. finish bean factory initialization (freeze, eager singletons)
//! 12. finish refresh: lifecycle processor, refreshed event, live view
//!
//! A failure in phases 2 to 12 destroys the singletons created so far and
//! cancels the refresh; a failure in phase 1 only resets `active`. Either
//! way the error is a [`ContextError::RefreshFailed`] naming the phase.
//!
//! ```rust
//! use application_context::{ApplicationContext, BeanDefinitionBuilder, BeanDefinitionRegistry};
//!
//! struct Greeter {
//!     greeting: String,
//! }
//!
//! let context = ApplicationContext::new();
//! context
//!     .register_bean_definition(
//!         "greeter",
//!         BeanDefinitionBuilder::<Greeter>::new()
//!             .supplier(|_| Ok(Greeter { greeting: "hello".into() }))
//!             .build(),
//!     )
//!     .unwrap();
//!
//! context.refresh().unwrap();
//! assert_eq!(context.get_bean::<Greeter>("greeter").unwrap().greeting, "hello");
//! context.close();
//! ```

use crate::aware::{ContextAwareProcessor, ListenerDetector, LoadTimeWeaverAware, LoadTimeWeaverAwareProcessor};
use crate::cache::IntrospectionCache;
use crate::component::Component;
use crate::container::{BeanFactory, EmbeddedValueResolver};
use crate::conversion::ConversionService;
use crate::definition::{BeanDefinition, BeanTypes};
use crate::environment::{Environment, PropertySource};
use crate::error::{ContextError, ContextStateReason, RefreshPhase, Result};
use crate::event::{ApplicationEvent, ApplicationEventPublisher, ApplicationListener, ContextEvent};
use crate::factory::{BeanArgs, BeanInstance};
use crate::lifecycle::{DefaultLifecycleProcessor, LifecycleProcessor, TIMEOUT_PER_SHUTDOWN_PHASE_PROPERTY};
use crate::live::{LIVE_VIEW_ENABLED_PROPERTY, LiveContextsView};
use crate::message::{DelegatingMessageSource, Locale, MessageSource};
use crate::metadata::Annotation;
use crate::multicaster::{ApplicationEventMulticaster, ListenerErrorPolicy, SimpleApplicationEventMulticaster};
use crate::processor::{BeanFactoryPostProcessor, invoke_bean_factory_post_processors, register_bean_post_processors};
use crate::provider::BeanProvider;
use crate::reader::AnnotatedBeanDefinitionReader;
use crate::registry::{AliasRegistry, BeanDefinitionRegistry};
use crate::resource::{Resource, ResourceLoader};
use crate::shutdown::{HookId, ShutdownHookRegistry};
use crate::store::{BackingStore, RefreshRequest};
use crate::config::ApplicationContextBuilder;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(feature = "logging")]
use tracing::{debug, info, trace, warn};

// =============================================================================
// Reserved Bean Names
// =============================================================================

pub const MESSAGE_SOURCE_BEAN_NAME: &str = "messageSource";
pub const LIFECYCLE_PROCESSOR_BEAN_NAME: &str = "lifecycleProcessor";
pub const APPLICATION_EVENT_MULTICASTER_BEAN_NAME: &str = "applicationEventMulticaster";
pub const CONVERSION_SERVICE_BEAN_NAME: &str = "conversionService";
pub const ENVIRONMENT_BEAN_NAME: &str = "environment";
pub const SYSTEM_PROPERTIES_BEAN_NAME: &str = "systemProperties";
pub const SYSTEM_ENVIRONMENT_BEAN_NAME: &str = "systemEnvironment";
pub const LOAD_TIME_WEAVER_BEAN_NAME: &str = "loadTimeWeaver";

// =============================================================================
// Extension Hooks
// =============================================================================

/// Hooks called at fixed points of refresh and close
pub trait ContextExtension: Send + Sync {
    /// Phase 1, before required properties are validated
    fn init_property_sources(&self, _environment: &Environment) -> Result<()> {
        Ok(())
    }

    /// Phase 4, before any factory post-processor runs
    fn post_process_bean_factory(&self, _factory: &BeanFactory) -> Result<()> {
        Ok(())
    }

    /// Phase 9, after the message source and multicaster exist
    fn on_refresh(&self, _context: &ApplicationContext) -> Result<()> {
        Ok(())
    }

    /// Last step of close, after the bean factory was closed
    fn on_close(&self, _context: &ApplicationContext) {}
}

// =============================================================================
// Context State
// =============================================================================

type PhaseResult<T> = std::result::Result<T, (RefreshPhase, ContextError)>;

#[inline]
fn at(phase: RefreshPhase) -> impl FnOnce(ContextError) -> (RefreshPhase, ContextError) {
    move |e| (phase, e)
}

/// Everything the builder hands over
pub(crate) struct ContextParts {
    pub id: String,
    pub display_name: String,
    pub parent: Option<ApplicationContext>,
    pub environment: Arc<Environment>,
    pub store: Arc<dyn BackingStore>,
    pub listener_error_policy: ListenerErrorPolicy,
    pub lifecycle_timeout: Option<Duration>,
    pub extensions: Vec<Arc<dyn ContextExtension>>,
    pub listeners: Vec<Arc<dyn ApplicationListener>>,
    pub factory_post_processors: Vec<Arc<dyn BeanFactoryPostProcessor>>,
    pub resource_loader: Arc<dyn ResourceLoader>,
    pub shutdown_hooks: Arc<ShutdownHookRegistry>,
    pub cache: Arc<IntrospectionCache>,
    pub live_view: Arc<LiveContextsView>,
}

struct ContextInner {
    id: String,
    display_name: String,
    parent: Option<ApplicationContext>,
    environment: Arc<Environment>,
    store: Arc<dyn BackingStore>,
    reader: Option<AnnotatedBeanDefinitionReader>,

    /// Guards refresh, close and the shutdown hook
    monitor: ReentrantMutex<()>,
    active: AtomicBool,
    closed: AtomicBool,
    startup_date: AtomicU64,

    static_listeners: RwLock<Vec<Arc<dyn ApplicationListener>>>,
    early_listeners: RwLock<Option<Vec<Arc<dyn ApplicationListener>>>>,
    early_events: Mutex<Option<Vec<ApplicationEvent>>>,

    multicaster: RwLock<Option<Arc<dyn ApplicationEventMulticaster>>>,
    message_source: RwLock<Option<Arc<dyn MessageSource>>>,
    lifecycle_processor: RwLock<Option<Arc<dyn LifecycleProcessor>>>,
    factory_post_processors: RwLock<Vec<Arc<dyn BeanFactoryPostProcessor>>>,
    extensions: Vec<Arc<dyn ContextExtension>>,

    resource_loader: Arc<dyn ResourceLoader>,
    shutdown_hooks: Arc<ShutdownHookRegistry>,
    shutdown_hook: Mutex<Option<HookId>>,
    cache: Arc<IntrospectionCache>,
    live_view: Arc<LiveContextsView>,

    listener_error_policy: ListenerErrorPolicy,
    lifecycle_timeout: Option<Duration>,
}

/// A bean factory with refresh / close orchestration, events, messages and
/// lifecycle management.
///
/// Cloning is cheap; all clones share one context.
#[derive(Clone)]
pub struct ApplicationContext {
    inner: Arc<ContextInner>,
}

/// A non-owning handle to a context, handed to beans
#[derive(Clone)]
pub struct WeakApplicationContext {
    inner: Weak<ContextInner>,
}

impl ApplicationContext {
    /// A generic context with default settings
    pub fn new() -> Self {
        ApplicationContextBuilder::new().build()
    }

    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::new()
    }

    pub(crate) fn from_parts(parts: ContextParts) -> Self {
        let reader = parts.store.definition_registry().map(|factory| {
            AnnotatedBeanDefinitionReader::with_cache(factory, Arc::clone(&parts.environment), Arc::clone(&parts.cache))
        });

        #[cfg(feature = "logging")]
        debug!(
            target: "application_context",
            context = %parts.display_name,
            refreshable = parts.store.is_refreshable(),
            "Created application context"
        );

        Self {
            inner: Arc::new(ContextInner {
                id: parts.id,
                display_name: parts.display_name,
                parent: parts.parent,
                environment: parts.environment,
                store: parts.store,
                reader,
                monitor: ReentrantMutex::new(()),
                active: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                startup_date: AtomicU64::new(0),
                static_listeners: RwLock::new(parts.listeners),
                early_listeners: RwLock::new(None),
                early_events: Mutex::new(Some(Vec::new())),
                multicaster: RwLock::new(None),
                message_source: RwLock::new(None),
                lifecycle_processor: RwLock::new(None),
                factory_post_processors: RwLock::new(parts.factory_post_processors),
                extensions: parts.extensions,
                resource_loader: parts.resource_loader,
                shutdown_hooks: parts.shutdown_hooks,
                shutdown_hook: Mutex::new(None),
                cache: parts.cache,
                live_view: parts.live_view,
                listener_error_policy: parts.listener_error_policy,
                lifecycle_timeout: parts.lifecycle_timeout,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakApplicationContext {
        WeakApplicationContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // =========================================================================
    // Identity and State
    // =========================================================================

    #[inline]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[inline]
    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    #[inline]
    pub fn parent(&self) -> Option<&ApplicationContext> {
        self.inner.parent.as_ref()
    }

    #[inline]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.inner.environment
    }

    /// Milliseconds since the epoch when the last refresh started, 0 before
    #[inline]
    pub fn startup_date(&self) -> u64 {
        self.inner.startup_date.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// True if both handles point at the same context
    #[inline]
    pub fn ptr_eq(&self, other: &ApplicationContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The current bean factory, without checking that the context is active
    pub fn bean_factory(&self) -> Result<Arc<BeanFactory>> {
        self.inner.store.bean_factory().ok_or_else(|| {
            ContextError::illegal_state(format!(
                "{} has no bean factory: call 'refresh' first",
                self.inner.display_name
            ))
        })
    }

    fn assert_active(&self) -> Result<Arc<BeanFactory>> {
        if !self.is_active() {
            let reason = if self.is_closed() {
                ContextStateReason::Closed
            } else {
                ContextStateReason::NotRefreshed
            };
            return Err(ContextError::IllegalContextState {
                context: self.inner.display_name.clone(),
                reason,
            });
        }
        self.bean_factory()
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Load or reload the configuration and create all eager singletons.
    ///
    /// On failure every singleton created by this attempt has been
    /// destroyed and the context is inactive again.
    pub fn refresh(&self) -> Result<()> {
        let _guard = self.inner.monitor.lock();

        #[cfg(feature = "logging")]
        info!(target: "application_context", context = %self.inner.display_name, "Refreshing");

        let result = self.do_refresh();
        self.reset_common_caches();

        result.map_err(|(phase, source)| ContextError::RefreshFailed {
            context: self.inner.display_name.clone(),
            phase,
            source: Box::new(source),
        })
    }

    fn do_refresh(&self) -> PhaseResult<()> {
        // A refused refresh must not touch a running context
        self.inner
            .store
            .ensure_can_refresh()
            .map_err(at(RefreshPhase::ObtainFreshBeanFactory))?;

        if let Err(e) = self.prepare_refresh() {
            self.inner.active.store(false, Ordering::Release);
            return Err((RefreshPhase::PrepareRefresh, e));
        }

        // Beans of a previous refresh stop before their factory is rebuilt
        let previous = self.inner.lifecycle_processor.write().take();
        if let Some(previous) = previous.filter(|p| p.is_running()) {
            self.stop_lifecycle_beans(&previous);
        }

        let result = self.refresh_bean_factory_phases();
        if let Err((_phase, _e)) = &result {
            #[cfg(feature = "logging")]
            warn!(
                target: "application_context",
                context = %self.inner.display_name,
                phase = %_phase,
                error = %_e,
                "Exception encountered during context initialization - cancelling refresh attempt"
            );

            let started = self.inner.lifecycle_processor.read().clone();
            if let Some(processor) = started {
                self.stop_lifecycle_beans(&processor);
            }
            self.destroy_beans();
            self.cancel_refresh();
        }
        result
    }

    fn refresh_bean_factory_phases(&self) -> PhaseResult<()> {
        use RefreshPhase::*;

        let factory = self.obtain_fresh_bean_factory().map_err(at(ObtainFreshBeanFactory))?;
        self.prepare_bean_factory(&factory).map_err(at(PrepareBeanFactory))?;
        self.post_process_bean_factory(&factory).map_err(at(PostProcessBeanFactory))?;
        self.invoke_bean_factory_post_processors(&factory)
            .map_err(at(InvokeBeanFactoryPostProcessors))?;
        register_bean_post_processors(&factory).map_err(at(RegisterBeanPostProcessors))?;
        self.init_message_source(&factory).map_err(at(InitMessageSource))?;
        self.init_event_multicaster(&factory).map_err(at(InitEventMulticaster))?;
        self.on_refresh().map_err(at(OnRefresh))?;
        self.register_listeners(&factory).map_err(at(RegisterListeners))?;
        self.finish_bean_factory_initialization(&factory)
            .map_err(at(FinishBeanFactoryInitialization))?;
        self.finish_refresh(&factory).map_err(at(FinishRefresh))?;

        #[cfg(feature = "logging")]
        info!(
            target: "application_context",
            context = %self.inner.display_name,
            beans = factory.bean_definition_count(),
            "Refreshed"
        );

        Ok(())
    }

    fn prepare_refresh(&self) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.inner.startup_date.store(now, Ordering::Release);
        self.inner.closed.store(false, Ordering::Release);
        self.inner.active.store(true, Ordering::Release);

        #[cfg(feature = "logging")]
        debug!(target: "application_context", context = %self.inner.display_name, phase = "prepare-refresh", "Phase");

        for extension in &self.inner.extensions {
            extension.init_property_sources(&self.inner.environment)?;
        }
        self.inner.environment.validate_required_properties()?;

        {
            let mut baseline = self.inner.early_listeners.write();
            match baseline.as_ref() {
                None => *baseline = Some(self.inner.static_listeners.read().clone()),
                Some(listeners) => *self.inner.static_listeners.write() = listeners.clone(),
            }
        }

        let mut early_events = self.inner.early_events.lock();
        if early_events.is_none() {
            *early_events = Some(Vec::new());
        }
        Ok(())
    }

    fn obtain_fresh_bean_factory(&self) -> Result<Arc<BeanFactory>> {
        let parent = self
            .inner
            .parent
            .as_ref()
            .and_then(|parent| parent.inner.store.bean_factory());
        let request = RefreshRequest {
            id: &self.inner.id,
            parent,
            environment: &self.inner.environment,
            cache: &self.inner.cache,
        };
        self.inner.store.refresh_bean_factory(&request)
    }

    fn prepare_bean_factory(&self, factory: &Arc<BeanFactory>) -> Result<()> {
        let context = self.downgrade();
        factory.add_bean_post_processor(Arc::new(ContextAwareProcessor::new(context.clone())));
        factory.add_bean_post_processor(Arc::new(ListenerDetector::new(context.clone())));

        let weak_factory = factory.weak();
        factory.register_resolvable_dependency_with::<BeanFactory, _>(move || weak_factory.upgrade());
        factory.register_resolvable_dependency::<dyn ResourceLoader>(Arc::clone(&self.inner.resource_loader));
        factory.register_resolvable_dependency::<dyn ApplicationEventPublisher>(Arc::new(context.clone()));
        factory.register_resolvable_dependency::<WeakApplicationContext>(Arc::new(context));

        if factory.contains_bean(LOAD_TIME_WEAVER_BEAN_NAME) {
            factory.add_bean_post_processor(Arc::new(LoadTimeWeaverAwareProcessor::new(factory.weak())));
        }

        let environment = &self.inner.environment;
        if !factory.contains_local_bean(ENVIRONMENT_BEAN_NAME) {
            factory.register_singleton(ENVIRONMENT_BEAN_NAME, Arc::clone(environment))?;
        }
        if !factory.contains_local_bean(SYSTEM_PROPERTIES_BEAN_NAME) {
            if let Some(source) = environment.system_properties() {
                register_property_source(factory, SYSTEM_PROPERTIES_BEAN_NAME, source)?;
            }
        }
        if !factory.contains_local_bean(SYSTEM_ENVIRONMENT_BEAN_NAME) {
            if let Some(source) = environment.system_environment() {
                register_property_source(factory, SYSTEM_ENVIRONMENT_BEAN_NAME, source)?;
            }
        }
        Ok(())
    }

    fn post_process_bean_factory(&self, factory: &BeanFactory) -> Result<()> {
        for extension in &self.inner.extensions {
            extension.post_process_bean_factory(factory)?;
        }
        Ok(())
    }

    fn invoke_bean_factory_post_processors(&self, factory: &BeanFactory) -> Result<()> {
        let processors = self.inner.factory_post_processors.read().clone();
        invoke_bean_factory_post_processors(factory, &processors)
    }

    fn init_message_source(&self, factory: &BeanFactory) -> Result<()> {
        let parent = self.parent_message_source();
        let source = if factory.contains_local_bean(MESSAGE_SOURCE_BEAN_NAME) {
            let source = factory.get_bean::<dyn MessageSource>(MESSAGE_SOURCE_BEAN_NAME)?;
            if let (Some(parent), Some(hierarchical)) = (parent, source.as_hierarchical()) {
                if hierarchical.parent_message_source().is_none() {
                    hierarchical.set_parent_message_source(Some(parent));
                }
            }

            #[cfg(feature = "logging")]
            trace!(target: "application_context", "Using message source bean");

            source
        } else {
            let delegating = Arc::new(DelegatingMessageSource::with_parent(parent));
            factory.register_singleton_with(
                MESSAGE_SOURCE_BEAN_NAME,
                Arc::clone(&delegating) as BeanInstance,
                BeanTypes::of::<DelegatingMessageSource>()
                    .with_view(|source: Arc<DelegatingMessageSource>| source as Arc<dyn MessageSource>),
            )?;

            #[cfg(feature = "logging")]
            trace!(target: "application_context", "No message source bean, using a delegating one");

            delegating as Arc<dyn MessageSource>
        };
        *self.inner.message_source.write() = Some(source);
        Ok(())
    }

    fn parent_message_source(&self) -> Option<Arc<dyn MessageSource>> {
        self.inner
            .parent
            .as_ref()
            .map(|parent| Arc::new(parent.downgrade()) as Arc<dyn MessageSource>)
    }

    fn init_event_multicaster(&self, factory: &BeanFactory) -> Result<()> {
        let multicaster = if factory.contains_local_bean(APPLICATION_EVENT_MULTICASTER_BEAN_NAME) {
            factory.get_bean::<dyn ApplicationEventMulticaster>(APPLICATION_EVENT_MULTICASTER_BEAN_NAME)?
        } else {
            let simple = Arc::new(SimpleApplicationEventMulticaster::with_factory(factory.weak()));
            simple.set_error_policy(self.inner.listener_error_policy);
            factory.register_singleton_with(
                APPLICATION_EVENT_MULTICASTER_BEAN_NAME,
                Arc::clone(&simple) as BeanInstance,
                BeanTypes::of::<SimpleApplicationEventMulticaster>().with_view(
                    |m: Arc<SimpleApplicationEventMulticaster>| m as Arc<dyn ApplicationEventMulticaster>,
                ),
            )?;
            simple as Arc<dyn ApplicationEventMulticaster>
        };
        *self.inner.multicaster.write() = Some(multicaster);
        Ok(())
    }

    fn on_refresh(&self) -> Result<()> {
        for extension in &self.inner.extensions {
            extension.on_refresh(self)?;
        }
        Ok(())
    }

    fn register_listeners(&self, factory: &BeanFactory) -> Result<()> {
        let multicaster = self.multicaster()?;
        for listener in self.inner.static_listeners.read().clone() {
            multicaster.add_application_listener(listener);
        }
        for name in factory.bean_names_for_type::<dyn ApplicationListener>(true) {
            multicaster.add_application_listener_bean(&name);
        }

        let early_events = self.inner.early_events.lock().take();
        if let Some(events) = early_events {
            #[cfg(feature = "logging")]
            debug!(target: "application_context", count = events.len(), "Publishing early events");

            for event in &events {
                multicaster.multicast_event(event, None)?;
            }
        }
        Ok(())
    }

    fn finish_bean_factory_initialization(&self, factory: &Arc<BeanFactory>) -> Result<()> {
        if factory.contains_bean(CONVERSION_SERVICE_BEAN_NAME)
            && factory.is_type_match::<dyn ConversionService>(CONVERSION_SERVICE_BEAN_NAME)?
        {
            factory.set_conversion_service(factory.get_bean::<dyn ConversionService>(CONVERSION_SERVICE_BEAN_NAME)?);
        }

        if !factory.has_embedded_value_resolver() {
            let environment = Arc::clone(&self.inner.environment);
            let resolver: EmbeddedValueResolver =
                Arc::new(move |value: &str| environment.resolve_required_placeholders(value));
            factory.add_embedded_value_resolver(resolver);
        }

        for name in factory.bean_names_for_type::<dyn LoadTimeWeaverAware>(false) {
            factory.get_bean_any(&name)?;
        }

        factory.freeze_configuration();
        factory.pre_instantiate_singletons()
    }

    fn finish_refresh(&self, factory: &Arc<BeanFactory>) -> Result<()> {
        self.inner.resource_loader.clear_cache();

        let processor = self.init_lifecycle_processor(factory)?;
        processor.on_refresh()?;

        self.publish_event(ApplicationEvent::ContextRefreshed(ContextEvent::new(self.inner.id.as_str())))?;

        if self
            .inner
            .environment
            .get_property_as::<bool>(LIVE_VIEW_ENABLED_PROPERTY)?
            .unwrap_or(false)
        {
            self.inner.live_view.register(self);
        }
        Ok(())
    }

    fn init_lifecycle_processor(&self, factory: &Arc<BeanFactory>) -> Result<Arc<dyn LifecycleProcessor>> {
        let processor = if factory.contains_local_bean(LIFECYCLE_PROCESSOR_BEAN_NAME) {
            factory.get_bean::<dyn LifecycleProcessor>(LIFECYCLE_PROCESSOR_BEAN_NAME)?
        } else {
            let timeout = match self.inner.lifecycle_timeout {
                Some(timeout) => Some(timeout),
                None => self
                    .inner
                    .environment
                    .get_property_as::<Duration>(TIMEOUT_PER_SHUTDOWN_PHASE_PROPERTY)?,
            };
            let default = Arc::new(match timeout {
                Some(timeout) => DefaultLifecycleProcessor::with_timeout(factory.weak(), timeout),
                None => DefaultLifecycleProcessor::new(factory.weak()),
            });
            factory.register_singleton_with(
                LIFECYCLE_PROCESSOR_BEAN_NAME,
                Arc::clone(&default) as BeanInstance,
                BeanTypes::of::<DefaultLifecycleProcessor>()
                    .with_view(|p: Arc<DefaultLifecycleProcessor>| p as Arc<dyn LifecycleProcessor>),
            )?;
            default as Arc<dyn LifecycleProcessor>
        };
        *self.inner.lifecycle_processor.write() = Some(Arc::clone(&processor));
        Ok(processor)
    }

    fn stop_lifecycle_beans(&self, processor: &Arc<dyn LifecycleProcessor>) {
        if let Err(_e) = processor.on_close() {
            #[cfg(feature = "logging")]
            warn!(
                target: "application_context",
                context = %self.inner.display_name,
                error = %_e,
                "Failed to stop lifecycle beans before destroying them"
            );
        }
    }

    fn destroy_beans(&self) {
        if let Some(factory) = self.inner.store.bean_factory() {
            factory.destroy_singletons();
        }
    }

    fn cancel_refresh(&self) {
        self.inner.active.store(false, Ordering::Release);
        self.inner.store.cancel_refresh();
        *self.inner.lifecycle_processor.write() = None;

        let mut early_events = self.inner.early_events.lock();
        if early_events.is_none() {
            *early_events = Some(Vec::new());
        }
    }

    fn reset_common_caches(&self) {
        self.inner.cache.clear();
        self.inner.resource_loader.clear_cache();
    }

    // =========================================================================
    // Close and Shutdown Hook
    // =========================================================================

    /// Publish the closed event, stop lifecycle beans, destroy singletons
    /// and close the bean factory. Only the first call after a successful
    /// refresh does anything.
    pub fn close(&self) {
        let _guard = self.inner.monitor.lock();
        self.do_close();

        if let Some(id) = self.inner.shutdown_hook.lock().take() {
            self.inner.shutdown_hooks.remove_hook(id);
        }
    }

    fn do_close(&self) {
        if !self.is_active()
            || self
                .inner
                .closed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return;
        }

        #[cfg(feature = "logging")]
        info!(target: "application_context", context = %self.inner.display_name, "Closing");

        self.inner.live_view.unregister(&self.inner.id);

        if let Err(_e) = self.publish_event(ApplicationEvent::ContextClosed(ContextEvent::new(self.inner.id.as_str()))) {
            #[cfg(feature = "logging")]
            warn!(target: "application_context", error = %_e, "Exception thrown from listener while closing");
        }

        let processor = self.inner.lifecycle_processor.read().clone();
        if let Some(processor) = processor {
            if let Err(_e) = processor.on_close() {
                #[cfg(feature = "logging")]
                warn!(target: "application_context", error = %_e, "Exception thrown from lifecycle processor on close");
            }
        }

        self.destroy_beans();
        self.inner.store.close_bean_factory();

        for extension in &self.inner.extensions {
            extension.on_close(self);
        }

        if let Some(baseline) = self.inner.early_listeners.read().clone() {
            *self.inner.static_listeners.write() = baseline;
        }
        self.inner.active.store(false, Ordering::Release);
    }

    /// Close this context when the shutdown hook registry runs. Registering
    /// twice keeps the first hook.
    pub fn register_shutdown_hook(&self) -> Result<()> {
        let _guard = self.inner.monitor.lock();
        let mut hook = self.inner.shutdown_hook.lock();
        if hook.is_none() {
            let context = self.downgrade();
            let id = self
                .inner
                .shutdown_hooks
                .add_hook(format!("{}-shutdown", self.inner.id), move || {
                    if let Some(context) = context.upgrade() {
                        let _guard = context.inner.monitor.lock();
                        context.do_close();
                    }
                })?;
            *hook = Some(id);
        }
        Ok(())
    }

    pub fn is_shutdown_hook_registered(&self) -> bool {
        self.inner.shutdown_hook.lock().is_some()
    }

    // =========================================================================
    // Start / Stop
    // =========================================================================

    fn lifecycle_processor(&self) -> Result<Arc<dyn LifecycleProcessor>> {
        self.inner.lifecycle_processor.read().clone().ok_or_else(|| {
            ContextError::illegal_state(format!(
                "LifecycleProcessor not initialized - call 'refresh' before invoking lifecycle methods via {}",
                self.inner.display_name
            ))
        })
    }

    /// Start every lifecycle bean and publish the started event
    pub fn start(&self) -> Result<()> {
        self.lifecycle_processor()?.start()?;
        self.publish_event(ApplicationEvent::ContextStarted(ContextEvent::new(self.inner.id.as_str())))
    }

    /// Stop every lifecycle bean and publish the stopped event
    pub fn stop(&self) -> Result<()> {
        self.lifecycle_processor()?.stop()?;
        self.publish_event(ApplicationEvent::ContextStopped(ContextEvent::new(self.inner.id.as_str())))
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .lifecycle_processor
            .read()
            .as_ref()
            .is_some_and(|processor| processor.is_running())
    }

    // =========================================================================
    // Events
    // =========================================================================

    fn multicaster(&self) -> Result<Arc<dyn ApplicationEventMulticaster>> {
        self.inner.multicaster.read().clone().ok_or_else(|| {
            ContextError::illegal_state(format!(
                "ApplicationEventMulticaster not initialized - call 'refresh' before multicasting events via {}",
                self.inner.display_name
            ))
        })
    }

    /// Publish an event to this context's listeners, then to the parent.
    ///
    /// Until the listeners are registered during refresh, events are
    /// buffered and delivered in publication order.
    pub fn publish_event(&self, event: ApplicationEvent) -> Result<()> {
        #[cfg(feature = "logging")]
        trace!(target: "application_context", event = %event.event_type(), "Publishing event");

        let buffered = match self.inner.early_events.lock().as_mut() {
            Some(buffer) => {
                buffer.push(event.clone());
                true
            }
            None => false,
        };
        if !buffered {
            self.multicaster()?.multicast_event(&event, None)?;
        }

        if let Some(parent) = &self.inner.parent {
            parent.publish_event(event)?;
        }
        Ok(())
    }

    /// Wrap `payload` in an event envelope and publish it
    pub fn publish<T: std::any::Any + Send + Sync>(&self, payload: T) -> Result<()> {
        self.publish_event(ApplicationEvent::payload(self.inner.id.as_str(), payload))
    }

    /// Add a listener; it survives refreshes and is forgotten on close only
    /// if it was added after the first refresh started
    pub fn add_application_listener(&self, listener: Arc<dyn ApplicationListener>) {
        if let Some(multicaster) = self.inner.multicaster.read().as_ref() {
            multicaster.add_application_listener(Arc::clone(&listener));
        }
        let mut listeners = self.inner.static_listeners.write();
        let ptr = Arc::as_ptr(&listener) as *const ();
        if !listeners.iter().any(|l| Arc::as_ptr(l) as *const () == ptr) {
            listeners.push(listener);
        }
    }

    /// Detach a listener bean from the multicaster
    pub(crate) fn remove_application_listener(&self, name: &str, listener: &Arc<dyn ApplicationListener>) {
        if let Some(multicaster) = self.inner.multicaster.read().as_ref() {
            multicaster.remove_application_listener(listener);
            multicaster.remove_application_listener_bean(name);
        }
    }

    pub fn application_listeners(&self) -> Vec<Arc<dyn ApplicationListener>> {
        self.inner.static_listeners.read().clone()
    }

    /// Add a factory post-processor run by the next refresh
    pub fn add_bean_factory_post_processor(&self, processor: Arc<dyn BeanFactoryPostProcessor>) {
        self.inner.factory_post_processors.write().push(processor);
    }

    pub fn bean_factory_post_processors(&self) -> Vec<Arc<dyn BeanFactoryPostProcessor>> {
        self.inner.factory_post_processors.read().clone()
    }

    // =========================================================================
    // Resources
    // =========================================================================

    pub fn resource_loader(&self) -> &Arc<dyn ResourceLoader> {
        &self.inner.resource_loader
    }

    pub fn get_resource(&self, location: &str) -> Resource {
        self.inner.resource_loader.get_resource(location)
    }

    pub fn get_resources(&self, pattern: &str) -> Result<Vec<Resource>> {
        self.inner.resource_loader.get_resources(pattern)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    fn registry(&self) -> Result<Arc<BeanFactory>> {
        self.inner.store.definition_registry().ok_or_else(|| {
            ContextError::illegal_state(format!(
                "{} rebuilds its bean factory on refresh: register definitions through a loader",
                self.inner.display_name
            ))
        })
    }

    fn reader(&self) -> Result<&AnnotatedBeanDefinitionReader> {
        self.inner.reader.as_ref().ok_or_else(|| {
            ContextError::illegal_state(format!(
                "{} rebuilds its bean factory on refresh: register components through a loader",
                self.inner.display_name
            ))
        })
    }

    /// Register a component through the annotated reader
    pub fn register<C: Component>(&self) -> Result<Option<String>> {
        self.reader()?.register::<C>()
    }

    /// Register a component under an explicit name
    pub fn register_named<C: Component>(&self, name: &str) -> Result<Option<String>> {
        self.reader()?.register_named::<C>(name)
    }

    /// Register an existing instance as a singleton
    pub fn register_singleton<T: crate::Injectable>(&self, name: &str, instance: Arc<T>) -> Result<()> {
        self.registry()?.register_singleton(name, instance)
    }

    /// Register a custom scope
    pub fn register_scope(&self, name: &str, scope: Arc<dyn crate::scope::Scope>) -> Result<()> {
        self.registry()?.register_scope(name, scope)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn get_bean<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        #[cfg(feature = "logging")]
        trace!(target: "application_context", bean = name, "Looking up bean");

        self.assert_active()?.get_bean::<T>(name)
    }

    pub fn get_bean_by_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        #[cfg(feature = "logging")]
        trace!(target: "application_context", bean_type = std::any::type_name::<T>(), "Looking up bean by type");

        self.assert_active()?.get_bean_by_type::<T>()
    }

    pub fn get_bean_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.assert_active()?.get_bean_named::<T>(name)
    }

    pub fn get_bean_with_args<T: ?Sized + Send + Sync + 'static>(&self, name: &str, args: &BeanArgs) -> Result<Arc<T>> {
        self.assert_active()?.get_bean_with_args::<T>(name, args)
    }

    pub fn get_bean_provider<T: ?Sized + Send + Sync + 'static>(&self) -> Result<BeanProvider<T>> {
        Ok(self.assert_active()?.get_bean_provider::<T>())
    }

    pub fn beans_of_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<(String, Arc<T>)>> {
        self.assert_active()?.beans_of_type::<T>()
    }

    pub fn bean_names_for_type<T: ?Sized + 'static>(&self, include_non_singletons: bool) -> Result<Vec<String>> {
        Ok(self.assert_active()?.bean_names_for_type::<T>(include_non_singletons))
    }

    pub fn bean_names_for_annotation(&self, annotation: &str) -> Result<Vec<String>> {
        Ok(self.assert_active()?.bean_names_for_annotation(annotation))
    }

    pub fn beans_with_annotation(&self, annotation: &str) -> Result<Vec<(String, BeanInstance)>> {
        self.assert_active()?.beans_with_annotation(annotation)
    }

    pub fn find_annotation_on_bean(&self, name: &str, annotation: &str) -> Result<Option<Annotation>> {
        self.assert_active()?.find_annotation_on_bean(name, annotation)
    }

    pub fn is_singleton(&self, name: &str) -> Result<bool> {
        self.assert_active()?.is_singleton(name)
    }

    pub fn is_prototype(&self, name: &str) -> Result<bool> {
        self.assert_active()?.is_prototype(name)
    }

    pub fn is_type_match<T: ?Sized + 'static>(&self, name: &str) -> Result<bool> {
        self.assert_active()?.is_type_match::<T>(name)
    }

    pub fn get_type_name(&self, name: &str) -> Result<&'static str> {
        self.assert_active()?.get_type_name(name)
    }

    /// True if this context or an ancestor knows the bean
    pub fn contains_bean(&self, name: &str) -> bool {
        self.inner
            .store
            .bean_factory()
            .is_some_and(|factory| factory.contains_bean(name))
    }

    pub fn contains_local_bean(&self, name: &str) -> bool {
        self.inner
            .store
            .bean_factory()
            .is_some_and(|factory| factory.contains_local_bean(name))
    }
}

fn register_property_source(factory: &BeanFactory, name: &str, source: Arc<dyn PropertySource>) -> Result<()> {
    let types = BeanTypes::of::<Arc<dyn PropertySource>>()
        .with_view(|holder: Arc<Arc<dyn PropertySource>>| Arc::clone(&*holder));
    factory.register_singleton_with(name, Arc::new(source), types)
}

impl Default for ApplicationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasRegistry for ApplicationContext {
    fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        self.registry()?.register_alias(name, alias)
    }

    fn remove_alias(&self, alias: &str) -> Result<()> {
        self.registry()?.remove_alias(alias)
    }

    fn is_alias(&self, name: &str) -> bool {
        self.inner.store.bean_factory().is_some_and(|f| f.is_alias(name))
    }

    fn aliases(&self, name: &str) -> Vec<String> {
        self.inner
            .store
            .bean_factory()
            .map(|f| f.aliases(name))
            .unwrap_or_default()
    }
}

impl BeanDefinitionRegistry for ApplicationContext {
    fn register_bean_definition(&self, name: &str, definition: BeanDefinition) -> Result<()> {
        self.registry()?.register_bean_definition(name, definition)
    }

    fn remove_bean_definition(&self, name: &str) -> Result<()> {
        self.registry()?.remove_bean_definition(name)
    }

    fn bean_definition(&self, name: &str) -> Result<Arc<BeanDefinition>> {
        self.bean_factory()?.bean_definition(name)
    }

    fn contains_bean_definition(&self, name: &str) -> bool {
        self.inner
            .store
            .bean_factory()
            .is_some_and(|f| f.contains_bean_definition(name))
    }

    fn bean_definition_names(&self) -> Vec<String> {
        self.inner
            .store
            .bean_factory()
            .map(|f| f.bean_definition_names())
            .unwrap_or_default()
    }

    fn bean_definition_count(&self) -> usize {
        self.inner
            .store
            .bean_factory()
            .map_or(0, |f| f.bean_definition_count())
    }

    fn is_bean_name_in_use(&self, name: &str) -> bool {
        self.inner
            .store
            .bean_factory()
            .is_some_and(|f| f.is_bean_name_in_use(name))
    }
}

impl ApplicationEventPublisher for ApplicationContext {
    fn publish_event(&self, event: ApplicationEvent) -> Result<()> {
        ApplicationContext::publish_event(self, event)
    }
}

impl MessageSource for ApplicationContext {
    fn resolve_message(&self, code: &str, args: &[&str], locale: &Locale) -> Option<String> {
        let source = self.inner.message_source.read().clone()?;
        source.resolve_message(code, args, locale)
    }

    fn get_message(&self, code: &str, args: &[&str], default: Option<&str>, locale: &Locale) -> Option<String> {
        match self.inner.message_source.read().clone() {
            Some(source) => source.get_message(code, args, default, locale),
            None => default.map(|d| crate::message::format_message(d, args)),
        }
    }

    fn get_message_required(&self, code: &str, args: &[&str], locale: &Locale) -> Result<String> {
        match self.inner.message_source.read().clone() {
            Some(source) => source.get_message_required(code, args, locale),
            None => Err(ContextError::illegal_state(format!(
                "MessageSource not initialized - call 'refresh' before accessing messages via {}",
                self.inner.display_name
            ))),
        }
    }
}

impl fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("id", &self.inner.id)
            .field("display_name", &self.inner.display_name)
            .field("active", &self.is_active())
            .field("closed", &self.is_closed())
            .field("parent", &self.inner.parent.as_ref().map(|p| p.id()))
            .finish()
    }
}

// =============================================================================
// Weak Handle
// =============================================================================

impl WeakApplicationContext {
    pub fn upgrade(&self) -> Option<ApplicationContext> {
        self.inner.upgrade().map(|inner| ApplicationContext { inner })
    }

    /// The context, or an error if it has been dropped
    pub fn context(&self) -> Result<ApplicationContext> {
        self.upgrade()
            .ok_or_else(|| ContextError::illegal_state("Application context has been dropped"))
    }
}

impl ApplicationEventPublisher for WeakApplicationContext {
    fn publish_event(&self, event: ApplicationEvent) -> Result<()> {
        self.context()?.publish_event(event)
    }
}

impl MessageSource for WeakApplicationContext {
    fn resolve_message(&self, code: &str, args: &[&str], locale: &Locale) -> Option<String> {
        self.upgrade()?.resolve_message(code, args, locale)
    }

    fn get_message(&self, code: &str, args: &[&str], default: Option<&str>, locale: &Locale) -> Option<String> {
        match self.upgrade() {
            Some(context) => context.get_message(code, args, default, locale),
            None => default.map(|d| crate::message::format_message(d, args)),
        }
    }
}

impl fmt::Debug for WeakApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(context) => f.debug_tuple("WeakApplicationContext").field(&context.id()).finish(),
            None => f.write_str("WeakApplicationContext(<dropped>)"),
        }
    }
}
