//! Aware callbacks and the context's built-in bean post-processors
//!
//! A bean that exposes one of the `*Aware` views receives the matching
//! context collaborator before its init callbacks run. Listener beans are
//! attached to the context once initialized and detached again when they
//! are destroyed.

use crate::container::BeanFactory;
use crate::context::{LOAD_TIME_WEAVER_BEAN_NAME, WeakApplicationContext};
use crate::environment::Environment;
use crate::error::{ContextError, Result};
use crate::event::{ApplicationEventPublisher, ApplicationListener};
use crate::message::MessageSource;
use crate::processor::{BeanPostProcessor, ManagedBean, Precedence};
use crate::resource::ResourceLoader;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{trace, warn};

// =============================================================================
// Aware Traits
// =============================================================================

/// Receives a handle to the owning context
pub trait ApplicationContextAware: Send + Sync {
    fn set_application_context(&self, context: WeakApplicationContext) -> Result<()>;
}

pub trait EnvironmentAware: Send + Sync {
    fn set_environment(&self, environment: Arc<Environment>);
}

pub trait ApplicationEventPublisherAware: Send + Sync {
    fn set_application_event_publisher(&self, publisher: Arc<dyn ApplicationEventPublisher>);
}

pub trait MessageSourceAware: Send + Sync {
    fn set_message_source(&self, source: Arc<dyn MessageSource>);
}

pub trait ResourceLoaderAware: Send + Sync {
    fn set_resource_loader(&self, loader: Arc<dyn ResourceLoader>);
}

/// Receives the `loadTimeWeaver` bean; such beans are created before all
/// other eager singletons
pub trait LoadTimeWeaverAware: Send + Sync {
    fn set_load_time_weaver(&self, weaver: Arc<dyn LoadTimeWeaver>);
}

// =============================================================================
// Context Aware Processor
// =============================================================================

/// Delivers environment, resource loader, publisher, message source and
/// context to aware beans, in that order
pub struct ContextAwareProcessor {
    context: WeakApplicationContext,
}

impl ContextAwareProcessor {
    pub fn new(context: WeakApplicationContext) -> Self {
        Self { context }
    }
}

impl BeanPostProcessor for ContextAwareProcessor {
    fn precedence(&self) -> Precedence {
        Precedence::Priority(Precedence::HIGHEST)
    }

    fn post_process_before_initialization(&self, bean: ManagedBean) -> Result<ManagedBean> {
        let types = bean.types();
        let is_aware = types.exposes_type::<dyn EnvironmentAware>()
            || types.exposes_type::<dyn ResourceLoaderAware>()
            || types.exposes_type::<dyn ApplicationEventPublisherAware>()
            || types.exposes_type::<dyn MessageSourceAware>()
            || types.exposes_type::<dyn ApplicationContextAware>();
        if !is_aware {
            return Ok(bean);
        }

        let context = self.context.context()?;

        #[cfg(feature = "logging")]
        trace!(target: "application_context", bean = bean.name(), "Invoking aware callbacks");

        if let Some(aware) = bean.view::<dyn EnvironmentAware>() {
            aware.set_environment(Arc::clone(context.environment()));
        }
        if let Some(aware) = bean.view::<dyn ResourceLoaderAware>() {
            aware.set_resource_loader(Arc::clone(context.resource_loader()));
        }
        if let Some(aware) = bean.view::<dyn ApplicationEventPublisherAware>() {
            aware.set_application_event_publisher(Arc::new(self.context.clone()));
        }
        if let Some(aware) = bean.view::<dyn MessageSourceAware>() {
            aware.set_message_source(Arc::new(self.context.clone()));
        }
        if let Some(aware) = bean.view::<dyn ApplicationContextAware>() {
            aware.set_application_context(self.context.clone())?;
        }
        Ok(bean)
    }
}

impl fmt::Debug for ContextAwareProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextAwareProcessor").finish_non_exhaustive()
    }
}

// =============================================================================
// Listener Detection
// =============================================================================

/// Adds singleton listener beans to the context after initialization and
/// removes them from the multicaster before destruction
pub struct ListenerDetector {
    context: WeakApplicationContext,
}

impl ListenerDetector {
    pub fn new(context: WeakApplicationContext) -> Self {
        Self { context }
    }
}

impl BeanPostProcessor for ListenerDetector {
    fn precedence(&self) -> Precedence {
        Precedence::Ordered(Precedence::LOWEST)
    }

    fn post_process_after_initialization(&self, bean: ManagedBean) -> Result<ManagedBean> {
        let Some(listener) = bean.view::<dyn ApplicationListener>() else {
            return Ok(bean);
        };
        let Some(context) = self.context.upgrade() else {
            return Ok(bean);
        };

        let singleton = context
            .bean_factory()?
            .bean_definition_if_present(bean.name())
            .is_none_or(|definition| definition.is_singleton());
        if singleton {
            context.add_application_listener(listener);
        } else {
            #[cfg(feature = "logging")]
            warn!(
                target: "application_context",
                bean = bean.name(),
                "Inner bean implements ApplicationListener but is not reachable for event multicasting \
                 by its containing context because it does not have singleton scope"
            );
        }
        Ok(bean)
    }

    fn requires_destruction(&self, bean: &ManagedBean) -> bool {
        bean.types().exposes_type::<dyn ApplicationListener>()
    }

    fn post_process_before_destruction(&self, bean: &ManagedBean) -> Result<()> {
        if let (Some(listener), Some(context)) = (bean.view::<dyn ApplicationListener>(), self.context.upgrade()) {
            context.remove_application_listener(bean.name(), &listener);
        }
        Ok(())
    }
}

impl fmt::Debug for ListenerDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerDetector").finish_non_exhaustive()
    }
}

// =============================================================================
// Load-Time Weaving
// =============================================================================

/// Rewrites artifact bytes as they are loaded; `None` leaves them unchanged
pub type ArtifactTransformer = Arc<dyn Fn(&str, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Applies registered transformers to artifacts loaded after refresh
pub trait LoadTimeWeaver: Send + Sync {
    fn add_transformer(&self, transformer: ArtifactTransformer);

    /// Run every transformer in registration order
    fn transform(&self, name: &str, bytes: &[u8]) -> Vec<u8>;
}

/// In-memory weaver
#[derive(Default)]
pub struct SimpleLoadTimeWeaver {
    transformers: RwLock<Vec<ArtifactTransformer>>,
}

impl SimpleLoadTimeWeaver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transformer_count(&self) -> usize {
        self.transformers.read().len()
    }
}

impl LoadTimeWeaver for SimpleLoadTimeWeaver {
    fn add_transformer(&self, transformer: ArtifactTransformer) {
        self.transformers.write().push(transformer);
    }

    fn transform(&self, name: &str, bytes: &[u8]) -> Vec<u8> {
        let transformers = self.transformers.read().clone();
        let mut current = bytes.to_vec();
        for transformer in transformers {
            if let Some(rewritten) = transformer(name, &current) {
                current = rewritten;
            }
        }
        current
    }
}

impl fmt::Debug for SimpleLoadTimeWeaver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleLoadTimeWeaver")
            .field("transformers", &self.transformer_count())
            .finish()
    }
}

/// Hands the `loadTimeWeaver` bean to [`LoadTimeWeaverAware`] beans
pub struct LoadTimeWeaverAwareProcessor {
    factory: Weak<BeanFactory>,
}

impl LoadTimeWeaverAwareProcessor {
    pub fn new(factory: Weak<BeanFactory>) -> Self {
        Self { factory }
    }
}

impl BeanPostProcessor for LoadTimeWeaverAwareProcessor {
    fn post_process_before_initialization(&self, bean: ManagedBean) -> Result<ManagedBean> {
        if let Some(aware) = bean.view::<dyn LoadTimeWeaverAware>() {
            let factory = self.factory.upgrade().ok_or(ContextError::FactoryDropped)?;
            aware.set_load_time_weaver(factory.get_bean::<dyn LoadTimeWeaver>(LOAD_TIME_WEAVER_BEAN_NAME)?);
        }
        Ok(bean)
    }
}

impl fmt::Debug for LoadTimeWeaverAwareProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadTimeWeaverAwareProcessor").finish_non_exhaustive()
    }
}
