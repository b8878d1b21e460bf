//! Factory and bean post-processors
//!
//! Post-processors are the extension points of the container:
//!
//! - [`BeanFactoryPostProcessor`] runs once per refresh, after all
//!   definitions are loaded and before any application bean is created. Its
//!   registry phase may add definitions; its factory phase may tweak them.
//! - [`BeanPostProcessor`] sees every bean around its initialization and
//!   may wrap or replace it.
//!
//! Both are ordered in three tiers by [`Precedence`]: priority-ordered
//! first, then ordered, then everything else in registration order.

use crate::container::BeanFactory;
use crate::definition::{BeanRole, BeanTypes};
use crate::error::Result;
use crate::factory::BeanInstance;
use crate::registry::BeanDefinitionRegistry;
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, info};

// =============================================================================
// Ordering
// =============================================================================

/// Position of a processor (or lifecycle bean) in its invocation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precedence {
    /// Runs before all `Ordered` and `Unordered` processors
    Priority(i32),
    /// Runs before `Unordered` processors
    Ordered(i32),
    /// Registration order, after everything else
    #[default]
    Unordered,
}

impl Precedence {
    /// Highest possible precedence
    pub const HIGHEST: i32 = i32::MIN;
    /// Lowest possible precedence
    pub const LOWEST: i32 = i32::MAX;

    #[inline]
    fn sort_key(&self) -> (u8, i32) {
        match self {
            Self::Priority(order) => (0, *order),
            Self::Ordered(order) => (1, *order),
            Self::Unordered => (2, 0),
        }
    }
}

/// Stable sort by precedence; ties keep registration order
pub fn sort_by_precedence<P: ?Sized>(items: &mut [Arc<P>], precedence: impl Fn(&P) -> Precedence) {
    items.sort_by_key(|item| precedence(item.as_ref()).sort_key());
}

// =============================================================================
// Managed Bean
// =============================================================================

/// A bean instance travelling through the post-processor chain
#[derive(Clone)]
pub struct ManagedBean {
    name: String,
    instance: BeanInstance,
    types: Arc<BeanTypes>,
}

impl ManagedBean {
    pub fn new(name: impl Into<String>, instance: BeanInstance, types: Arc<BeanTypes>) -> Self {
        Self {
            name: name.into(),
            instance,
            types,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn instance(&self) -> &BeanInstance {
        &self.instance
    }

    #[inline]
    pub fn types(&self) -> &Arc<BeanTypes> {
        &self.types
    }

    /// View the bean as `I` if it exposes that type
    #[inline]
    pub fn view<I: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<I>> {
        self.types.view::<I>(&self.instance)
    }

    /// Replace the instance, e.g. with a wrapper exposing other types
    pub fn replace(self, instance: BeanInstance, types: BeanTypes) -> Self {
        Self {
            name: self.name,
            instance,
            types: Arc::new(types),
        }
    }

    pub(crate) fn into_parts(self) -> (String, BeanInstance, Arc<BeanTypes>) {
        (self.name, self.instance, self.types)
    }
}

impl fmt::Debug for ManagedBean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedBean")
            .field("name", &self.name)
            .field("type", &self.types.type_name())
            .finish()
    }
}

// =============================================================================
// Bean Callbacks
// =============================================================================

/// Initialization callback run after post-processors saw the bean
pub trait InitializingBean: Send + Sync {
    fn after_properties_set(&self) -> Result<()>;
}

/// Destruction callback run when the owning scope shuts down
pub trait DisposableBean: Send + Sync {
    fn destroy(&self) -> Result<()>;
}

/// Callback run once every eager singleton has been created
pub trait SmartInitializingSingleton: Send + Sync {
    fn after_singletons_instantiated(&self) -> Result<()>;
}

// =============================================================================
// Post-processor Traits
// =============================================================================

/// Hook that sees every bean around its initialization
pub trait BeanPostProcessor: Send + Sync {
    fn precedence(&self) -> Precedence {
        Precedence::Unordered
    }

    /// Called before init callbacks
    fn post_process_before_initialization(&self, bean: ManagedBean) -> Result<ManagedBean> {
        Ok(bean)
    }

    /// Called after init callbacks
    fn post_process_after_initialization(&self, bean: ManagedBean) -> Result<ManagedBean> {
        Ok(bean)
    }

    /// Whether `post_process_before_destruction` must run for this bean
    fn requires_destruction(&self, _bean: &ManagedBean) -> bool {
        false
    }

    fn post_process_before_destruction(&self, _bean: &ManagedBean) -> Result<()> {
        Ok(())
    }
}

/// Hook that runs against the whole factory before beans are created
pub trait BeanFactoryPostProcessor: Send + Sync {
    fn precedence(&self) -> Precedence {
        Precedence::Unordered
    }

    /// Registry phase, runs for every processor before any factory phase
    fn post_process_bean_definition_registry(&self, _registry: &dyn BeanDefinitionRegistry) -> Result<()> {
        Ok(())
    }

    /// Factory phase
    fn post_process_bean_factory(&self, factory: &BeanFactory) -> Result<()>;
}

// =============================================================================
// Invocation
// =============================================================================

/// Collect the factory post-processor beans not seen yet, in precedence order
fn collect_factory_processors(
    factory: &BeanFactory,
    seen: &mut Vec<String>,
) -> Result<Vec<Arc<dyn BeanFactoryPostProcessor>>> {
    let mut found = Vec::new();
    for name in factory.bean_names_for_type::<dyn BeanFactoryPostProcessor>(true) {
        if seen.contains(&name) {
            continue;
        }
        found.push(factory.get_bean::<dyn BeanFactoryPostProcessor>(&name)?);
        seen.push(name);
    }
    sort_by_precedence(&mut found, |p| p.precedence());
    Ok(found)
}

/// Run the registry phase and then the factory phase of every factory
/// post-processor: programmatic ones first, then beans.
///
/// Bean processors are re-collected after each registry round because the
/// registry phase may register further processors.
pub fn invoke_bean_factory_post_processors(
    factory: &BeanFactory,
    programmatic: &[Arc<dyn BeanFactoryPostProcessor>],
) -> Result<()> {
    for processor in programmatic {
        processor.post_process_bean_definition_registry(factory)?;
    }

    let mut seen = Vec::new();
    let mut from_beans: Vec<Arc<dyn BeanFactoryPostProcessor>> = Vec::new();
    loop {
        let round = collect_factory_processors(factory, &mut seen)?;
        if round.is_empty() {
            break;
        }
        for processor in &round {
            processor.post_process_bean_definition_registry(factory)?;
        }
        from_beans.extend(round);
    }
    sort_by_precedence(&mut from_beans, |p| p.precedence());

    for processor in programmatic.iter().chain(from_beans.iter()) {
        processor.post_process_bean_factory(factory)?;
    }

    #[cfg(feature = "logging")]
    debug!(
        target: "application_context",
        programmatic = programmatic.len(),
        beans = from_beans.len(),
        "Invoked bean factory post-processors"
    );

    // Processors may have changed definitions
    factory.clear_metadata_cache();
    Ok(())
}

/// Instantiate bean post-processor beans and add them to the factory in
/// precedence order
pub fn register_bean_post_processors(factory: &BeanFactory) -> Result<()> {
    let names = factory.bean_names_for_type::<dyn BeanPostProcessor>(true);

    // Beans created while processors are still being registered miss some
    // of them; the checker reports those
    let target = factory.bean_post_processor_count() + 1 + names.len();
    factory.add_bean_post_processor(Arc::new(PostProcessorChecker {
        factory: factory.weak(),
        target,
    }));

    let mut processors = Vec::with_capacity(names.len());
    for name in &names {
        processors.push(factory.get_bean::<dyn BeanPostProcessor>(name)?);
    }
    sort_by_precedence(&mut processors, |p| p.precedence());
    for processor in processors {
        factory.add_bean_post_processor(processor);
    }

    #[cfg(feature = "logging")]
    debug!(
        target: "application_context",
        registered = names.len(),
        total = factory.bean_post_processor_count(),
        "Registered bean post-processors"
    );

    Ok(())
}

/// Reports beans created before every post-processor was registered
struct PostProcessorChecker {
    factory: Weak<BeanFactory>,
    target: usize,
}

impl BeanPostProcessor for PostProcessorChecker {
    fn post_process_after_initialization(&self, bean: ManagedBean) -> Result<ManagedBean> {
        let Some(factory) = self.factory.upgrade() else {
            return Ok(bean);
        };
        let infrastructure = factory
            .bean_definition_if_present(bean.name())
            .is_some_and(|d| d.role() == BeanRole::Infrastructure);
        let processor = bean.types().exposes_type::<dyn BeanPostProcessor>();
        if !processor && !infrastructure && factory.bean_post_processor_count() < self.target {
            #[cfg(feature = "logging")]
            info!(
                target: "application_context",
                bean = bean.name(),
                bean_type = bean.types().type_name(),
                "Bean is not eligible for getting processed by all BeanPostProcessors"
            );
        }
        Ok(bean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BeanDefinitionBuilder;
    use parking_lot::Mutex;

    struct Named(&'static str, Precedence);

    #[test]
    fn test_precedence_sort_is_stable() {
        let mut items = vec![
            Arc::new(Named("plain-1", Precedence::Unordered)),
            Arc::new(Named("ordered-5", Precedence::Ordered(5))),
            Arc::new(Named("priority", Precedence::Priority(100))),
            Arc::new(Named("plain-2", Precedence::Unordered)),
            Arc::new(Named("ordered-1", Precedence::Ordered(1))),
        ];
        sort_by_precedence(&mut items, |n| n.1);
        let names: Vec<_> = items.iter().map(|n| n.0).collect();
        assert_eq!(
            names,
            ["priority", "ordered-1", "ordered-5", "plain-1", "plain-2"]
        );
    }

    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        label: &'static str,
        precedence: Precedence,
    }

    impl BeanFactoryPostProcessor for Recorder {
        fn precedence(&self) -> Precedence {
            self.precedence
        }

        fn post_process_bean_definition_registry(&self, _registry: &dyn BeanDefinitionRegistry) -> Result<()> {
            self.log.lock().push(format!("registry:{}", self.label));
            Ok(())
        }

        fn post_process_bean_factory(&self, _factory: &BeanFactory) -> Result<()> {
            self.log.lock().push(format!("factory:{}", self.label));
            Ok(())
        }
    }

    fn recorder_definition(
        log: &Arc<Mutex<Vec<String>>>,
        label: &'static str,
        precedence: Precedence,
    ) -> crate::BeanDefinition {
        let log = Arc::clone(log);
        BeanDefinitionBuilder::<Recorder>::new()
            .supplier(move |_| {
                Ok(Recorder {
                    log: Arc::clone(&log),
                    label,
                    precedence,
                })
            })
            .view(|r| r as Arc<dyn BeanFactoryPostProcessor>)
            .build()
    }

    #[test]
    fn test_registry_phase_runs_before_factory_phase() {
        let factory = BeanFactory::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        factory
            .register_bean_definition("plain", recorder_definition(&log, "plain", Precedence::Unordered))
            .unwrap();
        factory
            .register_bean_definition("first", recorder_definition(&log, "first", Precedence::Priority(0)))
            .unwrap();

        let programmatic: Vec<Arc<dyn BeanFactoryPostProcessor>> = vec![Arc::new(Recorder {
            log: Arc::clone(&log),
            label: "manual",
            precedence: Precedence::Unordered,
        })];

        invoke_bean_factory_post_processors(&factory, &programmatic).unwrap();

        assert_eq!(
            *log.lock(),
            [
                "registry:manual",
                "registry:first",
                "registry:plain",
                "factory:manual",
                "factory:first",
                "factory:plain",
            ]
        );
    }

    struct Registrar;

    impl BeanFactoryPostProcessor for Registrar {
        fn post_process_bean_definition_registry(&self, registry: &dyn BeanDefinitionRegistry) -> Result<()> {
            registry.register_bean_definition(
                "late",
                BeanDefinitionBuilder::<u64>::new().supplier(|_| Ok(99)).build(),
            )
        }

        fn post_process_bean_factory(&self, _factory: &BeanFactory) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_phase_can_add_definitions() {
        let factory = BeanFactory::new();
        invoke_bean_factory_post_processors(&factory, &[Arc::new(Registrar)]).unwrap();
        assert_eq!(*factory.get_bean::<u64>("late").unwrap(), 99);
    }

    struct Doubler;

    impl BeanPostProcessor for Doubler {
        fn post_process_after_initialization(&self, bean: ManagedBean) -> Result<ManagedBean> {
            match bean.view::<u32>() {
                Some(value) => {
                    let doubled = *value * 2;
                    Ok(bean.replace(Arc::new(doubled), BeanTypes::of::<u32>()))
                }
                None => Ok(bean),
            }
        }
    }

    #[test]
    fn test_bean_post_processors_from_beans() {
        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "doubler",
                BeanDefinitionBuilder::<Doubler>::new()
                    .supplier(|_| Ok(Doubler))
                    .view(|d| d as Arc<dyn BeanPostProcessor>)
                    .build(),
            )
            .unwrap();
        factory
            .register_bean_definition(
                "answer",
                BeanDefinitionBuilder::<u32>::new().supplier(|_| Ok(21)).build(),
            )
            .unwrap();

        register_bean_post_processors(&factory).unwrap();
        // checker + doubler
        assert_eq!(factory.bean_post_processor_count(), 2);
        assert_eq!(*factory.get_bean::<u32>("answer").unwrap(), 42);
    }
}
