//! Start/stop lifecycle of context beans
//!
//! Beans exposing [`Lifecycle`] or [`SmartLifecycle`] are started and
//! stopped by the context's [`LifecycleProcessor`]. Smart beans are grouped
//! by phase: phases start low to high and stop high to low, and every stop
//! phase waits a bounded time for asynchronous stop callbacks.

use crate::container::BeanFactory;
use crate::error::{ContextError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[cfg(feature = "logging")]
use tracing::{debug, info, warn};

/// Phase of smart beans that do not choose one; started last, stopped first
pub const DEFAULT_PHASE: i32 = i32::MAX;

/// Default upper bound for one stop phase
pub const DEFAULT_TIMEOUT_PER_SHUTDOWN_PHASE: Duration = Duration::from_secs(30);

/// Property overriding the stop phase bound, e.g. `10s`
pub const TIMEOUT_PER_SHUTDOWN_PHASE_PROPERTY: &str = "lifecycle.timeout-per-shutdown-phase";

/// Called once an asynchronous stop has completed
pub type StopCallback = Box<dyn FnOnce() + Send>;

/// A component that can be started and stopped
pub trait Lifecycle: Send + Sync {
    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// Lifecycle component with a phase, auto-startup and asynchronous stop
pub trait SmartLifecycle: Lifecycle {
    /// Start on context refresh, not only on an explicit `start()`
    fn is_auto_startup(&self) -> bool {
        true
    }

    fn phase(&self) -> i32 {
        DEFAULT_PHASE
    }

    /// Stop and call `callback` when done, possibly from another thread.
    ///
    /// The processor waits for the callback at most the per-phase timeout.
    fn stop_with_callback(&self, callback: StopCallback) -> Result<()> {
        let result = self.stop();
        callback();
        result
    }
}

/// Strategy driving the lifecycle beans of a context
pub trait LifecycleProcessor: Lifecycle {
    /// Context refreshed: start auto-startup beans
    fn on_refresh(&self) -> Result<()>;

    /// Context closing: stop everything that is running
    fn on_close(&self) -> Result<()>;
}

// =============================================================================
// Default Processor
// =============================================================================

#[derive(Clone)]
enum LifecycleBean {
    Smart(Arc<dyn SmartLifecycle>),
    Plain(Arc<dyn Lifecycle>),
}

impl LifecycleBean {
    fn phase(&self) -> i32 {
        match self {
            LifecycleBean::Smart(bean) => bean.phase(),
            LifecycleBean::Plain(_) => 0,
        }
    }

    fn is_auto_startup(&self) -> bool {
        matches!(self, LifecycleBean::Smart(bean) if bean.is_auto_startup())
    }

    fn is_running(&self) -> bool {
        match self {
            LifecycleBean::Smart(bean) => bean.is_running(),
            LifecycleBean::Plain(bean) => bean.is_running(),
        }
    }

    fn start(&self) -> Result<()> {
        match self {
            LifecycleBean::Smart(bean) => bean.start(),
            LifecycleBean::Plain(bean) => bean.start(),
        }
    }
}

/// Default processor: phase groups, dependency order, bounded stop wait
pub struct DefaultLifecycleProcessor {
    factory: Weak<BeanFactory>,
    timeout_per_shutdown_phase: RwLock<Duration>,
    running: AtomicBool,
}

impl DefaultLifecycleProcessor {
    pub fn new(factory: Weak<BeanFactory>) -> Self {
        Self {
            factory,
            timeout_per_shutdown_phase: RwLock::new(DEFAULT_TIMEOUT_PER_SHUTDOWN_PHASE),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_timeout(factory: Weak<BeanFactory>, timeout: Duration) -> Self {
        let processor = Self::new(factory);
        processor.set_timeout_per_shutdown_phase(timeout);
        processor
    }

    pub fn set_timeout_per_shutdown_phase(&self, timeout: Duration) {
        *self.timeout_per_shutdown_phase.write() = timeout;
    }

    pub fn timeout_per_shutdown_phase(&self) -> Duration {
        *self.timeout_per_shutdown_phase.read()
    }

    fn factory(&self) -> Result<Arc<BeanFactory>> {
        self.factory.upgrade().ok_or(ContextError::FactoryDropped)
    }

    /// Lifecycle singletons, in registration order, keyed by name.
    ///
    /// Plain lifecycle beans are only included once created; smart ones
    /// are created here.
    fn lifecycle_beans(&self, factory: &BeanFactory) -> Result<Vec<(String, LifecycleBean)>> {
        let smart = factory.bean_names_for_type::<dyn SmartLifecycle>(false);
        let mut names = factory.bean_names_for_type::<dyn Lifecycle>(false);
        for name in &smart {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        let mut beans = Vec::with_capacity(names.len());
        for name in names {
            // The processor itself is registered as a bean
            if factory.is_type_match::<dyn LifecycleProcessor>(&name)? {
                continue;
            }
            let bean = if smart.contains(&name) {
                LifecycleBean::Smart(factory.get_bean::<dyn SmartLifecycle>(&name)?)
            } else if factory.contains_singleton(&name) {
                LifecycleBean::Plain(factory.get_bean::<dyn Lifecycle>(&name)?)
            } else {
                continue;
            };
            beans.push((name, bean));
        }
        Ok(beans)
    }

    fn start_beans(&self, auto_startup_only: bool) -> Result<()> {
        let factory = self.factory()?;
        let beans = self.lifecycle_beans(&factory)?;

        let mut phases: BTreeMap<i32, Vec<String>> = BTreeMap::new();
        for (name, bean) in &beans {
            if !auto_startup_only || bean.is_auto_startup() {
                phases.entry(bean.phase()).or_default().push(name.clone());
            }
        }
        if phases.is_empty() {
            return Ok(());
        }

        let lookup: BTreeMap<String, LifecycleBean> = beans.into_iter().collect();
        let mut started = HashSet::new();
        for (_phase, members) in &phases {
            #[cfg(feature = "logging")]
            debug!(
                target: "application_context",
                phase = *_phase,
                beans = members.len(),
                "Starting beans in phase"
            );

            for name in members {
                self.do_start(&factory, &lookup, name, auto_startup_only, &mut started)?;
            }
        }
        Ok(())
    }

    /// Start `name` after the lifecycle beans it depends on
    fn do_start(
        &self,
        factory: &BeanFactory,
        lookup: &BTreeMap<String, LifecycleBean>,
        name: &str,
        auto_startup_only: bool,
        started: &mut HashSet<String>,
    ) -> Result<()> {
        if !started.insert(name.to_string()) {
            return Ok(());
        }
        let Some(bean) = lookup.get(name) else {
            return Ok(());
        };

        for dependency in factory.dependencies_of(name) {
            self.do_start(factory, lookup, &dependency, auto_startup_only, started)?;
        }

        if !bean.is_running() && (!auto_startup_only || bean.is_auto_startup()) {
            #[cfg(feature = "logging")]
            debug!(target: "application_context", bean = name, "Starting lifecycle bean");

            bean.start().map_err(|e| ContextError::LifecycleFailed {
                name: name.to_string(),
                action: "start",
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn stop_beans(&self) -> Result<()> {
        let factory = self.factory()?;
        let beans = self.lifecycle_beans(&factory)?;

        let mut phases: BTreeMap<i32, Vec<String>> = BTreeMap::new();
        for (name, bean) in &beans {
            phases.entry(bean.phase()).or_default().push(name.clone());
        }

        let lookup: BTreeMap<String, LifecycleBean> = beans.into_iter().collect();
        let timeout = self.timeout_per_shutdown_phase();
        let mut stopped = HashSet::new();
        let mut first_error = None;

        for (phase, members) in phases.iter().rev() {
            let (tx, rx) = mpsc::channel::<String>();
            let mut pending = HashSet::new();
            for name in members {
                if let Err(e) = self.do_stop(&factory, &lookup, name, &tx, &mut pending, &mut stopped) {
                    #[cfg(feature = "logging")]
                    warn!(target: "application_context", bean = %name, error = %e, "Failed to stop bean");
                    first_error.get_or_insert(e);
                }
            }
            drop(tx);
            wait_for_phase(*phase, &rx, pending, timeout);
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Stop the beans depending on `name`, then `name` itself
    fn do_stop(
        &self,
        factory: &BeanFactory,
        lookup: &BTreeMap<String, LifecycleBean>,
        name: &str,
        tx: &mpsc::Sender<String>,
        pending: &mut HashSet<String>,
        stopped: &mut HashSet<String>,
    ) -> Result<()> {
        if !stopped.insert(name.to_string()) {
            return Ok(());
        }
        let Some(bean) = lookup.get(name) else {
            return Ok(());
        };

        for dependent in factory.dependents_of(name) {
            self.do_stop(factory, lookup, &dependent, tx, pending, stopped)?;
        }

        if !bean.is_running() {
            return Ok(());
        }

        #[cfg(feature = "logging")]
        debug!(target: "application_context", bean = name, "Stopping lifecycle bean");

        let failed = |e: ContextError| ContextError::LifecycleFailed {
            name: name.to_string(),
            action: "stop",
            reason: e.to_string(),
        };
        match bean {
            LifecycleBean::Smart(smart) => {
                pending.insert(name.to_string());
                let tx = tx.clone();
                let done = name.to_string();
                smart
                    .stop_with_callback(Box::new(move || {
                        // The receiver is gone once the phase timed out
                        let _ = tx.send(done);
                    }))
                    .map_err(failed)
            }
            LifecycleBean::Plain(plain) => plain.stop().map_err(failed),
        }
    }
}

/// Wait until every pending bean of the phase reported back or time runs out
fn wait_for_phase(_phase: i32, rx: &mpsc::Receiver<String>, mut pending: HashSet<String>, timeout: Duration) {
    // A timeout too large to add to the clock waits without a deadline
    let deadline = Instant::now().checked_add(timeout);
    while !pending.is_empty() {
        let received = match deadline {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(name) => {
                pending.remove(&name);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                #[cfg(feature = "logging")]
                info!(
                    target: "application_context",
                    phase = _phase,
                    timeout_ms = timeout.as_millis() as u64,
                    still_running = ?pending,
                    "Shutdown phase ends with beans still running"
                );
                return;
            }
            // Every callback was dropped without being called
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

impl Lifecycle for DefaultLifecycleProcessor {
    fn start(&self) -> Result<()> {
        self.start_beans(false)?;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let result = self.stop_beans();
        self.running.store(false, Ordering::Release);
        result
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl LifecycleProcessor for DefaultLifecycleProcessor {
    fn on_refresh(&self) -> Result<()> {
        self.start_beans(true)?;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn on_close(&self) -> Result<()> {
        let result = self.stop_beans();
        self.running.store(false, Ordering::Release);
        result
    }
}

impl fmt::Debug for DefaultLifecycleProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultLifecycleProcessor")
            .field("timeout_per_shutdown_phase", &self.timeout_per_shutdown_phase())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BeanDefinitionBuilder;
    use crate::registry::BeanDefinitionRegistry;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Server {
        name: &'static str,
        phase: i32,
        auto: bool,
        running: AtomicBool,
        log: Log,
    }

    impl Server {
        fn new(name: &'static str, phase: i32, log: &Log) -> Self {
            Self {
                name,
                phase,
                auto: true,
                running: AtomicBool::new(false),
                log: Arc::clone(log),
            }
        }
    }

    impl Lifecycle for Server {
        fn start(&self) -> Result<()> {
            self.running.store(true, Ordering::SeqCst);
            self.log.lock().push(format!("start:{}", self.name));
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.running.store(false, Ordering::SeqCst);
            self.log.lock().push(format!("stop:{}", self.name));
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    impl SmartLifecycle for Server {
        fn is_auto_startup(&self) -> bool {
            self.auto
        }

        fn phase(&self) -> i32 {
            self.phase
        }
    }

    fn register(factory: &BeanFactory, name: &'static str, make: impl Fn() -> Server + Send + Sync + 'static) {
        factory
            .register_bean_definition(
                name,
                BeanDefinitionBuilder::<Server>::new()
                    .supplier(move |_| Ok(make()))
                    .view(|s| s as Arc<dyn Lifecycle>)
                    .view(|s| s as Arc<dyn SmartLifecycle>)
                    .build(),
            )
            .unwrap();
    }

    #[test]
    fn test_phases_start_low_to_high_and_stop_in_reverse() {
        let log: Log = Arc::default();
        let factory = BeanFactory::new();
        let l = Arc::clone(&log);
        register(&factory, "web", move || Server::new("web", 10, &l));
        let l = Arc::clone(&log);
        register(&factory, "db", move || Server::new("db", -10, &l));

        let processor = DefaultLifecycleProcessor::new(factory.weak());
        processor.on_refresh().unwrap();
        assert!(processor.is_running());
        processor.on_close().unwrap();
        assert!(!processor.is_running());

        assert_eq!(*log.lock(), ["start:db", "start:web", "stop:web", "stop:db"]);
    }

    #[test]
    fn test_auto_startup_only_on_refresh() {
        let log: Log = Arc::default();
        let factory = BeanFactory::new();
        let l = Arc::clone(&log);
        register(&factory, "manual", move || Server {
            auto: false,
            ..Server::new("manual", 0, &l)
        });

        let processor = DefaultLifecycleProcessor::new(factory.weak());
        processor.on_refresh().unwrap();
        assert!(log.lock().is_empty());

        processor.start().unwrap();
        assert_eq!(*log.lock(), ["start:manual"]);
    }

    #[test]
    fn test_dependencies_start_first_and_stop_last() {
        let log: Log = Arc::default();
        let factory = BeanFactory::new();
        let l = Arc::clone(&log);
        factory
            .register_bean_definition(
                "api",
                BeanDefinitionBuilder::<Server>::new()
                    .supplier(move |_| Ok(Server::new("api", 0, &l)))
                    .view(|s| s as Arc<dyn SmartLifecycle>)
                    .depends_on("cache")
                    .build(),
            )
            .unwrap();
        // registered after its dependent
        let l = Arc::clone(&log);
        register(&factory, "cache", move || Server::new("cache", 0, &l));

        let processor = DefaultLifecycleProcessor::new(factory.weak());
        processor.on_refresh().unwrap();
        processor.on_close().unwrap();
        assert_eq!(*log.lock(), ["start:cache", "start:api", "stop:api", "stop:cache"]);
    }

    #[test]
    fn test_stop_waits_for_async_callback_up_to_timeout() {
        struct Slow {
            running: AtomicBool,
        }
        impl Lifecycle for Slow {
            fn start(&self) -> Result<()> {
                self.running.store(true, Ordering::SeqCst);
                Ok(())
            }
            fn stop(&self) -> Result<()> {
                self.running.store(false, Ordering::SeqCst);
                Ok(())
            }
            fn is_running(&self) -> bool {
                self.running.load(Ordering::SeqCst)
            }
        }
        impl SmartLifecycle for Slow {
            fn stop_with_callback(&self, callback: StopCallback) -> Result<()> {
                // never calls back
                self.running.store(false, Ordering::SeqCst);
                std::mem::forget(callback);
                Ok(())
            }
        }

        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "slow",
                BeanDefinitionBuilder::<Slow>::new()
                    .supplier(|_| {
                        Ok(Slow {
                            running: AtomicBool::new(false),
                        })
                    })
                    .view(|s| s as Arc<dyn SmartLifecycle>)
                    .build(),
            )
            .unwrap();

        let processor = DefaultLifecycleProcessor::with_timeout(factory.weak(), Duration::from_millis(50));
        processor.on_refresh().unwrap();
        let started = Instant::now();
        processor.on_close().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_unrepresentable_timeout_waits_without_deadline() {
        let log: Log = Arc::default();
        let factory = BeanFactory::new();
        let l = Arc::clone(&log);
        register(&factory, "web", move || Server::new("web", 0, &l));

        let processor = DefaultLifecycleProcessor::with_timeout(factory.weak(), Duration::MAX);
        processor.on_refresh().unwrap();
        processor.on_close().unwrap();

        assert!(!processor.is_running());
        assert_eq!(*log.lock(), ["start:web", "stop:web"]);
    }

    #[test]
    fn test_start_failure_is_reported() {
        struct Broken;
        impl Lifecycle for Broken {
            fn start(&self) -> Result<()> {
                Err(ContextError::other("port in use"))
            }
            fn stop(&self) -> Result<()> {
                Ok(())
            }
            fn is_running(&self) -> bool {
                false
            }
        }
        impl SmartLifecycle for Broken {}

        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "broken",
                BeanDefinitionBuilder::<Broken>::new()
                    .supplier(|_| Ok(Broken))
                    .view(|b| b as Arc<dyn SmartLifecycle>)
                    .build(),
            )
            .unwrap();

        let processor = DefaultLifecycleProcessor::new(factory.weak());
        let err = processor.on_refresh().unwrap_err();
        assert!(matches!(err, ContextError::LifecycleFailed { action: "start", .. }));
        assert!(!processor.is_running());
    }
}
