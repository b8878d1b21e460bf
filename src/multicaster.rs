//! Event multicasting
//!
//! [`SimpleApplicationEventMulticaster`] delivers each event synchronously,
//! in registration order, to the listeners accepting its type. Listeners
//! registered by bean name are looked up in the factory at dispatch time.

use crate::container::BeanFactory;
use crate::error::{ContextError, Result};
use crate::event::{ApplicationEvent, ApplicationListener, EventType};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{trace, warn};

/// Manages listeners and broadcasts events to them
pub trait ApplicationEventMulticaster: Send + Sync {
    fn add_application_listener(&self, listener: Arc<dyn ApplicationListener>);

    /// Register a listener bean by name; it is resolved on each dispatch
    fn add_application_listener_bean(&self, name: &str);

    fn remove_application_listener(&self, listener: &Arc<dyn ApplicationListener>);

    fn remove_application_listener_bean(&self, name: &str);

    fn remove_all_listeners(&self);

    /// Deliver `event` to every listener accepting `event_type` (the
    /// event's own type when `None`)
    fn multicast_event(&self, event: &ApplicationEvent, event_type: Option<&EventType>) -> Result<()>;
}

/// What to do when a listener fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerErrorPolicy {
    /// Stop delivery and return the error
    #[default]
    Propagate,
    /// Log the error and keep delivering
    LogAndContinue,
}

enum ListenerEntry {
    Instance(Arc<dyn ApplicationListener>),
    Bean(String),
}

#[inline]
fn data_ptr(listener: &Arc<dyn ApplicationListener>) -> *const () {
    Arc::as_ptr(listener) as *const ()
}

/// Default multicaster
pub struct SimpleApplicationEventMulticaster {
    factory: Option<Weak<BeanFactory>>,
    entries: RwLock<Vec<ListenerEntry>>,
    error_policy: RwLock<ListenerErrorPolicy>,
}

impl SimpleApplicationEventMulticaster {
    /// Multicaster without a factory; bean-name listeners are ignored
    pub fn new() -> Self {
        Self {
            factory: None,
            entries: RwLock::new(Vec::new()),
            error_policy: RwLock::new(ListenerErrorPolicy::default()),
        }
    }

    /// Multicaster resolving listener beans through `factory`
    pub fn with_factory(factory: Weak<BeanFactory>) -> Self {
        Self {
            factory: Some(factory),
            ..Self::new()
        }
    }

    pub fn set_error_policy(&self, policy: ListenerErrorPolicy) {
        *self.error_policy.write() = policy;
    }

    pub fn error_policy(&self) -> ListenerErrorPolicy {
        *self.error_policy.read()
    }

    /// Number of registrations, instances and bean names together
    pub fn listener_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Listeners for `event_type`, in registration order, each object once
    pub fn listeners_for(&self, event_type: &EventType) -> Result<Vec<Arc<dyn ApplicationListener>>> {
        let factory = self.factory.as_ref().and_then(Weak::upgrade);
        let entries: Vec<(Option<Arc<dyn ApplicationListener>>, Option<String>)> = self
            .entries
            .read()
            .iter()
            .map(|entry| match entry {
                ListenerEntry::Instance(l) => (Some(Arc::clone(l)), None),
                ListenerEntry::Bean(name) => (None, Some(name.clone())),
            })
            .collect();

        let mut resolved: Vec<Arc<dyn ApplicationListener>> = Vec::with_capacity(entries.len());
        for entry in entries {
            let listener = match entry {
                (Some(listener), _) => listener,
                (None, Some(name)) => {
                    let Some(factory) = &factory else {
                        continue;
                    };
                    match factory.get_bean::<dyn ApplicationListener>(&name) {
                        Ok(listener) => listener,
                        // Removed since it was registered
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => return Err(e),
                    }
                }
                (None, None) => continue,
            };
            if !listener.supports_event_type(event_type) {
                continue;
            }
            let ptr = data_ptr(&listener);
            if !resolved.iter().any(|l| data_ptr(l) == ptr) {
                resolved.push(listener);
            }
        }
        Ok(resolved)
    }
}

impl Default for SimpleApplicationEventMulticaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationEventMulticaster for SimpleApplicationEventMulticaster {
    fn add_application_listener(&self, listener: Arc<dyn ApplicationListener>) {
        let mut entries = self.entries.write();
        let ptr = data_ptr(&listener);
        let duplicate = entries
            .iter()
            .any(|e| matches!(e, ListenerEntry::Instance(l) if data_ptr(l) == ptr));
        if !duplicate {
            entries.push(ListenerEntry::Instance(listener));
        }
    }

    fn add_application_listener_bean(&self, name: &str) {
        let mut entries = self.entries.write();
        let duplicate = entries
            .iter()
            .any(|e| matches!(e, ListenerEntry::Bean(n) if n == name));
        if !duplicate {
            entries.push(ListenerEntry::Bean(name.to_string()));
        }
    }

    fn remove_application_listener(&self, listener: &Arc<dyn ApplicationListener>) {
        let ptr = data_ptr(listener);
        self.entries
            .write()
            .retain(|e| !matches!(e, ListenerEntry::Instance(l) if data_ptr(l) == ptr));
    }

    fn remove_application_listener_bean(&self, name: &str) {
        self.entries
            .write()
            .retain(|e| !matches!(e, ListenerEntry::Bean(n) if n == name));
    }

    fn remove_all_listeners(&self) {
        self.entries.write().clear();
    }

    fn multicast_event(&self, event: &ApplicationEvent, event_type: Option<&EventType>) -> Result<()> {
        let event_type = event_type.copied().unwrap_or_else(|| event.event_type());
        let listeners = self.listeners_for(&event_type)?;
        let policy = self.error_policy();

        #[cfg(feature = "logging")]
        trace!(
            target: "application_context",
            event = %event_type,
            listeners = listeners.len(),
            "Multicasting event"
        );

        for listener in listeners {
            if let Err(e) = listener.on_application_event(event) {
                match policy {
                    ListenerErrorPolicy::Propagate => {
                        return Err(ContextError::ListenerFailed {
                            event: event_type.name().to_string(),
                            reason: e.to_string(),
                        });
                    }
                    ListenerErrorPolicy::LogAndContinue => {
                        #[cfg(feature = "logging")]
                        warn!(
                            target: "application_context",
                            event = %event_type,
                            error = %e,
                            "Error while invoking application listener"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SimpleApplicationEventMulticaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleApplicationEventMulticaster")
            .field("listeners", &self.listener_count())
            .field("error_policy", &self.error_policy())
            .finish()
    }
}
