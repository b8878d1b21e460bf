//! Process shutdown hooks
//!
//! Contexts register a close hook here with
//! [`register_shutdown_hook`](crate::ApplicationContext::register_shutdown_hook).
//! The host application calls [`ShutdownHookRegistry::run`] when it is
//! about to exit (or, with the `async` feature, lets
//! [`run_on_ctrl_c`](ShutdownHookRegistry::run_on_ctrl_c) wait for the
//! signal). Every hook runs on its own thread; `run` returns once all of
//! them finished.

use crate::error::{ContextError, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

static SHARED: Lazy<Arc<ShutdownHookRegistry>> = Lazy::new(|| Arc::new(ShutdownHookRegistry::new()));

/// Identifies a registered hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

type Hook = Box<dyn FnOnce() + Send>;

struct Registered {
    id: HookId,
    name: String,
    hook: Hook,
}

/// Hooks to run once when the process shuts down
pub struct ShutdownHookRegistry {
    hooks: Mutex<Vec<Registered>>,
    next_id: AtomicU64,
    ran: AtomicBool,
}

impl ShutdownHookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            ran: AtomicBool::new(false),
        }
    }

    /// The process-wide registry
    pub fn shared() -> Arc<ShutdownHookRegistry> {
        Arc::clone(&SHARED)
    }

    /// Add a hook; fails once shutdown has started
    pub fn add_hook<F>(&self, name: impl Into<String>, hook: F) -> Result<HookId>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.ran.load(Ordering::Acquire) {
            return Err(ContextError::illegal_state("Shutdown in progress"));
        }
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();

        #[cfg(feature = "logging")]
        debug!(target: "application_context", hook = %name, "Registered shutdown hook");

        self.hooks.lock().push(Registered {
            id,
            name,
            hook: Box::new(hook),
        });
        Ok(id)
    }

    /// Remove a hook; false if it was not registered (or already ran)
    pub fn remove_hook(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|registered| registered.id != id);
        hooks.len() != before
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }

    pub fn hook_names(&self) -> Vec<String> {
        self.hooks.lock().iter().map(|r| r.name.clone()).collect()
    }

    pub fn has_run(&self) -> bool {
        self.ran.load(Ordering::Acquire)
    }

    /// Run every hook concurrently and wait for all of them. Returns the
    /// number of hooks that completed without panicking.
    pub fn run(&self) -> usize {
        self.ran.store(true, Ordering::Release);
        let hooks = std::mem::take(&mut *self.hooks.lock());

        let mut handles = Vec::with_capacity(hooks.len());
        for Registered { name, hook, .. } in hooks {
            match thread::Builder::new().name(name.clone()).spawn(hook) {
                Ok(handle) => handles.push((name, handle)),
                Err(_e) => {
                    #[cfg(feature = "logging")]
                    warn!(target: "application_context", hook = %name, error = %_e, "Could not start shutdown hook");
                }
            }
        }

        let mut completed = 0;
        for (_name, handle) in handles {
            if handle.join().is_ok() {
                completed += 1;
            } else {
                #[cfg(feature = "logging")]
                warn!(target: "application_context", hook = %_name, "Shutdown hook panicked");
            }
        }
        completed
    }

    /// Wait for Ctrl-C, then run the hooks
    #[cfg(feature = "async")]
    pub async fn run_on_ctrl_c(self: Arc<Self>) -> Result<usize> {
        tokio::signal::ctrl_c().await.map_err(ContextError::other)?;

        #[cfg(feature = "logging")]
        debug!(target: "application_context", hooks = self.len(), "Received Ctrl-C, running shutdown hooks");

        tokio::task::spawn_blocking(move || self.run())
            .await
            .map_err(ContextError::other)
    }
}

impl Default for ShutdownHookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShutdownHookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHookRegistry")
            .field("hooks", &self.hook_names())
            .field("ran", &self.has_run())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_hooks_run_once_on_named_threads() {
        let registry = ShutdownHookRegistry::new();
        let names = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let names = Arc::clone(&names);
            registry
                .add_hook(name, move || {
                    names.lock().push(thread::current().name().map(str::to_string));
                })
                .unwrap();
        }

        assert_eq!(registry.run(), 2);
        assert_eq!(registry.run(), 0);

        let mut seen: Vec<_> = names.lock().iter().flatten().cloned().collect();
        seen.sort();
        assert_eq!(seen, ["a", "b"]);
    }

    #[test]
    fn test_removed_hook_does_not_run() {
        let registry = ShutdownHookRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = registry
            .add_hook("counter", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(registry.remove_hook(id));
        assert!(!registry.remove_hook(id));
        registry.run();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_hooks_after_shutdown_started() {
        let registry = ShutdownHookRegistry::new();
        registry.run();
        assert!(registry.has_run());
        assert!(registry.add_hook("late", || {}).is_err());
    }

    #[test]
    fn test_panicking_hook_is_contained() {
        let registry = ShutdownHookRegistry::new();
        registry.add_hook("boom", || panic!("hook failure")).unwrap();
        registry.add_hook("fine", || {}).unwrap();
        assert_eq!(registry.run(), 1);
    }
}
