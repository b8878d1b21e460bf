#![no_main]

//! Fuzz target for context lifecycle operations
//!
//! Drives refresh, close, start, stop and event publication in arbitrary
//! order and checks the state rules: lookups only succeed on an active
//! context, a closed context serves no beans, lifecycle beans stop with the
//! context.

use application_context::event::payload_listener;
use application_context::lifecycle::{Lifecycle, SmartLifecycle};
use application_context::live::LiveContextsView;
use application_context::shutdown::ShutdownHookRegistry;
use application_context::{ApplicationContext, BeanDefinitionBuilder, BeanDefinitionRegistry, Result};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
struct Worker {
    running: AtomicBool,
}

impl Lifecycle for Worker {
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

impl SmartLifecycle for Worker {}

struct Ping(u32);

#[derive(Debug, Arbitrary)]
enum LifecycleOp {
    Refresh,
    Close,
    Start,
    Stop,
    Publish(u32),
    Lookup,
    RegisterShutdownHook,
}

fuzz_target!(|ops: Vec<LifecycleOp>| {
    let hooks = Arc::new(ShutdownHookRegistry::new());
    let context = ApplicationContext::builder()
        .shutdown_hooks(Arc::clone(&hooks))
        .live_view(Arc::new(LiveContextsView::new()))
        .build();
    let _ = context.register_bean_definition(
        "worker",
        BeanDefinitionBuilder::<Worker>::new()
            .supplier(|_| Ok(Worker::default()))
            .view(|w| w as Arc<dyn SmartLifecycle>)
            .build(),
    );

    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    context.add_application_listener(payload_listener(move |ping: &Ping| {
        counter.fetch_add(u64::from(ping.0 % 16), Ordering::SeqCst);
        Ok(())
    }));

    for op in ops.into_iter().take(64) {
        match op {
            LifecycleOp::Refresh => {
                // A refused refresh leaves the context as it was
                let was_active = context.is_active();
                match context.refresh() {
                    Ok(()) => assert!(context.is_active()),
                    Err(_) => assert_eq!(context.is_active(), was_active),
                }
            }
            LifecycleOp::Close => {
                context.close();
                assert!(!context.is_active());
            }
            LifecycleOp::Start => {
                let _ = context.start();
            }
            LifecycleOp::Stop => {
                let _ = context.stop();
            }
            LifecycleOp::Publish(value) => {
                let _ = context.publish(Ping(value));
            }
            LifecycleOp::Lookup => {
                if let Ok(worker) = context.get_bean::<Worker>("worker") {
                    assert!(context.is_active());
                    if !context.is_running() {
                        assert!(!worker.is_running());
                    }
                }
            }
            LifecycleOp::RegisterShutdownHook => {
                let _ = context.register_shutdown_hook();
            }
        }

        if context.is_closed() {
            assert!(context.get_bean::<Worker>("worker").is_err());
        }
    }

    context.close();
    assert!(!context.is_active());
    hooks.run();
});
