//! Example walking a context through refresh, start, stop and close
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example lifecycle --features logging-pretty
//! ```
//!
//! Set `LOGGING_LEVEL=trace` to also see bean lookups.

use application_context::component::Component;
use application_context::event::{EventType, listener, payload_listener};
use application_context::lifecycle::{Lifecycle, SmartLifecycle};
use application_context::processor::DisposableBean;
use application_context::{ApplicationContext, ApplicationEvent, BeanDefinitionBuilder, BeanDefinitionRegistry, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[allow(dead_code)]
struct Database {
    url: String,
}

impl Component for Database {
    type Dependencies = ();

    fn create(_: ()) -> Result<Self> {
        Ok(Database {
            url: "postgres://localhost/mydb".into(),
        })
    }
}

struct OrderService {
    db: Arc<Database>,
}

impl Component for OrderService {
    type Dependencies = Arc<Database>;

    fn create(db: Arc<Database>) -> Result<Self> {
        Ok(OrderService { db })
    }
}

/// Background poller started in phase 10
#[derive(Default)]
struct Poller {
    running: AtomicBool,
}

impl Lifecycle for Poller {
    fn start(&self) -> Result<()> {
        println!("  poller: started");
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        println!("  poller: stopped");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl SmartLifecycle for Poller {
    fn phase(&self) -> i32 {
        10
    }
}

impl DisposableBean for Poller {
    fn destroy(&self) -> Result<()> {
        println!("  poller: destroyed");
        Ok(())
    }
}

struct OrderPlaced {
    id: u64,
}

fn main() -> Result<()> {
    #[cfg(feature = "logging")]
    {
        let env = application_context::Environment::new();
        application_context::logging::LoggingBuilder::from_environment(&env)
            .context_only()
            .init();
    }

    println!("=== Application Context Lifecycle Demo ===\n");

    let context = ApplicationContext::builder().id("demo").display_name("Demo context").build();

    context.register::<Database>()?;
    context.register::<OrderService>()?;
    context.register_bean_definition(
        "poller",
        BeanDefinitionBuilder::<Poller>::new()
            .supplier(|_| Ok(Poller::default()))
            .view(|p| p as Arc<dyn SmartLifecycle>)
            .view(|p| p as Arc<dyn DisposableBean>)
            .build(),
    )?;

    for event_type in [
        EventType::ContextRefreshed,
        EventType::ContextStarted,
        EventType::ContextStopped,
        EventType::ContextClosed,
    ] {
        context.add_application_listener(listener(event_type, |event: &ApplicationEvent| {
            println!("  event: {}", event.event_type());
            Ok(())
        }));
    }
    context.add_application_listener(payload_listener(|order: &OrderPlaced| {
        println!("  order placed: #{}", order.id);
        Ok(())
    }));

    // Published before refresh: buffered, then delivered once listeners exist
    context.publish(OrderPlaced { id: 1 })?;

    println!("1. Refreshing");
    context.refresh()?;
    let orders = context.get_bean_by_type::<OrderService>()?;
    println!("   order service uses {}", orders.db.url);

    println!("\n2. Publishing");
    context.publish(OrderPlaced { id: 2 })?;

    println!("\n3. Stopping and starting");
    context.stop()?;
    println!("   running: {}", context.is_running());
    context.start()?;
    println!("   running: {}", context.is_running());

    println!("\n4. Closing");
    context.close();
    println!("   active: {}", context.is_active());

    println!("\n=== Demo Complete ===");
    Ok(())
}
