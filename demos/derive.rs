//! Example of `#[derive(Component)]`
//!
//! ```bash
//! cargo run --example derive --features derive
//! ```

use application_context::{ApplicationContext, Component, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Component)]
struct Config {
    // Non-autowired fields use Default
    retries: u32,
}

#[derive(Component)]
#[component(name = "database", description = "Primary store")]
struct Database {
    #[autowired]
    config: Arc<Config>,
}

#[allow(dead_code)]
struct Metrics;

#[derive(Component)]
#[component(name = "users", lazy, qualifier = "main", depends_on = "database")]
struct UserService {
    #[autowired]
    db: Arc<Database>,
    #[autowired(optional)]
    metrics: Option<Arc<Metrics>>,
    lookups: AtomicU64,
}

impl UserService {
    fn find(&self, id: u64) -> String {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        format!("user-{} (retries: {})", id, self.db.config.retries)
    }
}

#[derive(Component)]
#[component(scope = "prototype")]
struct RequestId;

fn main() -> Result<()> {
    println!("=== Derive Demo ===\n");

    let context = ApplicationContext::new();
    context.register::<Config>()?;
    context.register::<Database>()?;
    context.register::<UserService>()?;
    context.register::<RequestId>()?;
    context.refresh()?;

    let users = context.get_bean::<UserService>("users")?;
    println!("found {}", users.find(7));
    println!("metrics attached: {}", users.metrics.is_some());
    println!("lookups: {}", users.lookups.load(Ordering::Relaxed));

    let first = context.get_bean_by_type::<RequestId>()?;
    let second = context.get_bean_by_type::<RequestId>()?;
    println!("request ids distinct: {}", !Arc::ptr_eq(&first, &second));

    context.close();
    Ok(())
}
