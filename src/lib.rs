//! # application-context - Bean Definitions, Refresh and Events for Rust
//!
//! The core of an inversion-of-control application framework: a registry
//! of bean definitions, an [`ApplicationContext`] that turns them into
//! live singletons through a twelve-phase `refresh`, an event multicaster
//! that buffers events published before it exists, a phased lifecycle
//! processor and message resolution with parent fallback.
//!
//! ## Features
//!
//! - **Lock-free lookups** - `DashMap` backed definition, alias and singleton maps
//! - **Typed beans** - `get_bean::<T>` and trait-object views through `BeanTypes`
//! - **Components** - types that declare their dependencies and build themselves
//! - **Refresh / close** - all-or-nothing startup with rollback, idempotent close
//! - **Events** - context events, payload events, early-event buffering
//! - **Lifecycle** - `SmartLifecycle` beans started and stopped by phase
//! - **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use application_context::component::Component;
//! use application_context::event::payload_listener;
//! use application_context::{ApplicationContext, Result};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! impl Component for Database {
//!     type Dependencies = ();
//!
//!     fn create(_: ()) -> Result<Self> {
//!         Ok(Database { url: "postgres://localhost".into() })
//!     }
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! impl Component for UserService {
//!     type Dependencies = Arc<Database>;
//!
//!     fn create(db: Arc<Database>) -> Result<Self> {
//!         Ok(UserService { db })
//!     }
//! }
//!
//! struct UserCreated(String);
//!
//! let context = ApplicationContext::new();
//! context.register::<Database>().unwrap();
//! context.register::<UserService>().unwrap();
//! context.add_application_listener(payload_listener(|event: &UserCreated| {
//!     println!("created {}", event.0);
//!     Ok(())
//! }));
//!
//! context.refresh().unwrap();
//!
//! let users = context.get_bean_by_type::<UserService>().unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//! context.publish(UserCreated("alice".into())).unwrap();
//!
//! context.close();
//! ```
//!
//! ## Context Hierarchies
//!
//! ```rust
//! use application_context::ApplicationContext;
//! use std::sync::Arc;
//!
//! struct AppConfig {
//!     name: String,
//! }
//!
//! let root = ApplicationContext::new();
//! root.register_singleton("appConfig", Arc::new(AppConfig { name: "MyApp".into() })).unwrap();
//! root.refresh().unwrap();
//!
//! // Child contexts resolve what they do not define from their parent
//! let web = ApplicationContext::builder().parent(root.clone()).build();
//! web.refresh().unwrap();
//! assert_eq!(web.get_bean::<AppConfig>("appConfig").unwrap().name, "MyApp");
//! assert!(!web.contains_local_bean("appConfig"));
//! ```

// Lets `#[derive(Component)]` output resolve inside this crate's own tests
#[cfg(all(test, feature = "derive"))]
extern crate self as application_context;

pub mod aware;
pub mod cache;
pub mod component;
pub mod condition;
pub mod config;
mod container;
pub mod context;
pub mod conversion;
pub mod definition;
pub mod environment;
mod error;
pub mod event;
mod factory;
pub mod lifecycle;
pub mod live;
#[cfg(feature = "logging")]
pub mod logging;
pub mod message;
pub mod metadata;
pub mod multicaster;
pub mod processor;
mod provider;
pub mod reader;
pub mod registry;
pub mod resource;
pub mod scope;
pub mod shutdown;
mod storage;
pub mod store;

pub use config::ApplicationContextBuilder;
pub use container::*;
pub use context::{ApplicationContext, ContextExtension, WeakApplicationContext};
pub use definition::{BeanDefinition, BeanDefinitionBuilder, BeanRole, BeanTypes};
pub use environment::{Environment, MapPropertySource, PropertySource};
pub use error::*;
pub use event::{ApplicationEvent, ApplicationEventPublisher, ApplicationListener};
pub use factory::*;
pub use provider::*;
pub use registry::{AliasRegistry, BeanDefinitionRegistry};
pub use scope::BeanScope;

#[cfg(feature = "derive")]
pub use application_context_derive::Component;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::component::{Component, ComponentModule};
    pub use crate::event::{ApplicationEvent, ApplicationListener, payload_listener};
    pub use crate::lifecycle::{Lifecycle, SmartLifecycle};
    pub use crate::processor::{BeanFactoryPostProcessor, BeanPostProcessor, DisposableBean, InitializingBean};
    pub use crate::{
        AliasRegistry, ApplicationContext, BeanDefinition, BeanDefinitionBuilder, BeanDefinitionRegistry,
        BeanFactory, BeanProvider, BeanScope, ContextError, Environment, Injectable, Result,
    };
    pub use std::sync::Arc;
}
