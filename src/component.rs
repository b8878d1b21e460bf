//! Components that declare their dependencies
//!
//! A [`Component`] names what it needs through its `Dependencies` type and
//! builds itself from the resolved values. The annotated reader turns a
//! component into a bean definition whose supplier resolves those
//! dependencies through the bean factory on every creation, so scopes are
//! always honoured.
//!
//! ```rust
//! use application_context::component::Component;
//! use application_context::Result;
//! use std::sync::Arc;
//!
//! struct Config {
//!     url: String,
//! }
//!
//! impl Component for Config {
//!     type Dependencies = ();
//!
//!     fn create(_: ()) -> Result<Self> {
//!         Ok(Config { url: "postgres://localhost".into() })
//!     }
//! }
//!
//! struct Repository {
//!     config: Arc<Config>,
//! }
//!
//! impl Component for Repository {
//!     type Dependencies = Arc<Config>;
//!
//!     fn create(config: Arc<Config>) -> Result<Self> {
//!         Ok(Repository { config })
//!     }
//! }
//! ```

use crate::condition::Condition;
use crate::container::BeanFactory;
use crate::definition::{BeanDefinition, BeanDefinitionBuilder};
use crate::error::Result;
use crate::metadata::AnnotationMetadata;
use crate::provider::BeanProvider;
use crate::reader::AnnotatedBeanDefinitionReader;
use crate::Injectable;
use std::sync::Arc;

// =============================================================================
// Component Trait
// =============================================================================

/// A bean type that knows how to build itself.
///
/// # Supported Dependency Types
///
/// - `()` - No dependencies
/// - `Arc<T>` - The single (or primary) bean exposing `T`
/// - `Option<Arc<T>>` - Like `Arc<T>`, `None` when no bean exists
/// - `Vec<Arc<T>>` - Every bean exposing `T`
/// - `BeanProvider<T>` - A lazy handle resolved later
/// - Tuples of the above (up to 12)
pub trait Component: Injectable + Sized {
    /// What the component needs to be created
    type Dependencies: Resolvable;

    /// Build the component from its resolved dependencies
    fn create(deps: Self::Dependencies) -> Result<Self>;

    /// Annotations describing the component
    fn metadata() -> AnnotationMetadata {
        AnnotationMetadata::for_type::<Self>()
    }

    /// Conditions that must all match for the component to be registered
    fn conditions() -> Vec<Arc<dyn Condition>> {
        Vec::new()
    }

    /// Adjust the generated definition, e.g. add views or callbacks
    fn customize(builder: BeanDefinitionBuilder<Self>) -> BeanDefinitionBuilder<Self> {
        builder
    }
}

/// The definition of a component before annotations are applied
pub fn component_definition<C: Component>() -> BeanDefinition {
    let builder = BeanDefinitionBuilder::<C>::new()
        .supplier(|factory: &BeanFactory| C::create(C::Dependencies::resolve(factory)?));
    C::customize(builder).build()
}

// =============================================================================
// Resolvable Trait
// =============================================================================

/// Dependencies that can be resolved from a bean factory
pub trait Resolvable: Sized {
    fn resolve(factory: &BeanFactory) -> Result<Self>;

    /// Type names of the beans this resolves
    fn dependency_names() -> Vec<&'static str>;
}

// No dependencies
impl Resolvable for () {
    #[inline]
    fn resolve(_factory: &BeanFactory) -> Result<Self> {
        Ok(())
    }

    fn dependency_names() -> Vec<&'static str> {
        Vec::new()
    }
}

// Single dependency
impl<T: ?Sized + Send + Sync + 'static> Resolvable for Arc<T> {
    #[inline]
    fn resolve(factory: &BeanFactory) -> Result<Self> {
        factory.get_bean_by_type::<T>()
    }

    fn dependency_names() -> Vec<&'static str> {
        vec![std::any::type_name::<T>()]
    }
}

// Optional dependency
impl<T: ?Sized + Send + Sync + 'static> Resolvable for Option<Arc<T>> {
    #[inline]
    fn resolve(factory: &BeanFactory) -> Result<Self> {
        factory.get_bean_provider::<T>().get_if_available()
    }

    fn dependency_names() -> Vec<&'static str> {
        vec![std::any::type_name::<T>()]
    }
}

// Every bean of a type
impl<T: ?Sized + Send + Sync + 'static> Resolvable for Vec<Arc<T>> {
    fn resolve(factory: &BeanFactory) -> Result<Self> {
        Ok(factory
            .beans_of_type::<T>()?
            .into_iter()
            .map(|(_, bean)| bean)
            .collect())
    }

    fn dependency_names() -> Vec<&'static str> {
        vec![std::any::type_name::<T>()]
    }
}

// Deferred lookup
impl<T: ?Sized + Send + Sync + 'static> Resolvable for BeanProvider<T> {
    #[inline]
    fn resolve(factory: &BeanFactory) -> Result<Self> {
        Ok(factory.get_bean_provider::<T>())
    }

    fn dependency_names() -> Vec<&'static str> {
        vec![std::any::type_name::<T>()]
    }
}

// Tuple implementations (1-12 elements)
macro_rules! impl_resolvable_tuple {
    ($($T:ident),+) => {
        impl<$($T: Resolvable),+> Resolvable for ($($T,)+) {
            #[inline]
            fn resolve(factory: &BeanFactory) -> Result<Self> {
                Ok(($($T::resolve(factory)?,)+))
            }

            fn dependency_names() -> Vec<&'static str> {
                let mut names = Vec::new();
                $(names.extend($T::dependency_names());)+
                names
            }
        }
    };
}

impl_resolvable_tuple!(A);
impl_resolvable_tuple!(A, B);
impl_resolvable_tuple!(A, B, C);
impl_resolvable_tuple!(A, B, C, D);
impl_resolvable_tuple!(A, B, C, D, E);
impl_resolvable_tuple!(A, B, C, D, E, F);
impl_resolvable_tuple!(A, B, C, D, E, F, G);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I, J);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I, J, K);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I, J, K, L);

// =============================================================================
// ComponentModule - Group related components
// =============================================================================

/// A group of component registrations.
///
/// ```rust
/// use application_context::component::{Component, ComponentModule};
/// use application_context::reader::AnnotatedBeanDefinitionReader;
/// use application_context::{BeanFactory, Environment, Result};
/// use std::sync::Arc;
///
/// struct Database;
///
/// impl Component for Database {
///     type Dependencies = ();
///     fn create(_: ()) -> Result<Self> { Ok(Database) }
/// }
///
/// struct DataModule;
///
/// impl ComponentModule for DataModule {
///     fn register(reader: &AnnotatedBeanDefinitionReader) -> Result<()> {
///         reader.register::<Database>()?;
///         Ok(())
///     }
/// }
///
/// let factory = BeanFactory::new();
/// let reader = AnnotatedBeanDefinitionReader::new(factory.clone(), Arc::new(Environment::empty()));
/// DataModule::register(&reader).unwrap();
/// assert!(factory.get_bean_by_type::<Database>().is_ok());
/// ```
pub trait ComponentModule {
    fn register(reader: &AnnotatedBeanDefinitionReader) -> Result<()>;
}
