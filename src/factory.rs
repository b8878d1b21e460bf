//! Instance suppliers
//!
//! Suppliers encapsulate how a bean instance is produced. A definition owns
//! exactly one supplier; the bean factory decides when to call it.
//!
//! Like the rest of the hot path, suppliers store type-erased
//! `Arc<dyn Any>` values so that the factory never needs to know the
//! concrete type it is creating.

use crate::container::BeanFactory;
use crate::error::{ContextError, Result};
use crate::Injectable;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased bean instance
pub type BeanInstance = Arc<dyn Any + Send + Sync>;

/// Type-erased factory function
pub(crate) type SupplierFn = Arc<dyn Fn(&BeanFactory, &BeanArgs) -> Result<BeanInstance> + Send + Sync>;

// =============================================================================
// Instance Supplier
// =============================================================================

/// How a definition produces its instance
#[derive(Clone)]
pub enum InstanceSupplier {
    /// A pre-built instance, only valid for singleton definitions
    Instance(BeanInstance),
    /// A factory function called on every creation
    Factory(SupplierFn),
}

impl InstanceSupplier {
    /// Wrap an existing value
    #[inline]
    pub fn instance<T: Injectable>(value: T) -> Self {
        Self::Instance(Arc::new(value) as BeanInstance)
    }

    /// Wrap an existing `Arc`
    #[inline]
    pub fn from_arc<T: Injectable>(value: Arc<T>) -> Self {
        Self::Instance(value as BeanInstance)
    }

    /// A factory that may look up collaborators from the bean factory
    #[inline]
    pub fn factory<T, F>(f: F) -> Self
    where
        T: Injectable,
        F: Fn(&BeanFactory) -> Result<T> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(move |factory: &BeanFactory, _: &BeanArgs| {
            f(factory).map(|v| Arc::new(v) as BeanInstance)
        }))
    }

    /// A factory that also receives explicit creation arguments
    #[inline]
    pub fn factory_with_args<T, F>(f: F) -> Self
    where
        T: Injectable,
        F: Fn(&BeanFactory, &BeanArgs) -> Result<T> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(move |factory: &BeanFactory, args: &BeanArgs| {
            f(factory, args).map(|v| Arc::new(v) as BeanInstance)
        }))
    }

    /// Returns true for pre-built instances
    #[inline]
    pub fn is_instance(&self) -> bool {
        matches!(self, Self::Instance(_))
    }

    /// Produce an instance
    #[inline]
    pub(crate) fn supply(&self, factory: &BeanFactory, args: &BeanArgs) -> Result<BeanInstance> {
        match self {
            Self::Instance(instance) => Ok(Arc::clone(instance)),
            Self::Factory(f) => f(factory, args),
        }
    }
}

impl fmt::Debug for InstanceSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("InstanceSupplier::Instance"),
            Self::Factory(_) => f.write_str("InstanceSupplier::Factory"),
        }
    }
}

// =============================================================================
// Creation Arguments
// =============================================================================

/// Positional arguments for `get_bean_with_args`
#[derive(Clone, Default)]
pub struct BeanArgs(Vec<BeanInstance>);

impl BeanArgs {
    /// No arguments
    #[inline]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an argument
    #[inline]
    pub fn with<T: Injectable>(mut self, value: T) -> Self {
        self.0.push(Arc::new(value) as BeanInstance);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The argument at `index`, downcast to `T`
    pub fn get<T: Injectable>(&self, index: usize) -> Result<Arc<T>> {
        let arg = self.0.get(index).ok_or_else(|| {
            ContextError::illegal_state(format!(
                "No creation argument at index {index} ({} supplied)",
                self.0.len()
            ))
        })?;
        Arc::clone(arg)
            .downcast::<T>()
            .map_err(|_| ContextError::ConversionFailed {
                value: format!("argument #{index}"),
                target: std::any::type_name::<T>(),
            })
    }
}

impl fmt::Debug for BeanArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BeanArgs").field(&self.0.len()).finish()
    }
}
