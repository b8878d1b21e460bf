//! Provider traits for dependency injection
//!
//! [`Injectable`] marks what can live in a bean factory, [`BeanProvider`]
//! defers a by-type lookup until the caller actually needs the bean.

use crate::container::BeanFactory;
use crate::error::{ContextError, Result};
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Marker trait for types that can be stored as beans.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {
    /// Returns the TypeId of this type (for internal use)
    #[inline]
    fn type_id_of() -> TypeId
    where
        Self: Sized,
    {
        TypeId::of::<Self>()
    }

    /// Returns the type name for debugging
    #[inline]
    fn type_name_of() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: Send + Sync + 'static> Injectable for T {}

/// Lazy by-type handle onto a bean factory.
///
/// The provider keeps only a weak reference, so a bean may hold one for a
/// collaborator without keeping the whole factory alive.
pub struct BeanProvider<T: ?Sized> {
    factory: Weak<BeanFactory>,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> BeanProvider<T> {
    pub(crate) fn new(factory: Weak<BeanFactory>) -> Self {
        Self {
            factory,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn factory(&self) -> Result<Arc<BeanFactory>> {
        self.factory.upgrade().ok_or(ContextError::FactoryDropped)
    }

    /// Resolve the single (or primary) bean of type `T`
    pub fn get(&self) -> Result<Arc<T>> {
        self.factory()?.get_bean_by_type::<T>()
    }

    /// Resolve the bean if one exists; ambiguity is still an error
    pub fn get_if_available(&self) -> Result<Option<Arc<T>>> {
        match self.get() {
            Ok(bean) => Ok(Some(bean)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolve the bean only when exactly one candidate (or one primary) exists
    pub fn get_if_unique(&self) -> Option<Arc<T>> {
        self.get().ok()
    }

    /// All beans exposing `T`, in registration order
    pub fn get_all(&self) -> Result<Vec<Arc<T>>> {
        Ok(self
            .factory()?
            .beans_of_type::<T>()?
            .into_iter()
            .map(|(_, bean)| bean)
            .collect())
    }
}

impl<T: ?Sized> Clone for BeanProvider<T> {
    fn clone(&self) -> Self {
        Self {
            factory: Weak::clone(&self.factory),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for BeanProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanProvider")
            .field("type", &std::any::type_name::<T>())
            .field("factory_alive", &(self.factory.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BeanDefinitionBuilder;
    use crate::registry::BeanDefinitionRegistry;

    #[derive(Debug)]
    struct Clock(u32);

    #[test]
    fn test_injectable_blanket() {
        fn check<T: Injectable>() {}
        check::<String>();
        check::<Clock>();
        assert_eq!(<Clock as Injectable>::type_id_of(), TypeId::of::<Clock>());
    }

    #[test]
    fn test_provider_resolves_lazily() {
        let factory = BeanFactory::new();
        let provider = factory.get_bean_provider::<Clock>();

        assert!(provider.get_if_available().unwrap().is_none());

        factory
            .register_bean_definition(
                "clock",
                BeanDefinitionBuilder::<Clock>::new()
                    .supplier(|_| Ok(Clock(7)))
                    .build(),
            )
            .unwrap();

        assert_eq!(provider.get().unwrap().0, 7);
        assert_eq!(provider.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_provider_after_factory_dropped() {
        let provider = {
            let factory = BeanFactory::new();
            factory.get_bean_provider::<Clock>()
        };
        assert!(matches!(provider.get(), Err(ContextError::FactoryDropped)));
        assert!(provider.get_if_unique().is_none());
    }
}
