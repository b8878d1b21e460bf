//! Introspection cache
//!
//! The annotated reader asks each component type for its metadata once and
//! keeps the result here. Every refresh attempt clears the cache when it
//! ends, successful or not, so nothing introspected during a discarded
//! attempt survives it.

use crate::metadata::AnnotationMetadata;
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::trace;

static SHARED: Lazy<Arc<IntrospectionCache>> = Lazy::new(|| Arc::new(IntrospectionCache::new()));

/// Hit, miss and clear counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub clears: u64,
}

/// Component metadata keyed by type
pub struct IntrospectionCache {
    entries: DashMap<TypeId, Arc<AnnotationMetadata>, RandomState>,
    hits: AtomicU64,
    misses: AtomicU64,
    clears: AtomicU64,
}

impl IntrospectionCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher_and_shard_amount(16, RandomState::new(), 8),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            clears: AtomicU64::new(0),
        }
    }

    /// The process-wide cache used by contexts that were not given their own
    pub fn shared() -> Arc<IntrospectionCache> {
        Arc::clone(&SHARED)
    }

    /// Cached metadata for `type_id`, introspected with `introspect` on a miss
    pub fn metadata_for(
        &self,
        type_id: TypeId,
        introspect: impl FnOnce() -> AnnotationMetadata,
    ) -> Arc<AnnotationMetadata> {
        if let Some(found) = self.entries.get(&type_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(found.value());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let metadata = Arc::new(introspect());
        Arc::clone(self.entries.entry(type_id).or_insert(metadata).value())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        #[cfg(feature = "logging")]
        trace!(target: "application_context", entries = self.entries.len(), "Clearing introspection cache");

        self.entries.clear();
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
        }
    }
}

impl Default for IntrospectionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IntrospectionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntrospectionCache")
            .field("entries", &self.entries.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Annotation, names};

    struct Repo;

    #[test]
    fn test_introspects_once_per_type() {
        let cache = IntrospectionCache::new();
        let mut calls = 0;
        let first = cache.metadata_for(TypeId::of::<Repo>(), || {
            calls += 1;
            AnnotationMetadata::for_type::<Repo>().with(Annotation::new(names::PRIMARY))
        });
        let second = cache.metadata_for(TypeId::of::<Repo>(), || unreachable!());

        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.has_annotation(names::PRIMARY));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, clears: 0 });
    }

    #[test]
    fn test_clear() {
        let cache = IntrospectionCache::new();
        cache.metadata_for(TypeId::of::<Repo>(), AnnotationMetadata::new);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().clears, 1);
    }

    #[test]
    fn test_shared_is_one_instance() {
        assert!(Arc::ptr_eq(&IntrospectionCache::shared(), &IntrospectionCache::shared()));
    }
}
