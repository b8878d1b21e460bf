//! Registration conditions
//!
//! The annotated reader evaluates a component's conditions before anything
//! else; a component whose conditions do not all match is skipped without
//! error. Bean conditions only see definitions registered before them.

use crate::container::BeanFactory;
use crate::environment::Environment;
use crate::metadata::{AnnotationMetadata, names};
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

/// What a condition may inspect
#[derive(Clone, Copy)]
pub struct ConditionContext<'a> {
    factory: &'a BeanFactory,
    environment: &'a Environment,
}

impl<'a> ConditionContext<'a> {
    pub fn new(factory: &'a BeanFactory, environment: &'a Environment) -> Self {
        Self { factory, environment }
    }

    #[inline]
    pub fn factory(&self) -> &'a BeanFactory {
        self.factory
    }

    #[inline]
    pub fn environment(&self) -> &'a Environment {
        self.environment
    }
}

/// Decides whether a component is registered
pub trait Condition: Send + Sync {
    fn matches(&self, context: &ConditionContext<'_>, metadata: &AnnotationMetadata) -> bool;
}

impl<F> Condition for F
where
    F: Fn(&ConditionContext<'_>, &AnnotationMetadata) -> bool + Send + Sync,
{
    fn matches(&self, context: &ConditionContext<'_>, metadata: &AnnotationMetadata) -> bool {
        self(context, metadata)
    }
}

// =============================================================================
// Property and Profile Conditions
// =============================================================================

/// Matches on an environment property
#[derive(Debug, Clone)]
pub struct OnProperty {
    name: String,
    having_value: Option<String>,
    match_if_missing: bool,
}

impl OnProperty {
    /// Matches when `name` is set to anything but `false`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            having_value: None,
            match_if_missing: false,
        }
    }

    /// Require this exact value (case-insensitive)
    pub fn having_value(mut self, value: impl Into<String>) -> Self {
        self.having_value = Some(value.into());
        self
    }

    pub fn match_if_missing(mut self, match_if_missing: bool) -> Self {
        self.match_if_missing = match_if_missing;
        self
    }
}

impl Condition for OnProperty {
    fn matches(&self, context: &ConditionContext<'_>, _metadata: &AnnotationMetadata) -> bool {
        let Some(value) = context.environment().get_property(&self.name) else {
            return self.match_if_missing;
        };
        match &self.having_value {
            Some(expected) => value.trim().eq_ignore_ascii_case(expected),
            None => !value.trim().eq_ignore_ascii_case("false"),
        }
    }
}

/// Matches when the environment accepts any of the profiles
#[derive(Debug, Clone)]
pub struct OnProfile {
    profiles: Vec<String>,
}

impl OnProfile {
    pub fn new<I, S>(profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            profiles: profiles.into_iter().map(Into::into).collect(),
        }
    }
}

impl Condition for OnProfile {
    fn matches(&self, context: &ConditionContext<'_>, _metadata: &AnnotationMetadata) -> bool {
        let profiles: Vec<&str> = self.profiles.iter().map(String::as_str).collect();
        context.environment().accepts_profiles(&profiles)
    }
}

// =============================================================================
// Bean Conditions
// =============================================================================

#[derive(Debug, Clone)]
enum BeanQuery {
    Named(String),
    OfType(TypeId),
}

impl BeanQuery {
    fn is_present(&self, factory: &BeanFactory) -> bool {
        match self {
            BeanQuery::Named(name) => factory.contains_bean(name),
            BeanQuery::OfType(type_id) => !factory.bean_names_for_type_id(*type_id, true).is_empty(),
        }
    }
}

/// Matches when a bean is already registered
#[derive(Debug, Clone)]
pub struct OnBean(BeanQuery);

impl OnBean {
    pub fn named(name: impl Into<String>) -> Self {
        Self(BeanQuery::Named(name.into()))
    }

    pub fn of_type<T: ?Sized + 'static>() -> Self {
        Self(BeanQuery::OfType(TypeId::of::<T>()))
    }
}

impl Condition for OnBean {
    fn matches(&self, context: &ConditionContext<'_>, _metadata: &AnnotationMetadata) -> bool {
        self.0.is_present(context.factory())
    }
}

/// Matches when no such bean is registered yet
#[derive(Debug, Clone)]
pub struct OnMissingBean(BeanQuery);

impl OnMissingBean {
    pub fn named(name: impl Into<String>) -> Self {
        Self(BeanQuery::Named(name.into()))
    }

    pub fn of_type<T: ?Sized + 'static>() -> Self {
        Self(BeanQuery::OfType(TypeId::of::<T>()))
    }
}

impl Condition for OnMissingBean {
    fn matches(&self, context: &ConditionContext<'_>, _metadata: &AnnotationMetadata) -> bool {
        !self.0.is_present(context.factory())
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluates the `profile` annotation and explicit conditions of a component
pub struct ConditionEvaluator<'a> {
    context: ConditionContext<'a>,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(factory: &'a BeanFactory, environment: &'a Environment) -> Self {
        Self {
            context: ConditionContext::new(factory, environment),
        }
    }

    /// True when the component must be skipped
    pub fn should_skip(&self, metadata: &AnnotationMetadata, conditions: &[Arc<dyn Condition>]) -> bool {
        for profile in metadata.annotations_named(names::PROFILE) {
            let profiles: Vec<&str> = profile
                .value()
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if !profiles.is_empty() && !self.context.environment().accepts_profiles(&profiles) {
                return true;
            }
        }
        conditions.iter().any(|c| !c.matches(&self.context, metadata))
    }
}

impl fmt::Debug for ConditionEvaluator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionEvaluator").finish_non_exhaustive()
    }
}
