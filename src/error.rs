//! Error types for the application context

use std::fmt;
use thiserror::Error;

/// Why a context refused an operation that needs an active bean factory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStateReason {
    /// `refresh()` never completed successfully
    NotRefreshed,
    /// `close()` already ran
    Closed,
}

impl fmt::Display for ContextStateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRefreshed => f.write_str("has not been refreshed yet"),
            Self::Closed => f.write_str("has been closed already"),
        }
    }
}

/// The step of `refresh()` that was running when a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshPhase {
    PrepareRefresh,
    ObtainFreshBeanFactory,
    PrepareBeanFactory,
    PostProcessBeanFactory,
    InvokeBeanFactoryPostProcessors,
    RegisterBeanPostProcessors,
    InitMessageSource,
    InitEventMulticaster,
    OnRefresh,
    RegisterListeners,
    FinishBeanFactoryInitialization,
    FinishRefresh,
}

impl RefreshPhase {
    /// All phases in execution order
    pub const ALL: [RefreshPhase; 12] = [
        Self::PrepareRefresh,
        Self::ObtainFreshBeanFactory,
        Self::PrepareBeanFactory,
        Self::PostProcessBeanFactory,
        Self::InvokeBeanFactoryPostProcessors,
        Self::RegisterBeanPostProcessors,
        Self::InitMessageSource,
        Self::InitEventMulticaster,
        Self::OnRefresh,
        Self::RegisterListeners,
        Self::FinishBeanFactoryInitialization,
        Self::FinishRefresh,
    ];

    /// Short kebab-case name used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrepareRefresh => "prepare-refresh",
            Self::ObtainFreshBeanFactory => "obtain-fresh-bean-factory",
            Self::PrepareBeanFactory => "prepare-bean-factory",
            Self::PostProcessBeanFactory => "post-process-bean-factory",
            Self::InvokeBeanFactoryPostProcessors => "invoke-bean-factory-post-processors",
            Self::RegisterBeanPostProcessors => "register-bean-post-processors",
            Self::InitMessageSource => "init-message-source",
            Self::InitEventMulticaster => "init-event-multicaster",
            Self::OnRefresh => "on-refresh",
            Self::RegisterListeners => "register-listeners",
            Self::FinishBeanFactoryInitialization => "finish-bean-factory-initialization",
            Self::FinishRefresh => "finish-refresh",
        }
    }
}

impl fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the registry, the bean factory and the context
#[derive(Error, Debug, Clone)]
pub enum ContextError {
    /// A bean definition failed structural validation
    #[error("Invalid bean definition with name '{name}': {reason}")]
    DefinitionInvalid { name: String, reason: String },

    /// A definition is already bound to the name and overriding is disabled
    #[error(
        "Cannot register bean definition for bean '{name}': there is already a definition bound"
    )]
    DefinitionOverride { name: String },

    /// No definition (or singleton) is registered under the name
    #[error("No bean named '{name}' available")]
    NoSuchDefinition { name: String },

    /// No bean exposes the requested type
    #[error("No qualifying bean of type '{type_name}' available")]
    NoSuchBeanOfType { type_name: &'static str },

    /// More than one candidate and no single primary among them
    #[error(
        "No qualifying bean of type '{type_name}' available: expected single matching bean but found {}: {}",
        candidates.len(),
        candidates.join(",")
    )]
    NoUniqueBean {
        type_name: &'static str,
        candidates: Vec<String>,
    },

    /// The bean exists but does not expose the requested type
    #[error("Bean named '{name}' is expected to be of type '{expected}' but was actually of type '{actual}'")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// The supplier, a callback or a post-processor failed
    #[error("Error creating bean with name '{name}': {source}")]
    BeanCreation {
        name: String,
        source: Box<ContextError>,
    },

    /// The bean was requested again while it was being created
    #[error(
        "Requested bean '{name}' is currently in creation: is there an unresolvable circular reference?"
    )]
    CurrentlyInCreation { name: String },

    /// A definition names a scope that has not been registered
    #[error("No scope registered for scope name '{scope}'")]
    NoSuchScope { scope: String },

    /// The configuration was frozen by `refresh()`
    #[error("Cannot {action} bean definition '{name}': configuration is frozen")]
    ConfigurationFrozen { name: String, action: &'static str },

    /// Required environment properties are absent
    #[error(
        "The following properties were declared as required but could not be resolved: [{}]",
        keys.join(", ")
    )]
    MissingRequiredProperty { keys: Vec<String> },

    /// A `${...}` placeholder has no value and no default
    #[error("Could not resolve placeholder '{placeholder}' in value \"{value}\"")]
    UnresolvablePlaceholder { placeholder: String, value: String },

    /// A string could not be converted to the requested type
    #[error("Failed to convert value '{value}' to type '{target}'")]
    ConversionFailed { value: String, target: &'static str },

    /// No message is registered for the code and locale
    #[error("No message found under code '{code}' for locale '{locale}'")]
    NoSuchMessage { code: String, locale: String },

    /// The context is not active
    #[error("{context} {reason}")]
    IllegalContextState {
        context: String,
        reason: ContextStateReason,
    },

    /// `refresh()` failed and was rolled back
    #[error("Refresh of {context} failed during {phase}: {source}")]
    RefreshFailed {
        context: String,
        phase: RefreshPhase,
        source: Box<ContextError>,
    },

    /// A listener failed while an event was being multicast
    #[error("Listener failed while handling {event}: {reason}")]
    ListenerFailed { event: String, reason: String },

    /// Starting or stopping a lifecycle bean failed
    #[error("Failed to {action} lifecycle bean '{name}': {reason}")]
    LifecycleFailed {
        name: String,
        action: &'static str,
        reason: String,
    },

    /// A resource could not be located or read
    #[error("Resource '{location}' could not be read: {reason}")]
    Resource { location: String, reason: String },

    /// The owning bean factory has been dropped
    #[error("Bean factory has been dropped")]
    FactoryDropped,

    /// An operation was invoked in the wrong state
    #[error("{0}")]
    IllegalState(String),

    /// Error raised by user code (suppliers, listeners, lifecycle beans)
    #[error("{0}")]
    Other(String),
}

impl ContextError {
    /// Create a DefinitionInvalid error
    #[inline]
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DefinitionInvalid {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a NoSuchDefinition error
    #[inline]
    pub fn no_such_definition(name: impl Into<String>) -> Self {
        Self::NoSuchDefinition { name: name.into() }
    }

    /// Create a NoSuchBeanOfType error for a type
    #[inline]
    pub fn no_bean_of_type<T: ?Sized + 'static>() -> Self {
        Self::NoSuchBeanOfType {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Wrap a failure raised while creating the named bean
    #[inline]
    pub fn creation(name: impl Into<String>, source: ContextError) -> Self {
        Self::BeanCreation {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create an IllegalState error
    #[inline]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Create an error from any displayable value raised by user code
    #[inline]
    pub fn other(message: impl fmt::Display) -> Self {
        Self::Other(message.to_string())
    }

    /// The innermost cause, following creation and refresh wrappers
    pub fn root_cause(&self) -> &ContextError {
        let mut current = self;
        loop {
            match current {
                Self::BeanCreation { source, .. } | Self::RefreshFailed { source, .. } => {
                    current = source;
                }
                _ => return current,
            }
        }
    }

    /// True when this error reports a missing bean, by name or by type
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchDefinition { .. } | Self::NoSuchBeanOfType { .. }
        )
    }
}

/// Result type alias for context operations
pub type Result<T> = std::result::Result<T, ContextError>;
