//! Application events and listeners
//!
//! Events are a tagged enum: the four context lifecycle events plus
//! [`ApplicationEvent::Payload`], the envelope around any user value.
//! Listeners declare which [`EventType`]s they accept.

use crate::error::Result;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

// =============================================================================
// Events
// =============================================================================

/// Data shared by all context lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEvent {
    source: String,
    timestamp: SystemTime,
}

impl ContextEvent {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timestamp: SystemTime::now(),
        }
    }

    /// Id of the context that published the event
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

/// An arbitrary value published as an event
#[derive(Clone)]
pub struct PayloadEvent {
    source: String,
    timestamp: SystemTime,
    payload: Arc<dyn Any + Send + Sync>,
    payload_type: TypeId,
    payload_type_name: &'static str,
}

impl PayloadEvent {
    pub fn new<T: Any + Send + Sync>(source: impl Into<String>, payload: T) -> Self {
        Self::from_arc(source, Arc::new(payload))
    }

    pub fn from_arc<T: Any + Send + Sync>(source: impl Into<String>, payload: Arc<T>) -> Self {
        Self {
            source: source.into(),
            timestamp: SystemTime::now(),
            payload,
            payload_type: TypeId::of::<T>(),
            payload_type_name: std::any::type_name::<T>(),
        }
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// The payload, if it is a `T`
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }

    #[inline]
    pub fn payload_type(&self) -> TypeId {
        self.payload_type
    }

    #[inline]
    pub fn payload_type_name(&self) -> &'static str {
        self.payload_type_name
    }
}

impl fmt::Debug for PayloadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadEvent")
            .field("source", &self.source)
            .field("payload_type", &self.payload_type_name)
            .finish()
    }
}

/// An event published through an application context
#[derive(Debug, Clone)]
pub enum ApplicationEvent {
    /// The context was refreshed
    ContextRefreshed(ContextEvent),
    /// Lifecycle components were started explicitly
    ContextStarted(ContextEvent),
    /// Lifecycle components were stopped explicitly
    ContextStopped(ContextEvent),
    /// The context is closing
    ContextClosed(ContextEvent),
    /// A user value wrapped as an event
    Payload(PayloadEvent),
}

impl ApplicationEvent {
    /// Wrap a plain value into the payload envelope
    pub fn payload<T: Any + Send + Sync>(source: impl Into<String>, payload: T) -> Self {
        ApplicationEvent::Payload(PayloadEvent::new(source, payload))
    }

    pub fn event_type(&self) -> EventType {
        match self {
            ApplicationEvent::ContextRefreshed(_) => EventType::ContextRefreshed,
            ApplicationEvent::ContextStarted(_) => EventType::ContextStarted,
            ApplicationEvent::ContextStopped(_) => EventType::ContextStopped,
            ApplicationEvent::ContextClosed(_) => EventType::ContextClosed,
            ApplicationEvent::Payload(p) => EventType::Payload(p.payload_type, p.payload_type_name),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            ApplicationEvent::ContextRefreshed(e)
            | ApplicationEvent::ContextStarted(e)
            | ApplicationEvent::ContextStopped(e)
            | ApplicationEvent::ContextClosed(e) => e.source(),
            ApplicationEvent::Payload(p) => p.source(),
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        match self {
            ApplicationEvent::ContextRefreshed(e)
            | ApplicationEvent::ContextStarted(e)
            | ApplicationEvent::ContextStopped(e)
            | ApplicationEvent::ContextClosed(e) => e.timestamp(),
            ApplicationEvent::Payload(p) => p.timestamp(),
        }
    }

    /// The payload of a payload event, if it is a `T`
    pub fn payload_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            ApplicationEvent::Payload(p) => p.payload::<T>(),
            _ => None,
        }
    }

    #[inline]
    pub fn is_context_event(&self) -> bool {
        !matches!(self, ApplicationEvent::Payload(_))
    }
}

/// Dispatch key of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ContextRefreshed,
    ContextStarted,
    ContextStopped,
    ContextClosed,
    /// Payload of the given type
    Payload(TypeId, &'static str),
}

impl EventType {
    /// Key for payloads of type `T`
    pub fn payload<T: Any>() -> Self {
        EventType::Payload(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventType::ContextRefreshed => "ContextRefreshedEvent",
            EventType::ContextStarted => "ContextStartedEvent",
            EventType::ContextStopped => "ContextStoppedEvent",
            EventType::ContextClosed => "ContextClosedEvent",
            EventType::Payload(_, name) => name,
        }
    }

    #[inline]
    pub fn is_context_event(&self) -> bool {
        !matches!(self, EventType::Payload(..))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Listeners and Publishers
// =============================================================================

/// Receives events from a multicaster
pub trait ApplicationListener: Send + Sync {
    /// Event types this listener wants; all by default
    fn supports_event_type(&self, _event_type: &EventType) -> bool {
        true
    }

    fn on_application_event(&self, event: &ApplicationEvent) -> Result<()>;
}

/// Anything events can be published to
pub trait ApplicationEventPublisher: Send + Sync {
    fn publish_event(&self, event: ApplicationEvent) -> Result<()>;
}

type ListenerFn = Box<dyn Fn(&ApplicationEvent) -> Result<()> + Send + Sync>;

/// Listener backed by a closure, optionally restricted to some event types
pub struct FnListener {
    accepts: Option<Vec<EventType>>,
    f: ListenerFn,
}

impl FnListener {
    /// Listener for every event
    pub fn any<F>(f: F) -> Self
    where
        F: Fn(&ApplicationEvent) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            accepts: None,
            f: Box::new(f),
        }
    }

    /// Listener for the given event types only
    pub fn of_types<F>(types: impl IntoIterator<Item = EventType>, f: F) -> Self
    where
        F: Fn(&ApplicationEvent) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            accepts: Some(types.into_iter().collect()),
            f: Box::new(f),
        }
    }
}

impl ApplicationListener for FnListener {
    fn supports_event_type(&self, event_type: &EventType) -> bool {
        self.accepts
            .as_ref()
            .is_none_or(|types| types.contains(event_type))
    }

    fn on_application_event(&self, event: &ApplicationEvent) -> Result<()> {
        (self.f)(event)
    }
}

impl fmt::Debug for FnListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener").field("accepts", &self.accepts).finish()
    }
}

/// Listener for one event type
pub fn listener<F>(event_type: EventType, f: F) -> Arc<dyn ApplicationListener>
where
    F: Fn(&ApplicationEvent) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnListener::of_types([event_type], f))
}

/// Listener receiving payloads of type `T`
pub fn payload_listener<T, F>(f: F) -> Arc<dyn ApplicationListener>
where
    T: Any + Send + Sync,
    F: Fn(&T) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnListener::of_types([EventType::payload::<T>()], move |event: &ApplicationEvent| {
        match event.payload_as::<T>() {
            Some(payload) => f(&payload),
            None => Ok(()),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, PartialEq)]
    struct OrderPlaced(u32);

    #[test]
    fn test_event_types() {
        let refreshed = ApplicationEvent::ContextRefreshed(ContextEvent::new("ctx"));
        assert_eq!(refreshed.event_type(), EventType::ContextRefreshed);
        assert_eq!(refreshed.source(), "ctx");
        assert!(refreshed.is_context_event());

        let placed = ApplicationEvent::payload("ctx", OrderPlaced(7));
        assert_eq!(placed.event_type(), EventType::payload::<OrderPlaced>());
        assert_eq!(*placed.payload_as::<OrderPlaced>().unwrap(), OrderPlaced(7));
        assert!(placed.payload_as::<String>().is_none());
        assert!(!placed.event_type().is_context_event());
    }

    #[test]
    fn test_fn_listener_filters_types() {
        let l = FnListener::of_types([EventType::ContextClosed], |_| Ok(()));
        assert!(l.supports_event_type(&EventType::ContextClosed));
        assert!(!l.supports_event_type(&EventType::ContextRefreshed));
        assert!(FnListener::any(|_| Ok(())).supports_event_type(&EventType::payload::<u8>()));
    }

    #[test]
    fn test_payload_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let l = payload_listener::<OrderPlaced, _>(move |order| {
            sink.lock().push(order.0);
            Ok(())
        });

        assert!(l.supports_event_type(&EventType::payload::<OrderPlaced>()));
        assert!(!l.supports_event_type(&EventType::payload::<u32>()));
        l.on_application_event(&ApplicationEvent::payload("ctx", OrderPlaced(3)))
            .unwrap();
        assert_eq!(*seen.lock(), [3]);
    }
}
