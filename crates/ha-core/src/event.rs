//! Event types carried by the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Context;

/// Typed event payload
pub trait EventData: Clone + Send + Sync + 'static {
    /// The event type string for this data type
    fn event_type() -> &'static str;
}

/// Event type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event fired on the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    pub event_type: EventType,
    pub data: T,
    pub origin: EventOrigin,
    pub time_fired: DateTime<Utc>,
    pub context: Context,
}

impl<T> Event<T> {
    /// Create a new local event stamped with the current time
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            origin: EventOrigin::Local,
            time_fired: Utc::now(),
            context,
        }
    }

    /// Replace the payload, keeping type, origin, time and context
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> Event<U> {
        Event {
            event_type: self.event_type,
            data: f(self.data),
            origin: self.origin,
            time_fired: self.time_fired,
            context: self.context,
        }
    }
}

impl<T: EventData> Event<T> {
    /// Create a typed event from EventData
    pub fn typed(data: T, context: Context) -> Self {
        Self::new(T::event_type(), data, context)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    #[default]
    Local,
    Remote,
}
