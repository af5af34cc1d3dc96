//! Event bus with typed pub/sub
//!
//! The state machine fires `state_changed` / `state_reported` events here;
//! anything interested in entity updates subscribes by event type.

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use std::marker::PhantomData;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast hub keyed by event type
pub struct EventBus {
    listeners: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    /// Receives every event regardless of type
    all: broadcast::Sender<Event<serde_json::Value>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            all,
            capacity,
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        self.listeners
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to a typed event, receiving parsed payloads
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver {
            rx: self.subscribe(T::event_type()),
            _phantom: PhantomData,
        }
    }

    /// Subscribe to every event fired on the bus
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event<serde_json::Value>> {
        self.all.subscribe()
    }

    /// Deliver an event to its type's subscribers and to catch-all subscribers
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        // Send errors only mean nobody is listening
        if let Some(sender) = self.listeners.get(&event.event_type) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event);
    }

    /// Serialize typed data and fire it
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let event = Event::typed(data, context)
            .map_data(|data| serde_json::to_value(&data).unwrap_or_default());
        self.fire(event);
    }

    /// Number of event types with at least one subscription ever made
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that yields only events whose payload parses as `T`
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    _phantom: PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    /// Receive the next event, skipping payloads that fail to parse
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map_data(|_| data));
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Result<Event<T>, broadcast::error::TryRecvError> {
        loop {
            let event = self.rx.try_recv()?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map_data(|_| data));
            }
        }
    }
}
