//! Core types for the HomeKit controller sensor platform
//!
//! The fundamental types every other crate in the workspace builds on:
//! EntityId, State, Event and Context, plus the shared constants (state
//! values, attribute keys, units, device classes) entities publish with.

pub mod constants;
mod context;
mod entity_id;
mod event;
mod state;

pub use context::Context;
pub use entity_id::{slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use state::State;

/// Maximum length for a state value (matches Python HA)
pub const MAX_STATE_LENGTH: usize = 255;

/// Standard event types
pub mod events {
    use super::*;

    /// Fired when an entity's state or attributes changed
    pub const STATE_CHANGED: &str = "state_changed";

    /// Fired when an entity re-wrote an identical state
    pub const STATE_REPORTED: &str = "state_reported";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for STATE_REPORTED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateReportedData {
        pub entity_id: EntityId,
        pub new_state: State,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub old_last_reported: Option<chrono::DateTime<chrono::Utc>>,
        pub last_reported: chrono::DateTime<chrono::Utc>,
    }

    impl EventData for StateReportedData {
        fn event_type() -> &'static str {
            STATE_REPORTED
        }
    }
}
