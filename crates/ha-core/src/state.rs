//! State type representing an entity's current state

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{STATE_UNAVAILABLE, STATE_UNKNOWN};
use crate::{Context, EntityId};

/// Snapshot of an entity's state at a point in time
///
/// The value is always a string (`"23.5"`, `"unknown"`, `"unavailable"`);
/// presentation metadata such as icon and unit travels in `attributes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: EntityId,

    pub state: String,

    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the state value or attributes last changed
    pub last_changed: DateTime<Utc>,

    /// When the state was last written, changed or not
    pub last_updated: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reported: Option<DateTime<Utc>>,

    pub context: Context,
}

impl State {
    /// Create a new state with current timestamp
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            last_reported: Some(now),
            context,
        }
    }

    /// Whether writing `state`/`attributes` over this one would be a no-op
    pub fn same_as(&self, state: &str, attributes: &HashMap<String, serde_json::Value>) -> bool {
        self.state == state && &self.attributes == attributes
    }

    /// Create the successor state
    ///
    /// `last_changed` moves only when the value or the attributes differ.
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        let new_state = new_state.into();
        let changed = !self.same_as(&new_state, &new_attributes);

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed: if changed { now } else { self.last_changed },
            last_updated: now,
            last_reported: Some(now),
            context,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }

    /// Get a typed attribute value by key
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps and context are not compared
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn humidity_id() -> EntityId {
        EntityId::new("sensor", "bathroom_humidity").unwrap()
    }

    #[test]
    fn test_update_with_same_value_keeps_last_changed() {
        let attrs = HashMap::from([("icon".to_string(), json!("mdi:water-percent"))]);
        let first = State::new(humidity_id(), "48", attrs.clone(), Context::new());
        let second = first.with_update("48", attrs, Context::new());
        assert_eq!(first.last_changed, second.last_changed);
        assert!(second.last_updated >= first.last_updated);
    }

    #[test]
    fn test_attribute_change_counts_as_change() {
        let first = State::new(humidity_id(), "48", HashMap::new(), Context::new());
        let attrs = HashMap::from([("icon".to_string(), json!("mdi:battery-40"))]);
        assert!(!first.same_as("48", &attrs));
        assert!(first.same_as("48", &HashMap::new()));
    }

    #[test]
    fn test_unknown_and_typed_attribute() {
        let attrs = HashMap::from([("unit_of_measurement".to_string(), json!("%"))]);
        let state = State::new(humidity_id(), STATE_UNKNOWN, attrs, Context::new());
        assert!(state.is_unknown());
        assert!(!state.is_unavailable());
        assert_eq!(
            state.attribute::<String>("unit_of_measurement").as_deref(),
            Some("%")
        );
        assert_eq!(state.attribute::<String>("icon"), None);
    }
}
