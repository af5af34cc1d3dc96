//! State machine with domain indexing
//!
//! Tracks the current state of every entity, keeps an index by domain and
//! fires `state_changed` or `state_reported` on the event bus for each write.

use dashmap::DashMap;
use ha_core::events::{StateChangedData, StateReportedData};
use ha_core::{Context, EntityId, State};
use ha_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Current state of all entities
///
/// Writes are idempotent from an observer's point of view: re-writing an
/// identical value and attribute set fires `state_reported` and leaves
/// `last_changed` untouched.
pub struct StateMachine {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Index of entity_ids by domain
    domain_index: DashMap<String, Vec<String>>,
    event_bus: Arc<EventBus>,
}

impl StateMachine {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// Write the state of an entity
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let entity_id_str = entity_id.to_string();
        let state = state.into();

        let old_state = self.states.get(&entity_id_str).map(|s| s.clone());

        let (new_state, changed) = match &old_state {
            Some(existing) => {
                let changed = !existing.same_as(&state, &attributes);
                (existing.with_update(state, attributes, context.clone()), changed)
            }
            None => (State::new(entity_id.clone(), state, attributes, context.clone()), true),
        };

        debug!(state = %new_state.state, changed, "Setting entity state");

        self.states.insert(entity_id_str.clone(), new_state.clone());

        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(entity_id_str);
        }

        if changed {
            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id,
                    old_state,
                    new_state: Some(new_state.clone()),
                },
                context,
            );
        } else {
            let old_last_reported = old_state.and_then(|s| s.last_reported);
            self.event_bus.fire_typed(
                StateReportedData {
                    entity_id,
                    new_state: new_state.clone(),
                    old_last_reported,
                    last_reported: new_state.last_updated,
                },
                context,
            );
        }

        new_state
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the state value as a string, or None if entity doesn't exist
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Whether an entity id is already taken
    pub fn contains(&self, entity_id: &str) -> bool {
        self.states.contains_key(entity_id)
    }

    /// All entity IDs for a domain, in insertion order
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn domain_states(&self, domain: &str) -> Vec<State> {
        self.entity_ids(domain)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Remove an entity's state, firing `state_changed` with no new state
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let entity_id_str = entity_id.to_string();
        let old_state = self.states.remove(&entity_id_str).map(|(_, s)| s)?;

        trace!("Removing entity state");
        if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
            ids.retain(|id| id != &entity_id_str);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id: entity_id.clone(),
                old_state: Some(old_state.clone()),
                new_state: None,
            },
            context,
        );

        Some(old_state)
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}
