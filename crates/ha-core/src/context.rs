//! Context type for tracking who caused a state write

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Origin and causality of an event or state write
///
/// Integrations create a fresh context per write; a child context links a
/// follow-up write back to the one that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this context (ULID)
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    /// Create a new context with a fresh ULID
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: None,
            parent_id: None,
        }
    }

    /// Create a child context with this context as parent
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: self.user_id.clone(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
