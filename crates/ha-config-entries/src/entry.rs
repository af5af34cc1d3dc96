//! Config Entry types
//!
//! Entries are stored in `.storage/core.config_entries`; the serde layout
//! here reads that format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source of the config entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Configured via UI/API
    #[default]
    User,
    /// Imported from YAML config
    Import,
    /// mDNS/Bonjour discovery
    Zeroconf,
    /// HomeKit accessory discovery
    Homekit,
    /// User hiding a discovery
    Ignore,
}

/// A configuration entry for an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Integration domain (e.g. "homekit_controller")
    pub domain: String,

    pub title: String,

    /// Immutable configuration data
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// User-configurable options
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,

    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default)]
    pub source: ConfigEntrySource,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
            version: 1,
            unique_id: None,
            source: ConfigEntrySource::User,
            created_at: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// Typed lookup into `data`; `None` if missing or of the wrong shape
    pub fn data_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
