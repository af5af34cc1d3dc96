//! Entity ID type representing a domain.object_id pair

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid entity IDs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity_id must contain exactly one '.' separator")]
    InvalidFormat,

    #[error("domain cannot be empty")]
    EmptyDomain,

    #[error("object_id cannot be empty")]
    EmptyObjectId,

    #[error("domain contains invalid characters")]
    InvalidDomainChars,

    #[error("object_id contains invalid characters")]
    InvalidObjectIdChars,
}

/// An entity ID such as `sensor.living_room_humidity`
///
/// Both parts are lowercase alphanumeric with underscores and may not start
/// or end with an underscore; the domain additionally may not contain `__`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

impl EntityId {
    /// Create a new EntityId from domain and object_id parts
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();

        if domain.is_empty() {
            return Err(EntityIdError::EmptyDomain);
        }
        if object_id.is_empty() {
            return Err(EntityIdError::EmptyObjectId);
        }
        if domain.contains("__") || !is_valid_slug(&domain) {
            return Err(EntityIdError::InvalidDomainChars);
        }
        if !is_valid_slug(&object_id) {
            return Err(EntityIdError::InvalidObjectIdChars);
        }

        Ok(Self { domain, object_id })
    }

    /// Build an entity ID whose object_id is the slugified display name
    ///
    /// `("sensor", "Living Room Humidity")` becomes `sensor.living_room_humidity`.
    pub fn from_name(domain: impl Into<String>, name: &str) -> Result<Self, EntityIdError> {
        Self::new(domain, slugify(name))
    }

    /// Copy of this ID with `_{n}` appended to the object_id
    pub fn with_suffix(&self, n: usize) -> Self {
        Self {
            domain: self.domain.clone(),
            object_id: format!("{}_{}", self.object_id, n),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

/// Matches Python HA's `(?!_)[\da-z_]+(?<!_)`
fn is_valid_slug(s: &str) -> bool {
    if s.starts_with('_') || s.ends_with('_') {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Turn a display name into an object_id
///
/// Non-ASCII letters are transliterated (`Küche` → `kuche`); runs of anything
/// else that is not a letter or digit become a single underscore.
pub fn slugify(name: &str) -> String {
    slug::slugify(name).replace('-', "_")
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => Self::new(domain, object_id),
            _ => Err(EntityIdError::InvalidFormat),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}
