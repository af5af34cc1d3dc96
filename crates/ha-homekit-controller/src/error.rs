//! Error types for the HomeKit controller platform

use ha_core::EntityIdError;
use thiserror::Error;

pub type HomeKitResult<T> = Result<T, HomeKitError>;

/// Errors raised while setting up the platform
///
/// Value delivery never produces one of these: updates are applied verbatim
/// and unknown services are skipped, not rejected.
#[derive(Debug, Error)]
pub enum HomeKitError {
    #[error("config entry {entry_id} has no AccessoryPairingID")]
    MissingPairingId { entry_id: String },

    #[error("no known HomeKit device for pairing {0}")]
    UnknownDevice(String),

    #[error("unique id {unique_id} is already registered as {entity_id}")]
    DuplicateUniqueId { unique_id: String, entity_id: String },

    #[error("invalid entity id: {0}")]
    InvalidEntityId(#[from] EntityIdError),

    #[error("invalid accessory database: {0}")]
    InvalidAccessories(#[from] serde_json::Error),
}
