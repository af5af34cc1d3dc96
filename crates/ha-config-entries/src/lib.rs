//! Config Entries
//!
//! A config entry is one configured instance of an integration. For the
//! HomeKit controller that means one paired accessory: the entry's `data`
//! carries the pairing id the platform uses to find the live connection.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntrySource`] - How the entry came to exist

pub mod entry;

pub use entry::{ConfigEntry, ConfigEntrySource};
