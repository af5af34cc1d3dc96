//! HomeKit controller sensor platform
//!
//! Maps the humidity, temperature, light level, carbon dioxide and battery
//! services of paired HomeKit accessories onto sensor entities:
//!
//! - [`accessories`] models the HAP accessory database
//! - [`connection`] is the port to the live accessory connection
//! - [`sensor`] holds one entity variant per supported service type
//! - [`platform`] creates entities for discovered services and publishes
//!   their state to the state machine
//!
//! Pairing, sessions and event delivery belong to the connection; this crate
//! only consumes what it offers.

pub mod accessories;
pub mod characteristics;
pub mod connection;
pub mod entity;
pub mod error;
pub mod platform;
pub mod sensor;

pub use accessories::{parse_accessories, Accessory, Characteristic, Service};
pub use characteristics::CharacteristicsType;
pub use connection::{AccessoryConnection, KnownDevices, ListenerId, PairedDevice, ServiceListener};
pub use entity::{CharacteristicUpdate, HomeKitEntity, ServiceInfo};
pub use error::{HomeKitError, HomeKitResult};
pub use platform::{add_service, setup_entry, SensorKind, SensorPlatform, DOMAIN, PAIRING_ID_KEY};
pub use sensor::{
    battery_icon, HomeKitBatterySensor, HomeKitCarbonDioxideSensor, HomeKitHumiditySensor,
    HomeKitLightSensor, HomeKitTemperatureSensor, SensorEntity,
};
