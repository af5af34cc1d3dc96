//! Shared constants for entity state and presentation attributes
//!
//! Names and values match Python HA's `homeassistant.const`, so states
//! written here look the same to anything consuming them.

/// State written for an entity that has not received a value yet
pub const STATE_UNKNOWN: &str = "unknown";

/// State written for an entity whose backing device is unreachable
pub const STATE_UNAVAILABLE: &str = "unavailable";

pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
pub const ATTR_ICON: &str = "icon";
pub const ATTR_UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";
pub const ATTR_DEVICE_CLASS: &str = "device_class";

pub const PERCENTAGE: &str = "%";
pub const TEMP_CELSIUS: &str = "°C";
pub const LIGHT_LUX: &str = "lux";
pub const CONCENTRATION_PARTS_PER_MILLION: &str = "ppm";

pub const DEVICE_CLASS_BATTERY: &str = "battery";

/// Domain of read-only measurement entities
pub const SENSOR_DOMAIN: &str = "sensor";
