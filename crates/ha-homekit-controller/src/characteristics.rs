//! HomeKit characteristic and service identifiers
//!
//! Apple-defined types share one base UUID,
//! `XXXXXXXX-0000-1000-8000-0026BB765291`, and accessories are free to send
//! either the full form or just the leading hex digits (`"10"`, `"0010"`).
//! Both forms resolve to the same short code here.

use std::fmt;

use uuid::Uuid;

/// Low 96 bits of the Apple base UUID
const APPLE_BASE: u128 = 0x0000_0000_0000_1000_8000_0026_BB76_5291;
const LOW_96_BITS: u128 = (1 << 96) - 1;

/// Resolve a type string from the accessory database to its short code
///
/// Returns `None` for vendor UUIDs outside the Apple base and for strings
/// that are not hex.
pub fn short_uuid(type_str: &str) -> Option<u32> {
    if type_str.contains('-') {
        let value = Uuid::parse_str(type_str).ok()?.as_u128();
        if value & LOW_96_BITS != APPLE_BASE {
            return None;
        }
        return Some((value >> 96) as u32);
    }
    if type_str.is_empty() || type_str.len() > 8 {
        return None;
    }
    u32::from_str_radix(type_str, 16).ok()
}

/// Full uppercase UUID for an Apple short code
pub fn full_uuid(short: u32) -> String {
    Uuid::from_u128((u128::from(short) << 96) | APPLE_BASE)
        .hyphenated()
        .to_string()
        .to_uppercase()
}

/// Characteristic types this platform reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicsType {
    Name,
    Manufacturer,
    Model,
    SerialNumber,
    RelativeHumidityCurrent,
    TemperatureCurrent,
    LightLevelCurrent,
    CarbonDioxideLevel,
    BatteryLevel,
    StatusLoBatt,
    ChargingState,
}

impl CharacteristicsType {
    pub const ALL: [CharacteristicsType; 11] = [
        Self::Name,
        Self::Manufacturer,
        Self::Model,
        Self::SerialNumber,
        Self::RelativeHumidityCurrent,
        Self::TemperatureCurrent,
        Self::LightLevelCurrent,
        Self::CarbonDioxideLevel,
        Self::BatteryLevel,
        Self::StatusLoBatt,
        Self::ChargingState,
    ];

    pub fn short_uuid(self) -> u32 {
        match self {
            Self::Manufacturer => 0x20,
            Self::Model => 0x21,
            Self::Name => 0x23,
            Self::SerialNumber => 0x30,
            Self::RelativeHumidityCurrent => 0x10,
            Self::TemperatureCurrent => 0x11,
            Self::BatteryLevel => 0x68,
            Self::LightLevelCurrent => 0x6B,
            Self::StatusLoBatt => 0x79,
            Self::ChargingState => 0x8F,
            Self::CarbonDioxideLevel => 0x93,
        }
    }

    pub fn uuid(self) -> String {
        full_uuid(self.short_uuid())
    }

    /// Name in the `public.hap.characteristic.*` namespace
    pub fn hap_name(self) -> &'static str {
        match self {
            Self::Name => "public.hap.characteristic.name",
            Self::Manufacturer => "public.hap.characteristic.manufacturer",
            Self::Model => "public.hap.characteristic.model",
            Self::SerialNumber => "public.hap.characteristic.serial-number",
            Self::RelativeHumidityCurrent => "public.hap.characteristic.relative-humidity.current",
            Self::TemperatureCurrent => "public.hap.characteristic.temperature.current",
            Self::LightLevelCurrent => "public.hap.characteristic.light-level.current",
            Self::CarbonDioxideLevel => "public.hap.characteristic.carbon-dioxide.level",
            Self::BatteryLevel => "public.hap.characteristic.battery-level",
            Self::StatusLoBatt => "public.hap.characteristic.status-lo-batt",
            Self::ChargingState => "public.hap.characteristic.charging-state",
        }
    }

    /// Parse a full or short type string
    pub fn from_type(type_str: &str) -> Option<Self> {
        let short = short_uuid(type_str)?;
        Self::ALL.into_iter().find(|c| c.short_uuid() == short)
    }
}

impl fmt::Display for CharacteristicsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hap_name())
    }
}

/// Short UUID of the accessory information service
pub const ACCESSORY_INFORMATION: u32 = 0x3E;

/// Capability tag for a service type string, e.g. `"humidity"` for `82`
///
/// Tags are what the connection reports as a service's `stype` and what the
/// sensor registry dispatches on.
pub fn service_tag(type_str: &str) -> Option<&'static str> {
    let tag = match short_uuid(type_str)? {
        ACCESSORY_INFORMATION => "accessory-information",
        0x43 => "lightbulb",
        0x47 => "outlet",
        0x49 => "switch",
        0x4A => "thermostat",
        0x80 => "contact",
        0x82 => "humidity",
        0x84 => "light",
        0x85 => "motion",
        0x8A => "temperature",
        0x96 => "battery",
        0x97 => "carbon-dioxide",
        _ => return None,
    };
    Some(tag)
}
