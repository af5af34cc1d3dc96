//! HomeKit sensor entities
//!
//! One variant per supported service type. Each variant declares the
//! characteristics it tracks and routes every delivered value to a typed
//! update method through an explicit `match` on [`CharacteristicsType`].

use std::sync::Arc;

use ha_core::constants::{
    CONCENTRATION_PARTS_PER_MILLION, DEVICE_CLASS_BATTERY, LIGHT_LUX, PERCENTAGE, TEMP_CELSIUS,
};
use serde_json::Value;

use crate::characteristics::CharacteristicsType;
use crate::connection::AccessoryConnection;
use crate::entity::{CharacteristicUpdate, HomeKitEntity, ServiceInfo};

/// A sensor bound to one accessory service
pub trait SensorEntity: Send + Sync {
    fn base(&self) -> &HomeKitEntity;

    /// Characteristics this sensor wants delivered
    fn characteristic_types(&self) -> &'static [CharacteristicsType];

    /// Apply one delivered value; `false` if this sensor does not track `ctype`
    fn update_characteristic(&mut self, ctype: CharacteristicsType, value: &Value) -> bool;

    fn name(&self) -> String;

    fn icon(&self) -> String;

    fn unit_of_measurement(&self) -> &'static str;

    fn device_class(&self) -> Option<&'static str> {
        None
    }

    /// Last delivered value, `None` until the first update
    fn state(&self) -> Option<&Value>;

    fn unique_id(&self) -> String {
        self.base().unique_id()
    }

    fn available(&self) -> bool {
        self.base().available()
    }

    /// Apply every update addressed to this sensor's service
    ///
    /// Returns whether at least one value was applied.
    fn update_characteristics(&mut self, updates: &[CharacteristicUpdate]) -> bool {
        let resolved = self.base().resolve(updates);
        let mut applied = false;
        for (ctype, value) in resolved {
            applied |= self.update_characteristic(ctype, value);
        }
        applied
    }
}

// =============================================================================
// Single value sensors
// =============================================================================

macro_rules! single_value_sensor {
    (
        $(#[$meta:meta])*
        $name:ident {
            tracks: $ctype:ident,
            update: $update:ident,
            suffix: $suffix:literal,
            icon: $icon:literal,
            unit: $unit:expr $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            base: HomeKitEntity,
            state: Option<Value>,
        }

        impl $name {
            const TRACKED: &'static [CharacteristicsType] = &[CharacteristicsType::$ctype];

            pub fn new(connection: Arc<dyn AccessoryConnection>, info: ServiceInfo) -> Self {
                Self {
                    base: HomeKitEntity::new(connection, info, Self::TRACKED),
                    state: None,
                }
            }

            pub fn $update(&mut self, value: &Value) {
                self.state = Some(value.clone());
            }
        }

        impl SensorEntity for $name {
            fn base(&self) -> &HomeKitEntity {
                &self.base
            }

            fn characteristic_types(&self) -> &'static [CharacteristicsType] {
                Self::TRACKED
            }

            fn update_characteristic(&mut self, ctype: CharacteristicsType, value: &Value) -> bool {
                match ctype {
                    CharacteristicsType::$ctype => {
                        self.$update(value);
                        true
                    }
                    _ => false,
                }
            }

            fn name(&self) -> String {
                format!("{} {}", self.base.name(), $suffix)
            }

            fn icon(&self) -> String {
                $icon.to_string()
            }

            fn unit_of_measurement(&self) -> &'static str {
                $unit
            }

            fn state(&self) -> Option<&Value> {
                self.state.as_ref()
            }
        }
    };
}

single_value_sensor! {
    /// Current relative humidity in percent
    HomeKitHumiditySensor {
        tracks: RelativeHumidityCurrent,
        update: update_relative_humidity_current,
        suffix: "Humidity",
        icon: "mdi:water-percent",
        unit: PERCENTAGE,
    }
}

single_value_sensor! {
    /// Current temperature in degrees Celsius
    HomeKitTemperatureSensor {
        tracks: TemperatureCurrent,
        update: update_temperature_current,
        suffix: "Temperature",
        icon: "mdi:thermometer",
        unit: TEMP_CELSIUS,
    }
}

single_value_sensor! {
    /// Current ambient light level in lux
    HomeKitLightSensor {
        tracks: LightLevelCurrent,
        update: update_light_level_current,
        suffix: "Light Level",
        icon: "mdi:brightness-6",
        unit: LIGHT_LUX,
    }
}

single_value_sensor! {
    /// Carbon dioxide level in ppm
    HomeKitCarbonDioxideSensor {
        tracks: CarbonDioxideLevel,
        update: update_carbon_dioxide_level,
        suffix: "CO2",
        icon: "mdi:periodic-table-co2",
        unit: CONCENTRATION_PARTS_PER_MILLION,
    }
}

// =============================================================================
// Battery
// =============================================================================

/// Battery level, low battery flag and charging state of one battery service
#[derive(Debug)]
pub struct HomeKitBatterySensor {
    base: HomeKitEntity,
    state: Option<Value>,
    low_battery: bool,
    charging: bool,
}

impl HomeKitBatterySensor {
    const TRACKED: &'static [CharacteristicsType] = &[
        CharacteristicsType::BatteryLevel,
        CharacteristicsType::StatusLoBatt,
        CharacteristicsType::ChargingState,
    ];

    pub fn new(connection: Arc<dyn AccessoryConnection>, info: ServiceInfo) -> Self {
        Self {
            base: HomeKitEntity::new(connection, info, Self::TRACKED),
            state: None,
            low_battery: false,
            charging: false,
        }
    }

    pub fn update_battery_level(&mut self, value: &Value) {
        self.state = Some(value.clone());
    }

    /// 0 = normal, 1 = low
    pub fn update_status_lo_batt(&mut self, value: &Value) {
        self.low_battery = is_one(value);
    }

    /// 0 = not charging, 1 = charging, 2 = not chargeable
    pub fn update_charging_state(&mut self, value: &Value) {
        self.charging = is_one(value);
    }

    pub fn is_low_battery(&self) -> bool {
        self.low_battery
    }

    pub fn is_charging(&self) -> bool {
        self.charging
    }
}

impl SensorEntity for HomeKitBatterySensor {
    fn base(&self) -> &HomeKitEntity {
        &self.base
    }

    fn characteristic_types(&self) -> &'static [CharacteristicsType] {
        Self::TRACKED
    }

    fn update_characteristic(&mut self, ctype: CharacteristicsType, value: &Value) -> bool {
        match ctype {
            CharacteristicsType::BatteryLevel => self.update_battery_level(value),
            CharacteristicsType::StatusLoBatt => self.update_status_lo_batt(value),
            CharacteristicsType::ChargingState => self.update_charging_state(value),
            _ => return false,
        }
        true
    }

    fn name(&self) -> String {
        format!("{} Battery", self.base.name())
    }

    fn icon(&self) -> String {
        battery_icon(
            self.available(),
            self.state.as_ref().and_then(Value::as_f64),
            self.charging,
            self.low_battery,
        )
    }

    fn unit_of_measurement(&self) -> &'static str {
        PERCENTAGE
    }

    fn device_class(&self) -> Option<&'static str> {
        Some(DEVICE_CLASS_BATTERY)
    }

    fn state(&self) -> Option<&Value> {
        self.state.as_ref()
    }
}

/// Numeric or boolean equality with 1
fn is_one(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        _ => value.as_f64() == Some(1.0),
    }
}

/// Battery icon for the given readings
///
/// Charging levels are bucketed by 20, discharging levels by 10 with a floor
/// of 10. The device decides what counts as low; 95 and above is full.
pub fn battery_icon(
    available: bool,
    percentage: Option<f64>,
    charging: bool,
    low_battery: bool,
) -> String {
    let percentage = match percentage {
        Some(p) if available => p,
        _ => return "mdi:battery-unknown".to_string(),
    };

    if charging && percentage > 10.0 {
        format!("mdi:battery-charging-{}", bucket(percentage, 20))
    } else if charging {
        "mdi:battery-outline".to_string()
    } else if low_battery {
        "mdi:battery-alert".to_string()
    } else if percentage < 95.0 {
        format!("mdi:battery-{}", bucket(percentage, 10).max(10))
    } else {
        "mdi:battery".to_string()
    }
}

/// `percentage` to a multiple of `step`, nudged down so exact boundaries stay put
fn bucket(percentage: f64, step: i64) -> i64 {
    round_half_even(percentage / step as f64 - 0.01) as i64 * step
}

fn round_half_even(x: f64) -> f64 {
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        x.round()
    }
}
