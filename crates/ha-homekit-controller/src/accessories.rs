//! Accessory database model
//!
//! The shape of the HAP `/accessories` document: accessories own services,
//! services own characteristics, and each level carries an id (`aid` for
//! accessories, `iid` for everything inside one).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::characteristics::{self, CharacteristicsType, ACCESSORY_INFORMATION};
use crate::error::HomeKitResult;

/// One characteristic as listed in the accessory database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Characteristic {
    pub iid: u64,

    /// Full or short type UUID
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default)]
    pub perms: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Characteristic {
    pub fn characteristic_type(&self) -> Option<CharacteristicsType> {
        CharacteristicsType::from_type(&self.kind)
    }
}

/// One service of an accessory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub iid: u64,

    /// Full or short type UUID
    #[serde(rename = "type")]
    pub kind: String,

    /// Capability tag (`"humidity"`, `"battery"`, …), filled in by the
    /// connection before the service is offered to listeners
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stype: Option<String>,

    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    /// Fill `stype` from the type UUID if the accessory did not supply one
    pub fn resolve_stype(&mut self) {
        if self.stype.is_none() {
            self.stype = characteristics::service_tag(&self.kind).map(str::to_string);
        }
    }

    pub fn is_accessory_information(&self) -> bool {
        characteristics::short_uuid(&self.kind) == Some(ACCESSORY_INFORMATION)
    }

    /// Current value of the first characteristic of the given type
    pub fn value(&self, ctype: CharacteristicsType) -> Option<&Value> {
        self.characteristics
            .iter()
            .find(|c| c.characteristic_type() == Some(ctype))
            .and_then(|c| c.value.as_ref())
    }
}

/// One accessory (a bridge exposes several, a plain accessory exactly one)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accessory {
    pub aid: u64,

    #[serde(default)]
    pub services: Vec<Service>,
}

impl Accessory {
    pub fn service(&self, iid: u64) -> Option<&Service> {
        self.services.iter().find(|s| s.iid == iid)
    }

    /// A string characteristic of the accessory information service
    pub fn information(&self, ctype: CharacteristicsType) -> Option<&str> {
        self.services
            .iter()
            .find(|s| s.is_accessory_information())
            .and_then(|s| s.value(ctype))
            .and_then(Value::as_str)
    }
}

#[derive(Deserialize)]
struct AccessoriesDocument {
    accessories: Vec<Accessory>,
}

/// Parse a `{"accessories": [...]}` document
pub fn parse_accessories(json: &str) -> HomeKitResult<Vec<Accessory>> {
    let document: AccessoriesDocument = serde_json::from_str(json)?;
    Ok(document.accessories)
}
