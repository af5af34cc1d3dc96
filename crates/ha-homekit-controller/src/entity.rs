//! Base HomeKit entity
//!
//! Everything a sensor needs from the accessory it was created for: the
//! identity of its service, the accessory's name and serial number, and the
//! map from characteristic instance ids to the characteristic types the
//! sensor asked to track.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::characteristics::CharacteristicsType;
use crate::connection::AccessoryConnection;

/// Identifies one service of one accessory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub aid: u64,
    pub iid: u64,
}

/// A delivered characteristic value, as carried by HAP events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicUpdate {
    pub aid: u64,
    pub iid: u64,
    pub value: Value,
}

impl CharacteristicUpdate {
    pub fn new(aid: u64, iid: u64, value: impl Into<Value>) -> Self {
        Self {
            aid,
            iid,
            value: value.into(),
        }
    }
}

/// State shared by every HomeKit sensor variant
pub struct HomeKitEntity {
    connection: Arc<dyn AccessoryConnection>,
    info: ServiceInfo,
    accessory_name: String,
    serial_number: Option<String>,
    /// Characteristic iid → tracked type, for this service only
    chars: HashMap<u64, CharacteristicsType>,
}

impl HomeKitEntity {
    /// Bind to a service and resolve the characteristics to track
    ///
    /// Characteristics of the service whose type is not in `tracked` are
    /// ignored, as are tracked types the service does not have.
    pub fn new(
        connection: Arc<dyn AccessoryConnection>,
        info: ServiceInfo,
        tracked: &[CharacteristicsType],
    ) -> Self {
        let mut accessory_name = None;
        let mut serial_number = None;
        let mut chars = HashMap::new();

        let accessories = connection.accessories();
        if let Some(accessory) = accessories.iter().find(|a| a.aid == info.aid) {
            accessory_name = accessory
                .information(CharacteristicsType::Name)
                .map(str::to_string);
            serial_number = accessory
                .information(CharacteristicsType::SerialNumber)
                .map(str::to_string);

            if let Some(service) = accessory.service(info.iid) {
                for characteristic in &service.characteristics {
                    match characteristic.characteristic_type() {
                        Some(ctype) if tracked.contains(&ctype) => {
                            chars.insert(characteristic.iid, ctype);
                        }
                        _ => trace!(iid = characteristic.iid, kind = %characteristic.kind, "Untracked characteristic"),
                    }
                }
            }
        }

        if chars.len() < tracked.len() {
            debug!(
                aid = info.aid,
                iid = info.iid,
                found = chars.len(),
                tracked = tracked.len(),
                "Service is missing tracked characteristics"
            );
        }

        Self {
            connection,
            info,
            accessory_name: accessory_name.unwrap_or_else(|| format!("Accessory {}", info.aid)),
            serial_number,
            chars,
        }
    }

    pub fn info(&self) -> ServiceInfo {
        self.info
    }

    /// Accessory name, falling back to `Accessory {aid}`
    pub fn name(&self) -> &str {
        &self.accessory_name
    }

    /// `homekit-{serial}-{iid}`; the aid stands in for a missing serial
    pub fn unique_id(&self) -> String {
        match &self.serial_number {
            Some(serial) => format!("homekit-{}-{}", serial, self.info.iid),
            None => format!("homekit-{}-{}", self.info.aid, self.info.iid),
        }
    }

    pub fn available(&self) -> bool {
        self.connection.is_available()
    }

    pub fn characteristic(&self, iid: u64) -> Option<CharacteristicsType> {
        self.chars.get(&iid).copied()
    }

    /// The updates addressed to this service, resolved to characteristic types
    pub fn resolve<'a>(
        &self,
        updates: &'a [CharacteristicUpdate],
    ) -> Vec<(CharacteristicsType, &'a Value)> {
        updates
            .iter()
            .filter(|u| u.aid == self.info.aid)
            .filter_map(|u| self.characteristic(u.iid).map(|ctype| (ctype, &u.value)))
            .collect()
    }
}

impl std::fmt::Debug for HomeKitEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeKitEntity")
            .field("info", &self.info)
            .field("accessory_name", &self.accessory_name)
            .field("serial_number", &self.serial_number)
            .field("chars", &self.chars)
            .finish()
    }
}
