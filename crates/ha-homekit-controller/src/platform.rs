//! Sensor platform
//!
//! Turns services offered by an accessory connection into sensor entities,
//! assigns them entity ids and mirrors their state into the state machine.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ha_config_entries::ConfigEntry;
use ha_core::constants::{
    ATTR_DEVICE_CLASS, ATTR_FRIENDLY_NAME, ATTR_ICON, ATTR_UNIT_OF_MEASUREMENT, SENSOR_DOMAIN,
    STATE_UNAVAILABLE, STATE_UNKNOWN,
};
use ha_core::{Context, EntityId, State, MAX_STATE_LENGTH};
use ha_state_machine::StateMachine;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::accessories::Service;
use crate::connection::{AccessoryConnection, KnownDevices, ListenerId, ServiceListener};
use crate::entity::{CharacteristicUpdate, ServiceInfo};
use crate::error::{HomeKitError, HomeKitResult};
use crate::sensor::{
    HomeKitBatterySensor, HomeKitCarbonDioxideSensor, HomeKitHumiditySensor, HomeKitLightSensor,
    HomeKitTemperatureSensor, SensorEntity,
};

/// Integration domain
pub const DOMAIN: &str = "homekit_controller";

/// Config entry data key holding the pairing id of the accessory
pub const PAIRING_ID_KEY: &str = "AccessoryPairingID";

/// Service types this platform creates sensors for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Humidity,
    Temperature,
    Light,
    CarbonDioxide,
    Battery,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        Self::Humidity,
        Self::Temperature,
        Self::Light,
        Self::CarbonDioxide,
        Self::Battery,
    ];

    pub fn from_stype(stype: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.stype() == stype)
    }

    pub fn stype(self) -> &'static str {
        match self {
            Self::Humidity => "humidity",
            Self::Temperature => "temperature",
            Self::Light => "light",
            Self::CarbonDioxide => "carbon-dioxide",
            Self::Battery => "battery",
        }
    }

    pub fn build(
        self,
        connection: Arc<dyn AccessoryConnection>,
        info: ServiceInfo,
    ) -> Box<dyn SensorEntity> {
        match self {
            Self::Humidity => Box::new(HomeKitHumiditySensor::new(connection, info)),
            Self::Temperature => Box::new(HomeKitTemperatureSensor::new(connection, info)),
            Self::Light => Box::new(HomeKitLightSensor::new(connection, info)),
            Self::CarbonDioxide => Box::new(HomeKitCarbonDioxideSensor::new(connection, info)),
            Self::Battery => Box::new(HomeKitBatterySensor::new(connection, info)),
        }
    }
}

/// Sensor entities of this domain and their published states
pub struct SensorPlatform {
    states: Arc<StateMachine>,
    /// Entities keyed by entity_id string
    entities: DashMap<String, Box<dyn SensorEntity>>,
    /// unique_id → entity_id
    unique_ids: DashMap<String, String>,
    /// aid → entity_ids of that accessory
    by_accessory: DashMap<u64, Vec<String>>,
    /// Listeners registered by [`setup_entry`], keyed by pairing id and listener
    subscriptions: DashMap<(String, ListenerId), Weak<dyn AccessoryConnection>>,
}

impl SensorPlatform {
    pub fn new(states: Arc<StateMachine>) -> Self {
        Self {
            states,
            entities: DashMap::new(),
            unique_ids: DashMap::new(),
            by_accessory: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    /// Register an entity under `sensor.<slug(name)>` and publish its state
    ///
    /// Ids already taken by this platform or by any state in the state
    /// machine get `_2`, `_3`, … appended.
    pub fn add_entity(&self, entity: Box<dyn SensorEntity>) -> HomeKitResult<EntityId> {
        let unique_id = entity.unique_id();
        // Held until the entity id is known so a concurrent add of the same
        // unique_id waits and then fails
        let unique_slot = match self.unique_ids.entry(unique_id.clone()) {
            Entry::Occupied(existing) => {
                return Err(HomeKitError::DuplicateUniqueId {
                    unique_id,
                    entity_id: existing.get().clone(),
                })
            }
            Entry::Vacant(slot) => slot,
        };

        let aid = entity.base().info().aid;
        let base_id = EntityId::from_name(SENSOR_DOMAIN, &entity.name())?;

        let mut n = 1;
        let entity_id = loop {
            let candidate = if n == 1 {
                base_id.clone()
            } else {
                base_id.with_suffix(n)
            };
            n += 1;

            let key = candidate.to_string();
            if self.states.contains(&key) {
                continue;
            }
            if let Entry::Vacant(slot) = self.entities.entry(key) {
                slot.insert(entity);
                break candidate;
            }
        };

        let entity_id_str = entity_id.to_string();
        unique_slot.insert(entity_id_str.clone());
        self.by_accessory
            .entry(aid)
            .or_default()
            .push(entity_id_str.clone());

        debug!(entity_id = %entity_id, unique_id = %unique_id, "Added sensor entity");
        self.write_state(&entity_id_str)?;
        Ok(entity_id)
    }

    /// Publish the current state of one entity
    ///
    /// Returns `None` if the platform has no such entity.
    pub fn write_state(&self, entity_id: &str) -> HomeKitResult<Option<State>> {
        let Some((state, attributes)) = self
            .entities
            .get(entity_id)
            .map(|entity| render(entity.value().as_ref()))
        else {
            return Ok(None);
        };

        let id: EntityId = entity_id.parse()?;
        Ok(Some(self.states.set(id, state, attributes, Context::new())))
    }

    /// Re-publish every entity, e.g. after the connection's availability changed
    pub fn write_all_states(&self) -> usize {
        let mut written = 0;
        for entity_id in self.entity_ids() {
            match self.write_state(&entity_id) {
                Ok(Some(_)) => written += 1,
                Ok(None) => {}
                Err(e) => warn!("Failed to write state of {}: {}", entity_id, e),
            }
        }
        written
    }

    /// Deliver characteristic values of one accessory to its entities
    ///
    /// Returns how many entities applied at least one value; each of them has
    /// its state re-published.
    pub fn update_characteristics(&self, aid: u64, updates: &[CharacteristicUpdate]) -> usize {
        let entity_ids = self
            .by_accessory
            .get(&aid)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        let mut touched = 0;
        for entity_id in entity_ids {
            // The map guard must be released before the state is written
            let applied = self
                .entities
                .get_mut(&entity_id)
                .map(|mut entity| entity.update_characteristics(updates))
                .unwrap_or(false);

            if !applied {
                continue;
            }
            touched += 1;
            if let Err(e) = self.write_state(&entity_id) {
                warn!("Failed to write state of {}: {}", entity_id, e);
            }
        }

        if touched == 0 {
            debug!(aid, updates = updates.len(), "No entity tracks these characteristics");
        }
        touched
    }

    /// Entity ids of every registered entity, sorted
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entities.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn state_of(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of connection listeners this platform holds
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Detach from every connection, drop every entity and remove its state
    ///
    /// Services claimed by this platform are released, so a later
    /// [`setup_entry`] for the same pairing creates them again.
    pub fn unload(&self) -> usize {
        let subscriptions: Vec<_> = self
            .subscriptions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.subscriptions.clear();

        for ((pairing_id, listener_id), connection) in subscriptions {
            if let Some(connection) = connection.upgrade() {
                connection.remove_listener(listener_id);
                debug!(pairing_id = %pairing_id, "Removed {} listener", DOMAIN);
            }
        }

        let entity_ids = self.entity_ids();
        for entity_id in &entity_ids {
            self.entities.remove(entity_id);
            if let Ok(id) = entity_id.parse::<EntityId>() {
                self.states.remove(&id, Context::new());
            }
        }
        self.unique_ids.clear();
        self.by_accessory.clear();

        info!("Unloaded {} {} sensors", entity_ids.len(), DOMAIN);
        entity_ids.len()
    }
}

/// State string and attributes of an entity as the state machine stores them
fn render(entity: &dyn SensorEntity) -> (String, HashMap<String, Value>) {
    let mut state = if !entity.available() {
        STATE_UNAVAILABLE.to_string()
    } else {
        match entity.state() {
            None | Some(Value::Null) => STATE_UNKNOWN.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
        }
    };

    if state.len() > MAX_STATE_LENGTH {
        warn!(
            unique_id = %entity.unique_id(),
            "State is longer than {} bytes, truncating", MAX_STATE_LENGTH
        );
        let mut end = MAX_STATE_LENGTH;
        while !state.is_char_boundary(end) {
            end -= 1;
        }
        state.truncate(end);
    }

    let mut attributes = HashMap::new();
    attributes.insert(ATTR_FRIENDLY_NAME.to_string(), json!(entity.name()));
    attributes.insert(ATTR_ICON.to_string(), json!(entity.icon()));
    attributes.insert(
        ATTR_UNIT_OF_MEASUREMENT.to_string(),
        json!(entity.unit_of_measurement()),
    );
    if let Some(device_class) = entity.device_class() {
        attributes.insert(ATTR_DEVICE_CLASS.to_string(), json!(device_class));
    }

    (state, attributes)
}

/// Create the sensor matching a discovered service, if there is one
///
/// Returns `false`, without side effects, for service types this platform
/// does not handle.
pub fn add_service(
    platform: &SensorPlatform,
    connection: Arc<dyn AccessoryConnection>,
    aid: u64,
    service: &Service,
) -> bool {
    let Some(kind) = service.stype.as_deref().and_then(SensorKind::from_stype) else {
        debug!(aid, iid = service.iid, stype = ?service.stype, "No sensor for service");
        return false;
    };

    let info = ServiceInfo {
        aid,
        iid: service.iid,
    };
    match platform.add_entity(kind.build(connection, info)) {
        Ok(entity_id) => {
            info!("Added {} sensor {}", kind.stype(), entity_id);
            true
        }
        Err(e) => {
            warn!(aid, iid = service.iid, "Failed to add {} sensor: {}", kind.stype(), e);
            false
        }
    }
}

/// Set up the sensors of the accessory a config entry points at
///
/// Every service the connection offers, now or after a later accessory
/// database refresh, goes through [`add_service`]. The listener stays
/// registered until [`SensorPlatform::unload`].
pub fn setup_entry(
    known_devices: &KnownDevices,
    entry: &ConfigEntry,
    platform: Arc<SensorPlatform>,
) -> HomeKitResult<ListenerId> {
    let pairing_id: String =
        entry
            .data_value(PAIRING_ID_KEY)
            .ok_or_else(|| HomeKitError::MissingPairingId {
                entry_id: entry.entry_id.clone(),
            })?;

    let connection = known_devices
        .get(&pairing_id)
        .ok_or_else(|| HomeKitError::UnknownDevice(pairing_id.clone()))?;

    // The connection owns the listener, and the platform holds the
    // connection, so the listener only keeps weak handles to both
    let weak_connection = Arc::downgrade(&connection);
    let weak_platform = Arc::downgrade(&platform);
    let listener: ServiceListener = Arc::new(move |aid: u64, service: &Service| {
        match (weak_platform.upgrade(), weak_connection.upgrade()) {
            (Some(platform), Some(connection)) => add_service(&platform, connection, aid, service),
            _ => false,
        }
    });
    let listener_id = connection.add_listener(listener);
    platform
        .subscriptions
        .insert((pairing_id.clone(), listener_id), Arc::downgrade(&connection));

    info!("Set up {} sensors for {} ({})", DOMAIN, entry.title, pairing_id);
    Ok(listener_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PairedDevice;
    use ha_event_bus::EventBus;

    const THERMOMETER: &str = r#"{
        "accessories": [{
            "aid": 1,
            "services": [
                {"iid": 1, "type": "3E", "characteristics": [
                    {"iid": 2, "type": "23", "value": "Porch"},
                    {"iid": 3, "type": "30", "value": "T-100"}
                ]},
                {"iid": 10, "type": "8A", "characteristics": [
                    {"iid": 11, "type": "11", "value": 4.5}
                ]},
                {"iid": 20, "type": "8A", "characteristics": [
                    {"iid": 21, "type": "11", "value": 5.0}
                ]}
            ]
        }]
    }"#;

    fn setup() -> (Arc<PairedDevice>, SensorPlatform) {
        let states = Arc::new(StateMachine::new(Arc::new(EventBus::new())));
        let device = Arc::new(PairedDevice::from_json("AA:BB", THERMOMETER).unwrap());
        (device, SensorPlatform::new(states))
    }

    fn service(device: &PairedDevice, iid: u64) -> Service {
        device.accessories()[0].service(iid).unwrap().clone()
    }

    #[test]
    fn test_sensor_kind_registry() {
        assert_eq!(SensorKind::from_stype("humidity"), Some(SensorKind::Humidity));
        assert_eq!(
            SensorKind::from_stype("carbon-dioxide"),
            Some(SensorKind::CarbonDioxide)
        );
        assert_eq!(SensorKind::from_stype("lightbulb"), None);
        assert_eq!(SensorKind::from_stype("accessory-information"), None);
        for kind in SensorKind::ALL {
            assert_eq!(SensorKind::from_stype(kind.stype()), Some(kind));
        }
    }

    #[test]
    fn test_add_service_writes_unknown_state() {
        let (device, platform) = setup();

        assert!(add_service(&platform, device.clone(), 1, &service(&device, 10)));

        let state = platform.state_of("sensor.porch_temperature").unwrap();
        assert_eq!(state.state, "unknown");
        assert_eq!(state.attribute::<String>("friendly_name").as_deref(), Some("Porch Temperature"));
        assert_eq!(state.attribute::<String>("icon").as_deref(), Some("mdi:thermometer"));
        assert_eq!(state.attribute::<String>("unit_of_measurement").as_deref(), Some("°C"));
        assert_eq!(state.attribute::<String>("device_class"), None);
    }

    #[test]
    fn test_unsupported_service_has_no_side_effects() {
        let (device, platform) = setup();
        assert!(!add_service(&platform, device.clone(), 1, &service(&device, 1)));
        assert_eq!(platform.entity_count(), 0);
    }

    #[test]
    fn test_entity_ids_are_deduplicated() {
        let (device, platform) = setup();

        assert!(add_service(&platform, device.clone(), 1, &service(&device, 10)));
        assert!(add_service(&platform, device.clone(), 1, &service(&device, 20)));

        assert_eq!(
            platform.entity_ids(),
            vec!["sensor.porch_temperature", "sensor.porch_temperature_2"]
        );
    }

    #[test]
    fn test_duplicate_unique_id_is_rejected() {
        let (device, platform) = setup();

        assert!(add_service(&platform, device.clone(), 1, &service(&device, 10)));
        assert!(!add_service(&platform, device.clone(), 1, &service(&device, 10)));

        let err = platform
            .add_entity(SensorKind::Temperature.build(device.clone(), ServiceInfo { aid: 1, iid: 10 }))
            .unwrap_err();
        assert!(matches!(err, HomeKitError::DuplicateUniqueId { .. }));
        assert_eq!(platform.entity_count(), 1);
    }

    #[test]
    fn test_concurrent_adds_of_one_unique_id_register_once() {
        let (device, platform) = setup();

        let added: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let connection: Arc<dyn AccessoryConnection> = device.clone();
                    let platform = &platform;
                    scope.spawn(move || {
                        let entity = SensorKind::Temperature
                            .build(connection, ServiceInfo { aid: 1, iid: 10 });
                        platform.add_entity(entity).is_ok() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(added, 1);
        assert_eq!(platform.entity_ids(), vec!["sensor.porch_temperature"]);
    }

    #[test]
    fn test_update_characteristics_publishes_values() {
        let (device, platform) = setup();
        add_service(&platform, device.clone(), 1, &service(&device, 10));
        add_service(&platform, device.clone(), 1, &service(&device, 20));

        let touched = platform.update_characteristics(1, &[CharacteristicUpdate::new(1, 21, 6.5)]);

        assert_eq!(touched, 1);
        assert!(platform.states.is_state("sensor.porch_temperature", "unknown"));
        assert!(platform.states.is_state("sensor.porch_temperature_2", "6.5"));

        assert_eq!(platform.update_characteristics(9, &[CharacteristicUpdate::new(9, 21, 1.0)]), 0);
    }

    #[test]
    fn test_string_values_are_written_unquoted() {
        let (device, platform) = setup();
        add_service(&platform, device.clone(), 1, &service(&device, 10));

        platform.update_characteristics(1, &[CharacteristicUpdate::new(1, 11, "cold")]);
        assert!(platform.states.is_state("sensor.porch_temperature", "cold"));

        platform.update_characteristics(1, &[CharacteristicUpdate::new(1, 11, 12)]);
        assert!(platform.states.is_state("sensor.porch_temperature", "12"));
    }

    #[test]
    fn test_availability_is_published_on_rewrite() {
        let (device, platform) = setup();
        add_service(&platform, device.clone(), 1, &service(&device, 10));
        platform.update_characteristics(1, &[CharacteristicUpdate::new(1, 11, 3.0)]);

        device.set_available(false);
        assert_eq!(platform.write_all_states(), 1);
        assert!(platform.states.is_state("sensor.porch_temperature", "unavailable"));

        device.set_available(true);
        platform.write_all_states();
        assert!(platform.states.is_state("sensor.porch_temperature", "3.0"));
    }

    #[test]
    fn test_write_state_of_unknown_entity() {
        let (_, platform) = setup();
        assert!(platform.write_state("sensor.nothing").unwrap().is_none());
    }

    #[test]
    fn test_unload_removes_states() {
        let (device, platform) = setup();
        add_service(&platform, device.clone(), 1, &service(&device, 10));
        add_service(&platform, device.clone(), 1, &service(&device, 20));

        assert_eq!(platform.unload(), 2);
        assert_eq!(platform.entity_count(), 0);
        assert!(platform.state_of("sensor.porch_temperature").is_none());

        // Unique ids are free again
        assert!(add_service(&platform, device.clone(), 1, &service(&device, 10)));
    }

    #[test]
    fn test_long_state_is_truncated() {
        let (device, platform) = setup();
        add_service(&platform, device.clone(), 1, &service(&device, 10));

        platform.update_characteristics(1, &[CharacteristicUpdate::new(1, 11, "é".repeat(200))]);

        let state = platform.state_of("sensor.porch_temperature").unwrap();
        assert!(state.state.len() <= MAX_STATE_LENGTH);
        assert_eq!(state.state.chars().count(), MAX_STATE_LENGTH / 2);
    }
}
