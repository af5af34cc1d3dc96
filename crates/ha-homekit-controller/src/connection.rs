//! Connection port
//!
//! The accessory connection (pairing, session, event subscription) lives
//! outside this crate. What the sensor platform needs from it is captured by
//! [`AccessoryConnection`]; [`PairedDevice`] is an in-memory implementation
//! that hosts can drive from whatever transport they run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::accessories::{parse_accessories, Accessory, Service};
use crate::error::HomeKitResult;

/// Callback offered each discovered service as `(aid, service)`
///
/// Returning `true` claims the service; it will not be offered again.
pub type ServiceListener = Arc<dyn Fn(u64, &Service) -> bool + Send + Sync>;

/// What the sensor platform consumes from a live accessory connection
pub trait AccessoryConnection: Send + Sync {
    /// Register a listener and offer it every unclaimed service
    fn add_listener(&self, listener: ServiceListener) -> ListenerId;

    /// Unregister a listener and release every service it claimed
    ///
    /// Released services are offered again to the next listener added.
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Whether the accessory is currently reachable
    fn is_available(&self) -> bool;

    /// Snapshot of the accessory database, ordered by `aid`
    fn accessories(&self) -> Vec<Accessory>;
}

/// Identifies a listener registered on a [`PairedDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// In-memory accessory connection state for one pairing
pub struct PairedDevice {
    pairing_id: String,
    accessories: DashMap<u64, Accessory>,
    listeners: DashMap<ListenerId, ServiceListener>,
    next_listener_id: AtomicU64,
    /// `(aid, iid)` → listener that claimed it
    claimed: DashMap<(u64, u64), ListenerId>,
    available: AtomicBool,
}

impl PairedDevice {
    pub fn new(pairing_id: impl Into<String>, accessories: Vec<Accessory>) -> Self {
        let device = Self {
            pairing_id: pairing_id.into(),
            accessories: DashMap::new(),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            claimed: DashMap::new(),
            available: AtomicBool::new(true),
        };
        device.store(accessories);
        device
    }

    /// Build from a raw `/accessories` JSON document
    pub fn from_json(pairing_id: impl Into<String>, json: &str) -> HomeKitResult<Self> {
        Ok(Self::new(pairing_id, parse_accessories(json)?))
    }

    pub fn pairing_id(&self) -> &str {
        &self.pairing_id
    }

    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was != available {
            debug!(pairing_id = %self.pairing_id, available, "Accessory availability changed");
        }
    }

    /// Replace the accessory database and offer new services to every listener
    ///
    /// Returns how many services were claimed.
    pub fn set_accessories(&self, accessories: Vec<Accessory>) -> usize {
        // Overwrite in place so concurrent readers never see an empty database
        let fresh: HashSet<u64> = accessories.iter().map(|a| a.aid).collect();
        self.store(accessories);
        self.accessories.retain(|aid, _| fresh.contains(aid));

        self.offer_unclaimed(&self.listeners_in_order())
    }

    /// Register a listener, returning its id alongside the number of
    /// services it claimed on registration
    pub fn register_listener(&self, listener: ServiceListener) -> (ListenerId, usize) {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.insert(id, listener.clone());
        let claimed = self.offer_unclaimed(&[(id, listener)]);
        (id, claimed)
    }

    /// Whether some listener has claimed this service
    pub fn is_claimed(&self, aid: u64, iid: u64) -> bool {
        self.claimed.contains_key(&(aid, iid))
    }

    /// The listener holding this service, if any
    pub fn claimed_by(&self, aid: u64, iid: u64) -> Option<ListenerId> {
        self.claimed.get(&(aid, iid)).map(|owner| *owner)
    }

    fn store(&self, accessories: Vec<Accessory>) {
        for mut accessory in accessories {
            for service in &mut accessory.services {
                service.resolve_stype();
            }
            self.accessories.insert(accessory.aid, accessory);
        }
    }

    fn listeners_in_order(&self) -> Vec<(ListenerId, ServiceListener)> {
        let mut listeners: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);
        listeners
    }

    /// Offer every unclaimed service to `listeners` in order; the first
    /// listener to accept claims it
    ///
    /// Works on snapshots so listeners may call back into this device. A
    /// service is reserved before it is offered, so two concurrent offers
    /// never hand the same service to two listeners.
    fn offer_unclaimed(&self, listeners: &[(ListenerId, ServiceListener)]) -> usize {
        let Some((first, _)) = listeners.first() else {
            return 0;
        };
        let mut claimed_now = 0;

        for accessory in self.accessories() {
            for service in &accessory.services {
                let key = (accessory.aid, service.iid);
                match self.claimed.entry(key) {
                    Entry::Occupied(_) => continue,
                    Entry::Vacant(slot) => {
                        slot.insert(*first);
                    }
                }

                let owner = listeners
                    .iter()
                    .find(|(_, listener)| listener(accessory.aid, service))
                    .map(|(id, _)| *id);

                match owner {
                    Some(id) => {
                        trace!(aid = key.0, iid = key.1, stype = ?service.stype, "Service claimed");
                        self.claimed.insert(key, id);
                        claimed_now += 1;
                    }
                    None => {
                        self.claimed.remove(&key);
                    }
                }
            }
        }

        claimed_now
    }
}

impl AccessoryConnection for PairedDevice {
    fn add_listener(&self, listener: ServiceListener) -> ListenerId {
        self.register_listener(listener).0
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        if self.listeners.remove(&id).is_none() {
            return false;
        }
        let before = self.claimed.len();
        self.claimed.retain(|_, owner| *owner != id);
        debug!(
            pairing_id = %self.pairing_id,
            released = before.saturating_sub(self.claimed.len()),
            "Listener removed"
        );
        true
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn accessories(&self) -> Vec<Accessory> {
        let mut accessories: Vec<Accessory> = self
            .accessories
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        accessories.sort_by_key(|a| a.aid);
        accessories
    }
}

/// Live connections keyed by pairing id
#[derive(Default)]
pub struct KnownDevices {
    devices: DashMap<String, Arc<dyn AccessoryConnection>>,
}

impl KnownDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pairing_id: impl Into<String>, connection: Arc<dyn AccessoryConnection>) {
        self.devices.insert(pairing_id.into(), connection);
    }

    pub fn get(&self, pairing_id: &str) -> Option<Arc<dyn AccessoryConnection>> {
        self.devices.get(pairing_id).map(|c| c.value().clone())
    }

    pub fn remove(&self, pairing_id: &str) -> Option<Arc<dyn AccessoryConnection>> {
        self.devices.remove(pairing_id).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const BRIDGE: &str = r#"{
        "accessories": [
            {"aid": 2, "services": [
                {"iid": 1, "type": "3E", "characteristics": []},
                {"iid": 10, "type": "96", "characteristics": []}
            ]},
            {"aid": 1, "services": [
                {"iid": 1, "type": "3E", "characteristics": []},
                {"iid": 8, "type": "82", "characteristics": []},
                {"iid": 12, "type": "43", "characteristics": []}
            ]}
        ]
    }"#;

    fn recording_listener(
        accept: &'static [&'static str],
    ) -> (ServiceListener, Arc<Mutex<Vec<(u64, u64)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let listener: ServiceListener = Arc::new(move |aid: u64, service: &Service| {
            log.lock().unwrap().push((aid, service.iid));
            service
                .stype
                .as_deref()
                .is_some_and(|stype| accept.contains(&stype))
        });
        (listener, seen)
    }

    #[test]
    fn test_services_offered_in_aid_order_with_stype() {
        let device = PairedDevice::from_json("AA:BB", BRIDGE).unwrap();
        let (listener, seen) = recording_listener(&["humidity", "battery"]);

        let (_, claimed) = device.register_listener(listener);

        assert_eq!(claimed, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, 1), (1, 8), (1, 12), (2, 1), (2, 10)]
        );
        assert!(device.is_claimed(1, 8));
        assert!(device.is_claimed(2, 10));
        assert!(!device.is_claimed(1, 12));
    }

    #[test]
    fn test_claimed_services_are_not_offered_again() {
        let device = PairedDevice::from_json("AA:BB", BRIDGE).unwrap();
        let (first, _) = recording_listener(&["humidity"]);
        device.add_listener(first);

        let (second, seen) = recording_listener(&[]);
        device.add_listener(second);

        assert!(!seen.lock().unwrap().contains(&(1, 8)));
        assert!(seen.lock().unwrap().contains(&(1, 12)));
    }

    #[test]
    fn test_set_accessories_offers_only_new_services() {
        let device = PairedDevice::new("AA:BB", Vec::new());
        let (listener, seen) = recording_listener(&["humidity", "battery"]);
        device.add_listener(listener);
        assert!(seen.lock().unwrap().is_empty());

        let accessories = parse_accessories(BRIDGE).unwrap();
        assert_eq!(device.set_accessories(accessories.clone()), 2);

        seen.lock().unwrap().clear();
        assert_eq!(device.set_accessories(accessories), 0);
        assert!(!seen.lock().unwrap().contains(&(2, 10)));
    }

    #[test]
    fn test_removed_listener_is_not_offered_new_services() {
        let device = PairedDevice::new("AA:BB", Vec::new());
        let (listener, seen) = recording_listener(&["humidity"]);
        let (id, _) = device.register_listener(listener);

        assert!(device.remove_listener(id));
        assert!(!device.remove_listener(id));

        device.set_accessories(parse_accessories(BRIDGE).unwrap());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_removing_a_listener_releases_its_claims() {
        let device = PairedDevice::from_json("AA:BB", BRIDGE).unwrap();
        let (humidity, _) = recording_listener(&["humidity"]);
        let (battery, _) = recording_listener(&["battery"]);
        let humidity_id = device.add_listener(humidity);
        let battery_id = device.add_listener(battery);
        assert_eq!(device.claimed_by(1, 8), Some(humidity_id));
        assert_eq!(device.claimed_by(2, 10), Some(battery_id));

        assert!(device.remove_listener(humidity_id));
        assert!(!device.is_claimed(1, 8));
        assert_eq!(device.claimed_by(2, 10), Some(battery_id));

        let (again, seen) = recording_listener(&["humidity"]);
        let (again_id, claimed) = device.register_listener(again);
        assert_eq!(claimed, 1);
        assert_eq!(device.claimed_by(1, 8), Some(again_id));
        assert!(!seen.lock().unwrap().contains(&(2, 10)));
    }

    #[test]
    fn test_declined_services_stay_unclaimed() {
        let device = PairedDevice::from_json("AA:BB", BRIDGE).unwrap();
        let (listener, _) = recording_listener(&[]);
        let (_, claimed) = device.register_listener(listener);
        assert_eq!(claimed, 0);
        assert!(!device.is_claimed(1, 8));
        assert!(!device.is_claimed(2, 10));
    }

    #[test]
    fn test_set_accessories_replaces_database() {
        let device = PairedDevice::from_json("AA:BB", BRIDGE).unwrap();
        let mut accessories = parse_accessories(BRIDGE).unwrap();
        accessories.retain(|a| a.aid == 1);

        device.set_accessories(accessories);

        let aids: Vec<u64> = device.accessories().iter().map(|a| a.aid).collect();
        assert_eq!(aids, vec![1]);
        assert_eq!(
            device.accessories()[0].service(8).and_then(|s| s.stype.as_deref()),
            Some("humidity")
        );
    }

    #[test]
    fn test_availability() {
        let device = PairedDevice::new("AA:BB", Vec::new());
        assert!(device.is_available());
        device.set_available(false);
        assert!(!device.is_available());
    }

    #[test]
    fn test_known_devices() {
        let known = KnownDevices::new();
        assert!(known.is_empty());
        known.insert("AA:BB", Arc::new(PairedDevice::new("AA:BB", Vec::new())));

        assert_eq!(known.len(), 1);
        assert!(known.get("AA:BB").is_some());
        assert!(known.get("CC:DD").is_none());
        assert!(known.remove("AA:BB").is_some());
        assert!(known.is_empty());
    }
}
