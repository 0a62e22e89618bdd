//! Discovered peripherals
//!
//! The registry keeps one entry per device identity in discovery order.
//! Repeat observations update signal strength and advertisement data in
//! place; the display name sticks to the first non-empty name seen.

use crate::connection::ConnectionState;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Name shown for devices that never advertised one
pub const UNNAMED: &str = "Unnamed";

/// Stable, host-assigned device identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Received signal strength in dBm.
///
/// Real readings are zero or negative; 127 marks a reading as unavailable.
/// A missing reading is stored as that same marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rssi(i16);

impl Rssi {
    pub const UNAVAILABLE: Rssi = Rssi(127);

    pub fn new(dbm: i16) -> Self {
        Self(dbm)
    }

    pub fn from_reading(reading: Option<i16>) -> Self {
        reading.map(Self).unwrap_or(Self::UNAVAILABLE)
    }

    pub fn is_available(&self) -> bool {
        *self != Self::UNAVAILABLE
    }

    /// The reading in dBm, `None` when unavailable
    pub fn dbm(&self) -> Option<i16> {
        self.is_available().then_some(self.0)
    }
}

impl Default for Rssi {
    fn default() -> Self {
        Self::UNAVAILABLE
    }
}

impl fmt::Display for Rssi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dbm() {
            Some(dbm) => write!(f, "{} dBm", dbm),
            None => f.write_str("--"),
        }
    }
}

/// Advertisement payload: opaque keys to opaque values, replaced wholesale
pub type AdvertisementData = BTreeMap<String, Vec<u8>>;

/// One advertisement as delivered by the host adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub advertisement: AdvertisementData,
    pub services: Vec<Uuid>,
}

impl Observation {
    pub fn new(id: impl Into<PeripheralId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            rssi: None,
            advertisement: AdvertisementData::new(),
            services: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn with_service(mut self, service: Uuid) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.advertisement.insert(key.into(), value.into());
        self
    }
}

/// A discovered remote device.
///
/// Equality and hashing consider the identity only.
#[derive(Debug, Clone, Serialize)]
pub struct Peripheral {
    id: PeripheralId,
    name: Option<String>,
    rssi: Rssi,
    advertisement: AdvertisementData,
    services: Vec<Uuid>,
    connection: ConnectionState,
}

impl Peripheral {
    fn from_observation(observation: Observation) -> Self {
        Self {
            id: observation.id,
            name: observation.name.filter(|name| !name.is_empty()),
            rssi: Rssi::from_reading(observation.rssi),
            advertisement: observation.advertisement,
            services: observation.services,
            connection: ConnectionState::Disconnected,
        }
    }

    fn absorb(&mut self, observation: Observation) {
        self.rssi = Rssi::from_reading(observation.rssi);
        self.advertisement = observation.advertisement;
        self.services = observation.services;
        if self.name.is_none() {
            self.name = observation.name.filter(|name| !name.is_empty());
        }
    }

    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    /// Advertised name, if one was ever seen
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.name().unwrap_or(UNNAMED)
    }

    pub fn rssi(&self) -> Rssi {
        self.rssi
    }

    pub fn advertisement(&self) -> &AdvertisementData {
        &self.advertisement
    }

    pub fn services(&self) -> &[Uuid] {
        &self.services
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub(crate) fn with_connection(mut self, connection: ConnectionState) -> Self {
        self.connection = connection;
        self
    }
}

impl PartialEq for Peripheral {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Peripheral {}

impl Hash for Peripheral {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Identity-keyed, insertion-ordered store of discovered peripherals
#[derive(Debug, Default)]
pub struct PeripheralRegistry {
    entries: Vec<Peripheral>,
    index: HashMap<PeripheralId, usize>,
}

impl PeripheralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new peripheral or update the existing entry for its identity
    pub fn upsert(&mut self, observation: Observation) -> &Peripheral {
        let slot = match self.index.get(&observation.id) {
            Some(&slot) => {
                self.entries[slot].absorb(observation);
                slot
            }
            None => {
                let slot = self.entries.len();
                self.index.insert(observation.id.clone(), slot);
                self.entries.push(Peripheral::from_observation(observation));
                slot
            }
        };
        &self.entries[slot]
    }

    pub fn get(&self, id: &PeripheralId) -> Option<&Peripheral> {
        self.index.get(id).map(|&slot| &self.entries[slot])
    }

    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.index.contains_key(id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Snapshot in discovery order
    pub fn all(&self) -> Vec<Peripheral> {
        self.entries.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peripheral> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
