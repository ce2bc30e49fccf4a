//! Station and message stores.
//!
//! Persistence is owned by an external collaborator; the broadcast engine
//! only needs the shape of the two stores. Stations are keyed by id, cached
//! navigational-aid messages by station id and message UID.
//!
//! The in-memory implementations here back the binary and the tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::model::{NavAidMessage, Station, TransportKind};

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Station {0} not found")]
    StationNotFound(u32),
}

/// Trait for station storage implementations.
pub trait StationStore: Send + Sync {
    /// All configured stations, ordered by id.
    fn all(&self) -> Vec<Station>;

    /// Stations attached through a given transport.
    fn find_by_kind(&self, kind: TransportKind) -> Vec<Station> {
        self.all().into_iter().filter(|s| s.kind == kind).collect()
    }

    fn get(&self, id: u32) -> Option<Station>;

    /// Insert or update a station.
    ///
    /// The blacklist is managed separately and is preserved on update.
    fn save(&self, station: Station) -> Station;

    fn delete(&self, id: u32) -> Result<Station, StoreError>;

    /// Stop a message from being broadcast by a station.
    fn blacklist(&self, id: u32, uid: &str) -> Result<(), StoreError>;

    /// Allow a previously blacklisted message again.
    fn unblacklist(&self, id: u32, uid: &str) -> Result<(), StoreError>;
}

/// Trait for the per-station message cache.
pub trait MessageStore: Send + Sync {
    /// Cache a message for a station, replacing any entry with the same UID.
    fn save(&self, station_id: u32, message: NavAidMessage);

    /// Remove every cached copy of a message. Returns how many were removed.
    fn delete_by_uid(&self, uid: &str) -> usize;

    /// Remove everything cached for a station.
    fn delete_for_station(&self, station_id: u32) -> usize;

    /// Cached messages for a station, ordered by UID.
    fn messages_for_station(&self, station_id: u32) -> Vec<NavAidMessage>;

    /// Total number of cached entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory station store.
#[derive(Debug, Default)]
pub struct MemoryStationStore {
    stations: RwLock<BTreeMap<u32, Station>>,
}

impl MemoryStationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with stations.
    pub fn with_stations(stations: impl IntoIterator<Item = Station>) -> Self {
        Self {
            stations: RwLock::new(stations.into_iter().map(|s| (s.id, s)).collect()),
        }
    }
}

impl StationStore for MemoryStationStore {
    fn all(&self) -> Vec<Station> {
        read(&self.stations).values().cloned().collect()
    }

    fn get(&self, id: u32) -> Option<Station> {
        read(&self.stations).get(&id).cloned()
    }

    fn save(&self, mut station: Station) -> Station {
        let mut stations = write(&self.stations);
        if let Some(existing) = stations.get(&station.id) {
            station.blacklisted_uids = existing.blacklisted_uids.clone();
        }
        stations.insert(station.id, station.clone());
        station
    }

    fn delete(&self, id: u32) -> Result<Station, StoreError> {
        write(&self.stations)
            .remove(&id)
            .ok_or(StoreError::StationNotFound(id))
    }

    fn blacklist(&self, id: u32, uid: &str) -> Result<(), StoreError> {
        let mut stations = write(&self.stations);
        let station = stations.get_mut(&id).ok_or(StoreError::StationNotFound(id))?;
        station.blacklisted_uids.insert(uid.to_string());
        Ok(())
    }

    fn unblacklist(&self, id: u32, uid: &str) -> Result<(), StoreError> {
        let mut stations = write(&self.stations);
        let station = stations.get_mut(&id).ok_or(StoreError::StationNotFound(id))?;
        station.blacklisted_uids.remove(uid);
        Ok(())
    }
}

/// In-memory message cache keyed by station id, then UID.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    entries: RwLock<BTreeMap<u32, BTreeMap<String, NavAidMessage>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for MemoryMessageStore {
    fn save(&self, station_id: u32, message: NavAidMessage) {
        write(&self.entries)
            .entry(station_id)
            .or_default()
            .insert(message.uid.clone(), message);
    }

    fn delete_by_uid(&self, uid: &str) -> usize {
        let mut entries = write(&self.entries);
        let removed = entries
            .values_mut()
            .filter_map(|messages| messages.remove(uid))
            .count();
        entries.retain(|_, messages| !messages.is_empty());
        removed
    }

    fn delete_for_station(&self, station_id: u32) -> usize {
        write(&self.entries)
            .remove(&station_id)
            .map(|messages| messages.len())
            .unwrap_or(0)
    }

    fn messages_for_station(&self, station_id: u32) -> Vec<NavAidMessage> {
        read(&self.entries)
            .get(&station_id)
            .map(|messages| messages.values().cloned().collect())
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        read(&self.entries).values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Coordinate;
    use crate::model::{AisChannel, SignatureMode};
    use pretty_assertions::assert_eq;

    fn station(id: u32, kind: TransportKind) -> Station {
        Station {
            id,
            name: format!("Station {}", id),
            kind,
            ip_address: "127.0.0.1".to_string(),
            port: 8000 + id as u16,
            broadcast_port: None,
            fwd_ip_address: None,
            fwd_port: None,
            mmsi: 123456789,
            channel: AisChannel::A,
            signature_mode: SignatureMode::None,
            geometry: None,
            blacklisted_uids: BTreeSet::new(),
        }
    }

    fn message(uid: &str) -> NavAidMessage {
        NavAidMessage {
            uid: uid.to_string(),
            mmsi: 123456789,
            name: uid.to_uppercase(),
            position: Coordinate::new(53.61, 1.594),
            half_length: 0.0,
            half_width: 0.0,
            raim: false,
            virtual_aton: true,
            aton_type: 30,
        }
    }

    #[test]
    fn test_station_crud() {
        let store = MemoryStationStore::new();
        store.save(station(1, TransportKind::UdpRadio));
        store.save(station(2, TransportKind::VdesDevice));

        assert_eq!(store.all().len(), 2);
        assert_eq!(store.find_by_kind(TransportKind::VdesDevice).len(), 1);
        assert_eq!(store.get(1).unwrap().name, "Station 1");

        store.delete(1).unwrap();
        assert!(store.get(1).is_none());
        assert_eq!(store.delete(1), Err(StoreError::StationNotFound(1)));
    }

    #[test]
    fn test_save_preserves_blacklist() {
        let store = MemoryStationStore::with_stations(vec![station(1, TransportKind::UdpRadio)]);
        store.blacklist(1, "uid-1").unwrap();

        let mut updated = station(1, TransportKind::UdpRadio);
        updated.name = "Renamed".to_string();
        let saved = store.save(updated);

        assert_eq!(saved.name, "Renamed");
        assert!(saved.blacklisted_uids.contains("uid-1"));

        store.unblacklist(1, "uid-1").unwrap();
        assert!(store.get(1).unwrap().blacklisted_uids.is_empty());
        assert!(store.blacklist(9, "uid-1").is_err());
    }

    #[test]
    fn test_message_cache() {
        let store = MemoryMessageStore::new();
        store.save(1, message("b"));
        store.save(1, message("a"));
        store.save(2, message("a"));
        // Same UID replaces
        store.save(1, message("a"));

        assert_eq!(store.len(), 3);
        let uids: Vec<String> = store
            .messages_for_station(1)
            .into_iter()
            .map(|m| m.uid)
            .collect();
        assert_eq!(uids, vec!["a".to_string(), "b".to_string()]);

        assert_eq!(store.delete_by_uid("a"), 2);
        assert_eq!(store.len(), 1);
        assert!(store.messages_for_station(2).is_empty());

        assert_eq!(store.delete_for_station(1), 1);
        assert!(store.is_empty());
    }
}
