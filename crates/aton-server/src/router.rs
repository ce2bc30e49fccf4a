//! Geofence routing of feature-change events.
//!
//! Every change event is checked against each station's coverage. Stations
//! that cover the aid, and have not blacklisted it, get the decoded message
//! cached for their next transmit cycle. Coverage misses are expected and
//! silently dropped.

use std::sync::Arc;

use tracing::{debug, trace};

use aton_core::config::RouterSettings;
use aton_core::{FeatureEvent, FeatureEventType, MessageStore, NavAidMessage, Station};

/// A message routed to one station.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub station_id: u32,
    /// `address:port` of the station, for downstream subscribers.
    pub topic: String,
    pub message: NavAidMessage,
}

/// Routes feature-change events to the stations that cover them.
#[derive(Clone)]
pub struct GeofenceRouter {
    messages: Arc<dyn MessageStore>,
    deletion_handler: bool,
}

impl GeofenceRouter {
    pub fn new(messages: Arc<dyn MessageStore>, settings: &RouterSettings) -> Self {
        Self {
            messages,
            deletion_handler: settings.deletion_handler,
        }
    }

    /// Route one event against a station snapshot.
    ///
    /// Removals never produce deliveries; when this router is the deletion
    /// authority they drop every cached copy of the message.
    pub fn route(&self, event: &FeatureEvent, stations: &[Station]) -> Vec<Delivery> {
        match event.event_type {
            FeatureEventType::Removed => {
                if self.deletion_handler {
                    let removed = self.messages.delete_by_uid(&event.message_id);
                    debug!(
                        "Removed {} cached copies of {}",
                        removed, event.message_id
                    );
                }
                Vec::new()
            }
            FeatureEventType::Changed => {
                let Some(message) = event.to_nav_aid() else {
                    debug!("Dropping change event {} without a position", event.message_id);
                    return Vec::new();
                };
                stations
                    .iter()
                    .filter(|station| self.accepts(station, &message))
                    .map(|station| {
                        self.messages.save(station.id, message.clone());
                        Delivery {
                            station_id: station.id,
                            topic: station.topic(),
                            message: message.clone(),
                        }
                    })
                    .collect()
            }
        }
    }

    fn accepts(&self, station: &Station, message: &NavAidMessage) -> bool {
        if !station.covers(&message.position) {
            trace!("{} is outside station {}", message.uid, station.name);
            return false;
        }
        if station.is_blacklisted(&message.uid) {
            debug!("{} is blacklisted by station {}", message.uid, station.name);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aton_core::{
        AisChannel, BoundingBox, Coordinate, Geometry, MemoryMessageStore, Polygon,
        SignatureMode, TransportKind,
    };
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn station(id: u32, geometry: Option<Geometry>) -> Station {
        Station {
            id,
            name: format!("Station {}", id),
            kind: TransportKind::UdpRadio,
            ip_address: "127.0.0.1".to_string(),
            port: 6000 + id as u16,
            broadcast_port: None,
            fwd_ip_address: None,
            fwd_port: None,
            mmsi: 992351000 + id,
            channel: AisChannel::A,
            signature_mode: SignatureMode::None,
            geometry,
            blacklisted_uids: BTreeSet::new(),
        }
    }

    fn north_sea() -> Geometry {
        Geometry::BoundingBox(BoundingBox {
            min_lat: 50.0,
            min_lon: 0.0,
            max_lat: 55.0,
            max_lon: 3.0,
        })
    }

    fn channel_polygon() -> Geometry {
        Geometry::Polygon(Polygon::new(vec![
            Coordinate::new(49.0, -6.0),
            Coordinate::new(49.0, 1.0),
            Coordinate::new(51.0, 1.0),
            Coordinate::new(51.0, -6.0),
        ]))
    }

    fn aton(uid: &str, lat: f64, lon: f64) -> NavAidMessage {
        NavAidMessage {
            uid: uid.to_string(),
            mmsi: 123456789,
            name: "Test AtoN".to_string(),
            position: Coordinate::new(lat, lon),
            half_length: 0.0,
            half_width: 0.0,
            raim: false,
            virtual_aton: true,
            aton_type: 30,
        }
    }

    fn router(deletion_handler: bool) -> (Arc<MemoryMessageStore>, GeofenceRouter) {
        let store = Arc::new(MemoryMessageStore::new());
        let router = GeofenceRouter::new(store.clone(), &RouterSettings { deletion_handler });
        (store, router)
    }

    #[test]
    fn test_routes_to_covering_stations() {
        let (store, router) = router(true);
        let stations = vec![station(1, Some(north_sea())), station(2, Some(channel_polygon()))];

        let deliveries = router.route(&FeatureEvent::changed(&aton("a", 53.61, 1.594)), &stations);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].station_id, 1);
        assert_eq!(deliveries[0].topic, "127.0.0.1:6001");
        assert_eq!(store.messages_for_station(1).len(), 1);
        assert!(store.messages_for_station(2).is_empty());

        // 50.5N 0.5E lies in both
        let deliveries = router.route(&FeatureEvent::changed(&aton("b", 50.5, 0.5)), &stations);
        let ids: Vec<u32> = deliveries.iter().map(|d| d.station_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_blacklist_blocks_delivery() {
        let (store, router) = router(true);
        let mut blocked = station(1, Some(north_sea()));
        blocked.blacklisted_uids.insert("a".to_string());

        let deliveries = router.route(&FeatureEvent::changed(&aton("a", 53.61, 1.594)), &[blocked]);
        assert!(deliveries.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_station_without_coverage_gets_nothing() {
        let (store, router) = router(true);
        let deliveries = router.route(&FeatureEvent::changed(&aton("a", 53.61, 1.594)), &[station(1, None)]);
        assert!(deliveries.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_excluded_point_never_delivered() {
        let (store, router) = router(true);
        let stations = vec![station(2, Some(channel_polygon()))];
        let event = FeatureEvent::changed(&aton("outside", 53.61, 1.594));

        for _ in 0..1000 {
            assert!(router.route(&event, &stations).is_empty());
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_repeated_events_are_idempotent() {
        let (store, router) = router(true);
        let stations = vec![station(1, Some(north_sea()))];
        let event = FeatureEvent::changed(&aton("a", 53.61, 1.594));

        let first = router.route(&event, &stations);
        let second = router.route(&event, &stations);
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_removal_clears_cache() {
        let (store, router) = router(true);
        let stations = vec![station(1, Some(north_sea())), station(2, Some(north_sea()))];
        router.route(&FeatureEvent::changed(&aton("a", 53.61, 1.594)), &stations);
        assert_eq!(store.len(), 2);

        let deliveries = router.route(&FeatureEvent::removed("a"), &stations);
        assert!(deliveries.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_removal_ignored_without_deletion_authority() {
        let (store, router) = router(false);
        let stations = vec![station(1, Some(north_sea()))];
        router.route(&FeatureEvent::changed(&aton("a", 53.61, 1.594)), &stations);

        router.route(&FeatureEvent::removed("a"), &stations);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_event_without_point_is_dropped() {
        let (store, router) = router(true);
        let mut event = FeatureEvent::changed(&aton("a", 53.61, 1.594));
        event.point = None;

        assert!(router.route(&event, &[station(1, Some(north_sea()))]).is_empty());
        assert!(store.is_empty());
    }
}
