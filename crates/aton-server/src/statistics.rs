//! Broadcast statistics collection.
//!
//! Counters are updated from the router, every station task and the device
//! monitors, so they are plain atomics. A [`StatisticsSnapshot`] is a
//! serializable copy for logging.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Collects and tracks broadcast statistics.
#[derive(Debug)]
pub struct BroadcastStatistics {
    start_time: Instant,
    events_received: AtomicU64,
    deliveries: AtomicU64,
    messages_sent: AtomicU64,
    signatures_sent: AtomicU64,
    encoding_errors: AtomicU64,
    transport_errors: AtomicU64,
    signing_errors: AtomicU64,
    device_lines: AtomicU64,
    active_stations: AtomicUsize,
}

impl Default for BroadcastStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastStatistics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            events_received: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            signatures_sent: AtomicU64::new(0),
            encoding_errors: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            signing_errors: AtomicU64::new(0),
            device_lines: AtomicU64::new(0),
            active_stations: AtomicUsize::new(0),
        }
    }

    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deliveries(&self, count: usize) {
        self.deliveries.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signature(&self) {
        self.signatures_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encoding_error(&self) {
        self.encoding_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signing_error(&self) {
        self.signing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_device_line(&self) {
        self.device_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_stations(&self, count: usize) {
        self.active_stations.store(count, Ordering::Relaxed);
    }

    /// Get current statistics snapshot.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            events_received: self.events_received.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            signatures_sent: self.signatures_sent.load(Ordering::Relaxed),
            encoding_errors: self.encoding_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            signing_errors: self.signing_errors.load(Ordering::Relaxed),
            device_lines: self.device_lines.load(Ordering::Relaxed),
            active_stations: self.active_stations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub uptime_secs: u64,
    pub events_received: u64,
    pub deliveries: u64,
    pub messages_sent: u64,
    pub signatures_sent: u64,
    pub encoding_errors: u64,
    pub transport_errors: u64,
    pub signing_errors: u64,
    pub device_lines: u64,
    pub active_stations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = BroadcastStatistics::new();
        stats.record_event();
        stats.record_deliveries(3);
        stats.record_sent();
        stats.record_sent();
        stats.record_signing_error();
        stats.set_active_stations(2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events_received, 1);
        assert_eq!(snapshot.deliveries, 3);
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.signatures_sent, 0);
        assert_eq!(snapshot.signing_errors, 1);
        assert_eq!(snapshot.active_stations, 2);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(BroadcastStatistics::new().snapshot()).unwrap();
        assert_eq!(json["messagesSent"], 0);
        assert!(json.get("uptimeSecs").is_some());
    }
}
