//! # aton-server
//!
//! Broadcast runtime for the AtoN broadcast engine.
//!
//! This crate provides:
//! - Geofence routing of navigational-aid change events to stations
//! - Station advertisers for software radios and VDES-1000 devices
//! - VDES-1000 connection management and inbound monitoring
//! - The signing-authority adapter
//! - The broadcast supervisor with live station reload

pub mod advertiser;
pub mod device;
pub mod error;
pub mod router;
pub mod signature;
pub mod statistics;
pub mod supervisor;

pub use advertiser::{
    AdvertiseReport, Advertiser, AdvertiserContext, AdvertiserState, UdpRadioAdvertiser,
    Vdes1000Advertiser,
};
pub use device::{DeviceConnectionManager, DeviceMessage, Vdes1000Connection};
pub use error::{AdvertiserError, SigningError, SupervisorError, TransportError};
pub use router::{Delivery, GeofenceRouter};
pub use signature::{
    HttpSignatureProvider, SignatureAdapter, SignatureProvider, SignatureRequest, SignedPayload,
    StampEncoding,
};
pub use statistics::{BroadcastStatistics, StatisticsSnapshot};
pub use supervisor::{BroadcastSupervisor, SupervisorEvent, SupervisorHandle};
