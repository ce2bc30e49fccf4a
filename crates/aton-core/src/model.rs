//! AtoN broadcast data model.
//!
//! These types describe the stations we transmit through and the
//! navigational-aid reports we transmit. They are shared by the protocol
//! codec and the broadcast server.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Coordinate, CoverageArea, Geometry};

/// Largest value representable in an AIS MMSI field (30 bits).
pub const MAX_MMSI: u32 = (1 << 30) - 1;

/// Largest AtoN type code (5 bits).
pub const MAX_ATON_TYPE: u8 = 31;

/// The physical transport a station is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportKind {
    /// A software radio fed raw NMEA over UDP.
    #[serde(alias = "GNU_RADIO")]
    UdpRadio,
    /// A VDES-1000 modem driven over its IEC 61162-450 interface.
    #[serde(alias = "VDES_1000")]
    VdesDevice,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::UdpRadio => write!(f, "UDP_RADIO"),
            TransportKind::VdesDevice => write!(f, "VDES_DEVICE"),
        }
    }
}

/// AIS channel preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AisChannel {
    #[default]
    A,
    B,
    None,
    Both,
}

impl AisChannel {
    /// Channel letter as written in VDM/TSA sentences.
    pub fn letter(&self) -> Option<&'static str> {
        match self {
            AisChannel::A => Some("A"),
            AisChannel::B => Some("B"),
            AisChannel::None | AisChannel::Both => None,
        }
    }

    /// Channel index as written in BBM/ABB sentences.
    pub fn index(&self) -> u8 {
        match self {
            AisChannel::None => 0,
            AisChannel::A => 1,
            AisChannel::B => 2,
            AisChannel::Both => 3,
        }
    }
}

/// How (and whether) a signature follows each AtoN report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureMode {
    #[default]
    None,
    /// Wrapped in an AIS binary message (6 or 8).
    Ais,
    /// Sent raw over the VDE data channel. VDES-1000 only.
    Vde,
}

impl fmt::Display for SignatureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureMode::None => write!(f, "NONE"),
            SignatureMode::Ais => write!(f, "AIS"),
            SignatureMode::Vde => write!(f, "VDE"),
        }
    }
}

/// Named AtoN type codes used by the feature feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtonType {
    Default,
    Wreck,
    NorthCardinal,
    EastCardinal,
    SouthCardinal,
    WestCardinal,
    PortHandMark,
    StarboardHandMark,
    PreferredPort,
    PreferredStarboard,
    IsolatedDanger,
    SafeWater,
    SpecialMark,
}

impl AtonType {
    pub fn code(&self) -> u8 {
        match self {
            AtonType::Default => 0,
            AtonType::Wreck => 4,
            AtonType::NorthCardinal => 20,
            AtonType::EastCardinal => 21,
            AtonType::SouthCardinal => 22,
            AtonType::WestCardinal => 23,
            AtonType::PortHandMark => 24,
            AtonType::StarboardHandMark => 25,
            AtonType::PreferredPort => 26,
            AtonType::PreferredStarboard => 27,
            AtonType::IsolatedDanger => 28,
            AtonType::SafeWater => 29,
            AtonType::SpecialMark => 30,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        [
            AtonType::Default,
            AtonType::Wreck,
            AtonType::NorthCardinal,
            AtonType::EastCardinal,
            AtonType::SouthCardinal,
            AtonType::WestCardinal,
            AtonType::PortHandMark,
            AtonType::StarboardHandMark,
            AtonType::PreferredPort,
            AtonType::PreferredStarboard,
            AtonType::IsolatedDanger,
            AtonType::SafeWater,
            AtonType::SpecialMark,
        ]
        .into_iter()
        .find(|t| t.code() == code)
    }

    pub fn description(&self) -> &'static str {
        match self {
            AtonType::Default => "Default",
            AtonType::Wreck => "Emergency Wreck Marking Buoy",
            AtonType::NorthCardinal => "Cardinal Mark N",
            AtonType::EastCardinal => "Cardinal Mark E",
            AtonType::SouthCardinal => "Cardinal Mark S",
            AtonType::WestCardinal => "Cardinal Mark W",
            AtonType::PortHandMark => "Port hand Mark",
            AtonType::StarboardHandMark => "Starboard hand Mark",
            AtonType::PreferredPort => "Preferred Channel Port hand",
            AtonType::PreferredStarboard => "Preferred Channel Starboard hand",
            AtonType::IsolatedDanger => "Isolated Danger",
            AtonType::SafeWater => "Safe Water",
            AtonType::SpecialMark => "Special Mark",
        }
    }
}

/// Errors raised while validating station configuration.
///
/// A station failing validation is excluded from the active set.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// A required field is missing or out of range.
    #[error("Station {station}: invalid {field}: {reason}")]
    InvalidField {
        station: String,
        field: &'static str,
        reason: String,
    },

    /// The signature mode cannot be carried by the station's transport.
    #[error("Station {station}: signature mode {mode} is not supported over {kind}")]
    UnsupportedSignatureMode {
        station: String,
        mode: SignatureMode,
        kind: TransportKind,
    },

    /// A signature mode was requested but no signer is configured.
    #[error("Station {station}: signature mode {mode} requires a signer")]
    MissingSigner { station: String, mode: SignatureMode },
}

/// A configured broadcast endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: u32,
    pub name: String,
    pub kind: TransportKind,
    /// Destination address for outbound traffic.
    pub ip_address: String,
    pub port: u16,
    /// Local port the device reports back on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fwd_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fwd_port: Option<u16>,
    pub mmsi: u32,
    #[serde(default)]
    pub channel: AisChannel,
    #[serde(default)]
    pub signature_mode: SignatureMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub blacklisted_uids: BTreeSet<String>,
}

impl Station {
    /// Validate the station before it is allowed to broadcast.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |field: &'static str, reason: &str| ConfigurationError::InvalidField {
            station: self.name.clone(),
            field,
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be empty"));
        }
        if self.ip_address.trim().is_empty() {
            return Err(invalid("ip_address", "must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port", "must not be zero"));
        }
        if self.mmsi > MAX_MMSI {
            return Err(invalid("mmsi", "does not fit in 30 bits"));
        }
        if self.fwd_ip_address.is_some() != self.fwd_port.is_some() {
            return Err(invalid(
                "fwd_port",
                "forward address and port must be given together",
            ));
        }
        if self.kind == TransportKind::VdesDevice
            && self.fwd_port.is_some()
            && self.broadcast_port.is_none()
        {
            return Err(invalid(
                "broadcast_port",
                "forwarding requires a broadcast port to listen on",
            ));
        }

        match (self.kind, self.signature_mode) {
            (TransportKind::UdpRadio, SignatureMode::Vde) => {
                Err(ConfigurationError::UnsupportedSignatureMode {
                    station: self.name.clone(),
                    mode: self.signature_mode,
                    kind: self.kind,
                })
            }
            (_, SignatureMode::None) | (_, SignatureMode::Ais) | (TransportKind::VdesDevice, SignatureMode::Vde) => {
                Ok(())
            }
        }
    }

    /// Topic key used to tag deliveries and device traffic for this station.
    pub fn topic(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }

    /// Check whether the station's coverage contains a position.
    ///
    /// A station without coverage covers nothing.
    pub fn covers(&self, point: &Coordinate) -> bool {
        match &self.geometry {
            Some(geometry) => !geometry.is_empty() && geometry.contains(point),
            None => false,
        }
    }

    pub fn is_blacklisted(&self, uid: &str) -> bool {
        self.blacklisted_uids.contains(uid)
    }

    /// The forward destination, if both halves are configured.
    pub fn forward_address(&self) -> Option<String> {
        match (&self.fwd_ip_address, self.fwd_port) {
            (Some(ip), Some(port)) => Some(format!("{}:{}", ip, port)),
            _ => None,
        }
    }

    pub fn destination(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }
}

/// A decoded navigational-aid report, ready for Message 21 encoding.
///
/// The transmission timestamp is not part of the message; it is captured
/// by the advertiser at the moment the report is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavAidMessage {
    pub uid: String,
    pub mmsi: u32,
    pub name: String,
    pub position: Coordinate,
    /// Half the physical length in metres.
    #[serde(default)]
    pub half_length: f64,
    /// Half the physical width in metres.
    #[serde(default)]
    pub half_width: f64,
    #[serde(default)]
    pub raim: bool,
    #[serde(default)]
    pub virtual_aton: bool,
    #[serde(default)]
    pub aton_type: u8,
}

impl NavAidMessage {
    /// Bow/stern dimension as encoded. Zero for virtual aids.
    pub fn encoded_half_length(&self) -> f64 {
        if self.virtual_aton {
            0.0
        } else {
            self.half_length.round()
        }
    }

    /// Port/starboard dimension as encoded. Zero for virtual aids.
    pub fn encoded_half_width(&self) -> f64 {
        if self.virtual_aton {
            0.0
        } else {
            self.half_width.round()
        }
    }

    pub fn aton_kind(&self) -> Option<AtonType> {
        AtonType::from_code(self.aton_type)
    }
}

/// Kind of a feature-change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureEventType {
    Changed,
    Removed,
}

/// A feature-change event from the geospatial source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvent {
    #[serde(rename = "type")]
    pub event_type: FeatureEventType,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mmsi: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raim: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "virtual")]
    pub virtual_aton: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aton_type_code: Option<u8>,
}

impl FeatureEvent {
    /// Build a change event for a message.
    pub fn changed(message: &NavAidMessage) -> Self {
        Self {
            event_type: FeatureEventType::Changed,
            message_id: message.uid.clone(),
            mmsi: Some(message.mmsi),
            name: Some(message.name.clone()),
            point: Some(message.position),
            half_length: Some(message.half_length),
            half_width: Some(message.half_width),
            raim: Some(message.raim),
            virtual_aton: Some(message.virtual_aton),
            aton_type_code: Some(message.aton_type),
        }
    }

    pub fn removed(message_id: &str) -> Self {
        Self {
            event_type: FeatureEventType::Removed,
            message_id: message_id.to_string(),
            mmsi: None,
            name: None,
            point: None,
            half_length: None,
            half_width: None,
            raim: None,
            virtual_aton: None,
            aton_type_code: None,
        }
    }

    /// Map a change event into a navigational-aid message.
    ///
    /// Returns `None` for removals and for events without a position,
    /// which can never be placed inside a coverage area.
    pub fn to_nav_aid(&self) -> Option<NavAidMessage> {
        if self.event_type != FeatureEventType::Changed {
            return None;
        }
        let position = self.point?;

        Some(NavAidMessage {
            uid: self.message_id.clone(),
            mmsi: self.mmsi.unwrap_or_default(),
            name: self.name.clone().unwrap_or_default(),
            position,
            half_length: self.half_length.unwrap_or_default(),
            half_width: self.half_width.unwrap_or_default(),
            raim: self.raim.unwrap_or(false),
            virtual_aton: self.virtual_aton.unwrap_or(false),
            aton_type: self.aton_type_code.unwrap_or(AtonType::Default.code()),
        })
    }
}
