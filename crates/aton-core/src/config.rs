//! Configuration loading.
//!
//! The broadcast engine is configured from a single TOML file:
//!
//! ```toml
//! [codec]
//! addressed_message_id = 8
//!
//! [udp_radio]
//! ais_interval_ms = 500
//!
//! [vdes]
//! broadcast_method = "TSA_VDM"
//!
//! [signer]
//! url = "http://localhost:8444"
//!
//! [[stations]]
//! id = 1
//! name = "Orford Ness"
//! kind = "UDP_RADIO"
//! ip_address = "127.0.0.1"
//! port = 6100
//! mmsi = 992351000
//! ```
//!
//! Every section is optional and falls back to its defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{ConfigurationError, SignatureMode, Station, MAX_MMSI};

/// Message id emitted for addressed binary messages unless overridden.
///
/// Deployed receivers have only ever seen 8 in this field, so the
/// historical value stays the default.
pub const ADDRESSED_MESSAGE_LEGACY_ID: u8 = 8;

/// Errors that can occur while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    ReadError(String),
    /// The file is not valid TOML for this schema.
    ParseError(String),
    /// A value is out of range or inconsistent.
    InvalidData(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(msg) => write!(f, "Read error: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ConfigError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigurationError> for ConfigError {
    fn from(err: ConfigurationError) -> Self {
        ConfigError::InvalidData(err.to_string())
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Complete configuration for the broadcast engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub codec: CodecSettings,
    pub udp_radio: UdpRadioSettings,
    pub vdes: VdesSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer: Option<SignerSettings>,
    pub router: RouterSettings,
    pub stations: Vec<Station>,
}

/// Protocol codec settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecSettings {
    /// Talker identifier prefixed to every sentence.
    pub talker_id: String,
    /// Message id written into addressed binary messages (6 or 8).
    pub addressed_message_id: u8,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            talker_id: "AI".to_string(),
            addressed_message_id: ADDRESSED_MESSAGE_LEGACY_ID,
        }
    }
}

/// Settings for software-radio stations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpRadioSettings {
    /// Pause between consecutive reports, to respect AIS TDMA slots.
    pub ais_interval_ms: u64,
    /// Address signatures to this MMSI with Message 6 instead of broadcasting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_mmsi: Option<u32>,
}

impl Default for UdpRadioSettings {
    fn default() -> Self {
        Self {
            ais_interval_ms: 500,
            dest_mmsi: None,
        }
    }
}

/// How reports are handed to a VDES-1000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastMethod {
    /// A TSA slot directive followed by the VDM sentences it links.
    #[default]
    TsaVdm,
    /// Broadcast binary message sentences.
    Bbm,
}

/// Settings for VDES-1000 stations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VdesSettings {
    pub broadcast_method: BroadcastMethod,
    /// Interval of the shared transmit tick.
    pub tick_interval_secs: u64,
    /// Delay before the first tick after startup.
    pub initial_delay_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_mmsi: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_station: Option<BaseStationConfig>,
}

impl Default for VdesSettings {
    fn default() -> Self {
        Self {
            broadcast_method: BroadcastMethod::TsaVdm,
            tick_interval_secs: 60,
            initial_delay_secs: 1,
            dest_mmsi: None,
            base_station: None,
        }
    }
}

/// VHF transmitter power level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxPower {
    Low,
    High,
}

impl TxPower {
    pub fn code(&self) -> u8 {
        match self {
            TxPower::Low => 0,
            TxPower::High => 1,
        }
    }
}

/// Source the modem synchronises UTC from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UtcSource {
    Internal,
    Gnss,
    External,
}

impl UtcSource {
    pub fn code(&self) -> u8 {
        match self {
            UtcSource::Internal => 0,
            UtcSource::Gnss => 1,
            UtcSource::External => 2,
        }
    }
}

/// One-time base-station configuration applied to a VDES-1000 at connect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseStationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rx_channel_a: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rx_channel_b: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_channel_a: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_channel_b: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_power_a: Option<TxPower>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_power_b: Option<TxPower>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vdl_message_retries: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vdl_message_repeat_indicator: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratdma_control: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_synchronisation_source: Option<UtcSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ads_interval: Option<u32>,
}

impl BaseStationConfig {
    /// A configuration is only applied when it names the base station.
    pub fn is_valid(&self) -> bool {
        self.unique_id
            .as_deref()
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Remote signing authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerSettings {
    /// Base URL of the signing service.
    pub url: String,
    pub algorithm: String,
    /// Entity type tag sent with every request.
    pub entity_type: String,
    pub timeout_secs: u64,
}

impl Default for SignerSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8444".to_string(),
            algorithm: "SHA256withECDSA".to_string(),
            entity_type: "device".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Geofence router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Whether this instance removes cached messages on deletion events.
    pub deletion_handler: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            deletion_handler: true,
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field rules.
    ///
    /// Individual stations are not validated here: an invalid station is
    /// excluded from the active set at startup rather than failing the
    /// whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.codec.addressed_message_id, 6 | 8) {
            return Err(ConfigError::InvalidData(format!(
                "codec.addressed_message_id must be 6 or 8, got {}",
                self.codec.addressed_message_id
            )));
        }
        if self.codec.talker_id.len() != 2 || !self.codec.talker_id.is_ascii() {
            return Err(ConfigError::InvalidData(format!(
                "codec.talker_id must be two ASCII characters, got {:?}",
                self.codec.talker_id
            )));
        }
        if self.vdes.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidData(
                "vdes.tick_interval_secs must be positive".to_string(),
            ));
        }
        for (field, mmsi) in [
            ("udp_radio.dest_mmsi", self.udp_radio.dest_mmsi),
            ("vdes.dest_mmsi", self.vdes.dest_mmsi),
        ] {
            if matches!(mmsi, Some(m) if m > MAX_MMSI) {
                return Err(ConfigError::InvalidData(format!(
                    "{} does not fit in 30 bits",
                    field
                )));
            }
        }

        let mut ids = std::collections::HashSet::new();
        for station in &self.stations {
            if !ids.insert(station.id) {
                return Err(ConfigError::InvalidData(format!(
                    "duplicate station id {}",
                    station.id
                )));
            }
        }
        Ok(())
    }

    /// Whether any station needs the signing authority.
    pub fn needs_signer(&self) -> bool {
        self.stations
            .iter()
            .any(|s| s.signature_mode != SignatureMode::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::model::{AisChannel, TransportKind};
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
        [codec]
        addressed_message_id = 6

        [udp_radio]
        ais_interval_ms = 250
        dest_mmsi = 987654321

        [vdes]
        broadcast_method = "BBM"
        tick_interval_secs = 30

        [vdes.base_station]
        unique_id = "VDES-1"
        tx_power_a = "HIGH"
        utc_synchronisation_source = "GNSS"

        [signer]
        url = "http://signer.local"

        [[stations]]
        id = 1
        name = "Orford Ness"
        kind = "GNU_RADIO"
        ip_address = "127.0.0.1"
        port = 6100
        mmsi = 992351000
        channel = "B"

        [stations.geometry]
        type = "bounding_box"
        min_lat = 50.0
        min_lon = 0.0
        max_lat = 55.0
        max_lon = 2.0

        [[stations]]
        id = 2
        name = "Harwich"
        kind = "VDES_1000"
        ip_address = "10.0.0.2"
        port = 60014
        broadcast_port = 60013
        mmsi = 992351001
        signature_mode = "VDE"
        blacklisted_uids = ["urn:aton:1"]
    "#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.codec.addressed_message_id, ADDRESSED_MESSAGE_LEGACY_ID);
        assert_eq!(config.codec.talker_id, "AI");
        assert_eq!(config.udp_radio.ais_interval_ms, 500);
        assert_eq!(config.vdes.tick_interval_secs, 60);
        assert_eq!(config.vdes.initial_delay_secs, 1);
        assert_eq!(config.vdes.broadcast_method, BroadcastMethod::TsaVdm);
        assert!(config.router.deletion_handler);
        assert!(config.signer.is_none());
        assert!(config.stations.is_empty());
    }

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.codec.addressed_message_id, 6);
        assert_eq!(config.udp_radio.dest_mmsi, Some(987654321));
        assert_eq!(config.vdes.broadcast_method, BroadcastMethod::Bbm);

        let base = config.vdes.base_station.as_ref().unwrap();
        assert!(base.is_valid());
        assert_eq!(base.tx_power_a, Some(TxPower::High));
        assert_eq!(base.utc_synchronisation_source, Some(UtcSource::Gnss));

        let signer = config.signer.as_ref().unwrap();
        assert_eq!(signer.url, "http://signer.local");
        assert_eq!(signer.entity_type, "device");

        assert_eq!(config.stations.len(), 2);
        let orford = &config.stations[0];
        assert_eq!(orford.kind, TransportKind::UdpRadio);
        assert_eq!(orford.channel, AisChannel::B);
        assert!(matches!(orford.geometry, Some(Geometry::BoundingBox(_))));

        let harwich = &config.stations[1];
        assert_eq!(harwich.kind, TransportKind::VdesDevice);
        assert_eq!(harwich.signature_mode, SignatureMode::Vde);
        assert!(harwich.is_blacklisted("urn:aton:1"));
        assert!(config.needs_signer());
    }

    #[test]
    fn test_rejects_bad_message_id() {
        let result = AppConfig::from_toml_str("[codec]\naddressed_message_id = 7\n");
        assert!(matches!(result, Err(ConfigError::InvalidData(_))));
    }

    #[test]
    fn test_rejects_duplicate_station_ids() {
        let text = r#"
            [[stations]]
            id = 1
            name = "A"
            kind = "UDP_RADIO"
            ip_address = "127.0.0.1"
            port = 1
            mmsi = 1

            [[stations]]
            id = 1
            name = "B"
            kind = "UDP_RADIO"
            ip_address = "127.0.0.1"
            port = 2
            mmsi = 2
        "#;
        assert!(matches!(
            AppConfig::from_toml_str(text),
            Err(ConfigError::InvalidData(_))
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            AppConfig::from_toml_str("[codec\n"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_base_station_validity() {
        assert!(!BaseStationConfig::default().is_valid());
        let config = BaseStationConfig {
            unique_id: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(!config.is_valid());
    }
}
