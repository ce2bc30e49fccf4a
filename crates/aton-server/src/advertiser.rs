//! Station advertisers.
//!
//! An advertiser paces transmissions for one station. It is created
//! [`AdvertiserState::Idle`], opens its transport in
//! [`Advertiser::init`], and transmits the station's cached AtoN reports
//! each cycle. Every report is a Message 21, optionally followed by a
//! signature:
//!
//! - `AIS` mode wraps the signature in a Message 6 (when a destination MMSI
//!   is configured) or a Message 8, sent over the same transport.
//! - `VDE` mode sends the bare signature over the device's VDE data
//!   channel. Software radios cannot carry it.
//!
//! A failed signature only loses the signature; the report already went out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use aton_core::config::{CodecSettings, UdpRadioSettings, VdesSettings};
use aton_core::{
    ConfigurationError, MessageStore, NavAidMessage, SignatureMode, Station, TransportKind,
};
use aton_protocol::{
    encode_message21, encode_message6, encode_message8, EncodedMessage, EncodingError, Sentence,
    VdmSentence,
};

use crate::device::{resolve, DeviceConnectionManager, DeviceMessage};
use crate::error::{AdvertiserError, TransportError};
use crate::signature::{SignatureAdapter, SignedPayload, StampEncoding};
use crate::statistics::BroadcastStatistics;

/// Lifecycle of an advertiser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiserState {
    /// Constructed, no transport yet.
    Idle,
    Active,
    /// Transmissions suppressed while the station is reconfigured.
    Reloading,
    /// Transport released. Terminal.
    Closed,
}

/// Outcome of one transmit cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvertiseReport {
    pub sent: usize,
    pub signatures: usize,
    /// Reports that could not be encoded.
    pub skipped: usize,
    /// Reports lost to transport failures.
    pub failed: usize,
}

/// Collaborators shared by every advertiser.
#[derive(Clone)]
pub struct AdvertiserContext {
    pub messages: Arc<dyn MessageStore>,
    pub signer: Option<SignatureAdapter>,
    pub codec: CodecSettings,
    pub statistics: Arc<BroadcastStatistics>,
}

/// Paces transmissions for one station.
#[async_trait]
pub trait Advertiser: Send {
    fn state(&self) -> AdvertiserState;

    /// The station currently served, once initialised.
    fn station(&self) -> Option<&Station>;

    /// Validate the station and open its transport.
    async fn init(&mut self, station: Station) -> Result<(), AdvertiserError>;

    /// Transmit one report, then its signature if the station signs.
    async fn transmit(&mut self, message: &NavAidMessage) -> Result<bool, AdvertiserError>;

    /// Transmit every cached report for the station.
    async fn advertise(&mut self) -> Result<AdvertiseReport, AdvertiserError>;

    /// Suppress transmissions until [`Advertiser::reload`] completes.
    fn begin_reload(&mut self);

    /// Swap in a new station snapshot and resume.
    async fn reload(&mut self, station: Station) -> Result<(), AdvertiserError>;

    /// Release the transport.
    async fn close(&mut self);
}

/// Check a station can be served by an advertiser of the given kind.
pub fn check_station(
    station: &Station,
    kind: TransportKind,
    has_signer: bool,
) -> Result<(), ConfigurationError> {
    station.validate()?;
    if station.kind != kind {
        return Err(ConfigurationError::InvalidField {
            station: station.name.clone(),
            field: "kind",
            reason: format!("expected {}, found {}", kind, station.kind),
        });
    }
    if station.signature_mode != SignatureMode::None && !has_signer {
        return Err(ConfigurationError::MissingSigner {
            station: station.name.clone(),
            mode: station.signature_mode,
        });
    }
    Ok(())
}

/// Wrap a signature for AIS transmission.
fn signature_message(
    codec: &CodecSettings,
    dest_mmsi: Option<u32>,
    message: &NavAidMessage,
    signed: &SignedPayload,
) -> Result<EncodedMessage, EncodingError> {
    let payload = signed.to_ais_payload();
    match dest_mmsi {
        Some(dest) => encode_message6(message.mmsi, dest, &payload, codec.addressed_message_id),
        None => encode_message8(message.mmsi, &payload),
    }
}

fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Run the signing leg. Failures are logged and counted, never raised.
async fn sign(
    context: &AdvertiserContext,
    message: &NavAidMessage,
    encoded: &EncodedMessage,
    timestamp: i64,
    encoding: StampEncoding,
) -> Option<SignedPayload> {
    let signer = context.signer.as_ref()?;
    match signer
        .sign(&message.uid, message.mmsi, encoded, timestamp, encoding)
        .await
    {
        Ok(signed) => Some(signed),
        Err(e) => {
            context.statistics.record_signing_error();
            warn!("No signature for {}: {}", message.uid, e);
            None
        }
    }
}

fn account(
    report: &mut AdvertiseReport,
    statistics: &BroadcastStatistics,
    uid: &str,
    result: Result<bool, AdvertiserError>,
) {
    match result {
        Ok(signed) => {
            report.sent += 1;
            if signed {
                report.signatures += 1;
            }
        }
        Err(AdvertiserError::Encoding(e)) => {
            statistics.record_encoding_error();
            report.skipped += 1;
            warn!("Skipping {}: {}", uid, e);
        }
        Err(e) => {
            statistics.record_transport_error();
            report.failed += 1;
            error!("Failed to transmit {}: {}", uid, e);
        }
    }
}

// ============================================================================
// Software radio
// ============================================================================

/// Advertiser for a software-defined radio fed NMEA over UDP.
///
/// The radio does no slot management of its own, so consecutive messages
/// are spaced by `ais_interval_ms`. Scheduled cycles and immediate
/// transmissions share the same clock.
pub struct UdpRadioAdvertiser {
    context: AdvertiserContext,
    settings: UdpRadioSettings,
    state: AdvertiserState,
    station: Option<Station>,
    socket: Option<UdpSocket>,
    destination: Option<std::net::SocketAddr>,
    sequence_id: u8,
    last_sent: Option<Instant>,
}

impl UdpRadioAdvertiser {
    pub fn new(context: AdvertiserContext, settings: UdpRadioSettings) -> Self {
        Self {
            context,
            settings,
            state: AdvertiserState::Idle,
            station: None,
            socket: None,
            destination: None,
            sequence_id: 0,
            last_sent: None,
        }
    }

    /// Wait out whatever remains of the AIS interval since the last message.
    async fn pace(&self) {
        if let Some(last) = self.last_sent {
            tokio::time::sleep_until(last + Duration::from_millis(self.settings.ais_interval_ms))
                .await;
        }
    }

    fn active_station(&self) -> Result<&Station, AdvertiserError> {
        match (&self.state, &self.station) {
            (AdvertiserState::Active, Some(station)) => Ok(station),
            (_, station) => Err(AdvertiserError::NotActive(
                station.as_ref().map(|s| s.id).unwrap_or_default(),
            )),
        }
    }

    /// Send an encoded message as newline-terminated VDM datagrams.
    ///
    /// Only multi-part messages carry a sequence id. The parts of one
    /// message go out together; the next message waits for the interval.
    async fn send(&mut self, message: &EncodedMessage) -> Result<(), AdvertiserError> {
        let channel = self.active_station()?.channel;
        self.pace().await;
        let (Some(socket), Some(destination)) = (&self.socket, self.destination) else {
            return Err(TransportError::Closed.into());
        };
        self.last_sent = Some(Instant::now());

        let multipart = VdmSentence::part_count(message) > 1;
        let sequence_id = multipart.then_some(self.sequence_id);
        for sentence in VdmSentence::from_message(message, channel, sequence_id) {
            let line = format!(
                "{}\n",
                sentence
                    .with_talker_id(&self.context.codec.talker_id)
                    .to_string_with_checksum()
            );
            socket
                .send_to(line.as_bytes(), destination)
                .await
                .map_err(TransportError::from)?;
        }
        if multipart {
            self.sequence_id = (self.sequence_id + 1) % 10;
        }
        Ok(())
    }
}

#[async_trait]
impl Advertiser for UdpRadioAdvertiser {
    fn state(&self) -> AdvertiserState {
        self.state
    }

    fn station(&self) -> Option<&Station> {
        self.station.as_ref()
    }

    async fn init(&mut self, station: Station) -> Result<(), AdvertiserError> {
        if self.state == AdvertiserState::Closed {
            return Err(AdvertiserError::NotActive(station.id));
        }
        check_station(&station, TransportKind::UdpRadio, self.context.signer.is_some())?;

        let destination = resolve(&station.destination()).await?;
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(TransportError::from)?;

        info!(
            "Station {} broadcasting to {} (signatures: {})",
            station.name, destination, station.signature_mode
        );
        self.socket = Some(socket);
        self.destination = Some(destination);
        self.station = Some(station);
        self.state = AdvertiserState::Active;
        Ok(())
    }

    async fn transmit(&mut self, message: &NavAidMessage) -> Result<bool, AdvertiserError> {
        let station = self.active_station()?.clone();
        let encoded = encode_message21(message)?;
        // Stamp with the time the report actually leaves
        self.pace().await;
        let timestamp = now_timestamp();

        info!("Station {} sending an advertisement AtoN {}", station.name, message.uid);
        self.send(&encoded).await?;
        self.context.statistics.record_sent();

        match station.signature_mode {
            SignatureMode::None => return Ok(false),
            SignatureMode::Ais => {}
            SignatureMode::Vde => {
                warn!("Station {} cannot carry VDE signatures", station.name);
                return Ok(false);
            }
        }
        let Some(signed) = sign(&self.context, message, &encoded, timestamp, StampEncoding::Digest).await
        else {
            return Ok(false);
        };
        let signature = match signature_message(
            &self.context.codec,
            self.settings.dest_mmsi,
            message,
            &signed,
        ) {
            Ok(signature) => signature,
            Err(e) => {
                warn!("Cannot encode signature for {}: {}", message.uid, e);
                return Ok(false);
            }
        };
        if let Err(e) = self.send(&signature).await {
            error!("Failed to send signature for {}: {}", message.uid, e);
            return Ok(false);
        }
        self.context.statistics.record_signature();
        debug!("Signature for {} sent", message.uid);
        Ok(true)
    }

    async fn advertise(&mut self) -> Result<AdvertiseReport, AdvertiserError> {
        if self.state == AdvertiserState::Reloading {
            debug!("Skipping cycle while reloading");
            return Ok(AdvertiseReport::default());
        }
        let station = self.active_station()?.clone();
        let messages: Vec<NavAidMessage> = self
            .context
            .messages
            .messages_for_station(station.id)
            .into_iter()
            .filter(|m| !station.is_blacklisted(&m.uid))
            .collect();

        let mut report = AdvertiseReport::default();
        for message in &messages {
            let result = self.transmit(message).await;
            account(&mut report, &self.context.statistics, &message.uid, result);
        }
        Ok(report)
    }

    fn begin_reload(&mut self) {
        if self.state == AdvertiserState::Active {
            self.state = AdvertiserState::Reloading;
        }
    }

    async fn reload(&mut self, station: Station) -> Result<(), AdvertiserError> {
        self.begin_reload();
        self.socket = None;
        self.destination = None;
        self.state = AdvertiserState::Idle;
        match self.init(station).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(station) = &self.station {
            info!("Station {} advertiser is shutting down", station.name);
        }
        self.socket = None;
        self.destination = None;
        self.state = AdvertiserState::Closed;
    }
}

// ============================================================================
// VDES-1000
// ============================================================================

/// Advertiser for a VDES-1000 device.
///
/// Only virtual AtoNs are transmitted. The device manages slot timing, so
/// reports go out back to back.
pub struct Vdes1000Advertiser {
    context: AdvertiserContext,
    settings: VdesSettings,
    publish: mpsc::Sender<DeviceMessage>,
    state: AdvertiserState,
    station: Option<Station>,
    device: Option<DeviceConnectionManager>,
}

impl Vdes1000Advertiser {
    pub fn new(
        context: AdvertiserContext,
        settings: VdesSettings,
        publish: mpsc::Sender<DeviceMessage>,
    ) -> Self {
        Self {
            context,
            settings,
            publish,
            state: AdvertiserState::Idle,
            station: None,
            device: None,
        }
    }

    /// Address the device monitor listens on, if any.
    pub fn monitor_addr(&self) -> Option<std::net::SocketAddr> {
        self.device.as_ref().and_then(|d| d.monitor_addr())
    }

    fn active_station(&self) -> Result<&Station, AdvertiserError> {
        match (&self.state, &self.station) {
            (AdvertiserState::Active, Some(station)) => Ok(station),
            (_, station) => Err(AdvertiserError::NotActive(
                station.as_ref().map(|s| s.id).unwrap_or_default(),
            )),
        }
    }

    async fn release(&mut self) {
        if let Some(device) = self.device.take() {
            device.destroy().await;
        }
    }

    /// Send the signature leg for a transmitted report.
    async fn send_signature(
        &mut self,
        station: &Station,
        message: &NavAidMessage,
        encoded: &EncodedMessage,
        timestamp: i64,
    ) -> bool {
        let Some(signed) = sign(&self.context, message, encoded, timestamp, StampEncoding::Raw).await
        else {
            return false;
        };
        let Some(device) = self.device.as_mut() else {
            return false;
        };

        let result = match station.signature_mode {
            SignatureMode::None => return false,
            SignatureMode::Ais => {
                match signature_message(&self.context.codec, self.settings.dest_mmsi, message, &signed) {
                    Ok(signature) => {
                        device
                            .connection()
                            .send_with_bbm(&signature, station.channel)
                            .await
                    }
                    Err(e) => {
                        warn!("Cannot encode signature for {}: {}", message.uid, e);
                        return false;
                    }
                }
            }
            SignatureMode::Vde => {
                device
                    .connection()
                    .send_vde(&signed.to_vde_payload(), station.channel)
                    .await
            }
        };

        match result {
            Ok(()) => {
                self.context.statistics.record_signature();
                true
            }
            Err(e) => {
                error!("Failed to send signature for {}: {}", message.uid, e);
                false
            }
        }
    }
}

#[async_trait]
impl Advertiser for Vdes1000Advertiser {
    fn state(&self) -> AdvertiserState {
        self.state
    }

    fn station(&self) -> Option<&Station> {
        self.station.as_ref()
    }

    async fn init(&mut self, station: Station) -> Result<(), AdvertiserError> {
        if self.state == AdvertiserState::Closed {
            return Err(AdvertiserError::NotActive(station.id));
        }
        check_station(&station, TransportKind::VdesDevice, self.context.signer.is_some())?;

        let device = DeviceConnectionManager::open(
            &station,
            &self.settings,
            &self.context.codec.talker_id,
            self.publish.clone(),
            self.context.statistics.clone(),
        )
        .await?;

        info!(
            "Station {} connected to VDES-1000 at {} (signatures: {})",
            station.name,
            station.destination(),
            station.signature_mode
        );
        self.device = Some(device);
        self.station = Some(station);
        self.state = AdvertiserState::Active;
        Ok(())
    }

    async fn transmit(&mut self, message: &NavAidMessage) -> Result<bool, AdvertiserError> {
        let station = self.active_station()?.clone();
        let encoded = encode_message21(message)?;
        let timestamp = now_timestamp();

        info!("Station {} sending an advertisement AtoN {}", station.name, message.uid);
        let device = self.device.as_mut().ok_or(TransportError::Closed)?;
        device
            .connection()
            .send_message(&encoded, station.channel)
            .await?;
        self.context.statistics.record_sent();

        if station.signature_mode == SignatureMode::None {
            return Ok(false);
        }
        Ok(self.send_signature(&station, message, &encoded, timestamp).await)
    }

    async fn advertise(&mut self) -> Result<AdvertiseReport, AdvertiserError> {
        if self.state == AdvertiserState::Reloading {
            debug!("Skipping cycle while reloading");
            return Ok(AdvertiseReport::default());
        }
        let station = self.active_station()?.clone();
        let messages: Vec<NavAidMessage> = self
            .context
            .messages
            .messages_for_station(station.id)
            .into_iter()
            .filter(|m| m.virtual_aton && !station.is_blacklisted(&m.uid))
            .collect();

        let mut report = AdvertiseReport::default();
        for message in &messages {
            let result = self.transmit(message).await;
            account(&mut report, &self.context.statistics, &message.uid, result);
        }
        Ok(report)
    }

    fn begin_reload(&mut self) {
        if self.state == AdvertiserState::Active {
            self.state = AdvertiserState::Reloading;
        }
    }

    async fn reload(&mut self, station: Station) -> Result<(), AdvertiserError> {
        self.begin_reload();
        self.release().await;
        self.state = AdvertiserState::Idle;
        match self.init(station).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(station) = &self.station {
            info!("VDES-1000 advertiser for station {} is shutting down", station.name);
        }
        self.release().await;
        self.state = AdvertiserState::Closed;
    }
}
