//! VDES-1000 device connection management.
//!
//! A [`Vdes1000Connection`] frames outbound messages for the device: every
//! batch of sentences goes out as one IEC 61162-450 group, one datagram per
//! tag-blocked sentence. A [`DeviceConnectionManager`] adds the inbound
//! monitor that republishes whatever the device reports on its broadcast
//! port, plus the one-time base-station configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use aton_core::config::{BaseStationConfig, BroadcastMethod, VdesSettings};
use aton_core::{AisChannel, Station, TransportKind};
use aton_protocol::{
    AbbSentence, BaseStationSentence, BbmSentence, EncodedMessage, Sentence, TagBlock, TsaSentence,
};

use crate::error::TransportError;
use crate::statistics::BroadcastStatistics;

/// Size of the inbound monitor's receive buffer.
pub const MONITOR_BUFFER_SIZE: usize = 2048;

/// First pause after a failed device read. Doubles per consecutive failure.
const MONITOR_ERROR_BACKOFF: Duration = Duration::from_millis(50);
const MONITOR_MAX_BACKOFF: Duration = Duration::from_secs(2);

fn monitor_backoff(consecutive_errors: u32) -> Duration {
    let shift = consecutive_errors.saturating_sub(1).min(16);
    MONITOR_ERROR_BACKOFF
        .saturating_mul(1 << shift)
        .min(MONITOR_MAX_BACKOFF)
}

/// Resolve `host:port` to the first socket address it names.
pub(crate) async fn resolve(address: &str) -> Result<SocketAddr, TransportError> {
    lookup_host(address)
        .await
        .map_err(|_| TransportError::InvalidAddress(address.to_string()))?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))
}

/// Outbound framing state for one VDES-1000.
#[derive(Debug)]
pub struct Vdes1000Connection {
    method: BroadcastMethod,
    source_id: String,
    talker_id: String,
    socket: UdpSocket,
    destination: SocketAddr,
    group_id: u8,
    vdm_sequence: u8,
    bbm_sequence: u8,
    abb_sequence: u8,
}

impl Vdes1000Connection {
    pub async fn connect(
        method: BroadcastMethod,
        source_id: &str,
        talker_id: &str,
        destination: &str,
    ) -> Result<Self, TransportError> {
        let destination = resolve(destination).await?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            method,
            source_id: source_id.to_string(),
            talker_id: talker_id.to_string(),
            socket,
            destination,
            group_id: 1,
            vdm_sequence: 0,
            bbm_sequence: 0,
            abb_sequence: 0,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Send a message the way this connection is configured to.
    pub async fn send_message(
        &mut self,
        message: &EncodedMessage,
        channel: AisChannel,
    ) -> Result<(), TransportError> {
        match self.method {
            BroadcastMethod::TsaVdm => self.send_with_tsa_vdm(message, channel).await,
            BroadcastMethod::Bbm => self.send_with_bbm(message, channel).await,
        }
    }

    /// Schedule a message with a TSA, then send the VDM sentences it links.
    pub async fn send_with_tsa_vdm(
        &mut self,
        message: &EncodedMessage,
        channel: AisChannel,
    ) -> Result<(), TransportError> {
        let tsa = TsaSentence::for_message(message, channel, self.vdm_sequence)
            .with_talker_id(&self.talker_id);
        self.vdm_sequence = (self.vdm_sequence + 1) % 10;

        self.send_sentences(&[tsa.to_string_with_checksum()]).await?;
        let vdm: Vec<String> = tsa.vdm.iter().map(|s| s.to_string_with_checksum()).collect();
        self.send_sentences(&vdm).await
    }

    pub async fn send_with_bbm(
        &mut self,
        message: &EncodedMessage,
        channel: AisChannel,
    ) -> Result<(), TransportError> {
        let lines: Vec<String> = BbmSentence::from_message(message, channel, Some(self.bbm_sequence))
            .into_iter()
            .map(|s| s.with_talker_id(&self.talker_id).to_string_with_checksum())
            .collect();
        self.bbm_sequence = (self.bbm_sequence + 1) % 10;
        self.send_sentences(&lines).await
    }

    /// Send raw bytes over the VDE data channel.
    pub async fn send_vde(&mut self, payload: &[u8], channel: AisChannel) -> Result<(), TransportError> {
        let lines: Vec<String> = AbbSentence::from_bytes(payload, channel, self.abb_sequence)
            .into_iter()
            .map(|s| {
                s.with_source_id(&self.source_id)
                    .with_talker_id(&self.talker_id)
                    .to_string_with_checksum()
            })
            .collect();
        self.abb_sequence = (self.abb_sequence + 1) % 10;
        self.send_sentences(&lines).await
    }

    /// Push a base-station configuration to the device.
    ///
    /// Returns `false` without sending when the configuration does not name
    /// the base station.
    pub async fn apply_base_station_config(
        &mut self,
        config: &BaseStationConfig,
    ) -> Result<bool, TransportError> {
        if !config.is_valid() {
            return Ok(false);
        }
        let line = BaseStationSentence::new(config).to_string_with_checksum();
        self.send_sentences(&[line]).await?;
        Ok(true)
    }

    /// Send one group of sentences.
    pub async fn send_sentences(&mut self, sentences: &[String]) -> Result<(), TransportError> {
        if sentences.is_empty() {
            return Ok(());
        }
        let blocks = TagBlock::wrap_all(sentences, self.group_id, &self.source_id);
        self.group_id = (self.group_id + 1) % 99;

        for block in blocks {
            let datagram = block.to_string();
            debug!("VDES-1000 {} <- {}", self.destination, datagram);
            self.socket.send_to(datagram.as_bytes(), self.destination).await?;
        }
        Ok(())
    }
}

/// A line reported by a device, as handed to the publish channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMessage {
    pub kind: TransportKind,
    pub address: String,
    pub port: Option<u16>,
    pub mmsi: u32,
    pub payload: String,
}

/// Aborts the monitor task when dropped.
struct MonitorGuard {
    handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl MonitorGuard {
    async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            match handle.await {
                Err(e) if !e.is_cancelled() => warn!("Device monitor ended abnormally: {}", e),
                _ => {}
            }
        }
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Owns a VDES-1000 connection and its inbound monitor.
pub struct DeviceConnectionManager {
    connection: Vdes1000Connection,
    monitor: Option<MonitorGuard>,
}

impl DeviceConnectionManager {
    /// Connect to a station's device.
    ///
    /// Starts the monitor when the station has a broadcast port, then
    /// applies the base-station configuration if one is supplied. If any
    /// step fails, whatever was already opened is released.
    pub async fn open(
        station: &Station,
        settings: &VdesSettings,
        talker_id: &str,
        publish: mpsc::Sender<DeviceMessage>,
        statistics: Arc<BroadcastStatistics>,
    ) -> Result<Self, TransportError> {
        let source_id = format!("{:04}", station.id);
        let mut connection = Vdes1000Connection::connect(
            settings.broadcast_method,
            &source_id,
            talker_id,
            &station.destination(),
        )
        .await?;

        let monitor = match station.broadcast_port {
            Some(port) => {
                let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
                let local_addr = socket.local_addr()?;
                let forward = match station.forward_address() {
                    Some(address) => {
                        let target = resolve(&address).await?;
                        Some((UdpSocket::bind("0.0.0.0:0").await?, target))
                    }
                    None => None,
                };
                let origin = DeviceMessage {
                    kind: station.kind,
                    address: station.ip_address.clone(),
                    port: station.broadcast_port,
                    mmsi: station.mmsi,
                    payload: String::new(),
                };
                info!(
                    "Monitoring station {} on {}",
                    station.name, local_addr
                );
                Some(MonitorGuard {
                    handle: Some(tokio::spawn(run_monitor(
                        socket, origin, publish, forward, statistics,
                    ))),
                    local_addr,
                })
            }
            None => None,
        };

        if let Some(config) = settings.base_station.as_ref() {
            if connection.apply_base_station_config(config).await? {
                info!(
                    "Applied base station configuration to station {}",
                    station.name
                );
            }
        }

        Ok(Self {
            connection,
            monitor,
        })
    }

    pub fn connection(&mut self) -> &mut Vdes1000Connection {
        &mut self.connection
    }

    /// Local address of the inbound monitor, if one is running.
    pub fn monitor_addr(&self) -> Option<SocketAddr> {
        self.monitor.as_ref().map(|m| m.local_addr)
    }

    /// Stop monitoring and release the device sockets.
    pub async fn destroy(mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.shutdown().await;
        }
        debug!(
            "Released VDES-1000 connection to {}",
            self.connection.destination()
        );
    }
}

async fn run_monitor(
    socket: UdpSocket,
    origin: DeviceMessage,
    publish: mpsc::Sender<DeviceMessage>,
    forward: Option<(UdpSocket, SocketAddr)>,
    statistics: Arc<BroadcastStatistics>,
) {
    let mut buf = [0u8; MONITOR_BUFFER_SIZE];
    let mut consecutive_errors = 0u32;
    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => {
                consecutive_errors = 0;
                len
            }
            Err(e) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                let backoff = monitor_backoff(consecutive_errors);
                warn!("Device monitor receive error: {} (retrying in {:?})", e, backoff);
                tokio::time::sleep(backoff).await;
                continue;
            }
        };
        let datagram = &buf[..len];

        for line in String::from_utf8_lossy(datagram).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            statistics.record_device_line();
            let message = DeviceMessage {
                payload: line.to_string(),
                ..origin.clone()
            };
            match publish.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Publish channel full, dropping device line from {}", origin.address)
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Publish channel closed")
                }
            }
        }

        if let Some((socket, target)) = &forward {
            if let Err(e) = socket.send_to(datagram, target).await {
                error!("Failed to forward device traffic to {}: {}", target, e);
            }
        }
    }
}
