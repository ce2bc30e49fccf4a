//! Broadcast supervision.
//!
//! The [`BroadcastSupervisor`] owns one task per active station. It routes
//! incoming feature events, drives the shared transmit tick and rebuilds the
//! station set on reload. Everything else talks to it through a cloneable
//! [`SupervisorHandle`].
//!
//! During a reload the shared `reloading` flag is raised before any station
//! is touched, so queued ticks and deliveries are dropped instead of reaching
//! a station that is being replaced. The station snapshot used for routing is
//! swapped only once the new set is running.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use aton_core::config::{AppConfig, UdpRadioSettings, VdesSettings};
use aton_core::{FeatureEvent, MessageStore, NavAidMessage, Station, StationStore, TransportKind};

use crate::advertiser::{Advertiser, AdvertiserContext, UdpRadioAdvertiser, Vdes1000Advertiser};
use crate::device::DeviceMessage;
use crate::error::{AdvertiserError, SupervisorError};
use crate::router::{Delivery, GeofenceRouter};
use crate::signature::SignatureAdapter;
use crate::statistics::{BroadcastStatistics, StatisticsSnapshot};

/// Capacity of the supervisor's event queue.
pub const EVENT_BUFFER_SIZE: usize = 1024;

/// Capacity of each station's command queue.
const STATION_COMMAND_BUFFER: usize = 64;

/// Capacity of the live delivery feed.
const DELIVERY_BUFFER_SIZE: usize = 1024;

/// Events handled by the supervisor loop.
#[derive(Debug)]
pub enum SupervisorEvent {
    /// A navigational aid changed or was removed.
    Feature(FeatureEvent),
    /// Run a transmit cycle now, outside the schedule.
    Tick,
    /// Rebuild the station set from the store. Replies with the number of
    /// active stations.
    Reload(oneshot::Sender<usize>),
    Shutdown,
}

enum StationCommand {
    Advertise,
    Deliver(NavAidMessage),
    Reload(Station, oneshot::Sender<Result<(), AdvertiserError>>),
    Close(oneshot::Sender<()>),
}

struct StationTask {
    station: Station,
    commands: mpsc::Sender<StationCommand>,
    handle: JoinHandle<()>,
}

impl StationTask {
    async fn close(self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(StationCommand::Close(reply)).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                error!("Station {} task ended abnormally: {}", self.station.name, e);
            }
        }
    }
}

/// Supervises every station advertiser.
pub struct BroadcastSupervisor {
    context: AdvertiserContext,
    udp_radio: UdpRadioSettings,
    vdes: VdesSettings,
    router: GeofenceRouter,
    station_store: Arc<dyn StationStore>,
    publish: mpsc::Sender<DeviceMessage>,
    tasks: BTreeMap<u32, StationTask>,
    snapshot: watch::Sender<Arc<Vec<Station>>>,
    deliveries: broadcast::Sender<Delivery>,
    reloading: Arc<AtomicBool>,
    events: mpsc::Receiver<SupervisorEvent>,
}

impl BroadcastSupervisor {
    /// Create a supervisor and the handle used to drive it.
    ///
    /// Nothing is started until [`BroadcastSupervisor::run`] is awaited.
    /// Device traffic reported by VDES-1000 monitors goes to `publish`.
    pub fn new(
        config: &AppConfig,
        station_store: Arc<dyn StationStore>,
        messages: Arc<dyn MessageStore>,
        signer: Option<SignatureAdapter>,
        publish: mpsc::Sender<DeviceMessage>,
    ) -> (Self, SupervisorHandle) {
        let statistics = Arc::new(BroadcastStatistics::new());
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (snapshot, snapshot_rx) = watch::channel(Arc::new(Vec::new()));
        let (deliveries, _) = broadcast::channel(DELIVERY_BUFFER_SIZE);

        let supervisor = Self {
            context: AdvertiserContext {
                messages: messages.clone(),
                signer,
                codec: config.codec.clone(),
                statistics: statistics.clone(),
            },
            udp_radio: config.udp_radio.clone(),
            vdes: config.vdes.clone(),
            router: GeofenceRouter::new(messages.clone(), &config.router),
            station_store: station_store.clone(),
            publish,
            tasks: BTreeMap::new(),
            snapshot,
            deliveries: deliveries.clone(),
            reloading: Arc::new(AtomicBool::new(false)),
            events: event_rx,
        };
        let handle = SupervisorHandle {
            events: event_tx,
            stations: snapshot_rx,
            deliveries,
            station_store,
            messages,
            statistics,
        };
        (supervisor, handle)
    }

    /// Load the stations and run until shut down.
    ///
    /// The transmit tick starts after the configured initial delay. The loop
    /// ends on [`SupervisorEvent::Shutdown`] or when every handle is dropped.
    pub async fn run(mut self) {
        let active = self.reload().await;
        info!("Broadcast supervisor started with {} active stations", active);

        let start = Instant::now() + Duration::from_secs(self.vdes.initial_delay_secs);
        let mut ticker =
            tokio::time::interval_at(start, Duration::from_secs(self.vdes.tick_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.advertise_all(),
                event = self.events.recv() => match event {
                    Some(SupervisorEvent::Feature(event)) => self.handle_feature(event),
                    Some(SupervisorEvent::Tick) => self.advertise_all(),
                    Some(SupervisorEvent::Reload(reply)) => {
                        let active = self.reload().await;
                        let _ = reply.send(active);
                    }
                    Some(SupervisorEvent::Shutdown) | None => break,
                },
            }
        }

        info!("Broadcast supervisor shutting down");
        let tasks = std::mem::take(&mut self.tasks);
        future::join_all(tasks.into_values().map(StationTask::close)).await;
        self.context.statistics.set_active_stations(0);
    }

    fn build_advertiser(&self, kind: TransportKind) -> Box<dyn Advertiser> {
        match kind {
            TransportKind::UdpRadio => Box::new(UdpRadioAdvertiser::new(
                self.context.clone(),
                self.udp_radio.clone(),
            )),
            TransportKind::VdesDevice => Box::new(Vdes1000Advertiser::new(
                self.context.clone(),
                self.vdes.clone(),
                self.publish.clone(),
            )),
        }
    }

    async fn start_station(&mut self, station: Station) {
        let mut advertiser = self.build_advertiser(station.kind);
        if let Err(e) = advertiser.init(station.clone()).await {
            warn!("Station {} excluded: {}", station.name, e);
            return;
        }

        let (commands, rx) = mpsc::channel(STATION_COMMAND_BUFFER);
        let span = info_span!("station", id = station.id, name = %station.name);
        let handle = tokio::spawn(
            run_station(advertiser, rx, self.reloading.clone()).instrument(span),
        );
        self.tasks.insert(
            station.id,
            StationTask {
                station,
                commands,
                handle,
            },
        );
    }

    /// Reconcile the running stations with the store.
    ///
    /// Removed stations are closed, existing ones reloaded in place and new
    /// ones started. A station that fails validation or initialisation is
    /// left out of the active set. Returns the number of active stations.
    async fn reload(&mut self) -> usize {
        self.reloading.store(true, Ordering::SeqCst);
        debug!("Reloading stations");

        let configured: BTreeMap<u32, Station> = self
            .station_store
            .all()
            .into_iter()
            .map(|station| (station.id, station))
            .collect();

        let removed: Vec<u32> = self
            .tasks
            .keys()
            .filter(|id| !configured.contains_key(id))
            .copied()
            .collect();
        for id in removed {
            if let Some(task) = self.tasks.remove(&id) {
                info!("Station {} removed", task.station.name);
                task.close().await;
            }
        }

        for (id, station) in configured {
            if let Err(e) = station.validate() {
                warn!("Station {} excluded: {}", station.name, e);
                if let Some(task) = self.tasks.remove(&id) {
                    task.close().await;
                }
                continue;
            }

            match self.tasks.remove(&id) {
                Some(task) if task.station.kind == station.kind => {
                    let (reply, result) = oneshot::channel();
                    if task
                        .commands
                        .send(StationCommand::Reload(station.clone(), reply))
                        .await
                        .is_err()
                    {
                        warn!("Station {} task is gone, restarting", station.name);
                        self.start_station(station).await;
                        continue;
                    }
                    match result.await {
                        Ok(Ok(())) => {
                            self.tasks.insert(id, StationTask { station, ..task });
                        }
                        Ok(Err(e)) => {
                            warn!("Station {} excluded: {}", station.name, e);
                            task.close().await;
                        }
                        Err(_) => {
                            warn!("Station {} task stopped during reload", station.name);
                        }
                    }
                }
                Some(task) => {
                    task.close().await;
                    self.start_station(station).await;
                }
                None => self.start_station(station).await,
            }
        }

        let active: Vec<Station> = self.tasks.values().map(|t| t.station.clone()).collect();
        let count = active.len();
        self.snapshot.send_replace(Arc::new(active));
        self.context.statistics.set_active_stations(count);
        self.reloading.store(false, Ordering::SeqCst);
        info!("Station reload complete, {} active", count);
        count
    }

    fn handle_feature(&mut self, event: FeatureEvent) {
        self.context.statistics.record_event();
        let stations = self.snapshot.borrow().clone();
        let deliveries = self.router.route(&event, &stations);
        self.context.statistics.record_deliveries(deliveries.len());

        for delivery in deliveries {
            // Software radios transmit straight away; VDES-1000 stations wait for the tick
            if let Some(task) = self.tasks.get(&delivery.station_id) {
                if task.station.kind == TransportKind::UdpRadio {
                    if let Err(e) = task
                        .commands
                        .try_send(StationCommand::Deliver(delivery.message.clone()))
                    {
                        warn!(
                            "Station {} busy, dropping delivery of {}: {}",
                            task.station.name, delivery.message.uid, e
                        );
                    }
                }
            }
            let _ = self.deliveries.send(delivery);
        }
    }

    fn advertise_all(&self) {
        for task in self.tasks.values() {
            if task.commands.try_send(StationCommand::Advertise).is_err() {
                debug!("Station {} still transmitting, skipping cycle", task.station.name);
            }
        }
    }
}

async fn run_station(
    mut advertiser: Box<dyn Advertiser>,
    mut commands: mpsc::Receiver<StationCommand>,
    reloading: Arc<AtomicBool>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            StationCommand::Advertise => {
                if reloading.load(Ordering::SeqCst) {
                    continue;
                }
                match advertiser.advertise().await {
                    Ok(report) => debug!(
                        "Cycle complete: {} sent, {} signed, {} skipped, {} failed",
                        report.sent, report.signatures, report.skipped, report.failed
                    ),
                    Err(e) => warn!("Cycle failed: {}", e),
                }
            }
            StationCommand::Deliver(message) => {
                if reloading.load(Ordering::SeqCst) {
                    continue;
                }
                if let Err(e) = advertiser.transmit(&message).await {
                    warn!("Failed to transmit {}: {}", message.uid, e);
                }
            }
            StationCommand::Reload(station, reply) => {
                let result = advertiser.reload(station).await;
                let failed = result.is_err();
                let _ = reply.send(result);
                if failed {
                    return;
                }
            }
            StationCommand::Close(reply) => {
                advertiser.close().await;
                let _ = reply.send(());
                return;
            }
        }
    }
    advertiser.close().await;
}

/// Cloneable handle to a running [`BroadcastSupervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    events: mpsc::Sender<SupervisorEvent>,
    stations: watch::Receiver<Arc<Vec<Station>>>,
    deliveries: broadcast::Sender<Delivery>,
    station_store: Arc<dyn StationStore>,
    messages: Arc<dyn MessageStore>,
    statistics: Arc<BroadcastStatistics>,
}

impl SupervisorHandle {
    async fn send(&self, event: SupervisorEvent) -> Result<(), SupervisorError> {
        self.events
            .send(event)
            .await
            .map_err(|_| SupervisorError::Stopped)
    }

    /// Submit a feature-change event for routing.
    pub async fn submit(&self, event: FeatureEvent) -> Result<(), SupervisorError> {
        self.send(SupervisorEvent::Feature(event)).await
    }

    /// Request a transmit cycle now.
    pub async fn tick(&self) -> Result<(), SupervisorError> {
        self.send(SupervisorEvent::Tick).await
    }

    /// Rebuild the station set and wait for it to be active.
    pub async fn reload(&self) -> Result<usize, SupervisorError> {
        let (reply, active) = oneshot::channel();
        self.send(SupervisorEvent::Reload(reply)).await?;
        active.await.map_err(|_| SupervisorError::Stopped)
    }

    /// Validate and store a station, then reload.
    pub async fn save_station(&self, station: Station) -> Result<Station, SupervisorError> {
        station.validate()?;
        let saved = self.station_store.save(station);
        self.reload().await?;
        Ok(saved)
    }

    /// Delete a station and its cached messages, then reload.
    pub async fn delete_station(&self, id: u32) -> Result<Station, SupervisorError> {
        let deleted = self.station_store.delete(id)?;
        let dropped = self.messages.delete_for_station(id);
        debug!("Dropped {} cached messages of station {}", dropped, deleted.name);
        self.reload().await?;
        Ok(deleted)
    }

    /// Stop a station from broadcasting a message.
    pub async fn blacklist(&self, id: u32, uid: &str) -> Result<(), SupervisorError> {
        self.station_store.blacklist(id, uid)?;
        self.reload().await?;
        Ok(())
    }

    pub async fn unblacklist(&self, id: u32, uid: &str) -> Result<(), SupervisorError> {
        self.station_store.unblacklist(id, uid)?;
        self.reload().await?;
        Ok(())
    }

    /// The active station snapshot.
    pub fn stations(&self) -> Arc<Vec<Station>> {
        self.stations.borrow().clone()
    }

    /// Subscribe to the live feed of routed messages.
    pub fn subscribe_deliveries(&self) -> broadcast::Receiver<Delivery> {
        self.deliveries.subscribe()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        self.send(SupervisorEvent::Shutdown).await
    }
}
