//! AtoN broadcast engine for Linux.
//!
//! Reads feature-change events as newline-delimited JSON, from a file or
//! stdin, and broadcasts them through the configured stations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aton_core::config::AppConfig;
use aton_core::{FeatureEvent, MemoryMessageStore, MemoryStationStore};
use aton_server::{
    BroadcastSupervisor, DeviceMessage, HttpSignatureProvider, SignatureAdapter, SupervisorHandle,
};

/// AtoN broadcast engine.
#[derive(Parser, Debug)]
#[command(name = "aton-broadcast", about = "Broadcast AtoN reports over AIS and VDES")]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = "aton-broadcast.toml")]
    config: PathBuf,

    /// Newline-delimited JSON feature events. Reads stdin when omitted.
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Seconds between statistics reports.
    #[arg(long, default_value_t = 300)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,aton_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    tracing::info!(
        "AtoN broadcast engine starting with {} configured stations",
        config.stations.len()
    );

    let signer = match &config.signer {
        Some(settings) => {
            let provider = HttpSignatureProvider::new(settings)?;
            tracing::info!("Signing authority at {}", settings.url);
            Some(SignatureAdapter::new(Arc::new(provider), settings))
        }
        None => {
            if config.needs_signer() {
                tracing::warn!("Stations request signatures but no signer is configured");
            }
            None
        }
    };

    let (publish_tx, publish_rx) = mpsc::channel(1024);
    let (supervisor, handle) = BroadcastSupervisor::new(
        &config,
        Arc::new(MemoryStationStore::with_stations(config.stations.clone())),
        Arc::new(MemoryMessageStore::new()),
        signer,
        publish_tx,
    );

    let mut supervisor_handle = tokio::spawn(supervisor.run());
    let device_handle = tokio::spawn(log_device_traffic(publish_rx));
    let stats_handle = tokio::spawn(report_statistics(handle.clone(), args.stats_interval));

    let events_handle = {
        let handle = handle.clone();
        let path = args.events.clone();
        tokio::spawn(async move {
            let result = match path {
                Some(path) => match tokio::fs::File::open(&path).await {
                    Ok(file) => read_events(BufReader::new(file), &handle).await,
                    Err(e) => Err(anyhow::anyhow!("opening {}: {}", path.display(), e)),
                },
                None => read_events(BufReader::new(tokio::io::stdin()), &handle).await,
            };
            if let Err(e) = result {
                tracing::error!("Event source failed: {}", e);
            }
        })
    };

    // Wait for shutdown signal
    let stopped = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
            false
        }
        _ = &mut supervisor_handle => {
            tracing::warn!("Broadcast supervisor stopped");
            true
        }
    };

    events_handle.abort();
    stats_handle.abort();
    if !stopped && handle.shutdown().await.is_ok() {
        // Let every station close its transport
        let _ = supervisor_handle.await;
    }
    device_handle.abort();

    tracing::info!(
        "Final statistics: {}",
        serde_json::to_string(&handle.statistics())?
    );
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Submit every event in a newline-delimited JSON stream.
///
/// Malformed lines are logged and skipped.
async fn read_events<R>(reader: R, handle: &SupervisorHandle) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0usize;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<FeatureEvent>(line) {
            Ok(event) => {
                handle.submit(event).await?;
                count += 1;
            }
            Err(e) => tracing::warn!("Skipping malformed event: {}", e),
        }
    }
    tracing::info!("Event source exhausted after {} events", count);
    Ok(())
}

async fn log_device_traffic(mut rx: mpsc::Receiver<DeviceMessage>) {
    while let Some(message) = rx.recv().await {
        tracing::info!(
            "{} {}:{} (MMSI {}) -> {}",
            message.kind,
            message.address,
            message.port.map(|p| p.to_string()).unwrap_or_default(),
            message.mmsi,
            message.payload
        );
    }
}

async fn report_statistics(handle: SupervisorHandle, interval_secs: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs.max(1)));
    interval.tick().await;
    loop {
        interval.tick().await;
        match serde_json::to_string(&handle.statistics()) {
            Ok(json) => tracing::info!("Statistics: {}", json),
            Err(e) => tracing::warn!("Cannot serialize statistics: {}", e),
        }
    }
}
