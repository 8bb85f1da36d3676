//! vigild: image hub daemon.
//!
//! Accepts camera connections, runs detection and the motion state
//! machine over incoming frames, and feeds the configured sinks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::TcpListener;

use vigil_api::{ApiState, LiveFeeds, MjpegSink};
use vigil_core::config::{HubConfig, SinkConfig, VigilConfig};
use vigil_services::{
    detector_from_config, new_camera_table, new_connection_table, Detector, Dispatcher, Hub,
    SinkRegistry,
};

/// How long sinks get to flush after shutdown.
const SINK_DRAIN: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = VigilConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = VigilConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        VigilConfig::default()
    });
    tracing::info!(
        listen = %config.hub.listen_addr,
        api = %config.hub.api_addr,
        detector = %config.detector.kind,
        active_check_seconds = config.motion.active_check_seconds,
        min_motion_frames = config.motion.min_motion_frames,
        "vigild starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Sinks ────────────────────────────────────────────────────────────────
    let feeds = LiveFeeds::new();
    let mut registry = SinkRegistry::with_builtins();
    {
        let feeds = feeds.clone();
        registry.register("mjpeg", move |_| Ok(Box::new(MjpegSink::new(feeds.clone()))));
    }

    let sink_configs = if config.sinks.is_empty() {
        vec![SinkConfig::new("log"), SinkConfig::new("mjpeg")]
    } else {
        config.sinks.clone()
    };
    let (sinks, sink_tasks) = registry
        .spawn_all(&sink_configs)
        .context("invalid sink configuration")?;

    let detector: Arc<dyn Detector> = Arc::from(
        detector_from_config(&config.detector).context("invalid detector configuration")?,
    );
    let placeholder = load_placeholder(&config.hub).await;

    // ── Hub + dispatcher ─────────────────────────────────────────────────────
    let connections = new_connection_table();
    let cameras = new_camera_table();

    let hub = Hub::bind(
        &config.hub.listen_addr,
        connections.clone(),
        shutdown_tx.subscribe(),
    )
    .await?;
    let receiver = hub.receiver();
    let hub_task = tokio::spawn(hub.run());

    let dispatcher = Dispatcher::new(
        receiver,
        detector,
        sinks.clone(),
        config.motion.clone(),
        cameras.clone(),
        shutdown_tx.subscribe(),
    )
    .with_placeholder(placeholder);
    let dispatch_task = tokio::spawn(dispatcher.run());

    // ── HTTP API ─────────────────────────────────────────────────────────────
    let api_listener = TcpListener::bind(&config.hub.api_addr)
        .await
        .with_context(|| format!("failed to bind API to {}", config.hub.api_addr))?;
    let api_task = tokio::spawn(vigil_api::serve_on(
        api_listener,
        ApiState {
            connections: connections.clone(),
            cameras: cameras.clone(),
            sinks: sinks.clone(),
            feeds,
            shutdown_tx: shutdown_tx.clone(),
        },
        shutdown_tx.subscribe(),
    ));

    let status_printer = {
        let connections = connections.clone();
        let cameras = cameras.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                tracing::info!(
                    connections = connections.len(),
                    cameras = cameras.len(),
                    "hub snapshot"
                );
                for c in cameras.iter() {
                    tracing::debug!(
                        camera = %c.name,
                        state = ?c.motion_state,
                        fps = c.fps,
                        last_comms_secs = c.last_comms_secs,
                        "  camera"
                    );
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = hub_task            => tracing::error!("hub exited: {:?}", r),
        r = dispatch_task       => tracing::error!("dispatcher exited: {:?}", r),
        r = api_task            => tracing::error!("API server exited: {:?}", r),
        r = status_printer      => tracing::error!("status printer exited: {:?}", r),
    }

    // Whatever ended the select, bring the rest down and let sinks flush.
    let _ = shutdown_tx.send(());
    for sink in &sinks {
        sink.shutdown();
    }
    let drained = tokio::time::timeout(SINK_DRAIN, join_sinks(sink_tasks)).await;
    if drained.is_err() {
        tracing::warn!("sinks did not stop in time");
    }

    Ok(())
}

async fn join_sinks(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "sink task failed");
        }
    }
}

/// Image shown for a camera that went dark. Empty if none is configured or
/// it cannot be read.
async fn load_placeholder(hub: &HubConfig) -> Bytes {
    let Some(path) = &hub.placeholder_image else {
        return Bytes::new();
    };
    match tokio::fs::read(path).await {
        Ok(image) => Bytes::from(image),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read placeholder image");
            Bytes::new()
        }
    }
}
