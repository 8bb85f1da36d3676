//! vigil-cam: camera daemon.
//!
//! Reads encoded frames from a source at a fixed rate and hands them to a
//! `Sender`, which keeps the newest one and ships it to the hub whenever
//! the previous frame has been acked.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use vigil_core::config::CameraConfig;
use vigil_core::FrameInfo;
use vigil_services::camera::FpsMeter;
use vigil_services::{DirectorySource, FrameSource, Sender, SenderHandle};

/// Upper bound on waiting for the sender to half-close after ctrl-c.
const SENDER_STOP: Duration = Duration::from_secs(2);

/// Frames between progress lines.
const REPORT_EVERY: u64 = 100;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = CameraConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CameraConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CameraConfig::default()
    });
    tracing::info!(
        camera = %config.camera_name,
        hub = %config.hub_addr,
        framerate = config.framerate,
        "vigil-cam starting"
    );

    let source = DirectorySource::open(&config.source_dir).context("failed to open frame source")?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let (sender, handle) = Sender::new(config.hub_addr.clone(), shutdown_tx.subscribe());
    let sender_task = tokio::spawn(sender.run());
    let mut capture_task = tokio::spawn(capture_loop(
        config,
        Box::new(source),
        handle,
        shutdown_tx.subscribe(),
    ));

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = &mut capture_task  => tracing::error!("capture loop exited: {:?}", r),
    }

    let _ = shutdown_tx.send(());
    if tokio::time::timeout(SENDER_STOP, sender_task).await.is_err() {
        tracing::warn!("sender did not stop in time");
    }
    Ok(())
}

/// Pull frames at `framerate` and submit them. Submission never blocks, so
/// a slow hub simply means most frames are replaced before they are sent.
async fn capture_loop(
    config: CameraConfig,
    mut source: Box<dyn FrameSource>,
    sender: SenderHandle,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    if config.warmup_seconds > 0.0 {
        tracing::info!(seconds = config.warmup_seconds, "warming up");
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_secs_f64(config.warmup_seconds)) => {}
        }
    }

    let period = Duration::from_secs_f64(1.0 / config.framerate.max(0.1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut meter = FpsMeter::start(Instant::now());

    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            _ = interval.tick() => {}
        }

        // Sources may block on file or device reads.
        let (back, next) = tokio::task::spawn_blocking(move || {
            let next = source.next_frame();
            (source, next)
        })
        .await
        .context("frame source panicked")?;
        source = back;

        let image = match next {
            Ok(Some(image)) => image,
            Ok(None) => {
                tracing::info!("frame source exhausted");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read frame");
                continue;
            }
        };

        meter.tick();
        let info = FrameInfo::new(config.camera_name.clone(), meter.fps(Instant::now()));
        if sender.submit(info, image) {
            tracing::trace!("unsent frame replaced");
        }

        if meter.frames() % REPORT_EVERY == 0 {
            let stats = sender.stats();
            tracing::info!(
                captured = meter.frames(),
                sent = stats.frames_sent(),
                connects = stats.connects(),
                fps = format_args!("{:.1}", meter.fps(Instant::now())),
                state = ?sender.state(),
                "capture progress"
            );
        }
    }
}
