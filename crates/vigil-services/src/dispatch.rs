//! Dispatcher: pulls frames off the hub, runs the detector and each
//! camera's motion state machine, and fans forwarded frames out to sinks.
//!
//! Single task. Owns every `CameraSource`; the only thing it shares is the
//! `CameraTable` of status snapshots.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, TimeZone};
use tokio::sync::broadcast;
use tokio::time::Instant;

use vigil_core::config::MotionConfig;
use vigil_core::wire::FrameMessage;
use vigil_core::Frame;

use crate::camera::{CameraSource, CameraTable};
use crate::detector::Detector;
use crate::hub::HubReceiver;
use crate::sink::SinkHandle;

/// Longest the dispatcher waits for a frame before running the liveness
/// check anyway.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

const TIMESTAMP_FORMAT: &str = "%A %d %B %Y %I:%M:%S%p";

/// Label stamped on every frame that leaves the dispatcher.
pub fn timestamp_label<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn now_label() -> String {
    timestamp_label(&chrono::Local::now())
}

pub struct Dispatcher {
    receiver: HubReceiver,
    detector: Arc<dyn Detector>,
    sinks: Vec<SinkHandle>,
    motion: MotionConfig,
    /// Image sent in place of a camera that went dark.
    placeholder: Bytes,
    cameras: HashMap<String, CameraSource>,
    table: CameraTable,
    last_sweep: Instant,
    shutdown: broadcast::Receiver<()>,
}

impl Dispatcher {
    pub fn new(
        receiver: HubReceiver,
        detector: Arc<dyn Detector>,
        sinks: Vec<SinkHandle>,
        motion: MotionConfig,
        table: CameraTable,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            receiver,
            detector,
            sinks,
            motion,
            placeholder: Bytes::new(),
            cameras: HashMap::new(),
            table,
            last_sweep: Instant::now(),
            shutdown,
        }
    }

    pub fn with_placeholder(mut self, image: Bytes) -> Self {
        self.placeholder = image;
        self
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    pub async fn run(mut self) -> Result<()> {
        tracing::info!(
            detector = self.detector.name(),
            sinks = self.sinks.len(),
            "dispatcher started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,

                next = self.receiver.recv_frame(RECV_TIMEOUT) => {
                    if let Some(message) = next {
                        self.handle_frame(message, Instant::now()).await;
                    }
                    self.maybe_sweep(Instant::now());
                }
            }
        }

        tracing::info!("dispatcher shutting down");
        for sink in &self.sinks {
            sink.shutdown();
        }
        Ok(())
    }

    /// Process one frame from the hub as of `now`.
    pub async fn handle_frame(&mut self, message: FrameMessage, now: Instant) {
        let name = message.info.camera_name.clone();

        if !self.cameras.contains_key(&name) {
            // The first frame only registers the camera.
            tracing::info!(camera = %name, "registering camera");
            let source = CameraSource::new(name.clone(), &self.motion, now);
            self.table.insert(name.clone(), source.status(now));
            self.cameras.insert(name, source);
            return;
        }

        let Some((mut frame, movement)) = self.analyze(Frame::new(message.info, message.image)).await else {
            return;
        };

        let Some(source) = self.cameras.get_mut(&name) else {
            return;
        };
        let forward = source.render(movement, now);
        self.table.insert(name.clone(), source.status(now));

        tracing::trace!(camera = %name, movement, forward, state = ?source.motion_state(), "frame processed");
        if forward {
            frame.movement = movement;
            frame.overlay = Some(now_label());
            self.fan_out(frame);
        }
    }

    /// Run the detector off the async workers. `None` if the detector task
    /// panicked, in which case the frame is gone.
    async fn analyze(&self, mut frame: Frame) -> Option<(Frame, bool)> {
        let detector = self.detector.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let verdict = detector.analyze(&mut frame);
            (frame, verdict)
        })
        .await;

        match joined {
            Ok((frame, Ok(movement))) => Some((frame, movement)),
            Ok((frame, Err(e))) => {
                tracing::warn!(camera = %frame.camera_name, error = %e, "detector failed");
                Some((frame, false))
            }
            Err(e) => {
                tracing::warn!(error = %e, "detector task panicked");
                None
            }
        }
    }

    /// Hand a frame to every sink that wants it.
    pub fn fan_out(&self, frame: Frame) {
        for sink in &self.sinks {
            if sink.is_movement_only() && !frame.movement {
                continue;
            }
            sink.deliver(frame.clone());
        }
    }

    /// Sweep at most once per `active_check_seconds`.
    pub fn maybe_sweep(&mut self, now: Instant) -> usize {
        if now.saturating_duration_since(self.last_sweep) <= self.motion.active_check() {
            return 0;
        }
        self.last_sweep = now;
        self.sweep(now)
    }

    /// Unregister every camera silent for longer than `active_check_seconds`
    /// and send one offline placeholder for each. The detector and every
    /// sink then release what they hold for it. Returns how many went.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let threshold = self.motion.active_check();
        let stale: Vec<String> = self
            .cameras
            .values()
            .filter(|source| source.is_stale(now, threshold))
            .map(|source| source.name().to_string())
            .collect();

        for name in &stale {
            self.cameras.remove(name);
            self.table.remove(name);
            tracing::info!(camera = %name, "unregistering camera");

            let mut placeholder = Frame::offline(name.clone(), self.placeholder.clone());
            placeholder.overlay = Some(now_label());
            self.fan_out(placeholder);

            self.detector.forget(name);
            for sink in &self.sinks {
                sink.forget(name);
            }
        }
        stale.len()
    }
}
