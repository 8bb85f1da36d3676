//! MJPEG sink: keeps the latest frame of each camera for live viewers.
//!
//! The sink side writes into one `watch` channel per camera; every HTTP
//! viewer holds a receiver and only ever sees the newest frame, same as a
//! mailbox consumer.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::watch;

use vigil_core::Frame;
use vigil_services::FrameSink;

/// What a viewer gets for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveFrame {
    pub image: Bytes,
    pub overlay: Option<String>,
    pub movement: bool,
}

type Feed = watch::Sender<Option<LiveFrame>>;

/// Camera name → latest frame. Shared between the sink and the API.
#[derive(Clone, Default)]
pub struct LiveFeeds {
    feeds: Arc<DashMap<String, Feed>>,
}

impl LiveFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        let live = LiveFrame {
            image: frame.image,
            overlay: frame.overlay,
            movement: frame.movement,
        };
        // send_replace stores the value even with no viewer attached.
        self.feeds
            .entry(frame.camera_name)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(live));
    }

    /// Drop a camera's feed. Attached viewers get the last frame, then
    /// their stream ends.
    pub fn remove(&self, camera: &str) -> bool {
        self.feeds.remove(camera).is_some()
    }

    /// `None` if the camera has never produced a frame.
    pub fn subscribe(&self, camera: &str) -> Option<watch::Receiver<Option<LiveFrame>>> {
        self.feeds.get(camera).map(|feed| feed.subscribe())
    }

    /// Outer `None` = unknown camera; inner `None` = nothing to show.
    pub fn latest(&self, camera: &str) -> Option<Option<LiveFrame>> {
        self.feeds.get(camera).map(|feed| feed.borrow().clone())
    }

    pub fn cameras(&self) -> Vec<String> {
        let mut names: Vec<String> = self.feeds.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

pub struct MjpegSink {
    feeds: LiveFeeds,
}

impl MjpegSink {
    pub fn new(feeds: LiveFeeds) -> Self {
        Self { feeds }
    }
}

impl FrameSink for MjpegSink {
    fn handle(&mut self, frame: Frame) -> Result<()> {
        self.feeds.publish(frame);
        Ok(())
    }

    fn forget(&mut self, camera: &str) {
        if self.feeds.remove(camera) {
            tracing::debug!(%camera, "live feed closed");
        }
    }

    fn kind(&self) -> &'static str {
        "mjpeg"
    }
}

/// One part of a `multipart/x-mixed-replace; boundary=frame` body.
pub fn encode_part(frame: &LiveFrame) -> Bytes {
    let mut part = Vec::with_capacity(frame.image.len() + 128);
    part.extend_from_slice(b"--frame\r\n");
    part.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    part.extend_from_slice(format!("Content-Length: {}\r\n", frame.image.len()).as_bytes());
    if let Some(label) = &frame.overlay {
        part.extend_from_slice(format!("X-Timestamp: {label}\r\n").as_bytes());
    }
    part.extend_from_slice(format!("X-Movement: {}\r\n", frame.movement).as_bytes());
    part.extend_from_slice(b"\r\n");
    part.extend_from_slice(&frame.image);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}
