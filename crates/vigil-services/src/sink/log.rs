//! Log sink: one structured line per frame.

use std::collections::HashSet;

use anyhow::Result;

use vigil_core::Frame;

use super::FrameSink;

#[derive(Debug, Default)]
pub struct LogSink {
    seen: HashSet<String>,
    frames: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for LogSink {
    fn handle(&mut self, frame: Frame) -> Result<()> {
        if self.seen.insert(frame.camera_name.clone()) {
            tracing::info!(camera = %frame.camera_name, bytes = frame.image.len(), "first frame from camera");
        }
        self.frames += 1;
        tracing::info!(
            camera = %frame.camera_name,
            fps = format_args!("{:.1}", frame.fps),
            bytes = frame.image.len(),
            movement = frame.movement,
            at = frame.overlay.as_deref().unwrap_or("-"),
            "frame"
        );
        Ok(())
    }

    fn forget(&mut self, camera: &str) {
        self.seen.remove(camera);
    }

    fn close(&mut self) -> Result<()> {
        tracing::info!(frames = self.frames, cameras = self.seen.len(), "log sink closed");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "log"
    }
}
