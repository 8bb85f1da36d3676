//! Per-camera bookkeeping owned by the dispatcher: liveness, capture-rate
//! estimate, and the motion state machine that decides which frames are
//! forwarded to sinks.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use vigil_core::config::MotionConfig;

// ── FPS meter ─────────────────────────────────────────────────────────────────

/// Frames counted since `started`, divided by elapsed wall time.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    started: Instant,
    frames: u64,
}

impl FpsMeter {
    pub fn start(now: Instant) -> Self {
        Self {
            started: now,
            frames: 0,
        }
    }

    pub fn tick(&mut self) {
        self.frames += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// 0.0 until any time has elapsed.
    pub fn fps(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.frames as f64 / elapsed
    }
}

// ── Motion state machine ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionState {
    /// No motion episode in progress. Every frame is forwarded.
    Idle,
    /// Some movement frames counted, not yet enough to start recording.
    Armed,
    /// Motion episode in progress.
    Recording,
}

#[derive(Debug, Clone)]
pub struct MotionTracker {
    state: MotionState,
    motion_frames: u32,
    /// Seconds of continued movement before the episode is closed out.
    record_window: f64,
    min_motion_frames: u32,
    record_new_seconds: f64,
    record_update_seconds: f64,
}

impl MotionTracker {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            state: MotionState::Idle,
            motion_frames: 0,
            record_window: config.record_new_seconds,
            min_motion_frames: config.min_motion_frames,
            record_new_seconds: config.record_new_seconds,
            record_update_seconds: config.record_update_seconds,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn motion_frames(&self) -> u32 {
        self.motion_frames
    }

    /// Advance one cycle. Returns true if this frame should be forwarded.
    ///
    /// The two "episode over" branches differ: continued movement waits
    /// `record_window * fps` frames and leaves the window at
    /// `record_update_seconds`; a lull waits `record_new_seconds * fps`.
    /// Entering `Recording` always sets the window to `record_new_seconds`.
    pub fn step(&mut self, movement: bool, fps: f64) -> bool {
        match (self.state, movement) {
            (MotionState::Idle, false) => true,

            // Counter survives a quiet frame while armed.
            (MotionState::Armed, false) => true,

            (MotionState::Idle | MotionState::Armed, true) => {
                self.motion_frames += 1;
                if self.motion_frames >= self.min_motion_frames {
                    self.state = MotionState::Recording;
                    self.motion_frames = 0;
                    self.record_window = self.record_new_seconds;
                    true
                } else {
                    self.state = MotionState::Armed;
                    false
                }
            }

            (MotionState::Recording, true) => {
                self.motion_frames += 1;
                let pause_frames = self.record_window * fps;
                if f64::from(self.motion_frames) > pause_frames {
                    self.state = MotionState::Idle;
                    self.motion_frames = 0;
                    self.record_window = self.record_update_seconds;
                    true
                } else {
                    false
                }
            }

            (MotionState::Recording, false) => {
                self.motion_frames += 1;
                let pause_frames = self.record_new_seconds * fps;
                if f64::from(self.motion_frames) > pause_frames {
                    self.state = MotionState::Idle;
                    self.motion_frames = 0;
                    self.record_window = self.record_new_seconds;
                    true
                } else {
                    false
                }
            }
        }
    }
}

// ── Camera source ─────────────────────────────────────────────────────────────

/// Dispatcher-side record of one camera.
#[derive(Debug, Clone)]
pub struct CameraSource {
    name: String,
    registered_at: Instant,
    last_comms: Instant,
    fps: FpsMeter,
    motion: MotionTracker,
    forwarded: u64,
}

impl CameraSource {
    pub fn new(name: impl Into<String>, config: &MotionConfig, now: Instant) -> Self {
        Self {
            name: name.into(),
            registered_at: now,
            last_comms: now,
            fps: FpsMeter::start(now),
            motion: MotionTracker::new(config),
            forwarded: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_comms(&self) -> Instant {
        self.last_comms
    }

    pub fn motion_state(&self) -> MotionState {
        self.motion.state()
    }

    pub fn fps(&self, now: Instant) -> f64 {
        self.fps.fps(now)
    }

    /// Record traffic and run the motion state machine on the detector's
    /// verdict. Returns true if the frame should be forwarded.
    pub fn render(&mut self, movement: bool, now: Instant) -> bool {
        self.fps.tick();
        self.last_comms = now;
        let forward = self.motion.step(movement, self.fps.fps(now));
        if forward {
            self.forwarded += 1;
        }
        forward
    }

    /// Silent for longer than `threshold`.
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.last_comms) > threshold
    }

    pub fn status(&self, now: Instant) -> CameraStatus {
        CameraStatus {
            name: self.name.clone(),
            motion_state: self.motion.state(),
            fps: self.fps.fps(now),
            frames: self.fps.frames(),
            forwarded: self.forwarded,
            registered_secs: now.saturating_duration_since(self.registered_at).as_secs(),
            last_comms_secs: now.saturating_duration_since(self.last_comms).as_secs(),
        }
    }
}

// ── Status table ──────────────────────────────────────────────────────────────

/// Read-only snapshot of a `CameraSource`, published for the API.
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub name: String,
    pub motion_state: MotionState,
    pub fps: f64,
    pub frames: u64,
    pub forwarded: u64,
    pub registered_secs: u64,
    pub last_comms_secs: u64,
}

/// Camera name → latest status. Written only by the dispatcher.
pub type CameraTable = Arc<DashMap<String, CameraStatus>>;

pub fn new_camera_table() -> CameraTable {
    Arc::new(DashMap::new())
}
