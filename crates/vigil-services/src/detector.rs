//! Movement detectors.
//!
//! A detector looks at one frame, may annotate it in place, and reports
//! whether it saw movement. Calls are synchronous and possibly slow; the
//! dispatcher runs them on the blocking pool.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};

use vigil_core::config::DetectorConfig;
use vigil_core::Frame;

pub trait Detector: Send + Sync {
    /// Returns true if the frame shows movement.
    fn analyze(&self, frame: &mut Frame) -> Result<bool>;

    /// Drop any per-camera state; the camera was unregistered.
    fn forget(&self, _camera: &str) {}

    fn name(&self) -> &'static str;
}

/// Never reports movement; every frame goes out as keep-alive.
#[derive(Debug, Default)]
pub struct NoMotion;

impl Detector for NoMotion {
    fn analyze(&self, _frame: &mut Frame) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Flags a frame whose encoded size departs from the camera's running
/// average by at least `threshold` (relative). Compressed size tracks
/// scene entropy closely enough to catch something walking into view.
#[derive(Debug)]
pub struct SizeDelta {
    alpha: f64,
    threshold: f64,
    averages: Mutex<HashMap<String, f64>>,
}

impl SizeDelta {
    pub fn new(alpha: f64, threshold: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            threshold,
            averages: Mutex::new(HashMap::new()),
        }
    }
}

impl Detector for SizeDelta {
    fn analyze(&self, frame: &mut Frame) -> Result<bool> {
        let size = frame.image.len() as f64;
        let mut averages = self
            .averages
            .lock()
            .map_err(|_| anyhow::anyhow!("size_delta state poisoned"))?;

        let Some(avg) = averages.get_mut(&frame.camera_name) else {
            // First frame only seeds the baseline.
            averages.insert(frame.camera_name.clone(), size);
            return Ok(false);
        };

        let movement = if *avg > 0.0 {
            (size - *avg).abs() / *avg >= self.threshold
        } else {
            size > 0.0
        };
        *avg += self.alpha * (size - *avg);
        Ok(movement)
    }

    fn forget(&self, camera: &str) {
        if let Ok(mut averages) = self.averages.lock() {
            averages.remove(camera);
        }
    }

    fn name(&self) -> &'static str {
        "size_delta"
    }
}

pub fn detector_from_config(config: &DetectorConfig) -> Result<Box<dyn Detector>> {
    match config.kind.as_str() {
        "none" => Ok(Box::new(NoMotion)),
        "size_delta" => Ok(Box::new(SizeDelta::new(
            config.weighting_alpha,
            config.delta_threshold,
        ))),
        other => bail!("unknown detector kind {other:?}"),
    }
}
