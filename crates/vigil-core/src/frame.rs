//! Frame data model.
//!
//! `FrameInfo` is the `data` object a camera sends alongside each image.
//! `Frame` is what travels through the dispatcher and into sinks. A frame
//! is owned by exactly one stage at a time; mailboxes move it, nothing
//! shares it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-frame metadata sent by a camera, carried as the `data` field of a
/// frame message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub camera_name: String,

    /// Capture rate measured by the camera. Missing on the wire = 0.
    #[serde(default)]
    pub fps: f64,

    /// Anything else the camera chose to attach. Passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FrameInfo {
    pub fn new(camera_name: impl Into<String>, fps: f64) -> Self {
        Self {
            camera_name: camera_name.into(),
            fps,
            extra: Map::new(),
        }
    }
}

/// A frame as seen by the dispatcher and the sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub camera_name: String,
    pub fps: f64,
    /// Encoded picture bytes (JPEG in practice). Opaque to the core.
    pub image: Bytes,
    /// Set by the dispatcher from the detector's verdict.
    pub movement: bool,
    /// Timestamp label stamped by the dispatcher before the frame leaves it.
    pub overlay: Option<String>,
}

impl Frame {
    pub fn new(info: FrameInfo, image: Bytes) -> Self {
        Self {
            camera_name: info.camera_name,
            fps: info.fps,
            image,
            movement: false,
            overlay: None,
        }
    }

    /// Placeholder fanned out once when a camera goes dark.
    pub fn offline(camera_name: impl Into<String>, image: Bytes) -> Self {
        Self {
            camera_name: camera_name.into(),
            fps: 0.0,
            image,
            movement: false,
            overlay: None,
        }
    }
}
