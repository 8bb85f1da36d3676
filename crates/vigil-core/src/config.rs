//! Configuration for the hub and camera daemons.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   hub:    $VIGIL_CONFIG, else $XDG_CONFIG_HOME/vigil/hub.toml
//!   camera: $VIGIL_CAMERA_CONFIG, else $XDG_CONFIG_HOME/vigil/camera.toml
//!
//! Values are loaded once and passed into constructors; nothing here is
//! global.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Hub ───────────────────────────────────────────────────────────────────────

/// Top-level hub daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub hub: HubConfig,
    pub motion: MotionConfig,
    pub detector: DetectorConfig,
    pub sinks: Vec<SinkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address cameras connect to.
    pub listen_addr: String,
    /// Address of the HTTP status / MJPEG API.
    pub api_addr: String,
    /// JPEG shown in place of a camera that went dark. None = empty payload.
    pub placeholder_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Silence after which a camera is unregistered; also the sweep period.
    pub active_check_seconds: u64,
    /// Consecutive movement frames needed before recording starts.
    pub min_motion_frames: u32,
    pub record_new_seconds: f64,
    pub record_update_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// "none" or "size_delta".
    pub kind: String,
    /// Passed through to the detector; the core does not interpret it.
    pub confidence: f64,
    /// Running-average weight for the size_delta detector.
    pub weighting_alpha: f64,
    /// Relative size change that counts as movement for size_delta.
    pub delta_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Registry tag: "log", "file", "mjpeg".
    pub kind: String,
    /// Display name. Empty = same as kind.
    pub name: String,
    /// Only receive frames flagged with movement.
    pub movement_only: bool,
    /// Output directory for the file sink.
    pub directory: Option<PathBuf>,
}

impl MotionConfig {
    pub fn active_check(&self) -> Duration {
        Duration::from_secs(self.active_check_seconds)
    }
}

impl SinkConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.kind
        } else {
            &self.name
        }
    }
}

// ── Camera ────────────────────────────────────────────────────────────────────

/// Camera daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub camera_name: String,
    /// Hub address to connect to.
    pub hub_addr: String,
    /// Directory of JPEG files replayed as the capture source.
    pub source_dir: PathBuf,
    /// Target capture rate.
    pub framerate: f64,
    /// Pause before the first frame is submitted.
    pub warmup_seconds: f64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5555".to_string(),
            api_addr: "127.0.0.1:8080".to_string(),
            placeholder_image: None,
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            active_check_seconds: 10,
            min_motion_frames: 3,
            record_new_seconds: 10.0,
            record_update_seconds: 30.0,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: "none".to_string(),
            confidence: 0.4,
            weighting_alpha: 0.05,
            delta_threshold: 0.25,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: "log".to_string(),
            name: String::new(),
            movement_only: false,
            directory: None,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera_name: "camera".to_string(),
            hub_addr: "127.0.0.1:5555".to_string(),
            source_dir: data_dir().join("frames"),
            framerate: 10.0,
            warmup_seconds: 0.0,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("vigil")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("vigil")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
    toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
}

fn write_if_missing<T: Serialize + Default>(path: PathBuf) -> Result<PathBuf, ConfigError> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        let text = toml::to_string_pretty(&T::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
    }
    Ok(path)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl VigilConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = read_or_default(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("VIGIL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("hub.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        write_if_missing::<Self>(Self::file_path())
    }

    /// Apply VIGIL_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VIGIL_HUB__LISTEN_ADDR") {
            self.hub.listen_addr = v;
        }
        if let Ok(v) = std::env::var("VIGIL_HUB__API_ADDR") {
            self.hub.api_addr = v;
        }
        if let Some(v) = env_parse("VIGIL_MOTION__ACTIVE_CHECK_SECONDS") {
            self.motion.active_check_seconds = v;
        }
        if let Some(v) = env_parse("VIGIL_MOTION__MIN_MOTION_FRAMES") {
            self.motion.min_motion_frames = v;
        }
        if let Ok(v) = std::env::var("VIGIL_DETECTOR__KIND") {
            self.detector.kind = v;
        }
    }
}

impl CameraConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = read_or_default(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("VIGIL_CAMERA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("camera.toml"))
    }

    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        write_if_missing::<Self>(Self::file_path())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VIGIL_CAMERA__NAME") {
            self.camera_name = v;
        }
        if let Ok(v) = std::env::var("VIGIL_CAMERA__HUB_ADDR") {
            self.hub_addr = v;
        }
        if let Ok(v) = std::env::var("VIGIL_CAMERA__SOURCE_DIR") {
            self.source_dir = PathBuf::from(v);
        }
    }
}
