//! File sink: records each camera to `<directory>/<camera>.mjpeg`.
//!
//! The output is a plain concatenation of JPEG images, which most players
//! open as an MJPEG stream. When a camera shows up, first in a run or
//! again after going offline, an existing file for it is moved aside with
//! a timestamp suffix instead of being appended to.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use vigil_core::config::{data_dir, SinkConfig};
use vigil_core::Frame;

use super::FrameSink;

const EXTENSION: &str = "mjpeg";

pub struct FileSink {
    directory: PathBuf,
    files: HashMap<String, BufWriter<File>>,
}

impl FileSink {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .with_context(|| format!("failed to create recording directory {}", directory.display()))?;
        Ok(Self {
            directory,
            files: HashMap::new(),
        })
    }

    /// Uses `directory` from the config, or `<data dir>/recordings`.
    pub fn from_config(config: &SinkConfig) -> Result<Self> {
        let directory = config
            .directory
            .clone()
            .unwrap_or_else(|| data_dir().join("recordings"));
        Self::new(directory)
    }

    pub fn path_for(&self, camera: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{EXTENSION}", sanitize(camera)))
    }

    fn writer(&mut self, camera: &str) -> Result<&mut BufWriter<File>> {
        if !self.files.contains_key(camera) {
            let path = self.path_for(camera);
            if path.exists() {
                let rotated = rotated_path(&path, camera);
                fs::rename(&path, &rotated)
                    .with_context(|| format!("failed to rotate {}", path.display()))?;
                tracing::info!(from = %path.display(), to = %rotated.display(), "rotated previous recording");
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            tracing::info!(%camera, path = %path.display(), "recording camera");
            self.files.insert(camera.to_string(), BufWriter::new(file));
        }
        self.files
            .get_mut(camera)
            .context("recording file vanished")
    }
}

impl FrameSink for FileSink {
    fn handle(&mut self, frame: Frame) -> Result<()> {
        // Offline placeholders without an image have nothing to record.
        if frame.image.is_empty() {
            return Ok(());
        }
        let writer = self.writer(&frame.camera_name)?;
        writer.write_all(&frame.image)?;
        Ok(())
    }

    fn forget(&mut self, camera: &str) {
        let Some(mut writer) = self.files.remove(camera) else {
            return;
        };
        match writer.flush() {
            Ok(()) => tracing::info!(%camera, "recording closed"),
            Err(e) => tracing::warn!(%camera, error = %e, "failed to flush recording"),
        }
    }

    fn close(&mut self) -> Result<()> {
        for (camera, writer) in self.files.iter_mut() {
            writer
                .flush()
                .with_context(|| format!("failed to flush recording for {camera}"))?;
        }
        self.files.clear();
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

fn rotated_path(path: &Path, camera: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let mut candidate = path.with_file_name(format!("{}_{stamp}.{EXTENSION}", sanitize(camera)));
    // Two rotations within the same second.
    let mut n = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{}_{stamp}_{n}.{EXTENSION}", sanitize(camera)));
        n += 1;
    }
    candidate
}

/// Camera names come off the wire; keep them to one path component.
fn sanitize(camera: &str) -> String {
    let cleaned: String = camera
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "camera".to_string()
    } else {
        cleaned
    }
}
