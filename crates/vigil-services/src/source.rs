//! Frame sources for the camera process.
//!
//! Capture and encoding happen outside vigil; a source just yields encoded
//! images one at a time.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bytes::Bytes;

pub trait FrameSource: Send {
    /// Next encoded image. `None` = the source is exhausted. May block;
    /// async callers run it on the blocking pool.
    fn next_frame(&mut self) -> Result<Option<Bytes>>;
}

/// Replays the `.jpg` / `.jpeg` files of a directory in name order,
/// starting over after the last one.
#[derive(Debug)]
pub struct DirectorySource {
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir)
            .with_context(|| format!("failed to read frame directory {}", dir.display()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_jpeg(path))
            .collect();
        files.sort();

        if files.is_empty() {
            bail!("no .jpg or .jpeg files in {}", dir.display());
        }
        tracing::info!(dir = %dir.display(), files = files.len(), "replaying frames from directory");
        Ok(Self { files, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();
        let image = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(Bytes::from(image)))
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}
