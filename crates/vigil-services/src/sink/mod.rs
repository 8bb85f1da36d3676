//! Frame sinks: downstream consumers of dispatched frames.
//!
//! Each sink runs as its own tokio task fed by a single-slot mailbox. The
//! dispatcher only ever `put`s, so a slow sink misses intermediate frames
//! instead of holding anyone up. Handlers are synchronous and may touch
//! the filesystem, so the task runs them on the blocking pool.

pub mod file;
pub mod log;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::task::JoinHandle;

use vigil_core::config::SinkConfig;
use vigil_core::{Frame, Mailbox};

pub use file::FileSink;
pub use log::LogSink;

/// Bound on each mailbox wait; also the shutdown-flag latency.
pub const SINK_POLL: Duration = Duration::from_millis(100);

pub trait FrameSink: Send {
    fn handle(&mut self, frame: Frame) -> Result<()>;

    /// Drop whatever the sink keeps for `camera`; it has gone offline.
    fn forget(&mut self, _camera: &str) {}

    /// Called once when the sink task exits.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Registry tag this sink was built from.
    fn kind(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct SinkStats {
    delivered: AtomicU64,
    overwritten: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
}

/// Serializable view of a running sink, for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct SinkInfo {
    pub name: String,
    pub kind: &'static str,
    pub movement_only: bool,
    pub delivered: u64,
    pub overwritten: u64,
    pub handled: u64,
    pub failed: u64,
}

/// Dispatcher-side handle to a running sink. Cheap to clone.
#[derive(Clone)]
pub struct SinkHandle {
    name: Arc<str>,
    kind: &'static str,
    movement_only: bool,
    mailbox: Arc<Mailbox<Frame>>,
    /// Cameras to forget once the pending frame, if any, is handled.
    forgotten: Arc<Mutex<Vec<String>>>,
    stop: Arc<AtomicBool>,
    stats: Arc<SinkStats>,
}

impl SinkHandle {
    fn with_mailbox(name: &str, kind: &'static str, movement_only: bool) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            movement_only,
            mailbox: Arc::new(Mailbox::new()),
            forgotten: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SinkStats::default()),
        }
    }

    /// Hand a frame to the sink, replacing any frame it has not taken yet.
    pub fn deliver(&self, frame: Frame) {
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        if self.mailbox.put(frame) {
            self.stats.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_movement_only(&self) -> bool {
        self.movement_only
    }

    /// Tell the sink to release its state for `camera`. Applied after any
    /// frame delivered before this call.
    pub fn forget(&self, camera: &str) {
        self.forgotten_names().push(camera.to_string());
    }

    fn forgotten_names(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.forgotten.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Names ready to be forgotten. Empty while a frame is still waiting,
    /// since that frame may belong to one of them.
    fn take_forgotten(&self) -> Vec<String> {
        let mut forgotten = self.forgotten_names();
        if forgotten.is_empty() || self.mailbox.is_available() {
            return Vec::new();
        }
        std::mem::take(&mut *forgotten)
    }

    /// Ask the sink task to finish. It exits within one poll interval.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// A handle with no task behind it; tests read its mailbox directly.
    #[cfg(test)]
    pub(crate) fn detached(name: &str, movement_only: bool) -> Self {
        Self::with_mailbox(name, "detached", movement_only)
    }

    #[cfg(test)]
    pub(crate) fn take_pending(&self) -> Option<Frame> {
        self.mailbox.try_take()
    }

    #[cfg(test)]
    pub(crate) fn pending_forgets(&self) -> Vec<String> {
        self.forgotten_names().clone()
    }

    pub fn info(&self) -> SinkInfo {
        SinkInfo {
            name: self.name.to_string(),
            kind: self.kind,
            movement_only: self.movement_only,
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            overwritten: self.stats.overwritten.load(Ordering::Relaxed),
            handled: self.stats.handled.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

/// Start a sink task. The handle feeds it; the join handle resolves after
/// `close()` has run.
pub fn spawn_sink(
    name: impl Into<String>,
    movement_only: bool,
    sink: Box<dyn FrameSink>,
) -> (SinkHandle, JoinHandle<()>) {
    let name: String = name.into();
    let handle = SinkHandle::with_mailbox(&name, sink.kind(), movement_only);
    let task = tokio::spawn(run_sink(handle.clone(), sink));
    (handle, task)
}

async fn run_sink(handle: SinkHandle, mut sink: Box<dyn FrameSink>) {
    tracing::info!(sink = %handle.name, kind = handle.kind, movement_only = handle.movement_only, "sink started");

    while !handle.stop.load(Ordering::Acquire) {
        if let Some(frame) = handle.mailbox.take(SINK_POLL).await {
            let Some(back) = handle_one(&handle, sink, frame).await else {
                return;
            };
            sink = back;
        }

        let forgotten = handle.take_forgotten();
        if !forgotten.is_empty() {
            let Some((back, ())) = on_blocking_pool(&handle, sink, move |sink| {
                for camera in &forgotten {
                    sink.forget(camera);
                }
            })
            .await
            else {
                return;
            };
            sink = back;
        }
    }

    // Whatever was delivered before the stop request still gets handled.
    if let Some(frame) = handle.mailbox.try_take() {
        let Some(back) = handle_one(&handle, sink, frame).await else {
            return;
        };
        sink = back;
    }

    if let Some((_, Err(e))) = on_blocking_pool(&handle, sink, |sink| sink.close()).await {
        tracing::warn!(sink = %handle.name, error = %e, "sink close failed");
    }
    tracing::info!(sink = %handle.name, "sink stopped");
}

/// Run `f` against the sink on the blocking pool and hand the sink back.
/// `None` if `f` panicked; the sink is gone then.
async fn on_blocking_pool<R, F>(
    handle: &SinkHandle,
    mut sink: Box<dyn FrameSink>,
    f: F,
) -> Option<(Box<dyn FrameSink>, R)>
where
    R: Send + 'static,
    F: FnOnce(&mut dyn FrameSink) -> R + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let result = f(sink.as_mut());
        (sink, result)
    })
    .await;
    match joined {
        Ok(done) => Some(done),
        Err(e) => {
            tracing::error!(sink = %handle.name, error = %e, "sink panicked");
            None
        }
    }
}

async fn handle_one(handle: &SinkHandle, sink: Box<dyn FrameSink>, frame: Frame) -> Option<Box<dyn FrameSink>> {
    let camera = frame.camera_name.clone();
    let (sink, result) = on_blocking_pool(handle, sink, move |sink| sink.handle(frame)).await?;
    match result {
        Ok(()) => {
            handle.stats.handled.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            handle.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(sink = %handle.name, %camera, error = %e, "sink failed to handle frame");
        }
    }
    Some(sink)
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub type SinkFactory = Box<dyn Fn(&SinkConfig) -> Result<Box<dyn FrameSink>> + Send + Sync>;

/// Sink kind tag → constructor. Populated at startup.
#[derive(Default)]
pub struct SinkRegistry {
    factories: HashMap<String, SinkFactory>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `log` and `file` sinks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("log", |_| Ok(Box::new(LogSink::new())));
        registry.register("file", |config| Ok(Box::new(FileSink::from_config(config)?)));
        registry
    }

    /// Register a constructor, replacing any previous one for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&SinkConfig) -> Result<Box<dyn FrameSink>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn build(&self, config: &SinkConfig) -> Result<Box<dyn FrameSink>> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| anyhow!("unknown sink kind {:?}", config.kind))?;
        factory(config)
    }

    /// Build and start every configured sink. Fails on the first sink that
    /// cannot be built; nothing is spawned in that case.
    pub fn spawn_all(&self, configs: &[SinkConfig]) -> Result<(Vec<SinkHandle>, Vec<JoinHandle<()>>)> {
        let built = configs
            .iter()
            .map(|config| {
                self.build(config)
                    .map(|sink| (config, sink))
                    .map_err(|e| e.context(format!("sink {:?}", config.display_name())))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(built
            .into_iter()
            .map(|(config, sink)| spawn_sink(config.display_name(), config.movement_only, sink))
            .unzip())
    }
}
