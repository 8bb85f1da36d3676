//! HTTP API handlers: exposes hub state as JSON and cameras as MJPEG.

pub mod status;
pub mod stream;

use tokio::sync::broadcast;

use vigil_services::{CameraTable, ConnectionTable, SinkHandle};

use crate::mjpeg::LiveFeeds;

#[derive(Clone)]
pub struct ApiState {
    pub connections: ConnectionTable,
    pub cameras: CameraTable,
    pub sinks: Vec<SinkHandle>,
    pub feeds: LiveFeeds,
    /// Shutdown broadcast sender; signals graceful daemon shutdown.
    pub shutdown_tx: broadcast::Sender<()>,
}

pub use status::{handle_cameras, handle_shutdown, handle_sinks, handle_status};
pub use stream::{handle_snapshot, handle_stream};
