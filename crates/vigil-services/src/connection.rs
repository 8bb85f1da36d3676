//! Connection table: tracks camera sockets accepted by the hub.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

/// Hub-side state of one accepted camera socket.
///
/// Written only by the task that owns the socket; everyone else reads
/// snapshots. At most one frame is in flight un-acked per connection, so
/// `pending_ack` is true only between decoding a frame and writing its ack.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub peer_addr: SocketAddr,
    pub connected_at: Instant,
    pub last_active: Instant,
    pub pending_ack: bool,
    /// Learned from the first frame's `camera_name`.
    pub camera_name: Option<String>,
    pub frames_received: u64,
}

impl ConnectionState {
    pub fn new(peer_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            peer_addr,
            connected_at: now,
            last_active: now,
            pending_ack: false,
            camera_name: None,
            frames_received: 0,
        }
    }

    /// A frame was decoded: refresh liveness and owe the peer an ack.
    pub fn incoming(&mut self, camera_name: &str) {
        self.last_active = Instant::now();
        self.pending_ack = true;
        self.frames_received += 1;
        if self.camera_name.as_deref() != Some(camera_name) {
            self.camera_name = Some(camera_name.to_string());
        }
    }

    pub fn acked(&mut self) {
        self.pending_ack = false;
    }

    /// Seconds since the last frame arrived.
    pub fn idle_secs(&self) -> u64 {
        self.last_active.elapsed().as_secs()
    }
}

/// Connection handle → state. Keyed on a hub-assigned id.
pub type ConnectionTable = Arc<DashMap<u64, ConnectionState>>;

pub fn new_connection_table() -> ConnectionTable {
    Arc::new(DashMap::new())
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique connection id.
pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}
