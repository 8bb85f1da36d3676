//! Image sender: the camera-side end of a hub connection.
//!
//! `submit` drops a frame into a single-slot outbox and returns at once;
//! a frame submitted while another is still waiting replaces it. The run
//! loop owns the socket: connect (retrying once per second), then
//! alternate between writing one frame and waiting for its ack. Never
//! more than one frame is in flight, which throttles the camera to the
//! rate the hub actually consumes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use vigil_core::wire;
use vigil_core::{FrameInfo, Mailbox, TransportError};

/// Bound on every wait inside the connected loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum spacing between connection attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a frame may go unacked before the hub is presumed gone.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle time before the kernel sends keepalives on a silent hub socket.
const KEEPALIVE_TIME: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Disconnected,
    Connecting,
    Connected { unacked: bool },
}

#[derive(Debug, Default)]
pub struct SenderStats {
    connects: AtomicU64,
    frames_sent: AtomicU64,
}

impl SenderStats {
    /// Successful TCP connections made so far.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

struct Outbound {
    info: FrameInfo,
    image: Bytes,
}

/// Producer side of a sender. Cheap to clone.
#[derive(Clone)]
pub struct SenderHandle {
    outbox: Arc<Mailbox<Outbound>>,
    state: watch::Receiver<SenderState>,
    stats: Arc<SenderStats>,
}

impl SenderHandle {
    /// Queue a frame for sending. Never blocks. Returns true if an unsent
    /// frame was dropped to make room.
    pub fn submit(&self, info: FrameInfo, image: Bytes) -> bool {
        self.outbox.put(Outbound { info, image })
    }

    pub fn state(&self) -> SenderState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SenderState> {
        self.state.clone()
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }
}

enum Exit {
    Shutdown,
}

pub struct Sender {
    hub_addr: String,
    retry_interval: Duration,
    ack_timeout: Duration,
    outbox: Arc<Mailbox<Outbound>>,
    state: watch::Sender<SenderState>,
    stats: Arc<SenderStats>,
    shutdown: broadcast::Receiver<()>,
}

impl Sender {
    pub fn new(hub_addr: impl Into<String>, shutdown: broadcast::Receiver<()>) -> (Self, SenderHandle) {
        let outbox = Arc::new(Mailbox::new());
        let stats = Arc::new(SenderStats::default());
        let (state_tx, state_rx) = watch::channel(SenderState::Disconnected);
        let sender = Self {
            hub_addr: hub_addr.into(),
            retry_interval: RETRY_INTERVAL,
            ack_timeout: ACK_TIMEOUT,
            outbox: outbox.clone(),
            state: state_tx,
            stats: stats.clone(),
            shutdown,
        };
        let handle = SenderHandle {
            outbox,
            state: state_rx,
            stats,
        };
        (sender, handle)
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub async fn run(mut self) -> Result<()> {
        let mut last_attempt: Option<Instant> = None;

        loop {
            // At most one connection attempt per retry interval, whether the
            // last attempt failed or the link it made has since dropped.
            if let Some(at) = last_attempt {
                let ready = at + self.retry_interval;
                tokio::select! {
                    _ = self.shutdown.recv() => break,
                    _ = tokio::time::sleep_until(ready) => {}
                }
            }
            last_attempt = Some(Instant::now());

            self.state.send_replace(SenderState::Connecting);
            let connected = tokio::select! {
                _ = self.shutdown.recv() => break,
                r = connect(&self.hub_addr) => r,
            };

            let stream = match connected {
                Ok(stream) => stream,
                Err(e) => {
                    self.state.send_replace(SenderState::Disconnected);
                    tracing::warn!(hub = %self.hub_addr, error = %e, "no image hub found, will retry");
                    continue;
                }
            };

            self.stats.connects.fetch_add(1, Ordering::Relaxed);
            tracing::info!(hub = %self.hub_addr, "connected to image hub");

            match self.stream_frames(stream).await {
                Ok(Exit::Shutdown) => break,
                Err(e) => {
                    tracing::warn!(hub = %self.hub_addr, error = %e, "lost connection with image hub");
                    self.state.send_replace(SenderState::Disconnected);
                }
            }
        }

        self.state.send_replace(SenderState::Disconnected);
        tracing::info!("image sender shutting down");
        Ok(())
    }

    /// Drive one connection until it fails or shutdown is requested.
    async fn stream_frames(&mut self, stream: TcpStream) -> Result<Exit, TransportError> {
        let (mut reader, mut writer) = stream.into_split();
        let mut unacked = false;
        let mut scratch = [0u8; 1];

        loop {
            self.state.send_replace(SenderState::Connected { unacked });

            tokio::select! {
                _ = self.shutdown.recv() => {
                    // Half-close so the hub sees a clean EOF, then drop both halves.
                    let _ = writer.shutdown().await;
                    return Ok(Exit::Shutdown);
                }

                inbound = read_inbound(&mut reader, unacked, self.ack_timeout, &mut scratch) => {
                    inbound?;
                    unacked = false;
                }

                next = self.outbox.take(POLL_INTERVAL), if !unacked => {
                    let Some(frame) = next else { continue };
                    let bytes = match wire::encode_frame_message(&frame.info, &frame.image) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::warn!(camera = %frame.info.camera_name, error = %e, "dropping unencodable frame");
                            continue;
                        }
                    };
                    writer.write_all(&bytes).await?;
                    unacked = true;
                    self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(camera = %frame.info.camera_name, bytes = bytes.len(), "frame sent");
                }
            }
        }
    }
}

/// Wait for whatever the hub sends next. With a frame in flight that must
/// be its ack, within `ack_timeout`. The hub never speaks unprompted, so
/// while idle a read only completes when the link goes away.
async fn read_inbound(
    reader: &mut OwnedReadHalf,
    unacked: bool,
    ack_timeout: Duration,
    scratch: &mut [u8; 1],
) -> Result<(), TransportError> {
    if unacked {
        let ack = tokio::time::timeout(ack_timeout, wire::read_ack(reader))
            .await
            .map_err(|_| TransportError::Timeout)??;
        return match ack {
            true => Ok(()),
            false => Err(TransportError::Protocol("expected an ack".to_string())),
        };
    }
    match reader.read(scratch).await? {
        0 => Err(TransportError::ConnectionClosed),
        _ => Err(TransportError::Protocol("unsolicited data from hub".to_string())),
    }
}

async fn connect(addr: &str) -> Result<TcpStream, TransportError> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))?;
    Ok(stream)
}
