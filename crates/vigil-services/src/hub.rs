//! Image hub: accepts camera connections and publishes decoded frames.
//!
//! One accept loop plus one task per camera socket. Each connection task
//! is the sole owner of its socket and its `ConnectionState`: it decodes
//! one frame, hands it to the inbound mailbox, sets `pending_ack`, writes
//! the ack, clears `pending_ack`, and only then reads again.
//!
//! All cameras share a single-slot inbound mailbox. A connection waits for
//! the slot to be empty before handing its frame over, so one camera can
//! never overwrite another's frame and the ack only goes out once the
//! dispatcher has room. A slow consumer therefore throttles every sender,
//! and busy cameras take turns in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::broadcast;

use vigil_core::wire::{self, FrameMessage};
use vigil_core::{Mailbox, TransportError};

use crate::connection::{next_connection_id, ConnectionState, ConnectionTable};

/// Idle time before the kernel sends keepalives on a silent camera socket.
const KEEPALIVE_TIME: Duration = Duration::from_secs(15);

/// Pause after a failed accept (e.g. fd exhaustion) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Consumer side of the hub's inbound mailbox.
#[derive(Clone)]
pub struct HubReceiver {
    inbox: Arc<Mailbox<FrameMessage>>,
}

impl HubReceiver {
    pub fn new(inbox: Arc<Mailbox<FrameMessage>>) -> Self {
        Self { inbox }
    }

    /// Wait up to `timeout` for the next frame. `None` = timed out.
    pub async fn recv_frame(&self, timeout: Duration) -> Option<FrameMessage> {
        self.inbox.take(timeout).await
    }
}

pub struct Hub {
    listener: TcpListener,
    inbox: Arc<Mailbox<FrameMessage>>,
    connections: ConnectionTable,
    shutdown: broadcast::Receiver<()>,
}

impl Hub {
    /// Bind the listening socket. Failure here is fatal for the daemon.
    pub async fn bind(
        addr: &str,
        connections: ConnectionTable,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let resolved = tokio::net::lookup_host(addr)
            .await
            .with_context(|| format!("failed to resolve hub address {addr}"))?
            .next()
            .with_context(|| format!("hub address {addr} resolved to nothing"))?;

        let socket = match resolved {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .context("failed to create hub socket")?;
        // Lets a restarted hub rebind while old connections sit in TIME_WAIT.
        socket.set_reuseaddr(true).context("SO_REUSEADDR")?;
        socket
            .bind(resolved)
            .with_context(|| format!("failed to bind hub to {resolved}"))?;
        let listener = socket.listen(128).context("listen()")?;

        Ok(Self {
            listener,
            inbox: Arc::new(Mailbox::new()),
            connections,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn receiver(&self) -> HubReceiver {
        HubReceiver::new(self.inbox.clone())
    }

    pub fn connections(&self) -> ConnectionTable {
        self.connections.clone()
    }

    /// Accept cameras until shutdown. Connections already accepted are left
    /// to run until their peer goes away.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "waiting for images");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("image hub shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = configure_socket(&stream) {
            tracing::warn!(%peer, error = %e, "failed to configure camera socket");
        }

        let id = next_connection_id();
        self.connections.insert(id, ConnectionState::new(peer));
        tracing::info!(id, %peer, "camera connected");

        let inbox = self.inbox.clone();
        let connections = self.connections.clone();
        tokio::spawn(async move {
            match serve_connection(id, stream, &inbox, &connections).await {
                Ok(()) => tracing::info!(id, %peer, "camera disconnected"),
                Err(e) => tracing::warn!(id, %peer, error = %e, "dropping camera connection"),
            }
            connections.remove(&id);
        });
    }
}

fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))
}

/// Frame/ack loop for one camera. Returns `Ok` on a clean close between
/// messages; any decode or socket error drops this connection only.
async fn serve_connection(
    id: u64,
    stream: TcpStream,
    inbox: &Mailbox<FrameMessage>,
    connections: &ConnectionTable,
) -> Result<(), TransportError> {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let Some(frame) = wire::read_frame_message(&mut reader).await? else {
            return Ok(());
        };

        if let Some(mut state) = connections.get_mut(&id) {
            state.incoming(&frame.info.camera_name);
        }
        tracing::trace!(
            id,
            camera = %frame.info.camera_name,
            bytes = frame.image.len(),
            "frame received"
        );
        inbox.put_wait(frame).await;

        wire::write_ack(&mut writer).await?;
        if let Some(mut state) = connections.get_mut(&id) {
            state.acked();
        }
    }
}
