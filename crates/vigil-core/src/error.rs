//! Transport error taxonomy shared by the sender, the hub and the codec.

use std::io;

/// Everything that can go wrong while moving frames over a connection.
///
/// Apart from `Timeout`, every variant means the same thing to a caller:
/// drop this connection. None of them are retried at the codec layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Peer closed the socket, or a read came up short at a framing boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// Malformed framing or JSON.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded wait elapsed. Usually control flow, not a failure.
    #[error("timed out")]
    Timeout,

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(io::Error),
}

impl TransportError {
    /// True when the owning connection must be torn down.
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, TransportError::Timeout)
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        TransportError::Protocol(msg.into())
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportError::ConnectionClosed,
            io::ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Io(e),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Protocol(format!("invalid json: {e}"))
    }
}
