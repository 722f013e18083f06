//! Transport abstraction traits for Parley.
//!
//! A live connection is split in two halves. The [`FrameSource`] is owned by
//! the connection's session loop and only ever read from; the [`FrameSink`]
//! is shared (behind an `Arc`) between the registry, the dispatcher and the
//! session loop, which only ever write to it or close it.

use async_trait::async_trait;
use parley_protocol::{codec, ChatFrame};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the ID.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound frame could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] parley_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The write half of a connection.
///
/// Implementations must tolerate concurrent callers; writes to a single
/// connection are serialized internally.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one pre-encoded text frame.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Encode and send a frame.
    async fn send(&self, frame: &ChatFrame) -> Result<(), TransportError> {
        let text = codec::encode(frame)?;
        self.send_text(&text).await
    }

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the connection is still open for writing.
    fn is_open(&self) -> bool;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// The read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next decoded frame.
    ///
    /// Returns `Ok(None)` if the peer closed the connection cleanly. A frame
    /// that fails to decode surfaces as [`TransportError::Protocol`].
    async fn recv(&mut self) -> Result<Option<ChatFrame>, TransportError>;
}
