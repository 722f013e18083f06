//! In-process transport backed by tokio channels.
//!
//! [`channel`] returns the two server-side halves plus a [`MemoryClient`]
//! that plays the remote peer. Dropping the client makes every later write
//! on the sink fail, which is how a vanished peer looks to the relay.

use async_trait::async_trait;
use parley_protocol::{codec, ChatFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::traits::{FrameSink, FrameSource, TransportError};

/// Create a connected in-memory transport.
#[must_use]
pub fn channel() -> (MemoryClient, MemorySink, MemorySource) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let broken = Arc::new(AtomicBool::new(false));

    let client = MemoryClient {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        broken: Arc::clone(&broken),
    };
    let sink = MemorySink {
        outbound: outbound_tx,
        is_open: AtomicBool::new(true),
        broken,
    };
    let source = MemorySource {
        inbound: inbound_rx,
    };

    (client, sink, source)
}

/// The remote end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryClient {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
    broken: Arc<AtomicBool>,
}

impl MemoryClient {
    /// Send raw text to the server. Returns `false` once disconnected.
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Encode and send a frame to the server.
    pub fn send(&self, frame: &ChatFrame) -> bool {
        match codec::encode(frame) {
            Ok(text) => self.send_raw(text),
            Err(_) => false,
        }
    }

    /// Close the client's write side; the server sees a clean end of stream.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Make every subsequent server write to this client fail.
    pub fn break_writes(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Wait for the next frame written by the server.
    ///
    /// Returns `None` once the server has dropped every handle to the sink.
    pub async fn recv(&mut self) -> Option<ChatFrame> {
        let text = self.outbound.recv().await?;
        codec::decode_str(&text).ok()
    }

    /// Take a frame written by the server without waiting.
    pub fn try_recv(&mut self) -> Option<ChatFrame> {
        let text = self.outbound.try_recv().ok()?;
        codec::decode_str(&text).ok()
    }
}

/// Write half of an in-memory connection.
#[derive(Debug)]
pub struct MemorySink {
    outbound: mpsc::UnboundedSender<String>,
    is_open: AtomicBool,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        trace!(bytes = text.len(), "memory send");
        self.outbound
            .send(text.to_owned())
            .map_err(|_| TransportError::SendFailed("peer dropped".into()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.is_open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Read half of an in-memory connection.
#[derive(Debug)]
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<ChatFrame>, TransportError> {
        match self.inbound.recv().await {
            Some(text) => Ok(Some(codec::decode_str(&text)?)),
            None => Ok(None),
        }
    }
}
