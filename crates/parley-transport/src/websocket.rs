//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into a [`FrameSink`] and a
//! [`FrameSource`]. Frames go out as text messages; inbound text and binary
//! messages are both decoded as JSON.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_protocol::{codec, ChatFrame};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::traits::{FrameSink, FrameSource, TransportError};

/// Split an upgraded WebSocket into its write and read halves.
#[must_use]
pub fn split(
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
) -> (WebSocketSink, WebSocketSource) {
    let (sink, stream) = socket.split();
    (
        WebSocketSink {
            sink: Mutex::new(sink),
            is_open: AtomicBool::new(true),
            remote_addr,
        },
        WebSocketSource { stream },
    )
}

/// Write half of a WebSocket connection.
pub struct WebSocketSink {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    is_open: AtomicBool,
    remote_addr: Option<SocketAddr>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// Read half of a WebSocket connection.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<ChatFrame>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(codec::decode_str(&text)?));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(codec::decode(&data)?));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are queued by the socket itself
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}
