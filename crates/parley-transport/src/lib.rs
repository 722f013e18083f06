//! # parley-transport
//!
//! Transport abstraction layer for the Parley chat relay.
//!
//! Every connection is exposed as two halves:
//!
//! - **FrameSource** - read side, owned by the connection's session loop
//! - **FrameSink** - write side, shared with the dispatcher
//!
//! Implementations:
//!
//! - **WebSocket** - axum WebSocket adapter (feature `websocket`)
//! - **Memory** - tokio channel pair, used by tests and embedders
//!
//! ```rust,ignore
//! use parley_transport::FrameSource;
//!
//! async fn read_all(mut source: impl FrameSource) {
//!     while let Ok(Some(frame)) = source.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, FrameSink, FrameSource, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketSink, WebSocketSource};
