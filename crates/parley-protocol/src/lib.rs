//! # parley-protocol
//!
//! Wire protocol definitions for the Parley chat relay.
//!
//! Every frame is a single JSON object:
//!
//! ```text
//! { "username": "alice", "message": "hi", "target": "lobby",
//!   "type": "broadcast" | "private" | "group" | "join_group",
//!   "sent_at": "2024-05-01T12:00:00Z" }
//! ```
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ChatFrame};
//!
//! let frame = ChatFrame::group("alice", "lobby", "hello");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode_str(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, decode_str, encode, timestamp_now, ProtocolError};
pub use frames::{ChatFrame, MessageKind};
