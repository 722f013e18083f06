//! Frame types for the Parley protocol.
//!
//! A frame is one JSON object carried by one WebSocket message. The same
//! shape travels in both directions: clients send it to the relay, and the
//! relay echoes it (with `username` and `sent_at` filled in) to recipients.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing kind of a chat frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Deliver to every connected participant.
    Broadcast,
    /// Deliver to the named user and echo back to the sender.
    Private,
    /// Deliver to every member of the named group.
    Group,
    /// Join the named group. Never delivered or persisted.
    JoinGroup,
    /// Missing or unrecognised `type`. Persisted, delivered to nobody.
    #[default]
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Broadcast => "broadcast",
            MessageKind::Private => "private",
            MessageKind::Group => "group",
            MessageKind::JoinGroup => "join_group",
            MessageKind::Unknown => "unknown",
        }
    }

    /// Whether frames of this kind go through the dispatch queue.
    #[must_use]
    pub fn is_deliverable(&self) -> bool {
        !matches!(self, MessageKind::JoinGroup)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFrame {
    /// Sender display name. Overwritten by the relay on every non-join frame.
    #[serde(default)]
    pub username: String,

    /// Message body.
    #[serde(default)]
    pub message: String,

    /// Username for `private`, group name for `group` and `join_group`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Routing kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,

    /// Server-assigned RFC 3339 timestamp. Ignored on input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
}

impl ChatFrame {
    /// Create a frame of the given kind.
    #[must_use]
    pub fn new(kind: MessageKind, username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
            target: None,
            kind,
            sent_at: None,
        }
    }

    /// Create a broadcast frame.
    #[must_use]
    pub fn broadcast(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(MessageKind::Broadcast, username, message)
    }

    /// Create a private frame addressed to `target`.
    #[must_use]
    pub fn private(
        username: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(MessageKind::Private, username, message).with_target(target)
    }

    /// Create a group frame addressed to `group`.
    #[must_use]
    pub fn group(
        username: impl Into<String>,
        group: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(MessageKind::Group, username, message).with_target(group)
    }

    /// Create a join request for `group`.
    #[must_use]
    pub fn join_group(username: impl Into<String>, group: impl Into<String>) -> Self {
        Self::new(MessageKind::JoinGroup, username, "").with_target(group)
    }

    /// Set the target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub fn with_sent_at(mut self, sent_at: impl Into<String>) -> Self {
        self.sent_at = Some(sent_at.into());
        self
    }

    /// The target, treating an empty string as absent.
    #[must_use]
    pub fn target_name(&self) -> Option<&str> {
        self.target.as_deref().filter(|t| !t.is_empty())
    }
}
