//! Persistence sink for delivered messages.
//!
//! Every non-join message is written through to a [`MessageStore`] before it
//! is queued for delivery. Store failures never block delivery; the session
//! loop logs them and carries on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use parley_protocol::ChatFrame;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Default number of records kept by [`MemoryStore`].
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Sender display name.
    pub username: String,
    /// Message body.
    pub message: String,
    /// Server-assigned send time.
    pub sent_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Create a record.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        message: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
            sent_at,
        }
    }

    /// Build the record for a stamped frame.
    ///
    /// A missing or unparsable `sent_at` falls back to the current time.
    #[must_use]
    pub fn from_frame(frame: &ChatFrame) -> Self {
        let sent_at = frame
            .sent_at
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Self::new(frame.username.clone(), frame.message.clone(), sent_at)
    }
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store rejected the operation.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// The store is not reachable.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable store for delivered messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message.
    async fn persist(&self, record: &StoredMessage) -> Result<(), StoreError>;

    /// The most recent `limit` messages, newest first.
    async fn recent_messages(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// A bounded in-memory store. Oldest records are evicted first.
#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<VecDeque<StoredMessage>>,
    capacity: usize,
}

impl MemoryStore {
    /// Create a store with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Create a store holding at most `capacity` records.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist(&self, record: &StoredMessage) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }

    async fn recent_messages(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let mut recent: Vec<StoredMessage> = self.records.lock().iter().rev().cloned().collect();
        // Stable, so records with equal timestamps stay latest-inserted first
        recent.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        recent.truncate(limit);
        Ok(recent)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_from_frame_uses_sent_at() {
        let frame = ChatFrame::broadcast("alice", "hi").with_sent_at("2024-05-01T12:00:00Z");
        let record = StoredMessage::from_frame(&frame);
        assert_eq!(record.username, "alice");
        assert_eq!(record.message, "hi");
        assert_eq!(record.sent_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");

        let unstamped = StoredMessage::from_frame(&ChatFrame::broadcast("alice", "hi"));
        assert!(unstamped.sent_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_recent_newest_first() {
        let store = MemoryStore::new();
        store.persist(&StoredMessage::new("a", "one", at(1))).await.unwrap();
        store.persist(&StoredMessage::new("b", "two", at(2))).await.unwrap();
        store.persist(&StoredMessage::new("c", "three", at(2))).await.unwrap();

        let recent = store.recent_messages(10).await.unwrap();
        let bodies: Vec<_> = recent.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(bodies, vec!["three", "two", "one"]);

        let recent = store.recent_messages(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "three");
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = MemoryStore::with_capacity(2);
        for i in 0..3 {
            store
                .persist(&StoredMessage::new("a", format!("m{}", i), at(i)))
                .await
                .unwrap();
        }

        assert_eq!(store.len(), 2);
        let recent = store.recent_messages(10).await.unwrap();
        assert_eq!(recent[1].message, "m1");
    }
}
