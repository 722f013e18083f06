//! Message store backends selected by configuration.
//!
//! SQLite access is synchronous, so the connection sits behind a mutex and
//! every query runs on the blocking pool.

use crate::config::{StorageBackend, StorageConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parley_core::store::{MemoryStore, MessageStore, StoreError, StoredMessage};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chat_messages (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    message  TEXT NOT NULL,
    sent_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_messages_sent_at ON chat_messages (sent_at);
";

/// Open the store named by the configuration.
///
/// # Errors
///
/// Returns an error if the SQLite database cannot be opened.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn MessageStore>> {
    match config.backend {
        StorageBackend::Memory => {
            info!(capacity = config.memory_capacity, "Using in-memory message store");
            Ok(Arc::new(MemoryStore::with_capacity(config.memory_capacity)))
        }
        StorageBackend::Sqlite => {
            let store = SqliteStore::open(&config.path)
                .with_context(|| format!("Failed to open message database {}", config.path))?;
            info!(path = %config.path, "Using SQLite message store");
            Ok(Arc::new(store))
        }
    }
}

/// SQLite-backed message store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }

        let conn = Connection::open(path).map_err(backend)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(backend)?;
        Self::init(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

// Fixed-width UTC timestamps sort lexically in time order
fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn persist(&self, record: &StoredMessage) -> Result<(), StoreError> {
        let username = record.username.clone();
        let message = record.message.clone();
        let sent_at = format_time(&record.sent_at);

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_messages (username, message, sent_at) VALUES (?1, ?2, ?3)",
                params![username, message, sent_at],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn recent_messages(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT username, message, sent_at FROM chat_messages
                     ORDER BY sent_at DESC, id DESC LIMIT ?1",
                )
                .map_err(backend)?;

            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(backend)?;

            let mut records = Vec::new();
            for row in rows {
                let (username, message, sent_at) = row.map_err(backend)?;
                match DateTime::parse_from_rfc3339(&sent_at) {
                    Ok(ts) => {
                        let sent_at = ts.with_timezone(&Utc);
                        records.push(StoredMessage::new(username, message, sent_at));
                    }
                    Err(e) => {
                        warn!(sent_at = %sent_at, error = %e, "Skipping row with bad timestamp");
                    }
                }
            }
            Ok(records)
        })
        .await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
