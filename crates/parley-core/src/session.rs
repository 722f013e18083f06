//! Per-connection session loop.
//!
//! A session reads frames from one connection, binds the connection's display
//! name from the first frame that carries one, handles `join_group` locally,
//! and hands every other message to the store and then to the dispatch
//! queue. Any read or decode failure ends the session.

use crate::groups::GroupTable;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::registry::Registry;
use crate::store::{MessageStore, StoredMessage};
use parley_protocol::{codec, ChatFrame, MessageKind};
use parley_transport::{ConnectionId, FrameSink, FrameSource, TransportError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed the connection.
    Closed,
    /// A read failed or a frame could not be decoded.
    Transport(TransportError),
    /// The dispatch queue is gone.
    QueueClosed,
}

/// State for one live connection.
pub struct Session {
    id: ConnectionId,
    sink: Arc<dyn FrameSink>,
    registry: Arc<Registry>,
    groups: Arc<GroupTable>,
    queue: mpsc::Sender<ChatFrame>,
    store: Arc<dyn MessageStore>,
    display_name: Option<String>,
    joined: HashSet<String>,
    torn_down: bool,
    _metrics: ConnectionMetricsGuard,
}

impl Session {
    pub(crate) fn new(
        id: ConnectionId,
        sink: Arc<dyn FrameSink>,
        registry: Arc<Registry>,
        groups: Arc<GroupTable>,
        queue: mpsc::Sender<ChatFrame>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            id,
            sink,
            registry,
            groups,
            queue,
            store,
            display_name: None,
            joined: HashSet::new(),
            torn_down: false,
            _metrics: ConnectionMetricsGuard::new(),
        }
    }

    /// The connection handle.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The bound display name, if any.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Groups this connection has joined.
    #[must_use]
    pub fn joined_groups(&self) -> &HashSet<String> {
        &self.joined
    }

    /// Read frames until the connection ends, then tear down.
    pub async fn run<S>(mut self, mut source: S) -> SessionEnd
    where
        S: FrameSource,
    {
        info!(connection = %self.id, remote = ?self.sink.remote_addr(), "Session started");

        let end = loop {
            let frame = match source.recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break SessionEnd::Closed,
                Err(e) => break SessionEnd::Transport(e),
            };

            if let Err(end) = self.handle_frame(frame).await {
                break end;
            }
        };

        match &end {
            SessionEnd::Closed => debug!(connection = %self.id, "Peer closed connection"),
            SessionEnd::Transport(e) => warn!(connection = %self.id, error = %e, "Read failed"),
            SessionEnd::QueueClosed => warn!(connection = %self.id, "Dispatch queue closed"),
        }

        self.teardown().await;
        end
    }

    /// Process one decoded frame.
    async fn handle_frame(&mut self, mut frame: ChatFrame) -> Result<(), SessionEnd> {
        metrics::record_inbound(frame.kind.as_str());

        if self.display_name.is_none() && !frame.username.is_empty() {
            self.bind_identity(&frame.username);
        }

        if frame.kind == MessageKind::JoinGroup {
            match frame.target_name() {
                Some(group) => self.join(group.to_string()),
                None => debug!(connection = %self.id, "join_group without target ignored"),
            }
            return Ok(());
        }

        let Some(name) = self.display_name.clone() else {
            warn!(
                connection = %self.id,
                kind = %frame.kind,
                "Message before identity bound, dropping"
            );
            return Ok(());
        };

        frame.username = name;
        frame.sent_at = Some(codec::timestamp_now());

        let record = StoredMessage::from_frame(&frame);
        if let Err(e) = self.store.persist(&record).await {
            warn!(
                connection = %self.id,
                store = self.store.name(),
                error = %e,
                "Failed to persist message"
            );
            metrics::record_persist_failure();
        }

        // Blocks while the queue is full
        self.queue
            .send(frame)
            .await
            .map_err(|_| SessionEnd::QueueClosed)
    }

    fn bind_identity(&mut self, name: &str) {
        if self.registry.bind_identity(self.id, name) {
            info!(connection = %self.id, username = %name, "User registered");
        }
        self.display_name = self.registry.display_name(self.id);
    }

    fn join(&mut self, group: String) {
        self.groups.join(self.id, &group);
        metrics::record_group_join(self.groups.stats().group_count);
        info!(
            connection = %self.id,
            username = self.display_name.as_deref().unwrap_or(""),
            group = %group,
            "Joined group"
        );
        self.joined.insert(group);
    }

    /// Remove the connection from the registry and its groups, then close it.
    async fn teardown(&mut self) {
        if !self.release() {
            return;
        }

        if let Err(e) = self.sink.close().await {
            debug!(connection = %self.id, error = %e, "Close during teardown");
        }

        info!(
            connection = %self.id,
            remaining = self.registry.len(),
            "Session ended"
        );
    }

    /// Drop every shared-state reference to this connection. Runs once.
    fn release(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;

        self.registry.unregister(self.id);
        self.groups
            .leave_all(self.id, self.joined.iter().map(String::as_str));
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}
