//! The hub wires the registry, group table, dispatch queue and store together.

use crate::dispatcher::Dispatcher;
use crate::groups::GroupTable;
use crate::registry::Registry;
use crate::session::Session;
use crate::store::{MessageStore, StoreError, StoredMessage};
use parley_protocol::ChatFrame;
use parley_transport::FrameSink;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Default dispatch queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of messages waiting for the dispatcher. Producers
    /// block while the queue is full.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Currently identified users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveUsers {
    /// Number of identified connections.
    pub count: usize,
    /// Their display names, sorted. Duplicates are kept.
    pub users: Vec<String>,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered connections, identified or not.
    pub connections: usize,
    /// Known groups, including empty ones.
    pub groups: usize,
    /// Total group memberships.
    pub memberships: usize,
    /// Messages waiting in the dispatch queue.
    pub queued: usize,
}

/// Shared handle to the relay's state. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Registry>,
    groups: Arc<GroupTable>,
    queue: mpsc::Sender<ChatFrame>,
    store: Arc<dyn MessageStore>,
    queue_capacity: usize,
}

impl Hub {
    /// Create a hub and the dispatcher that serves it.
    ///
    /// The dispatcher must be driven (see [`Dispatcher::run`]) for any
    /// message to be delivered.
    #[must_use]
    pub fn new(config: HubConfig, store: Arc<dyn MessageStore>) -> (Self, Dispatcher) {
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity);
        let registry = Arc::new(Registry::new());
        let groups = Arc::new(GroupTable::new());

        info!(queue_capacity, store = store.name(), "Creating hub");

        let dispatcher = Dispatcher::new(rx, Arc::clone(&registry), Arc::clone(&groups));
        let hub = Self {
            registry,
            groups,
            queue: tx,
            store,
            queue_capacity,
        };

        (hub, dispatcher)
    }

    /// Create a hub and spawn its dispatcher on the current runtime.
    #[must_use]
    pub fn start(config: HubConfig, store: Arc<dyn MessageStore>) -> (Self, JoinHandle<()>) {
        let (hub, dispatcher) = Self::new(config, store);
        let handle = tokio::spawn(dispatcher.run());
        (hub, handle)
    }

    /// Register a new connection and return its session.
    #[must_use]
    pub fn connect(&self, sink: Arc<dyn FrameSink>) -> Session {
        let id = self.registry.register(Arc::clone(&sink));
        Session::new(
            id,
            sink,
            Arc::clone(&self.registry),
            Arc::clone(&self.groups),
            self.queue.clone(),
            Arc::clone(&self.store),
        )
    }

    /// Identified users, read under one registry lock.
    #[must_use]
    pub fn active_users(&self) -> ActiveUsers {
        let users = self.registry.snapshot();
        ActiveUsers {
            count: users.len(),
            users,
        }
    }

    /// The most recent persisted messages, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn recent_messages(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        self.store.recent_messages(limit).await
    }

    /// Hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let groups = self.groups.stats();
        HubStats {
            connections: self.registry.len(),
            groups: groups.group_count,
            memberships: groups.total_memberships,
            queued: self.queue_capacity.saturating_sub(self.queue.capacity()),
        }
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The group membership table.
    #[must_use]
    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use parley_transport::memory::{self, MemoryClient};
    use std::time::Duration;

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    async fn recv(client: &mut MemoryClient) -> ChatFrame {
        tokio::time::timeout(Duration::from_secs(2), client.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
    }

    struct Harness {
        hub: Hub,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn start() -> Self {
            let store = Arc::new(MemoryStore::new());
            let (hub, _handle) = Hub::start(HubConfig::default(), store.clone());
            Self { hub, store }
        }

        /// Connect and bind `name` by sending a broadcast and waiting for
        /// its echo. Earlier clients receive that broadcast too.
        async fn join_as(&self, name: &str, others: &mut [&mut MemoryClient]) -> MemoryClient {
            let (mut client, sink, source) = memory::channel();
            let session = self.hub.connect(Arc::new(sink));
            tokio::spawn(session.run(source));

            client.send(&ChatFrame::broadcast(name, format!("{} here", name)));
            assert_eq!(recv(&mut client).await.username, name);
            for other in others.iter_mut() {
                assert_eq!(recv(other).await.username, name);
            }
            client
        }
    }

    #[tokio::test]
    async fn test_group_scenario() {
        let h = Harness::start();
        let mut a = h.join_as("a", &mut []).await;
        let mut b = h.join_as("b", &mut [&mut a]).await;
        let mut c = h.join_as("c", &mut [&mut a, &mut b]).await;

        a.send(&ChatFrame::join_group("a", "lobby"));
        b.send(&ChatFrame::join_group("b", "lobby"));
        wait_until(|| h.hub.groups().member_count("lobby") == 2).await;

        a.send(&ChatFrame::group("a", "lobby", "hi"));
        for client in [&mut a, &mut b] {
            let frame = recv(client).await;
            assert_eq!(frame.message, "hi");
            assert_eq!(frame.username, "a");
            assert_eq!(frame.target_name(), Some("lobby"));
        }

        // Fence: c's next frame is the broadcast, not the group message
        a.send(&ChatFrame::broadcast("a", "fence"));
        assert_eq!(recv(&mut c).await.message, "fence");

        let history = h.hub.recent_messages(1).await.unwrap();
        assert_eq!(history[0].username, "a");
        assert_eq!(history[0].message, "fence");
        let history = h.hub.recent_messages(10).await.unwrap();
        assert!(history.iter().any(|r| r.message == "hi" && r.username == "a"));
    }

    #[tokio::test]
    async fn test_private_scenario() {
        let h = Harness::start();
        let mut a = h.join_as("a", &mut []).await;
        let mut b = h.join_as("b", &mut [&mut a]).await;
        let mut c = h.join_as("c", &mut [&mut a, &mut b]).await;

        a.send(&ChatFrame::private("a", "b", "secret"));
        assert_eq!(recv(&mut a).await.message, "secret");
        assert_eq!(recv(&mut b).await.message, "secret");

        b.send(&ChatFrame::broadcast("b", "fence"));
        assert_eq!(recv(&mut c).await.message, "fence");
    }

    #[tokio::test]
    async fn test_disconnect_vacates_group() {
        let h = Harness::start();
        let mut a = h.join_as("a", &mut []).await;
        let mut b = h.join_as("b", &mut [&mut a]).await;

        a.send(&ChatFrame::join_group("a", "lobby"));
        wait_until(|| h.hub.groups().member_count("lobby") == 1).await;

        a.disconnect();
        wait_until(|| h.hub.registry().len() == 1).await;
        assert_eq!(h.hub.active_users().users, vec!["b"]);
        assert!(h.hub.groups().exists("lobby"));
        assert_eq!(h.hub.groups().member_count("lobby"), 0);

        b.send(&ChatFrame::group("b", "lobby", "anyone?"));
        b.send(&ChatFrame::broadcast("b", "fence"));
        // The group message reached nobody, not even b
        assert_eq!(recv(&mut b).await.message, "fence");
        assert_eq!(h.store.len(), 4);
    }

    #[tokio::test]
    async fn test_join_never_delivered_or_persisted() {
        let h = Harness::start();
        let mut a = h.join_as("a", &mut []).await;
        let before = h.store.len();

        a.send(&ChatFrame::join_group("a", "lobby"));
        a.send(&ChatFrame::broadcast("a", "fence"));
        assert_eq!(recv(&mut a).await.message, "fence");
        assert_eq!(h.store.len(), before + 1);
    }

    #[tokio::test]
    async fn test_invalid_json_isolated() {
        let h = Harness::start();
        let mut a = h.join_as("a", &mut []).await;
        let mut b = h.join_as("b", &mut [&mut a]).await;
        let mut bad = h.join_as("bad", &mut [&mut a, &mut b]).await;

        bad.send_raw("this is not json");
        assert!(tokio::time::timeout(Duration::from_secs(2), bad.recv())
            .await
            .unwrap()
            .is_none());
        assert_eq!(h.hub.active_users().users, vec!["a", "b"]);

        a.send(&ChatFrame::broadcast("a", "still here"));
        assert_eq!(recv(&mut a).await.message, "still here");
        assert_eq!(recv(&mut b).await.message, "still here");
    }

    #[tokio::test]
    async fn test_typeless_frame_reaches_nobody_but_is_stored() {
        let h = Harness::start();
        let mut a = h.join_as("a", &mut []).await;
        let mut b = h.join_as("b", &mut [&mut a]).await;

        a.send_raw(r#"{"username":"a","message":"typeless"}"#);
        a.send(&ChatFrame::broadcast("a", "fence"));

        // Nothing was delivered for the typeless frame and a is still connected
        assert_eq!(recv(&mut a).await.message, "fence");
        assert_eq!(recv(&mut b).await.message, "fence");
        assert_eq!(h.hub.active_users().users, vec!["a", "b"]);

        let history = h.hub.recent_messages(10).await.unwrap();
        assert!(history.iter().any(|r| r.message == "typeless"));
    }

    #[tokio::test]
    async fn test_global_order_across_senders() {
        let h = Harness::start();
        let mut a = h.join_as("a", &mut []).await;
        let mut b = h.join_as("b", &mut [&mut a]).await;

        for i in 0..50 {
            let sender = if i % 2 == 0 { &a } else { &b };
            sender.send(&ChatFrame::broadcast("x", format!("{}", i)));
        }

        let seen_a: Vec<String> = {
            let mut v = Vec::new();
            for _ in 0..50 {
                v.push(recv(&mut a).await.message);
            }
            v
        };
        let mut seen_b = Vec::new();
        for _ in 0..50 {
            seen_b.push(recv(&mut b).await.message);
        }

        // Both recipients observe the same total order
        assert_eq!(seen_a, seen_b);
        // Per-sender order is preserved
        let evens: Vec<_> = seen_a
            .iter()
            .filter_map(|m| m.parse::<u32>().ok())
            .filter(|n| n % 2 == 0)
            .collect();
        let mut sorted = evens.clone();
        sorted.sort();
        assert_eq!(evens, sorted);
    }

    #[tokio::test]
    async fn test_stats_and_backpressure_accounting() {
        let store = Arc::new(MemoryStore::new());
        let (hub, _dispatcher) = Hub::new(HubConfig { queue_capacity: 2 }, store);
        let (client, sink, source) = memory::channel();
        let session = hub.connect(Arc::new(sink));
        let task = tokio::spawn(session.run(source));

        // No dispatcher running: two messages fill the queue, the third blocks
        for i in 0..3 {
            client.send(&ChatFrame::broadcast("a", format!("{}", i)));
        }
        wait_until(|| hub.stats().queued == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        let stats = hub.stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.groups, 0);
        task.abort();
    }
}
