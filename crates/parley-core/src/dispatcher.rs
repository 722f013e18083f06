//! The dispatcher.
//!
//! A single task drains the bounded dispatch queue in FIFO order and performs
//! every delivery. Because there is exactly one consumer, the order in which
//! messages are enqueued is the order in which every recipient sees them.

use crate::groups::GroupTable;
use crate::metrics;
use crate::registry::{Recipient, Registry};
use parley_protocol::{codec, ChatFrame, MessageKind};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections selected for delivery.
    pub recipients: usize,
    /// Successful writes.
    pub delivered: usize,
    /// Connections evicted after a failed write.
    pub evicted: usize,
}

/// Single consumer of the dispatch queue.
pub struct Dispatcher {
    queue: mpsc::Receiver<ChatFrame>,
    registry: Arc<Registry>,
    groups: Arc<GroupTable>,
}

impl Dispatcher {
    pub(crate) fn new(
        queue: mpsc::Receiver<ChatFrame>,
        registry: Arc<Registry>,
        groups: Arc<GroupTable>,
    ) -> Self {
        Self {
            queue,
            registry,
            groups,
        }
    }

    /// Drain the queue until every sender is dropped.
    pub async fn run(mut self) {
        info!("Dispatcher started");

        while let Some(frame) = self.queue.recv().await {
            let start = Instant::now();
            let report = self.dispatch(&frame).await;
            metrics::record_dispatch(
                frame.kind.as_str(),
                report.delivered,
                start.elapsed().as_secs_f64(),
            );

            debug!(
                kind = %frame.kind,
                from = %frame.username,
                target = frame.target_name().unwrap_or(""),
                recipients = report.recipients,
                delivered = report.delivered,
                evicted = report.evicted,
                "Dispatched"
            );
        }

        info!("Dispatch queue closed, dispatcher stopping");
    }

    /// Resolve the recipients of one message and write it to each of them.
    ///
    /// A failed write evicts that connection from the registry and closes its
    /// transport; delivery to the remaining recipients continues.
    pub async fn dispatch(&self, frame: &ChatFrame) -> DeliveryReport {
        let recipients = self.resolve(frame);
        let mut report = DeliveryReport {
            recipients: recipients.len(),
            ..DeliveryReport::default()
        };

        if recipients.is_empty() {
            return report;
        }

        let text = match codec::encode(frame) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode outbound frame");
                return report;
            }
        };

        for recipient in recipients {
            match recipient.sink.send_text(&text).await {
                Ok(()) => {
                    trace!(connection = %recipient.id, "Delivered");
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(
                        connection = %recipient.id,
                        error = %e,
                        "Write failed, evicting connection"
                    );
                    self.evict(recipient).await;
                    report.evicted += 1;
                }
            }
        }

        report
    }

    /// Select the recipients of a message. No lock is held once this returns.
    fn resolve(&self, frame: &ChatFrame) -> Vec<Recipient> {
        match frame.kind {
            MessageKind::Broadcast => self.registry.all(),

            MessageKind::Private => match frame.target_name() {
                Some(target) => self
                    .registry
                    .lookup_by_names(&[target, frame.username.as_str()]),
                None => self.registry.lookup_by_name(&frame.username),
            },

            MessageKind::Group => {
                let Some(group) = frame.target_name() else {
                    return Vec::new();
                };

                let members = self.groups.members(group);
                let (live, stale) = self.registry.resolve(&members);

                // Members evicted by an earlier failed write are reaped here
                for id in stale {
                    if self.groups.leave(id, group) {
                        debug!(connection = %id, group = %group, "Reaped stale group member");
                    }
                }

                live
            }

            MessageKind::JoinGroup => {
                warn!("join_group frame reached the dispatcher, ignoring");
                Vec::new()
            }

            MessageKind::Unknown => Vec::new(),
        }
    }

    async fn evict(&self, recipient: Recipient) {
        self.registry.unregister(recipient.id);
        metrics::record_eviction();

        if let Err(e) = recipient.sink.close().await {
            debug!(connection = %recipient.id, error = %e, "Close after failed write");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_transport::memory::{self, MemoryClient};

    struct Fixture {
        registry: Arc<Registry>,
        groups: Arc<GroupTable>,
        dispatcher: Dispatcher,
        _tx: mpsc::Sender<ChatFrame>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(Registry::new());
        let groups = Arc::new(GroupTable::new());
        let (tx, rx) = mpsc::channel(8);
        let dispatcher = Dispatcher::new(rx, Arc::clone(&registry), Arc::clone(&groups));
        Fixture {
            registry,
            groups,
            dispatcher,
            _tx: tx,
        }
    }

    fn connect(registry: &Registry, name: &str) -> (MemoryClient, parley_transport::ConnectionId) {
        let (client, sink, _source) = memory::channel();
        let id = registry.register(Arc::new(sink));
        registry.bind_identity(id, name);
        (client, id)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let f = fixture();
        let (mut a, _) = connect(&f.registry, "a");
        let (mut b, _) = connect(&f.registry, "b");
        let (mut anon, _) = connect(&f.registry, "");

        let report = f.dispatcher.dispatch(&ChatFrame::broadcast("a", "hello")).await;
        assert_eq!(report.delivered, 3);

        for client in [&mut a, &mut b, &mut anon] {
            assert_eq!(client.try_recv().unwrap().message, "hello");
        }
    }

    #[tokio::test]
    async fn test_private_reaches_sender_and_target_only() {
        let f = fixture();
        let (mut a, _) = connect(&f.registry, "a");
        let (mut b, _) = connect(&f.registry, "b");
        let (mut c, _) = connect(&f.registry, "c");

        let report = f
            .dispatcher
            .dispatch(&ChatFrame::private("a", "b", "secret"))
            .await;
        assert_eq!(report.delivered, 2);
        assert_eq!(a.try_recv().unwrap().message, "secret");
        assert_eq!(b.try_recv().unwrap().message, "secret");
        assert!(c.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_private_to_self_delivered_once() {
        let f = fixture();
        let (mut a, _) = connect(&f.registry, "a");

        let report = f.dispatcher.dispatch(&ChatFrame::private("a", "a", "note")).await;
        assert_eq!(report.delivered, 1);
        assert!(a.try_recv().is_some());
        assert!(a.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_private_reaches_duplicate_names() {
        let f = fixture();
        let (_a, _) = connect(&f.registry, "a");
        let (mut b1, _) = connect(&f.registry, "b");
        let (mut b2, _) = connect(&f.registry, "b");

        let report = f.dispatcher.dispatch(&ChatFrame::private("a", "b", "hi")).await;
        assert_eq!(report.delivered, 3);
        assert!(b1.try_recv().is_some());
        assert!(b2.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_group_reaches_members_only() {
        let f = fixture();
        let (mut a, a_id) = connect(&f.registry, "a");
        let (mut b, b_id) = connect(&f.registry, "b");
        let (mut c, _) = connect(&f.registry, "c");
        f.groups.join(a_id, "lobby");
        f.groups.join(b_id, "lobby");

        let report = f
            .dispatcher
            .dispatch(&ChatFrame::group("a", "lobby", "hi"))
            .await;
        assert_eq!(report.delivered, 2);
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_some());
        assert!(c.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_routing_miss_is_not_an_error() {
        let f = fixture();
        let (mut a, _) = connect(&f.registry, "a");

        let cases = [
            ChatFrame::group("a", "nowhere", "x"),
            ChatFrame::group("a", "", "x"),
            ChatFrame::join_group("a", "lobby"),
            ChatFrame::new(MessageKind::Unknown, "a", "typeless"),
        ];
        for frame in &cases {
            assert_eq!(f.dispatcher.dispatch(frame).await, DeliveryReport::default());
        }
        assert!(a.try_recv().is_none());
        assert!(!f.groups.exists("lobby"));
    }

    #[tokio::test]
    async fn test_failed_write_evicts_and_continues() {
        let f = fixture();
        let (broken, broken_id) = connect(&f.registry, "x");
        let (mut ok, _) = connect(&f.registry, "y");
        broken.break_writes();

        let report = f.dispatcher.dispatch(&ChatFrame::broadcast("y", "hi")).await;
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, 1);
        assert!(!f.registry.contains(broken_id));
        assert_eq!(ok.try_recv().unwrap().message, "hi");

        // The next broadcast no longer targets the evicted connection
        let report = f.dispatcher.dispatch(&ChatFrame::broadcast("y", "again")).await;
        assert_eq!(report.recipients, 1);
    }

    #[tokio::test]
    async fn test_stale_group_members_are_reaped() {
        let f = fixture();
        let (broken, broken_id) = connect(&f.registry, "x");
        let (_ok, ok_id) = connect(&f.registry, "y");
        f.groups.join(broken_id, "lobby");
        f.groups.join(ok_id, "lobby");
        broken.break_writes();

        // Evicted from the registry by the broadcast, still listed in the group
        f.dispatcher.dispatch(&ChatFrame::broadcast("y", "hi")).await;
        assert!(f.groups.is_member(broken_id, "lobby"));

        let report = f.dispatcher.dispatch(&ChatFrame::group("y", "lobby", "hi")).await;
        assert_eq!(report.recipients, 1);
        assert!(!f.groups.is_member(broken_id, "lobby"));
    }

    #[tokio::test]
    async fn test_run_preserves_queue_order() {
        let registry = Arc::new(Registry::new());
        let groups = Arc::new(GroupTable::new());
        let (tx, rx) = mpsc::channel(4);
        let dispatcher = Dispatcher::new(rx, Arc::clone(&registry), groups);
        let (mut a, _) = connect(&registry, "a");

        let handle = tokio::spawn(dispatcher.run());
        for i in 0..20 {
            tx.send(ChatFrame::broadcast("a", format!("m{}", i))).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        for i in 0..20 {
            assert_eq!(a.recv().await.unwrap().message, format!("m{}", i));
        }
    }
}
