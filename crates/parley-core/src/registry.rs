//! Connection registry.
//!
//! The registry is the authoritative set of live connections. Each entry
//! holds the connection's write half and its display name, which is bound at
//! most once. Display names are not unique: several connections may share
//! one, and lookups by name return all of them.

use parking_lot::RwLock;
use parley_transport::{ConnectionId, FrameSink};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A connection selected for delivery.
#[derive(Clone)]
pub struct Recipient {
    /// Connection handle.
    pub id: ConnectionId,
    /// Write half of the connection.
    pub sink: Arc<dyn FrameSink>,
}

impl std::fmt::Debug for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recipient").field("id", &self.id).finish()
    }
}

struct Entry {
    display_name: Option<String>,
    sink: Arc<dyn FrameSink>,
}

/// The set of live connections and their bound display names.
#[derive(Default)]
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, Entry>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection with no display name.
    pub fn register(&self, sink: Arc<dyn FrameSink>) -> ConnectionId {
        let id = ConnectionId::generate();
        self.connections.write().insert(
            id,
            Entry {
                display_name: None,
                sink,
            },
        );
        debug!(connection = %id, "Connection registered");
        id
    }

    /// Bind a display name to a connection.
    ///
    /// Returns `true` only if the name was bound by this call. An empty name,
    /// an already bound connection, or an unknown handle leave the registry
    /// untouched.
    pub fn bind_identity(&self, id: ConnectionId, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        let mut connections = self.connections.write();
        match connections.get_mut(&id) {
            Some(entry) if entry.display_name.is_none() => {
                entry.display_name = Some(name.to_string());
                debug!(connection = %id, username = %name, "Identity bound");
                true
            }
            _ => false,
        }
    }

    /// Remove a connection, returning its write half if it was present.
    ///
    /// The caller is responsible for removing the connection from every
    /// group it joined.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<dyn FrameSink>> {
        let removed = self.connections.write().remove(&id);
        if removed.is_some() {
            debug!(connection = %id, "Connection unregistered");
        }
        removed.map(|entry| entry.sink)
    }

    /// All bound display names, sorted, taken under a single read lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .connections
            .read()
            .values()
            .filter_map(|entry| entry.display_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every connection whose bound name equals `name`.
    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Vec<Recipient> {
        self.lookup_by_names(&[name])
    }

    /// Every connection whose bound name equals any of `names`.
    ///
    /// Each matching connection appears once even if it matches several
    /// names.
    #[must_use]
    pub fn lookup_by_names(&self, names: &[&str]) -> Vec<Recipient> {
        self.connections
            .read()
            .iter()
            .filter(|(_, entry)| {
                entry
                    .display_name
                    .as_deref()
                    .is_some_and(|bound| names.contains(&bound))
            })
            .map(|(id, entry)| Recipient {
                id: *id,
                sink: Arc::clone(&entry.sink),
            })
            .collect()
    }

    /// Every registered connection.
    #[must_use]
    pub fn all(&self) -> Vec<Recipient> {
        self.connections
            .read()
            .iter()
            .map(|(id, entry)| Recipient {
                id: *id,
                sink: Arc::clone(&entry.sink),
            })
            .collect()
    }

    /// Resolve handles to recipients under one read lock.
    ///
    /// Returns the live recipients and the handles that are no longer
    /// registered.
    #[must_use]
    pub fn resolve(&self, ids: &[ConnectionId]) -> (Vec<Recipient>, Vec<ConnectionId>) {
        let connections = self.connections.read();
        let mut live = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();

        for id in ids {
            match connections.get(id) {
                Some(entry) => live.push(Recipient {
                    id: *id,
                    sink: Arc::clone(&entry.sink),
                }),
                None => missing.push(*id),
            }
        }

        (live, missing)
    }

    /// The write half of a connection.
    #[must_use]
    pub fn sink(&self, id: ConnectionId) -> Option<Arc<dyn FrameSink>> {
        self.connections
            .read()
            .get(&id)
            .map(|entry| Arc::clone(&entry.sink))
    }

    /// The bound display name of a connection.
    #[must_use]
    pub fn display_name(&self, id: ConnectionId) -> Option<String> {
        self.connections
            .read()
            .get(&id)
            .and_then(|entry| entry.display_name.clone())
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Number of registered connections, bound or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Check if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_transport::memory;

    fn sink() -> Arc<dyn FrameSink> {
        let (_client, sink, _source) = memory::channel();
        Arc::new(sink)
    }

    #[test]
    fn test_register_unregister() {
        let registry = Registry::new();
        let id = registry.register(sink());

        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);
        assert!(registry.display_name(id).is_none());

        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bind_identity_once() {
        let registry = Registry::new();
        let id = registry.register(sink());

        assert!(!registry.bind_identity(id, ""));
        assert!(registry.bind_identity(id, "alice"));
        assert!(!registry.bind_identity(id, "mallory"));
        assert_eq!(registry.display_name(id).as_deref(), Some("alice"));

        let unknown = ConnectionId::generate();
        assert!(!registry.bind_identity(unknown, "bob"));
    }

    #[test]
    fn test_snapshot_only_bound_names() {
        let registry = Registry::new();
        let a = registry.register(sink());
        let b = registry.register(sink());
        let _unbound = registry.register(sink());

        registry.bind_identity(b, "bob");
        registry.bind_identity(a, "alice");

        assert_eq!(registry.snapshot(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_lookup_matches_duplicates() {
        let registry = Registry::new();
        let a1 = registry.register(sink());
        let a2 = registry.register(sink());
        let b = registry.register(sink());
        registry.bind_identity(a1, "alice");
        registry.bind_identity(a2, "alice");
        registry.bind_identity(b, "bob");

        let mut ids: Vec<_> = registry.lookup_by_name("alice").iter().map(|r| r.id).collect();
        ids.sort();
        assert_eq!(ids, vec![a1, a2]);

        assert!(registry.lookup_by_name("carol").is_empty());
        assert!(registry.lookup_by_name("").is_empty());

        // A connection matching both names is returned once
        assert_eq!(registry.lookup_by_names(&["bob", "bob"]).len(), 1);
        assert_eq!(registry.lookup_by_names(&["alice", "bob"]).len(), 3);
    }

    #[test]
    fn test_resolve_reports_missing() {
        let registry = Registry::new();
        let a = registry.register(sink());
        let b = registry.register(sink());
        registry.unregister(b);

        let (live, missing) = registry.resolve(&[a, b]);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, a);
        assert_eq!(missing, vec![b]);
    }
}
