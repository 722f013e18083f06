//! Group membership table.
//!
//! Groups are named recipient sets created on first join. They are never
//! deleted: a group whose last member leaves stays in the table, empty.

use dashmap::DashMap;
use parley_transport::ConnectionId;
use std::collections::HashSet;
use tracing::debug;

/// Group membership statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Number of known groups, including empty ones.
    pub group_count: usize,
    /// Total memberships across all groups.
    pub total_memberships: usize,
}

/// Named groups and their member connections.
#[derive(Debug, Default)]
pub struct GroupTable {
    groups: DashMap<String, HashSet<ConnectionId>>,
}

impl GroupTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a group, creating the group if needed.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn join(&self, id: ConnectionId, group: &str) -> bool {
        let added = self
            .groups
            .entry(group.to_string())
            .or_insert_with(|| {
                debug!(group = %group, "Creating new group");
                HashSet::new()
            })
            .insert(id);

        if added {
            debug!(group = %group, connection = %id, "Joined group");
        }
        added
    }

    /// Remove a connection from a group.
    ///
    /// Returns `true` if the connection was a member. The group entry is
    /// kept even when it becomes empty.
    pub fn leave(&self, id: ConnectionId, group: &str) -> bool {
        self.groups
            .get_mut(group)
            .is_some_and(|mut members| members.remove(&id))
    }

    /// Remove a connection from every group in `groups`.
    ///
    /// `groups` is the connection's own record of what it joined; the table
    /// is not scanned. Returns the number of memberships removed.
    pub fn leave_all<'a>(
        &self,
        id: ConnectionId,
        groups: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        let removed = groups
            .into_iter()
            .filter(|group| self.leave(id, group))
            .count();
        debug!(connection = %id, removed, "Left all groups");
        removed
    }

    /// Current members of a group. Unknown groups have no members.
    #[must_use]
    pub fn members(&self, group: &str) -> Vec<ConnectionId> {
        self.groups
            .get(group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check if a connection is a member of a group.
    #[must_use]
    pub fn is_member(&self, id: ConnectionId, group: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|members| members.contains(&id))
    }

    /// Check if a group has ever been joined.
    #[must_use]
    pub fn exists(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Number of members in a group.
    #[must_use]
    pub fn member_count(&self, group: &str) -> usize {
        self.groups.get(group).map(|members| members.len()).unwrap_or(0)
    }

    /// All known group names.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|e| e.key().clone()).collect()
    }

    /// Table statistics.
    #[must_use]
    pub fn stats(&self) -> GroupStats {
        GroupStats {
            group_count: self.groups.len(),
            total_memberships: self.groups.iter().map(|e| e.len()).sum(),
        }
    }
}
