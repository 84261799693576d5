//! Named subset of a namespace's connections

use crate::namespace::Namespace;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;

/// What happens to a room once its last member leaves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoomPolicy {
    /// Deleted synchronously by the leave that emptied it
    #[default]
    Immediate,
    /// Deleted if still empty after the grace period
    Grace(Duration),
    /// Kept until explicitly deleted
    Persistent,
}

impl RoomPolicy {
    /// Policy from an optional grace period in seconds
    pub fn from_grace_secs(secs: Option<u64>) -> Self {
        match secs {
            None | Some(0) => Self::Immediate,
            Some(secs) => Self::Grace(Duration::from_secs(secs)),
        }
    }
}

/// A room
///
/// Membership is changed through [`Namespace::join_room`] and
/// [`Namespace::leave_room`], which keep each connection's room set in
/// step with the member set held here.
pub struct Room {
    name: String,
    namespace: Weak<Namespace>,
    policy: RoomPolicy,
    members: RwLock<HashSet<String>>,
    /// Bumped each time the room empties; a grace timer only reaps the
    /// generation it was started for
    emptied: AtomicU64,
}

impl Room {
    pub(crate) fn new(name: impl Into<String>, namespace: Weak<Namespace>, policy: RoomPolicy) -> Self {
        Self {
            name: name.into(),
            namespace,
            policy,
            members: RwLock::new(HashSet::new()),
            emptied: AtomicU64::new(0),
        }
    }

    /// Get the room name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the deletion policy
    pub fn policy(&self) -> RoomPolicy {
        self.policy
    }

    /// Add a member; `false` if already present
    pub(crate) fn add(&self, conn_id: &str) -> bool {
        self.members.write().insert(conn_id.to_string())
    }

    /// Remove a member; `false` if absent
    pub(crate) fn remove(&self, conn_id: &str) -> bool {
        self.members.write().remove(conn_id)
    }

    /// Check if the room has no members
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// Check if a connection is a member
    pub fn contains(&self, conn_id: &str) -> bool {
        self.members.read().contains(conn_id)
    }

    /// Snapshot of member connection IDs
    pub fn members(&self) -> Vec<String> {
        let mut members: Vec<String> = self.members.read().iter().cloned().collect();
        members.sort();
        members
    }

    pub(crate) fn mark_emptied(&self) -> u64 {
        self.emptied.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn emptied_generation(&self) -> u64 {
        self.emptied.load(Ordering::Acquire)
    }

    /// Clear membership, returning the former members
    pub(crate) fn destroy(&self) -> Vec<String> {
        self.members.write().drain().collect()
    }

    /// Deliver to every current member except `exclude`, on this node only
    ///
    /// Use [`Namespace::to_room`] to reach members on other nodes too.
    pub async fn broadcast(&self, event: &str, data: &Value, exclude: Option<&str>) -> usize {
        let Some(namespace) = self.namespace.upgrade() else {
            return 0;
        };

        let recipients: Vec<String> = self
            .members
            .read()
            .iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .cloned()
            .collect();

        namespace.deliver_to(&recipients, event, data).await
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("members", &self.len())
            .finish()
    }
}
