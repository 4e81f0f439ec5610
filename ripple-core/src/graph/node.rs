//! Graph Nodes
//!
//! Identity and state types shared by every node in the dependency graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Unique identifier for a node in the dependency graph.
///
/// Two cell handles refer to the same cell exactly when their ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A state cell. These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A computed cell. These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An effect. These are leaves of the graph.
    Effect,
}

/// Dirty state of a node.
///
/// States are ordered: marking a node only ever raises its state, and only
/// a successful evaluation lowers it back to `Clean`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// The node might need to recompute. One of its dependencies changed,
    /// but we have not yet verified if the actual input values are different.
    MaybeDirty,

    /// The node definitely needs to recompute. Its inputs have changed.
    Dirty,
}

impl DirtyState {
    /// The higher of the two states.
    pub fn escalate(self, to: DirtyState) -> DirtyState {
        self.max(to)
    }

    pub fn is_clean(self) -> bool {
        self == DirtyState::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::next();
        let id2 = NodeId::next();
        assert_ne!(id1, id2);
        assert!(id2.raw() > id1.raw());
    }

    #[test]
    fn dirty_state_only_escalates() {
        let state = DirtyState::Clean;

        let state = state.escalate(DirtyState::MaybeDirty);
        assert_eq!(state, DirtyState::MaybeDirty);

        let state = state.escalate(DirtyState::Dirty);
        assert_eq!(state, DirtyState::Dirty);

        // Maybe-dirty never downgrades a dirty node
        let state = state.escalate(DirtyState::MaybeDirty);
        assert_eq!(state, DirtyState::Dirty);
        assert!(!state.is_clean());
    }

    #[test]
    fn display_uses_hash_prefix() {
        let id = NodeId(7);
        assert_eq!(id.to_string(), "#7");
    }
}
