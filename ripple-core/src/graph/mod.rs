//! Dependency Graph
//!
//! This module holds the graph-level building blocks shared by every reactive
//! primitive: node identity, dirty states and the flush scheduler.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent state cells, computed cells or effects
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! Edges live on the nodes themselves (see `reactive::subscriber`): every
//! source keeps weak reverse edges to its dependents, every computation keeps
//! strong forward edges to the sources it read. When a state cell changes we
//! walk the reverse edges marking nodes dirty, and the scheduler decides when
//! watched nodes get to run.
//!
//! # Design Decisions
//!
//! 1. Reverse edges are weak so that dropping the last handle to a computed
//!    cell reclaims it; nothing in the graph keeps a dependent alive.
//!
//! 2. Forward edges record the version of each dependency at read time, which
//!    lets a maybe-dirty node prove it does not need to recompute.
//!
//! 3. Pending nodes are kept in insertion order so a flush visits them in the
//!    order they were notified.

mod node;
mod scheduler;

pub use node::{DirtyState, NodeId, NodeKind};
pub use scheduler::{SchedulerState, UpdateScheduler};

pub(crate) use scheduler::DeferredWrite;
