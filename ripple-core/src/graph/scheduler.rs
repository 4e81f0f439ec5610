//! Update Scheduler
//!
//! The scheduler decides *when* pending nodes are visited. It is a two-state
//! machine:
//!
//! ```text
//!            first notification
//!   Idle  ─────────────────────────▶  FlushScheduled
//!    ▲                                      │
//!    └──────────── flush snapshot ◀─────────┘
//! ```
//!
//! # Algorithm
//!
//! 1. A write marks dependents; every watched node reached is enqueued in the
//!    pending set (insertion ordered, deduplicated).
//! 2. The first enqueue since the last flush moves the scheduler to
//!    `FlushScheduled` and tells the caller to queue exactly one microtask.
//! 3. When the flush runs, deferred writes are applied first, then the pending
//!    set is taken as a snapshot and the state returns to `Idle`.
//! 4. Nodes enqueued while the snapshot is being visited land in a fresh
//!    pending set and schedule the next flush, so one flush never recurses
//!    into itself.
//!
//! The scheduler itself never runs consumer code; the runtime drives it.

use std::collections::VecDeque;

use indexmap::IndexSet;
use serde::Serialize;

use super::node::NodeId;

/// A write through a writable computed, applied at the start of a flush.
pub(crate) type DeferredWrite = Box<dyn FnOnce()>;

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Nothing pending, no microtask queued.
    Idle,

    /// A microtask has been queued and will flush the pending set.
    FlushScheduled,
}

/// Pending-set bookkeeping for the flush state machine.
pub struct UpdateScheduler {
    state: SchedulerState,

    /// Watched nodes waiting for the next flush, in notification order.
    pending: IndexSet<NodeId>,

    /// Writes deferred until the next flush.
    deferred: VecDeque<DeferredWrite>,

    /// Set while a flush is visiting its snapshot.
    flushing: bool,

    flush_count: u64,
    microtasks_queued: u64,
}

impl UpdateScheduler {
    /// Create a new idle scheduler.
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
            pending: IndexSet::new(),
            deferred: VecDeque::new(),
            flushing: false,
            flush_count: 0,
            microtasks_queued: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Add a node to the pending set.
    ///
    /// Returns `true` when the caller must queue a flush microtask.
    pub fn enqueue(&mut self, node_id: NodeId) -> bool {
        self.pending.insert(node_id);
        self.request_flush()
    }

    /// Queue a write to be applied at the start of the next flush.
    ///
    /// Returns `true` when the caller must queue a flush microtask.
    pub(crate) fn defer(&mut self, write: DeferredWrite) -> bool {
        self.deferred.push_back(write);
        self.request_flush()
    }

    fn request_flush(&mut self) -> bool {
        match self.state {
            SchedulerState::Idle => {
                self.state = SchedulerState::FlushScheduled;
                self.microtasks_queued += 1;
                true
            }
            SchedulerState::FlushScheduled => false,
        }
    }

    /// Start a flush. Returns `false` if a flush is already in progress.
    pub fn begin_flush(&mut self) -> bool {
        if self.flushing {
            return false;
        }
        self.flushing = true;
        self.flush_count += 1;
        true
    }

    /// Pop the next deferred write. Writes deferred while draining are
    /// picked up by the same loop.
    pub(crate) fn next_deferred(&mut self) -> Option<DeferredWrite> {
        self.deferred.pop_front()
    }

    /// Take the pending set as this flush's snapshot and return to `Idle`.
    pub fn take_pending(&mut self) -> Vec<NodeId> {
        self.state = SchedulerState::Idle;
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    /// Finish the current flush.
    pub fn end_flush(&mut self) {
        self.flushing = false;
    }

    /// Drop a node from the pending set (used when it is unwatched).
    pub fn remove(&mut self, node_id: NodeId) {
        self.pending.shift_remove(&node_id);
    }

    pub fn is_pending(&self, node_id: NodeId) -> bool {
        self.pending.contains(&node_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// True when nothing is pending and no flush is scheduled.
    pub fn is_idle(&self) -> bool {
        self.state == SchedulerState::Idle && self.pending.is_empty() && self.deferred.is_empty()
    }

    /// Number of flushes started so far.
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    /// Number of Idle → FlushScheduled transitions so far.
    pub fn microtasks_queued(&self) -> u64 {
        self.microtasks_queued
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}
