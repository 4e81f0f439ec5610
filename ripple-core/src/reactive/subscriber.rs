//! Subscriber types for the reactive system.
//!
//! The graph is made of two roles:
//!
//! - A [`Source`] is anything a computation can read: state cells and
//!   computed cells. Sources own the reverse edges to their dependents.
//! - A [`Subscriber`] is anything that is told when a source changes:
//!   computed cells and effects.
//!
//! Computed cells play both roles.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::Result;
use crate::graph::{DirtyState, NodeId, NodeKind};

pub(crate) trait Source {
    fn id(&self) -> NodeId;

    /// Monotonic version, bumped whenever the value changes.
    fn version(&self) -> u64;

    /// Bring the cached value up to date. A no-op for state cells.
    fn refresh(&self) -> Result<()>;

    fn dependents(&self) -> &Dependents;
}

pub(crate) trait Subscriber {
    fn id(&self) -> NodeId;

    fn kind(&self) -> NodeKind;

    /// Raise the dirty state after a dependency changed.
    fn mark(&self, state: DirtyState);

    /// Flush entry point: recompute or rerun if stale.
    fn run(&self) -> Result<()>;
}

/// A forward edge: a source read during an evaluation, and its version at
/// the time of the read.
#[derive(Clone)]
pub(crate) struct Dependency {
    pub(crate) source: Rc<dyn Source>,
    pub(crate) version: u64,
}

impl Dependency {
    /// Whether the source moved on since it was read. Refreshes the source
    /// first so computed dependencies are judged on their current value.
    pub(crate) fn changed(&self) -> bool {
        self.source.refresh().is_err() || self.source.version() != self.version
    }
}

pub(crate) type Dependencies = SmallVec<[Dependency; 4]>;

/// Reverse edges from a source to the subscribers that read it.
#[derive(Default)]
pub(crate) struct Dependents {
    subscribers: RefCell<IndexMap<NodeId, Weak<dyn Subscriber>>>,
}

impl Dependents {
    pub(crate) fn insert(&self, id: NodeId, subscriber: Weak<dyn Subscriber>) {
        self.subscribers.borrow_mut().insert(id, subscriber);
    }

    pub(crate) fn remove(&self, id: NodeId) {
        self.subscribers.borrow_mut().shift_remove(&id);
    }

    /// Number of recorded reverse edges, dead ones included.
    pub(crate) fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Mark every live subscriber. Dead entries are pruned on the way.
    pub(crate) fn mark_all(&self, state: DirtyState) {
        // Collect first: marking may re-enter and touch these edges.
        let live: Vec<Rc<dyn Subscriber>> = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.retain(|_, weak| weak.strong_count() > 0);
            subscribers.values().filter_map(Weak::upgrade).collect()
        };
        for subscriber in live {
            tracing::trace!(node = %subscriber.id(), ?state, "marking dependent");
            subscriber.mark(state);
        }
    }
}

/// Swap the forward edges of `subscriber` for `next`, keeping reverse edges in
/// sync: dropped sources forget the subscriber, new ones learn about it.
pub(crate) fn rewire(
    id: NodeId,
    subscriber: &Weak<dyn Subscriber>,
    current: &RefCell<Dependencies>,
    next: Dependencies,
) {
    let previous = std::mem::replace(&mut *current.borrow_mut(), next);
    let current = current.borrow();

    for old in previous.iter() {
        let still_read = current.iter().any(|dep| dep.source.id() == old.source.id());
        if !still_read {
            old.source.dependents().remove(id);
        }
    }
    for dep in current.iter() {
        dep.source.dependents().insert(id, subscriber.clone());
    }
}

/// Drop every forward edge of `id`.
pub(crate) fn detach(id: NodeId, current: &RefCell<Dependencies>) {
    let previous = std::mem::take(&mut *current.borrow_mut());
    for dep in previous {
        dep.source.dependents().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Recorder {
        id: NodeId,
        state: Cell<DirtyState>,
    }

    impl Subscriber for Recorder {
        fn id(&self) -> NodeId {
            self.id
        }

        fn kind(&self) -> NodeKind {
            NodeKind::Effect
        }

        fn mark(&self, state: DirtyState) {
            self.state.set(self.state.get().escalate(state));
        }

        fn run(&self) -> Result<()> {
            self.state.set(DirtyState::Clean);
            Ok(())
        }
    }

    fn recorder() -> Rc<Recorder> {
        Rc::new(Recorder {
            id: NodeId::next(),
            state: Cell::new(DirtyState::Clean),
        })
    }

    #[test]
    fn mark_all_reaches_live_subscribers() {
        let dependents = Dependents::default();
        let a = recorder();
        let b = recorder();

        let weak_a: Weak<dyn Subscriber> = Rc::downgrade(&a) as Weak<dyn Subscriber>;
        let weak_b: Weak<dyn Subscriber> = Rc::downgrade(&b) as Weak<dyn Subscriber>;
        dependents.insert(a.id, weak_a);
        dependents.insert(b.id, weak_b);
        assert_eq!(dependents.len(), 2);

        dependents.mark_all(DirtyState::Dirty);
        assert_eq!(a.state.get(), DirtyState::Dirty);
        assert_eq!(b.state.get(), DirtyState::Dirty);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let dependents = Dependents::default();
        let a = recorder();
        let id = a.id;
        let weak: Weak<dyn Subscriber> = Rc::downgrade(&a) as Weak<dyn Subscriber>;
        dependents.insert(id, weak);

        drop(a);
        assert_eq!(dependents.len(), 1);

        // Marking a dead edge is harmless
        dependents.mark_all(DirtyState::Dirty);
        assert_eq!(dependents.len(), 0);
    }

    #[test]
    fn remove_forgets_subscriber() {
        let dependents = Dependents::default();
        let a = recorder();
        let weak: Weak<dyn Subscriber> = Rc::downgrade(&a) as Weak<dyn Subscriber>;
        dependents.insert(a.id, weak);

        dependents.remove(a.id);
        dependents.mark_all(DirtyState::Dirty);
        assert_eq!(a.state.get(), DirtyState::Clean);
    }
}
