//! Signal Implementation
//!
//! A Signal is the state cell of the graph: the fundamental reactive
//! primitive. It holds a value and tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (computed/effect), the
//!    signal is recorded as a dependency of that context.
//!
//! 2. When a signal's value changes, direct dependents are marked dirty and
//!    the scheduler is asked for a flush. The write itself is synchronous;
//!    only the reaction to it is deferred.
//!
//! 3. Writing a value equal to the current one (per the signal's equality)
//!    is a no-op: nothing is marked, nothing reruns.
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A unique ID (8 bytes)
//! - The value behind an `Rc`, so snapshots can be compared by identity
//! - The initial value, kept for `clear()`
//! - Weak reverse edges to dependents (grows with number of dependents)

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::options::{CellOptions, EqualsFn};
use super::runtime::RuntimeInner;
use super::subscriber::{Dependents, Source};
use crate::error::Result;
use crate::graph::{DirtyState, NodeId};

pub(crate) struct SignalNode<T: 'static> {
    id: NodeId,
    runtime: Weak<RuntimeInner>,
    value: RefCell<Rc<T>>,
    initial: Rc<T>,
    version: Cell<u64>,
    equals: Option<EqualsFn<T>>,
    label: Option<String>,
    dependents: Dependents,
}

impl<T: 'static> Source for SignalNode<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.get()
    }

    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn dependents(&self) -> &Dependents {
        &self.dependents
    }
}

/// A reactive state cell holding a value of type T.
///
/// Cloning a `Signal` creates a new handle to the **same** cell.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies dependents)
/// count.set(5);
/// ```
pub struct Signal<T: 'static> {
    node: Rc<SignalNode<T>>,
}

impl<T: 'static> Signal<T> {
    pub(crate) fn new_in(runtime: &Rc<RuntimeInner>, value: T, options: CellOptions<T>) -> Self {
        let initial = Rc::new(value);
        let node = Rc::new(SignalNode {
            id: NodeId::next(),
            runtime: Rc::downgrade(runtime),
            value: RefCell::new(initial.clone()),
            initial,
            version: Cell::new(0),
            equals: options.equals,
            label: options.label,
            dependents: Dependents::default(),
        });
        tracing::trace!(node = %node.id, label = ?node.label, "signal created");
        Self { node }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// Debug label given at creation, if any.
    pub fn label(&self) -> Option<&str> {
        self.node.label.as_deref()
    }

    /// Version counter, bumped on every effective write.
    pub fn version(&self) -> u64 {
        self.node.version.get()
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a dependent.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.get_untracked()
    }

    /// Get the current value as a shared reference-counted snapshot.
    ///
    /// The returned `Rc` stays pointer-equal across reads until the next
    /// effective write.
    pub fn get_rc(&self) -> Rc<T> {
        self.track();
        self.get_rc_untracked()
    }

    /// Borrow the current value.
    ///
    /// Writing to this signal from inside `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.node.value.borrow())
    }

    /// Get the current value without tracking dependencies.
    ///
    /// Use this when you need to read the value without establishing
    /// a reactive dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        (**self.node.value.borrow()).clone()
    }

    pub fn get_rc_untracked(&self) -> Rc<T> {
        self.node.value.borrow().clone()
    }

    /// Set a new value and notify dependents.
    ///
    /// Dependents are marked immediately; effects rerun on the next flush.
    pub fn set(&self, value: T) {
        self.replace(Rc::new(value));
    }

    /// Update the value using a function.
    ///
    /// This is useful for updates that depend on the current value. `f` sees
    /// a snapshot, so it may itself write to this signal; its result wins.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get_rc_untracked();
        self.set(f(&current));
    }

    /// Reset to the value the signal was created with.
    ///
    /// This is a reset, not a destroy: the signal stays fully usable. The
    /// cell is also dropped from its runtime's snapshot table.
    pub fn clear(&self) {
        if let Some(runtime) = self.node.runtime.upgrade() {
            runtime.forget_snapshot(self.node.id);
        }
        self.replace(self.node.initial.clone());
    }

    /// Number of computations recorded as reading this cell.
    pub fn subscriber_count(&self) -> usize {
        self.node.dependents.len()
    }

    /// Whether both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    fn track(&self) {
        if let Some(runtime) = self.node.runtime.upgrade() {
            runtime.track(self.node.clone());
        }
    }

    fn replace(&self, next: Rc<T>) {
        let node = &self.node;
        {
            let current = node.value.borrow();
            let unchanged = Rc::ptr_eq(&current, &next)
                || node.equals.as_ref().is_some_and(|eq| eq(&current, &next));
            if unchanged {
                tracing::trace!(node = %node.id, "write skipped, value unchanged");
                return;
            }
        }

        *node.value.borrow_mut() = next;
        node.version.set(node.version.get() + 1);
        tracing::trace!(node = %node.id, version = node.version.get(), "signal written");

        node.dependents.mark_all(DirtyState::Dirty);
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.node.id)
            .field("value", &self.node.value.borrow())
            .field("version", &self.version())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
