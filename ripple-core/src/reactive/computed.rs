//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computed Cells Work
//!
//! 1. Creating a computed runs nothing. On first access, it runs its getter
//!    and caches the result along with the cells it read.
//!
//! 2. When accessed again, if no dependencies have changed, returns the cached
//!    value (the very same `Rc`).
//!
//! 3. When a direct dependency changes, the computed is marked `Dirty`; when
//!    something further upstream changes it is marked `MaybeDirty`.
//!
//! 4. On next access, a `MaybeDirty` computed re-checks its inputs in read
//!    order (refreshing computed inputs first) and compares versions.
//!
//! 5. If an input moved, recompute. Otherwise, mark clean and return cache.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 computed cells depend on it
//! - Only the ones actually read will recompute
//! - Cells that are never read stay dirty (no wasted work)
//!
//! # Failure Modes
//!
//! A getter error propagates to the reader. Nothing is cached, the cell stays
//! dirty and the next read retries.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use super::options::{CellOptions, EqualsFn};
use super::runtime::RuntimeInner;
use super::subscriber::{self, Dependencies, Dependency, Dependents, Source, Subscriber};
use crate::error::{BoxError, ReactiveError, Result};
use crate::graph::{DirtyState, NodeId, NodeKind};

pub(crate) type Getter<T> = Box<dyn Fn() -> std::result::Result<T, BoxError>>;

pub(crate) struct ComputedNode<T: 'static> {
    id: NodeId,
    this: Weak<ComputedNode<T>>,
    runtime: Weak<RuntimeInner>,

    /// The computation function.
    getter: Getter<T>,

    /// The cached value (None if never computed).
    value: RefCell<Option<Rc<T>>>,

    state: Cell<DirtyState>,

    /// Set when the last evaluation failed.
    errored: Cell<bool>,

    version: Cell<u64>,
    evaluations: Cell<u64>,

    /// Cells read during the last evaluation, with the versions seen.
    sources: RefCell<Dependencies>,

    /// Computations that read this cell.
    dependents: Dependents,

    equals: Option<EqualsFn<T>>,
    label: Option<String>,
}

impl<T: 'static> ComputedNode<T> {
    fn update(&self) -> Result<()> {
        match self.state.get() {
            DirtyState::Clean => Ok(()),
            DirtyState::MaybeDirty => {
                let sources = self.sources.borrow().clone();
                if sources.iter().any(Dependency::changed) {
                    self.recompute()
                } else {
                    tracing::trace!(node = %self.id, "inputs unchanged, keeping cache");
                    self.state.set(DirtyState::Clean);
                    Ok(())
                }
            }
            DirtyState::Dirty => self.recompute(),
        }
    }

    fn recompute(&self) -> Result<()> {
        let runtime = self
            .runtime
            .upgrade()
            .ok_or(ReactiveError::RuntimeDropped(self.id))?;

        // Clean before running: a write that lands mid-evaluation re-dirties us.
        self.state.set(DirtyState::Clean);
        self.evaluations.set(self.evaluations.get() + 1);

        let ctx = runtime.tracking.enter(Some(self.id));
        let outcome = (self.getter)();
        let sources = ctx.finish();

        let this: Weak<dyn Subscriber> = self.this.clone();
        subscriber::rewire(self.id, &this, &self.sources, sources);

        match outcome {
            Ok(value) => {
                self.errored.set(false);
                let mut slot = self.value.borrow_mut();
                let unchanged = match (slot.as_deref(), self.equals.as_ref()) {
                    (Some(old), Some(equals)) => equals(old, &value),
                    _ => false,
                };
                if unchanged {
                    tracing::trace!(node = %self.id, "recomputed to an equal value");
                } else {
                    *slot = Some(Rc::new(value));
                    self.version.set(self.version.get() + 1);
                }
                Ok(())
            }
            Err(source) => {
                self.state.set(DirtyState::Dirty);
                self.errored.set(true);
                tracing::debug!(
                    node = %self.id,
                    label = ?self.label,
                    error = %source,
                    "computed getter failed"
                );
                Err(ReactiveError::evaluation(self.id, source))
            }
        }
    }

    fn read(&self) -> Result<Rc<T>> {
        self.update()?;
        self.value.borrow().clone().ok_or_else(|| {
            ReactiveError::evaluation(self.id, "computed cell read itself while evaluating")
        })
    }
}

impl<T: 'static> Source for ComputedNode<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.get()
    }

    fn refresh(&self) -> Result<()> {
        self.update()
    }

    fn dependents(&self) -> &Dependents {
        &self.dependents
    }
}

impl<T: 'static> Subscriber for ComputedNode<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Derived
    }

    fn mark(&self, state: DirtyState) {
        let previous = self.state.get();
        self.state.set(previous.escalate(state));

        // Downstream only needs telling once per clean period.
        if previous.is_clean() || self.errored.get() {
            self.dependents.mark_all(DirtyState::MaybeDirty);
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.notify(self.id);
        }
    }

    fn run(&self) -> Result<()> {
        self.update()
    }
}

impl<T: 'static> Drop for ComputedNode<T> {
    fn drop(&mut self) {
        subscriber::detach(self.id, &self.sources);
    }
}

/// A cached value derived from other cells.
///
/// Cloning a `Computed` creates a new handle to the **same** cell.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.signal(2);
/// let doubled = rt.computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 4);
/// ```
pub struct Computed<T: 'static> {
    node: Rc<ComputedNode<T>>,
}

impl<T: 'static> Computed<T> {
    pub(crate) fn new_in(
        runtime: &Rc<RuntimeInner>,
        getter: Getter<T>,
        options: CellOptions<T>,
    ) -> Self {
        let node = Rc::new_cyclic(|this| ComputedNode {
            id: NodeId::next(),
            this: this.clone(),
            runtime: Rc::downgrade(runtime),
            getter,
            value: RefCell::new(None),
            state: Cell::new(DirtyState::Dirty),
            errored: Cell::new(false),
            version: Cell::new(0),
            evaluations: Cell::new(0),
            sources: RefCell::new(Dependencies::new()),
            dependents: Dependents::default(),
            equals: options.equals,
            label: options.label,
        });
        Self { node }
    }

    /// Get the computed cell's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn label(&self) -> Option<&str> {
        self.node.label.as_deref()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the getter fails. Use [`Computed::try_get`] for fallible
    /// getters.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        (*self.get_rc()).clone()
    }

    /// Get the current value, recomputing if necessary.
    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.try_get_rc().map(|value| (*value).clone())
    }

    /// Like [`Computed::get`], returning the cached `Rc` itself.
    ///
    /// # Panics
    ///
    /// Panics if the getter fails.
    pub fn get_rc(&self) -> Rc<T> {
        match self.try_get_rc() {
            Ok(value) => value,
            Err(err) => panic!("computed {} failed: {err}", self.node.id),
        }
    }

    /// Get the cached `Rc`, recomputing first if necessary.
    ///
    /// Two reads with no upstream change in between return pointer-equal
    /// values.
    pub fn try_get_rc(&self) -> Result<Rc<T>> {
        let value = self.node.read();
        // Tracked even on failure so the reader retries once inputs change.
        self.track();
        value
    }

    /// Borrow the current value.
    ///
    /// # Panics
    ///
    /// Panics if the getter fails.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.get_rc())
    }

    /// Read without registering a dependency. Still recomputes if stale.
    pub fn try_get_rc_untracked(&self) -> Result<Rc<T>> {
        self.node.read()
    }

    /// Force the next read to recompute.
    pub fn mark_dirty(&self) {
        self.node.mark(DirtyState::Dirty);
    }

    /// Get the current dirty state.
    pub fn state(&self) -> DirtyState {
        self.node.state.get()
    }

    /// Version counter, bumped whenever a recomputation produced a new value.
    pub fn version(&self) -> u64 {
        self.node.version.get()
    }

    /// How many times the getter has run.
    pub fn evaluation_count(&self) -> u64 {
        self.node.evaluations.get()
    }

    /// Check if the computed cell has a cached value.
    pub fn has_value(&self) -> bool {
        self.node.value.borrow().is_some()
    }

    /// Number of cells read during the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.node.sources.borrow().len()
    }

    /// Number of computations recorded as reading this cell.
    pub fn subscriber_count(&self) -> usize {
        self.node.dependents.len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    pub(crate) fn as_subscriber(&self) -> Rc<dyn Subscriber> {
        self.node.clone()
    }

    fn track(&self) {
        if let Some(runtime) = self.node.runtime.upgrade() {
            runtime.track(self.node.clone());
        }
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.node.id)
            .field("state", &self.state())
            .field("cached", &self.node.value.borrow())
            .field("version", &self.version())
            .finish()
    }
}

/// A computed cell that also accepts writes.
///
/// Writes go through the setter, which is expected to write upstream signals.
/// The setter does not run synchronously: it is queued and applied at the
/// start of the next flush.
pub struct WritableComputed<T: 'static> {
    computed: Computed<T>,
    setter: Rc<dyn Fn(T)>,
}

impl<T: 'static> WritableComputed<T> {
    pub(crate) fn new_in(
        runtime: &Rc<RuntimeInner>,
        getter: Getter<T>,
        setter: Rc<dyn Fn(T)>,
        options: CellOptions<T>,
    ) -> Self {
        Self {
            computed: Computed::new_in(runtime, getter, options),
            setter,
        }
    }

    /// Queue a write through the setter.
    ///
    /// Upstream state is not updated before the next flush.
    pub fn set(&self, value: T) {
        let setter = self.setter.clone();
        match self.computed.node.runtime.upgrade() {
            Some(runtime) => {
                tracing::trace!(node = %self.computed.id(), "deferring computed write");
                runtime.defer_write(Box::new(move || setter(value)));
            }
            // Nothing left to defer to.
            None => setter(value),
        }
    }

    pub fn as_computed(&self) -> &Computed<T> {
        &self.computed
    }
}

impl<T: 'static> Deref for WritableComputed<T> {
    type Target = Computed<T>;

    fn deref(&self) -> &Self::Target {
        &self.computed
    }
}

impl<T: 'static> Clone for WritableComputed<T> {
    fn clone(&self) -> Self {
        Self {
            computed: self.computed.clone(),
            setter: Rc::clone(&self.setter),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
