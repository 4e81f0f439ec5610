//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies, and registers itself as a watched node.
//!
//! 2. When any dependency changes, the effect is added to the pending set and
//!    reruns during the next flush.
//!
//! 3. While re-running, the effect records a fresh dependency set; cells it no
//!    longer reads stop notifying it.
//!
//! # Differences from Computed
//!
//! - Computed cells return a value; effects do not.
//! - Computed cells are lazy (compute on access); effects are eager (run when
//!   the flush reaches them).
//!
//! # Cleanup
//!
//! Effects can optionally return a cleanup function. This function is called
//! before the effect re-runs and when the effect is disposed, exactly once per
//! run.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::runtime::RuntimeInner;
use super::subscriber::{self, Dependencies, Dependency, Subscriber};
use crate::error::{BoxError, ReactiveError, Result};
use crate::graph::{DirtyState, NodeId, NodeKind};

/// A cleanup function returned by an effect run.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    fn run(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cleanup(..)")
    }
}

pub(crate) type EffectFn = Box<dyn FnMut() -> std::result::Result<Option<Cleanup>, BoxError>>;

pub(crate) struct EffectNode {
    id: NodeId,
    this: Weak<EffectNode>,
    runtime: Weak<RuntimeInner>,

    /// The effect function.
    callback: RefCell<EffectFn>,

    /// Cleanup returned by the last successful run.
    cleanup: RefCell<Option<Cleanup>>,

    /// Cells read during the last run.
    sources: RefCell<Dependencies>,

    state: Cell<DirtyState>,
    running: Cell<bool>,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

impl EffectNode {
    /// Build the node, register it with the runtime and run it once.
    ///
    /// The first run's outcome is returned alongside the handle so callers
    /// can decide whether a failure should tear the effect down.
    pub(crate) fn create(runtime: &Rc<RuntimeInner>, callback: EffectFn) -> (Effect, Result<()>) {
        let node = Rc::new_cyclic(|this| EffectNode {
            id: NodeId::next(),
            this: this.clone(),
            runtime: Rc::downgrade(runtime),
            callback: RefCell::new(callback),
            cleanup: RefCell::new(None),
            sources: RefCell::new(Dependencies::new()),
            state: Cell::new(DirtyState::Dirty),
            running: Cell::new(false),
            disposed: Cell::new(false),
            run_count: Cell::new(0),
        });

        runtime.watch_node(node.clone());
        tracing::debug!(node = %node.id, "effect registered");

        let first_run = node.execute();
        (Effect { node }, first_run)
    }

    /// Execute the effect function.
    ///
    /// This runs the function within a reactive context to track dependencies.
    fn execute(&self) -> Result<()> {
        if self.disposed.get() || self.running.get() {
            return Ok(());
        }
        let runtime = self
            .runtime
            .upgrade()
            .ok_or(ReactiveError::RuntimeDropped(self.id))?;

        // Previous cleanup always runs before the next run.
        let previous = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = previous {
            cleanup.run();
        }

        self.state.set(DirtyState::Clean);
        self.running.set(true);

        let ctx = runtime.tracking.enter(Some(self.id));
        let outcome = {
            let mut callback = self.callback.borrow_mut();
            (callback)()
        };
        let sources = ctx.finish();

        self.running.set(false);
        self.run_count.set(self.run_count.get() + 1);

        // Disposed from inside its own callback.
        if self.disposed.get() {
            drop(sources);
            if let Ok(Some(cleanup)) = outcome {
                cleanup.run();
            }
            return Ok(());
        }

        let this: Weak<dyn Subscriber> = self.this.clone();
        subscriber::rewire(self.id, &this, &self.sources, sources);

        match outcome {
            Ok(cleanup) => {
                *self.cleanup.borrow_mut() = cleanup;
                // A cell read earlier in this run was written later in it.
                let stale = self
                    .sources
                    .borrow()
                    .iter()
                    .any(|dep| dep.source.version() != dep.version);
                if stale {
                    self.state.set(DirtyState::Dirty);
                    runtime.notify(self.id);
                }
                Ok(())
            }
            Err(source) => {
                self.state.set(DirtyState::Dirty);
                Err(ReactiveError::evaluation(self.id, source))
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unwatch_node(self.id);
        }
        subscriber::detach(self.id, &self.sources);

        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup.run();
        }
        tracing::debug!(node = %self.id, runs = self.run_count.get(), "effect disposed");
    }
}

impl Drop for EffectNode {
    fn drop(&mut self) {
        subscriber::detach(self.id, &self.sources);
    }
}

impl Subscriber for EffectNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Effect
    }

    fn mark(&self, state: DirtyState) {
        if self.disposed.get() {
            return;
        }
        self.state.set(self.state.get().escalate(state));
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.notify(self.id);
        }
    }

    fn run(&self) -> Result<()> {
        match self.state.get() {
            DirtyState::Clean => Ok(()),
            DirtyState::MaybeDirty => {
                let sources = self.sources.borrow().clone();
                if sources.iter().any(Dependency::changed) {
                    self.execute()
                } else {
                    self.state.set(DirtyState::Clean);
                    Ok(())
                }
            }
            DirtyState::Dirty => self.execute(),
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Effects stay registered with their runtime until [`Effect::dispose`] is
/// called; dropping the handle does not stop them.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// let effect = rt.effect({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// });
///
/// count.set(5);
/// rt.flush();  // Prints: "Count is: 5"
/// effect.dispose();
/// ```
#[derive(Clone)]
pub struct Effect {
    node: Rc<EffectNode>,
}

impl Effect {
    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// Stop the effect and run its last cleanup.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub fn dispose(&self) {
        self.node.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.node.disposed.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.node.run_count.get()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.node.sources.borrow().len()
    }

    /// Get the current dirty state.
    pub fn state(&self) -> DirtyState {
        self.node.state.get()
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.node.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
