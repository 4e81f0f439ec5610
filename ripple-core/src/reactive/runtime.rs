//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computed
//! cells and effects. It owns the tracking stack, the registry of watched
//! nodes and the flush scheduler.
//!
//! # How It Works
//!
//! 1. When a computed or effect reads a cell, the runtime records the read in
//!    the innermost tracking frame.
//!
//! 2. When a signal's value changes, the signal marks its dependents. Every
//!    watched node reached asks the runtime to be visited.
//!
//! 3. The runtime adds it to the pending set and, on the first request since
//!    the last flush, queues one flush microtask.
//!
//! 4. The flush applies deferred writes, then visits each pending node once:
//!    effects rerun, watched computed cells refresh. Computed cells nobody
//!    watches stay lazy and recompute on their next read.
//!
//! # Threading
//!
//! A runtime is single-threaded: handles are `!Send` and all bookkeeping
//! lives in `RefCell`s. Several runtimes can coexist on one thread; each has
//! its own tracking stack and pending set. The free functions at the crate
//! root use the thread's default runtime ([`Runtime::current`]).

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Notify;

use super::bridge::{ExternalStore, MaybeSignal, SyncedState};
use super::computed::{Computed, WritableComputed};
use super::context::TrackingStack;
use super::effect::{Cleanup, Effect, EffectNode};
use super::options::CellOptions;
use super::signal::Signal;
use super::subscriber::{Source, Subscriber};
use crate::config::{FlushMode, RuntimeConfig};
use crate::error::{BoxError, ReactiveError, Result};
use crate::graph::{DeferredWrite, NodeId, NodeKind, SchedulerState, UpdateScheduler};

type EvalResult<T> = std::result::Result<T, BoxError>;
type ErrorHook = Rc<dyn Fn(&ReactiveError)>;
type MicrotaskHook = Rc<dyn Fn(Microtask)>;

thread_local! {
    static CURRENT: Runtime = Runtime::new();
}

pub(crate) struct RuntimeInner {
    this: Weak<RuntimeInner>,
    config: RuntimeConfig,
    pub(crate) tracking: TrackingStack,
    scheduler: RefCell<UpdateScheduler>,

    /// Watched nodes, in registration order. Holding them here is what keeps
    /// an effect alive after its handle is dropped.
    watched: RefCell<IndexMap<NodeId, Rc<dyn Subscriber>>>,

    /// Snapshot side-table: state cell id to its `ExternalStore` wrapper.
    snapshots: RefCell<HashMap<NodeId, Box<dyn Any>>>,

    error_hook: RefCell<Option<ErrorHook>>,
    microtask_hook: RefCell<Option<MicrotaskHook>>,

    /// Wakes flush drivers in [`FlushMode::Tokio`].
    flush_wake: Rc<Notify>,
    drivers: Cell<usize>,
}

impl RuntimeInner {
    /// Record a read in the innermost tracking frame.
    pub(crate) fn track(&self, source: Rc<dyn Source>) {
        self.tracking.record(source);
    }

    /// A node became stale. Watched nodes join the pending set.
    pub(crate) fn notify(&self, node_id: NodeId) {
        if !self.watched.borrow().contains_key(&node_id) {
            return;
        }
        let queue = self.scheduler.borrow_mut().enqueue(node_id);
        tracing::trace!(node = %node_id, "node pending");
        if queue {
            self.queue_microtask();
        }
    }

    pub(crate) fn defer_write(&self, write: DeferredWrite) {
        let queue = self.scheduler.borrow_mut().defer(write);
        if queue {
            self.queue_microtask();
        }
    }

    pub(crate) fn watch_node(&self, node: Rc<dyn Subscriber>) {
        self.watched.borrow_mut().insert(node.id(), node);
    }

    pub(crate) fn unwatch_node(&self, node_id: NodeId) {
        // Take the node out before it is dropped, outside the borrow.
        let removed = self.watched.borrow_mut().shift_remove(&node_id);
        self.scheduler.borrow_mut().remove(node_id);
        drop(removed);
    }

    pub(crate) fn forget_snapshot(&self, node_id: NodeId) {
        let removed = self.snapshots.borrow_mut().remove(&node_id);
        drop(removed);
    }

    fn report(&self, err: &ReactiveError) {
        let hook = self.error_hook.borrow().clone();
        match hook {
            Some(hook) => hook(err),
            None if self.config.report_effect_errors => {
                tracing::error!(
                    node = ?err.node(),
                    error = %err,
                    "reactive node failed during flush"
                );
            }
            None => {}
        }
    }

    fn queue_microtask(&self) {
        let hook = self.microtask_hook.borrow().clone();
        if let Some(hook) = hook {
            hook(Microtask {
                runtime: self.this.clone(),
            });
            return;
        }

        match self.config.flush_mode {
            FlushMode::Manual => {
                tracing::trace!("flush scheduled, waiting for the host to flush");
            }
            FlushMode::Tokio => {
                if self.drivers.get() == 0 {
                    tracing::warn!("tokio flush mode has no flush driver running; flush manually");
                    return;
                }
                self.flush_wake.notify_one();
            }
        }
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        // Let drivers observe the drop and finish.
        self.flush_wake.notify_waiters();
        self.flush_wake.notify_one();
    }
}

/// Counts a flush driver for as long as its future exists.
struct DriverAttachment {
    runtime: Weak<RuntimeInner>,
}

impl DriverAttachment {
    fn new(inner: &Rc<RuntimeInner>) -> Self {
        inner.drivers.set(inner.drivers.get() + 1);
        // A flush queued before any driver existed is picked up right away.
        if !inner.scheduler.borrow().is_idle() {
            inner.flush_wake.notify_one();
        }
        Self {
            runtime: Rc::downgrade(inner),
        }
    }
}

impl Drop for DriverAttachment {
    fn drop(&mut self) {
        if let Some(inner) = self.runtime.upgrade() {
            inner.drivers.set(inner.drivers.get().saturating_sub(1));
        }
    }
}

/// Ends the flush even if a node panics mid-pass.
struct FlushGuard<'a>(&'a RuntimeInner);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.scheduler.borrow_mut().end_flush();
    }
}

/// One queued flush, handed to a custom microtask hook.
///
/// Running it flushes the runtime it came from; if that runtime is gone it
/// does nothing.
pub struct Microtask {
    runtime: Weak<RuntimeInner>,
}

impl Microtask {
    pub fn run(self) -> FlushReport {
        match self.runtime.upgrade() {
            Some(inner) => Runtime { inner }.flush(),
            None => FlushReport::default(),
        }
    }
}

impl fmt::Debug for Microtask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Microtask")
            .field("live", &(self.runtime.strong_count() > 0))
            .finish()
    }
}

/// What a flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Deferred writes applied before visiting nodes.
    pub writes_applied: usize,
    /// Pending nodes visited.
    pub visited: usize,
    /// Visited nodes that failed.
    pub errors: usize,
}

impl FlushReport {
    fn absorb(&mut self, other: FlushReport) {
        self.writes_applied += other.writes_applied;
        self.visited += other.visited;
        self.errors += other.errors;
    }
}

/// Point-in-time view of a runtime, for debugging and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub watched_effects: usize,
    pub watched_computed: usize,
    pub pending: usize,
    pub scheduler: SchedulerState,
    pub flushes: u64,
    pub microtasks_queued: u64,
    pub snapshot_entries: usize,
}

/// A reactive graph instance.
///
/// Cloning a `Runtime` creates a new handle to the **same** graph.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let inner = Rc::new_cyclic(|this| RuntimeInner {
            this: this.clone(),
            config,
            tracking: TrackingStack::default(),
            scheduler: RefCell::new(UpdateScheduler::new()),
            watched: RefCell::new(IndexMap::new()),
            snapshots: RefCell::new(HashMap::new()),
            error_hook: RefCell::new(None),
            microtask_hook: RefCell::new(None),
            flush_wake: Rc::new(Notify::new()),
            drivers: Cell::new(0),
        });
        Self { inner }
    }

    /// The default runtime of the current thread.
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same graph.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // State cells
    // ------------------------------------------------------------------------

    /// Create a signal compared with `PartialEq`.
    pub fn signal<T: PartialEq + 'static>(&self, value: T) -> Signal<T> {
        self.signal_with(value, CellOptions::partial_eq())
    }

    pub fn signal_with<T: 'static>(&self, value: T, options: CellOptions<T>) -> Signal<T> {
        Signal::new_in(&self.inner, value, options)
    }

    /// Create a signal from a value that may be missing.
    ///
    /// Fails with [`ReactiveError::InvalidValue`] on `None`; optional data has
    /// to be wrapped explicitly (`Signal<Option<T>>`).
    pub fn try_signal<T: 'static>(
        &self,
        value: Option<T>,
        options: CellOptions<T>,
    ) -> Result<Signal<T>> {
        match value {
            Some(value) => Ok(self.signal_with(value, options)),
            None => Err(ReactiveError::InvalidValue),
        }
    }

    // ------------------------------------------------------------------------
    // Derived cells
    // ------------------------------------------------------------------------

    /// Create a lazily evaluated computed cell compared with `PartialEq`.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        self.computed_with(getter, CellOptions::partial_eq())
    }

    pub fn computed_with<T, F>(&self, getter: F, options: CellOptions<T>) -> Computed<T>
    where
        T: 'static,
        F: Fn() -> T + 'static,
    {
        Computed::new_in(&self.inner, Box::new(move || -> EvalResult<T> { Ok(getter()) }), options)
    }

    /// Create a computed cell whose getter can fail.
    pub fn try_computed<T, E, F>(&self, getter: F) -> Computed<T>
    where
        T: PartialEq + 'static,
        E: Into<BoxError>,
        F: Fn() -> std::result::Result<T, E> + 'static,
    {
        Computed::new_in(
            &self.inner,
            Box::new(move || -> EvalResult<T> { getter().map_err(Into::into) }),
            CellOptions::partial_eq(),
        )
    }

    /// Create a computed cell with a setter. See [`WritableComputed::set`].
    pub fn writable_computed<T, G, S>(&self, get: G, set: S) -> WritableComputed<T>
    where
        T: PartialEq + 'static,
        G: Fn() -> T + 'static,
        S: Fn(T) + 'static,
    {
        WritableComputed::new_in(
            &self.inner,
            Box::new(move || -> EvalResult<T> { Ok(get()) }),
            Rc::new(set),
            CellOptions::partial_eq(),
        )
    }

    // ------------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------------

    /// Register an effect. It runs once now and again on every flush that
    /// finds one of its dependencies changed.
    pub fn effect<F>(&self, mut f: F) -> Effect
    where
        F: FnMut() + 'static,
    {
        self.spawn_effect(Box::new(move || -> EvalResult<Option<Cleanup>> {
            f();
            Ok(None)
        }))
    }

    /// Register an effect whose runs return a cleanup closure.
    pub fn effect_with_cleanup<F, C>(&self, mut f: F) -> Effect
    where
        F: FnMut() -> C + 'static,
        C: FnOnce() + 'static,
    {
        self.spawn_effect(Box::new(move || -> EvalResult<Option<Cleanup>> {
            Ok(Some(Cleanup::new(f())))
        }))
    }

    /// Register an effect whose callback can fail.
    ///
    /// A failing first run is returned here and the effect is torn down.
    /// Failures on later runs go to the error hook.
    pub fn try_effect<F, E>(&self, mut f: F) -> Result<Effect>
    where
        F: FnMut() -> std::result::Result<(), E> + 'static,
        E: Into<BoxError>,
    {
        let (effect, first_run) = EffectNode::create(
            &self.inner,
            Box::new(move || -> EvalResult<Option<Cleanup>> {
                f().map(|()| None).map_err(Into::into)
            }),
        );
        match first_run {
            Ok(()) => Ok(effect),
            Err(err) => {
                effect.dispose();
                Err(err)
            }
        }
    }

    fn spawn_effect(&self, callback: super::effect::EffectFn) -> Effect {
        let (effect, first_run) = EffectNode::create(&self.inner, callback);
        if let Err(err) = first_run {
            self.inner.report(&err);
        }
        effect
    }

    // ------------------------------------------------------------------------
    // Watcher
    // ------------------------------------------------------------------------

    /// Keep a computed cell fresh: flushes refresh it eagerly instead of
    /// waiting for the next read.
    pub fn watch<T: 'static>(&self, computed: &Computed<T>) {
        self.inner.watch_node(computed.as_subscriber());
    }

    pub fn unwatch<T: 'static>(&self, computed: &Computed<T>) {
        self.inner.unwatch_node(computed.id());
    }

    pub fn is_watched(&self, node_id: NodeId) -> bool {
        self.inner.watched.borrow().contains_key(&node_id)
    }

    /// Run `f` without recording any reads.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let ctx = self.inner.tracking.enter(None);
        let result = f();
        drop(ctx.finish());
        result
    }

    /// Whether a computation is currently recording reads.
    pub fn is_tracking(&self) -> bool {
        self.inner.tracking.is_tracking()
    }

    // ------------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------------

    /// Run one flush pass.
    ///
    /// Calling this while a flush is already running is a no-op.
    pub fn flush(&self) -> FlushReport {
        let inner = &*self.inner;
        if !inner.scheduler.borrow_mut().begin_flush() {
            tracing::trace!("flush already in progress");
            return FlushReport::default();
        }
        let _guard = FlushGuard(inner);
        let _span = tracing::debug_span!("flush").entered();

        let mut report = FlushReport::default();
        loop {
            let next = inner.scheduler.borrow_mut().next_deferred();
            let Some(write) = next else {
                break;
            };
            write();
            report.writes_applied += 1;
        }

        let batch = inner.scheduler.borrow_mut().take_pending();
        for node_id in batch {
            let node = inner.watched.borrow().get(&node_id).cloned();
            let Some(node) = node else {
                continue;
            };
            report.visited += 1;
            if let Err(err) = node.run() {
                report.errors += 1;
                inner.report(&err);
            }
        }

        tracing::debug!(
            writes = report.writes_applied,
            visited = report.visited,
            errors = report.errors,
            "flush complete"
        );
        report
    }

    /// Flush until nothing is pending.
    ///
    /// Gives up after `max_flush_passes` passes, which only happens when
    /// effects keep invalidating themselves.
    pub fn settle(&self) -> Result<FlushReport> {
        let passes = self.inner.config.max_flush_passes;
        let mut total = FlushReport::default();
        for _ in 0..passes {
            if self.is_idle() {
                return Ok(total);
            }
            total.absorb(self.flush());
        }
        if self.is_idle() {
            return Ok(total);
        }
        tracing::warn!(passes, "graph did not settle");
        Err(ReactiveError::FlushLimitExceeded { passes })
    }

    /// The task that runs flushes in [`FlushMode::Tokio`].
    ///
    /// Spawn it on the `LocalSet` the graph lives in:
    ///
    /// ```rust,ignore
    /// tokio::task::spawn_local(rt.flush_driver());
    /// ```
    ///
    /// Every queued flush wakes it, so reactions run as soon as the writing
    /// task yields. It finishes once the runtime is dropped. While no driver
    /// exists, tokio mode logs a warning and leaves flushing to the host.
    pub fn flush_driver(&self) -> impl Future<Output = ()> + 'static {
        let attachment = DriverAttachment::new(&self.inner);
        let wake = self.inner.flush_wake.clone();
        async move {
            loop {
                wake.notified().await;
                let Some(inner) = attachment.runtime.upgrade() else {
                    break;
                };
                Runtime { inner }.flush();
            }
            tracing::debug!("flush driver finished");
        }
    }

    /// True when nothing is pending and no flush is scheduled.
    pub fn is_idle(&self) -> bool {
        self.inner.scheduler.borrow().is_idle()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.scheduler.borrow().state()
    }

    /// Route failures from flushes (and infallible effects' first runs)
    /// somewhere other than the log.
    pub fn set_error_handler(&self, handler: impl Fn(&ReactiveError) + 'static) {
        *self.inner.error_hook.borrow_mut() = Some(Rc::new(handler));
    }

    /// Take over flush scheduling: `hook` receives one [`Microtask`] per
    /// Idle to FlushScheduled transition and decides when to run it.
    pub fn set_microtask_hook(&self, hook: impl Fn(Microtask) + 'static) {
        *self.inner.microtask_hook.borrow_mut() = Some(Rc::new(hook));
    }

    // ------------------------------------------------------------------------
    // Subscription bridge
    // ------------------------------------------------------------------------

    /// The shared external-store wrapper for `signal`, created on first use
    /// and kept in the snapshot table until the signal is cleared.
    pub fn store_for<T: 'static>(&self, signal: &Signal<T>) -> ExternalStore<T> {
        let id = signal.id();
        let cached = self
            .inner
            .snapshots
            .borrow()
            .get(&id)
            .and_then(|entry| entry.downcast_ref::<ExternalStore<T>>())
            .cloned();
        if let Some(store) = cached {
            return store;
        }

        let store = ExternalStore::new(self, MaybeSignal::Signal(signal.clone()));
        self.inner
            .snapshots
            .borrow_mut()
            .insert(id, Box::new(store.clone()));
        store
    }

    /// An external-store wrapper for any signal-like source.
    pub fn external_store<T: 'static>(
        &self,
        source: impl Into<MaybeSignal<T>>,
    ) -> ExternalStore<T> {
        match source.into() {
            MaybeSignal::Signal(signal) => self.store_for(&signal),
            other => ExternalStore::new(self, other),
        }
    }

    /// Bind a source to a render consumer. See [`SyncedState`].
    pub fn use_external_state<T: 'static>(
        &self,
        source: impl Into<MaybeSignal<T>>,
        on_stale: impl FnMut() + 'static,
    ) -> Result<SyncedState<T>> {
        SyncedState::bind(self.external_store(source), on_stale)
    }

    /// Empty the snapshot table.
    pub fn clear_snapshots(&self) {
        let removed = std::mem::take(&mut *self.inner.snapshots.borrow_mut());
        drop(removed);
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn graph_stats(&self) -> GraphStats {
        let (watched_effects, watched_computed) = {
            let watched = self.inner.watched.borrow();
            let effects = watched
                .values()
                .filter(|node| node.kind() == NodeKind::Effect)
                .count();
            (effects, watched.len() - effects)
        };
        let scheduler = self.inner.scheduler.borrow();
        GraphStats {
            watched_effects,
            watched_computed,
            pending: scheduler.pending_count(),
            scheduler: scheduler.state(),
            flushes: scheduler.flush_count(),
            microtasks_queued: scheduler.microtasks_queued(),
            snapshot_entries: self.inner.snapshots.borrow().len(),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("stats", &self.graph_stats())
            .finish()
    }
}
