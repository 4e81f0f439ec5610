//! Subscription Bridge
//!
//! Adapts cell change notifications to the subscribe / get-snapshot contract
//! a rendering layer polls:
//!
//! - `subscribe(on_change)` registers a listener that fires after every change
//!   of the source, never on registration.
//! - `get_snapshot()` returns the current value without side effects. Between
//!   two notifications it returns the same `Rc`, so a renderer can compare
//!   snapshots with `Rc::ptr_eq`.
//!
//! All listeners of one store share a single effect. The effect owns the
//! snapshot cache: it is refreshed right before listeners are told, and only
//! when the source produced a new `Rc`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::computed::{Computed, WritableComputed};
use super::effect::Effect;
use super::options::CellOptions;
use super::runtime::{Runtime, RuntimeInner};
use super::signal::Signal;
use crate::error::{BoxError, ReactiveError, Result};
use crate::graph::NodeId;

/// Anything a store can be built from, decided at construction.
pub enum MaybeSignal<T: 'static> {
    /// A plain value that never changes.
    Static(Rc<T>),
    Signal(Signal<T>),
    Computed(Computed<T>),
    /// A zero-argument function, turned into a computed cell by the store.
    /// The options decide when a new result counts as a change.
    Producer(Rc<dyn Fn() -> T>, CellOptions<T>),
}

impl<T: 'static> MaybeSignal<T> {
    pub fn constant(value: T) -> Self {
        Self::Static(Rc::new(value))
    }

    /// A producer whose results are compared with `PartialEq`.
    pub fn producer(f: impl Fn() -> T + 'static) -> Self
    where
        T: PartialEq,
    {
        Self::producer_with(f, CellOptions::partial_eq())
    }

    pub fn producer_with(f: impl Fn() -> T + 'static, options: CellOptions<T>) -> Self {
        Self::Producer(Rc::new(f), options)
    }
}

impl<T: 'static> From<Signal<T>> for MaybeSignal<T> {
    fn from(signal: Signal<T>) -> Self {
        Self::Signal(signal)
    }
}

impl<T: 'static> From<&Signal<T>> for MaybeSignal<T> {
    fn from(signal: &Signal<T>) -> Self {
        Self::Signal(signal.clone())
    }
}

impl<T: 'static> From<Computed<T>> for MaybeSignal<T> {
    fn from(computed: Computed<T>) -> Self {
        Self::Computed(computed)
    }
}

impl<T: 'static> From<&Computed<T>> for MaybeSignal<T> {
    fn from(computed: &Computed<T>) -> Self {
        Self::Computed(computed.clone())
    }
}

impl<T: 'static> From<WritableComputed<T>> for MaybeSignal<T> {
    fn from(computed: WritableComputed<T>) -> Self {
        Self::Computed(computed.as_computed().clone())
    }
}

impl<T: 'static> Clone for MaybeSignal<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(value) => Self::Static(value.clone()),
            Self::Signal(signal) => Self::Signal(signal.clone()),
            Self::Computed(computed) => Self::Computed(computed.clone()),
            Self::Producer(f, options) => Self::Producer(f.clone(), options.clone()),
        }
    }
}

impl<T: 'static> fmt::Debug for MaybeSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("MaybeSignal::Static"),
            Self::Signal(signal) => write!(f, "MaybeSignal::Signal({})", signal.id()),
            Self::Computed(computed) => write!(f, "MaybeSignal::Computed({})", computed.id()),
            Self::Producer(..) => f.write_str("MaybeSignal::Producer"),
        }
    }
}

/// Store source after producers have been turned into computed cells.
enum StoreSource<T: 'static> {
    Static(Rc<T>),
    Signal(Signal<T>),
    Computed(Computed<T>),
}

impl<T: 'static> StoreSource<T> {
    fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::Static(_) => None,
            Self::Signal(signal) => Some(signal.id()),
            Self::Computed(computed) => Some(computed.id()),
        }
    }

    fn read_tracked(&self) -> Result<Rc<T>> {
        match self {
            Self::Static(value) => Ok(value.clone()),
            Self::Signal(signal) => Ok(signal.get_rc()),
            Self::Computed(computed) => computed.try_get_rc(),
        }
    }

    fn read_untracked(&self) -> Result<Rc<T>> {
        match self {
            Self::Static(value) => Ok(value.clone()),
            Self::Signal(signal) => Ok(signal.get_rc_untracked()),
            Self::Computed(computed) => computed.try_get_rc_untracked(),
        }
    }
}

type Listener = Rc<RefCell<dyn FnMut()>>;

struct StoreInner<T: 'static> {
    runtime: Weak<RuntimeInner>,
    source: StoreSource<T>,

    /// Last snapshot handed out while subscribed.
    snapshot: RefCell<Option<Rc<T>>>,

    listeners: RefCell<IndexMap<u64, Listener>>,
    next_listener: Cell<u64>,

    /// Shared watcher, alive while at least one listener is registered.
    watcher: RefCell<Option<Effect>>,
}

impl<T: 'static> StoreInner<T> {
    /// Effect body: track the source and fan out on a new snapshot.
    fn observe(&self) -> Result<()> {
        let next = self.source.read_tracked()?;
        let changed = {
            let mut snapshot = self.snapshot.borrow_mut();
            match snapshot.as_ref() {
                // First run only records the baseline.
                None => {
                    *snapshot = Some(next);
                    false
                }
                Some(current) if Rc::ptr_eq(current, &next) => false,
                Some(_) => {
                    *snapshot = Some(next);
                    true
                }
            }
        };
        if changed {
            self.notify_listeners();
        }
        Ok(())
    }

    fn notify_listeners(&self) {
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        // Listeners may unsubscribe while being called.
        let listeners: Vec<Listener> = self.listeners.borrow().values().cloned().collect();
        Runtime { inner: runtime }.untracked(|| {
            for listener in listeners {
                (listener.borrow_mut())();
            }
        });
    }

    fn release(&self, key: u64) {
        let last = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.shift_remove(&key);
            listeners.is_empty()
        };
        if !last {
            return;
        }
        let watcher = self.watcher.borrow_mut().take();
        if let Some(watcher) = watcher {
            watcher.dispose();
        }
        *self.snapshot.borrow_mut() = None;
        tracing::trace!("external store has no listeners left");
    }
}

/// Subscribe / get-snapshot adapter over a cell.
///
/// Cloning an `ExternalStore` creates a new handle to the **same** store.
pub struct ExternalStore<T: 'static> {
    inner: Rc<StoreInner<T>>,
}

impl<T: 'static> ExternalStore<T> {
    pub(crate) fn new(runtime: &Runtime, source: MaybeSignal<T>) -> Self {
        let source = match source {
            MaybeSignal::Static(value) => StoreSource::Static(value),
            MaybeSignal::Signal(signal) => StoreSource::Signal(signal),
            MaybeSignal::Computed(computed) => StoreSource::Computed(computed),
            MaybeSignal::Producer(f, options) => StoreSource::Computed(Computed::new_in(
                &runtime.inner,
                Box::new(move || -> std::result::Result<T, BoxError> { Ok(f()) }),
                options,
            )),
        };
        Self {
            inner: Rc::new(StoreInner {
                runtime: Rc::downgrade(&runtime.inner),
                source,
                snapshot: RefCell::new(None),
                listeners: RefCell::new(IndexMap::new()),
                next_listener: Cell::new(0),
                watcher: RefCell::new(None),
            }),
        }
    }

    /// The current value. No dependency is recorded, even inside an effect.
    pub fn get_snapshot(&self) -> Result<Rc<T>> {
        let cached = self.inner.snapshot.borrow().clone();
        match cached {
            Some(snapshot) => Ok(snapshot),
            None => self.inner.source.read_untracked(),
        }
    }

    /// Call `on_change` after every change of the source.
    ///
    /// Fails if the source cannot be read at registration time.
    pub fn subscribe(&self, on_change: impl FnMut() + 'static) -> Result<Subscription> {
        if matches!(self.inner.source, StoreSource::Static(_)) {
            return Ok(Subscription::inert());
        }

        let key = self.inner.next_listener.get();
        self.inner.next_listener.set(key + 1);
        self.inner
            .listeners
            .borrow_mut()
            .insert(key, Rc::new(RefCell::new(on_change)));

        if self.inner.watcher.borrow().is_none() {
            if let Err(err) = self.start_watcher() {
                self.inner.release(key);
                return Err(err);
            }
        }

        let inner = self.inner.clone();
        Ok(Subscription {
            release: Some(Box::new(move || inner.release(key))),
        })
    }

    fn start_watcher(&self) -> Result<()> {
        let Some(id) = self.inner.source.node_id() else {
            return Ok(());
        };
        let runtime = self
            .inner
            .runtime
            .upgrade()
            .map(|inner| Runtime { inner })
            .ok_or(ReactiveError::RuntimeDropped(id))?;
        let store = Rc::downgrade(&self.inner);
        let watcher = runtime.try_effect(move || match store.upgrade() {
            Some(store) => store.observe(),
            None => Ok(()),
        })?;
        *self.inner.watcher.borrow_mut() = Some(watcher);
        Ok(())
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    pub fn is_static(&self) -> bool {
        matches!(self.inner.source, StoreSource::Static(_))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: 'static> Clone for ExternalStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for ExternalStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalStore")
            .field("listeners", &self.listener_count())
            .field("static", &self.is_static())
            .finish()
    }
}

/// Handle returned by [`ExternalStore::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn inert() -> Self {
        Self { release: None }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// A render consumer's view of a store.
///
/// The consumer reads [`SyncedState::get`] while rendering. A change sets the
/// stale flag and calls `on_stale`, which is where a host requests a
/// re-render; [`SyncedState::mark_rendered`] clears the flag again.
pub struct SyncedState<T: 'static> {
    store: ExternalStore<T>,
    stale: Rc<Cell<bool>>,
    _subscription: Subscription,
}

impl<T: 'static> SyncedState<T> {
    pub(crate) fn bind(
        store: ExternalStore<T>,
        mut on_stale: impl FnMut() + 'static,
    ) -> Result<Self> {
        let stale = Rc::new(Cell::new(false));
        let subscription = store.subscribe({
            let stale = stale.clone();
            move || {
                stale.set(true);
                on_stale();
            }
        })?;
        Ok(Self {
            store,
            stale,
            _subscription: subscription,
        })
    }

    pub fn snapshot(&self) -> Result<Rc<T>> {
        self.store.get_snapshot()
    }

    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.snapshot().map(|value| (*value).clone())
    }

    /// Whether the source changed since the last render.
    pub fn needs_render(&self) -> bool {
        self.stale.get()
    }

    pub fn mark_rendered(&self) {
        self.stale.set(false);
    }

    pub fn store(&self) -> &ExternalStore<T> {
        &self.store
    }
}

impl<T: 'static> fmt::Debug for SyncedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedState")
            .field("needs_render", &self.needs_render())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_stable_between_notifications() {
        let rt = Runtime::new();
        let signal = rt.signal(String::from("a"));
        let store = rt.store_for(&signal);
        let _sub = store.subscribe(|| {}).unwrap();

        let first = store.get_snapshot().unwrap();
        signal.set(String::from("b"));
        // Not yet notified: the old snapshot is still handed out
        assert!(Rc::ptr_eq(&first, &store.get_snapshot().unwrap()));

        rt.flush();
        let second = store.get_snapshot().unwrap();
        assert_eq!(*second, "b");
        assert!(Rc::ptr_eq(&second, &store.get_snapshot().unwrap()));
    }

    #[test]
    fn listeners_fire_once_per_flush_not_on_subscribe() {
        let rt = Runtime::new();
        let signal = rt.signal(0);
        let store = rt.external_store(&signal);
        let calls = Rc::new(Cell::new(0));
        let _sub = store
            .subscribe({
                let calls = calls.clone();
                move || calls.set(calls.get() + 1)
            })
            .unwrap();
        assert_eq!(calls.get(), 0);

        signal.set(1);
        signal.set(2);
        rt.flush();
        assert_eq!(calls.get(), 1);

        // Equal write: nothing to report
        signal.set(2);
        rt.flush();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn listeners_share_one_watcher() {
        let rt = Runtime::new();
        let signal = rt.signal(0);
        let store = rt.store_for(&signal);

        let a = store.subscribe(|| {}).unwrap();
        let b = store.subscribe(|| {}).unwrap();
        assert_eq!(store.listener_count(), 2);
        assert_eq!(rt.graph_stats().watched_effects, 1);
        assert_eq!(signal.subscriber_count(), 1);

        a.unsubscribe();
        assert_eq!(rt.graph_stats().watched_effects, 1);
        drop(b);
        assert_eq!(store.listener_count(), 0);
        assert_eq!(rt.graph_stats().watched_effects, 0);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn store_for_reuses_the_cached_wrapper() {
        let rt = Runtime::new();
        let signal = rt.signal(1);
        let first = rt.store_for(&signal);
        let again = rt.store_for(&signal);
        assert!(first.ptr_eq(&again));
        assert_eq!(rt.graph_stats().snapshot_entries, 1);

        signal.clear();
        assert_eq!(rt.graph_stats().snapshot_entries, 0);
        assert!(!first.ptr_eq(&rt.store_for(&signal)));
    }

    #[test]
    fn producers_become_computed_sources() {
        let rt = Runtime::new();
        let n = rt.signal(2);
        let store = rt.external_store(MaybeSignal::producer({
            let n = n.clone();
            move || n.get() * 10
        }));
        assert_eq!(*store.get_snapshot().unwrap(), 20);

        let calls = Rc::new(Cell::new(0));
        let _sub = store
            .subscribe({
                let calls = calls.clone();
                move || calls.set(calls.get() + 1)
            })
            .unwrap();
        n.set(3);
        rt.flush();
        assert_eq!(calls.get(), 1);
        assert_eq!(*store.get_snapshot().unwrap(), 30);
    }

    #[test]
    fn producer_with_equal_result_stays_quiet() {
        let rt = Runtime::new();
        let n = rt.signal(1);
        let store = rt.external_store(MaybeSignal::producer({
            let n = n.clone();
            move || n.get() % 2
        }));

        let calls = Rc::new(Cell::new(0));
        let _sub = store
            .subscribe({
                let calls = calls.clone();
                move || calls.set(calls.get() + 1)
            })
            .unwrap();
        let before = store.get_snapshot().unwrap();

        n.set(3);
        rt.flush();
        assert_eq!(calls.get(), 0);
        assert!(Rc::ptr_eq(&before, &store.get_snapshot().unwrap()));

        n.set(4);
        rt.flush();
        assert_eq!(calls.get(), 1);
        assert_eq!(*store.get_snapshot().unwrap(), 0);
    }

    #[test]
    fn producer_without_equality_reports_every_rerun() {
        let rt = Runtime::new();
        let n = rt.signal(1);
        let store = rt.external_store(MaybeSignal::producer_with(
            {
                let n = n.clone();
                move || n.get() % 2
            },
            CellOptions::new(),
        ));

        let calls = Rc::new(Cell::new(0));
        let _sub = store
            .subscribe({
                let calls = calls.clone();
                move || calls.set(calls.get() + 1)
            })
            .unwrap();

        n.set(3);
        rt.flush();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn static_sources_never_notify() {
        let rt = Runtime::new();
        let store = rt.external_store(MaybeSignal::constant(5));
        assert!(store.is_static());

        let _sub = store.subscribe(|| panic!("static store notified")).unwrap();
        assert_eq!(*store.get_snapshot().unwrap(), 5);
        assert_eq!(rt.graph_stats().watched_effects, 0);
    }

    #[test]
    fn failing_source_rejects_subscription() {
        let rt = Runtime::new();
        rt.set_error_handler(|_| {});
        let broken = rt.try_computed(|| Err::<i32, _>("unavailable"));
        let store = rt.external_store(&broken);

        let err = store.subscribe(|| {}).unwrap_err();
        assert!(matches!(err, ReactiveError::Evaluation { .. }));
        assert_eq!(store.listener_count(), 0);
        assert_eq!(rt.graph_stats().watched_effects, 0);
    }

    #[test]
    fn synced_state_tracks_render_requests() {
        let rt = Runtime::new();
        let count = rt.signal(0);
        let requests = Rc::new(Cell::new(0));
        let state = rt
            .use_external_state(&count, {
                let requests = requests.clone();
                move || requests.set(requests.get() + 1)
            })
            .unwrap();

        assert_eq!(state.get().unwrap(), 0);
        assert!(!state.needs_render());

        count.set(3);
        rt.flush();
        assert!(state.needs_render());
        assert_eq!(requests.get(), 1);
        assert_eq!(state.get().unwrap(), 3);

        state.mark_rendered();
        assert!(!state.needs_render());
    }

    #[test]
    fn unsubscribing_inside_a_listener_is_safe() {
        let rt = Runtime::new();
        let signal = rt.signal(0);
        let store = rt.store_for(&signal);
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let sub = store
            .subscribe({
                let slot = slot.clone();
                move || {
                    let sub = slot.borrow_mut().take();
                    drop(sub);
                }
            })
            .unwrap();
        *slot.borrow_mut() = Some(sub);

        signal.set(1);
        rt.flush();
        assert_eq!(store.listener_count(), 0);
        assert_eq!(rt.graph_stats().watched_effects, 0);
    }
}
