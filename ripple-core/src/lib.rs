//! Ripple Core
//!
//! This crate provides a fine-grained reactive state core for UI layers.
//! It implements:
//!
//! - State cells (signals) with custom equality
//! - Lazily evaluated, memoized computed cells
//! - Effects with cleanup, rerun by a batching flush scheduler
//! - A subscribe / get-snapshot bridge for external render layers
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Cells, effects, the runtime and the external-store bridge
//! - `graph`: Node identity, dirty states and the flush scheduler
//! - `config`: Runtime configuration
//! - `error`: The crate's error type
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::reactive::Runtime;
//!
//! let rt = Runtime::new();
//! let count = rt.signal(0);
//!
//! // Create a derived value
//! let doubled = rt.computed({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect
//! let effect = rt.effect({
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     move || println!("Count: {}, Doubled: {}", count.get(), doubled.get())
//! });
//!
//! // Update the signal; the effect reruns on the next flush
//! count.set(5);
//! rt.flush(); // prints: "Count: 5, Doubled: 10"
//! effect.dispose();
//! ```
//!
//! The free functions below work on the thread's default runtime.

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{FlushMode, RuntimeConfig};
pub use error::{BoxError, ReactiveError, Result};
pub use reactive::{
    CellOptions, Computed, Effect, ExternalStore, MaybeSignal, Runtime, Signal, SyncedState,
    WritableComputed,
};

/// Create a signal on the default runtime.
///
/// `None` is rejected with [`ReactiveError::InvalidValue`]: optional data has
/// to be wrapped explicitly.
pub fn create_signal<T: 'static>(value: Option<T>, options: CellOptions<T>) -> Result<Signal<T>> {
    Runtime::current().try_signal(value, options)
}

/// Create a computed cell on the default runtime.
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Runtime::current().computed(getter)
}

/// Create a writable computed cell on the default runtime.
pub fn writable_computed<T, G, S>(get: G, set: S) -> WritableComputed<T>
where
    T: PartialEq + 'static,
    G: Fn() -> T + 'static,
    S: Fn(T) + 'static,
{
    Runtime::current().writable_computed(get, set)
}

/// Register an effect on the default runtime.
pub fn effect<F>(f: F) -> Effect
where
    F: FnMut() + 'static,
{
    Runtime::current().effect(f)
}

/// Bind a render consumer to a source on the default runtime.
pub fn use_external_state<T: 'static>(
    source: impl Into<MaybeSignal<T>>,
    on_stale: impl FnMut() + 'static,
) -> Result<SyncedState<T>> {
    Runtime::current().use_external_state(source, on_stale)
}

/// Run `f` on the default runtime without recording reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untracked(f)
}

/// Flush the default runtime.
pub fn flush() -> reactive::FlushReport {
    Runtime::current().flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_functions_share_the_default_runtime() {
        let count = create_signal(Some(1), CellOptions::partial_eq()).unwrap();
        let doubled = computed({
            let count = count.clone();
            move || count.get() * 2
        });
        let seen = std::rc::Rc::new(std::cell::Cell::new(0));
        let watcher = effect({
            let (doubled, seen) = (doubled.clone(), seen.clone());
            move || seen.set(doubled.get())
        });

        count.set(4);
        assert_eq!(doubled.get(), 8);
        flush();
        assert_eq!(seen.get(), 8);
        watcher.dispose();
    }

    #[test]
    fn missing_initial_value_is_rejected() {
        let err = create_signal::<String>(None, CellOptions::default()).unwrap_err();
        assert!(matches!(err, ReactiveError::InvalidValue));
    }
}
