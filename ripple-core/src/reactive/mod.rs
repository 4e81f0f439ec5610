//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computed cells,
//! effects and the bridge that exposes cells to a rendering layer.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a computed or effect), the signal
//! automatically registers that context as a dependent. When the signal's
//! value changes, all dependents are marked.
//!
//! ## Computed
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changed, and only when read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that reruns during the next flush
//! after any of its dependencies change.
//!
//! ## External stores
//!
//! An [`ExternalStore`] turns a cell into a subscribe / get-snapshot pair for
//! render layers that poll for changes.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic: each [`Runtime`] owns a stack of tracking
//! frames, and reading a cell records it in the innermost one. Reverse edges
//! are weak, forward edges are strong, so a derived cell is kept alive by
//! whatever reads it and dropped with it.

mod bridge;
mod computed;
mod context;
mod effect;
mod options;
mod runtime;
mod signal;
mod subscriber;

pub use bridge::{ExternalStore, MaybeSignal, Subscription, SyncedState};
pub use computed::{Computed, WritableComputed};
pub use effect::{Cleanup, Effect};
pub use options::{CellOptions, EqualsFn};
pub use runtime::{FlushReport, GraphStats, Microtask, Runtime};
pub use signal::Signal;
