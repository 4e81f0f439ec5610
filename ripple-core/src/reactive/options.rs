//! Per-cell options shared by signals and computed cells.

use std::fmt;
use std::rc::Rc;

/// Equality used to decide whether a new value is a change.
pub type EqualsFn<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Options accepted when creating a cell.
///
/// The default has no equality function, so every write counts as a change.
/// Use [`CellOptions::partial_eq`] (what `Runtime::signal` and
/// `Runtime::computed` use) or [`CellOptions::equals`] to short-circuit
/// equal writes.
pub struct CellOptions<T> {
    pub(crate) equals: Option<EqualsFn<T>>,
    pub(crate) label: Option<String>,
}

impl<T> CellOptions<T> {
    pub fn new() -> Self {
        Self {
            equals: None,
            label: None,
        }
    }

    /// Use a custom comparator.
    pub fn equals(mut self, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equals = Some(Rc::new(equals));
        self
    }

    /// Attach a debug label, reported in traces.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl<T: PartialEq + 'static> CellOptions<T> {
    /// Compare values with `PartialEq`.
    pub fn partial_eq() -> Self {
        Self::new().equals(|a: &T, b: &T| a == b)
    }
}

impl<T> Default for CellOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CellOptions<T> {
    fn clone(&self) -> Self {
        Self {
            equals: self.equals.clone(),
            label: self.label.clone(),
        }
    }
}

impl<T> fmt::Debug for CellOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellOptions")
            .field("has_equals", &self.equals.is_some())
            .field("label", &self.label)
            .finish()
    }
}
