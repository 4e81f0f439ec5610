//! Error types for the reactive core.

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed error returned by fallible getters and effect callbacks.
///
/// The runtime is single-threaded, so no `Send`/`Sync` bound is required.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Everything that can go wrong inside the reactive core.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A state cell was created from a missing value.
    #[error("state cells cannot hold a missing value; wrap optional data explicitly")]
    InvalidValue,

    /// A computed getter or an effect callback failed. The node stays dirty.
    #[error("evaluation of node {node} failed: {source}")]
    Evaluation {
        node: NodeId,
        #[source]
        source: BoxError,
    },

    /// `Runtime::settle` ran out of flush passes before the graph went idle.
    #[error("graph did not settle after {passes} flush passes")]
    FlushLimitExceeded { passes: usize },

    /// The runtime that owns this node has been dropped.
    #[error("the runtime owning node {0} has been dropped")]
    RuntimeDropped(NodeId),

    /// Configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl ReactiveError {
    pub(crate) fn evaluation(node: NodeId, source: impl Into<BoxError>) -> Self {
        Self::Evaluation {
            node,
            source: source.into(),
        }
    }

    /// The node whose evaluation failed, if this is an evaluation error.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Evaluation { node, .. } | Self::RuntimeDropped(node) => Some(*node),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_error_keeps_source() {
        let node = NodeId::next();
        let err = ReactiveError::evaluation(node, "boom");

        assert_eq!(err.node(), Some(node));
        assert!(err.to_string().contains("boom"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn config_errors_convert_from_serde() {
        let parse = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = ReactiveError::from(parse);
        assert!(matches!(err, ReactiveError::Config(_)));
        assert_eq!(err.node(), None);
    }
}
