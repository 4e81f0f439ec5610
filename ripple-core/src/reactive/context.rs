//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell is read,
//! we can record it as a dependency of the current computation.
//!
//! # Implementation
//!
//! Each runtime owns a stack of frames. When entering a reactive context
//! (e.g., running a computed getter or an effect), we push a frame. When the
//! computation completes, the frame is popped and its recorded reads become
//! the computation's new dependency set.
//!
//! This design supports nested reactive contexts (e.g., a computed that reads
//! from another computed): only the innermost frame records reads. A frame
//! without a subscriber is an untracked scope that swallows reads.

use std::cell::RefCell;
use std::rc::Rc;

use super::subscriber::{Dependencies, Dependency, Source};
use crate::graph::NodeId;

/// An entry in the reactive context stack.
struct Frame {
    /// The computation being evaluated, `None` for untracked scopes.
    subscriber: Option<NodeId>,
    /// Sources read during this evaluation, deduplicated, in read order.
    sources: Dependencies,
}

/// Per-runtime stack of in-flight evaluations.
#[derive(Default)]
pub(crate) struct TrackingStack {
    frames: RefCell<Vec<Frame>>,
}

impl TrackingStack {
    /// Enter a new reactive context.
    ///
    /// The context is popped when the returned guard is finished or dropped,
    /// so the stack stays balanced even if the computation panics.
    pub(crate) fn enter(&self, subscriber: Option<NodeId>) -> ReactiveContext<'_> {
        self.frames.borrow_mut().push(Frame {
            subscriber,
            sources: Dependencies::new(),
        });
        ReactiveContext {
            stack: self,
            subscriber,
            finished: false,
        }
    }

    /// Check if reads are currently being recorded.
    pub(crate) fn is_tracking(&self) -> bool {
        self.current_subscriber().is_some()
    }

    /// Get the computation reads are recorded for, if any.
    pub(crate) fn current_subscriber(&self) -> Option<NodeId> {
        self.frames
            .borrow()
            .last()
            .and_then(|frame| frame.subscriber)
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Record a read of `source` in the innermost frame.
    pub(crate) fn record(&self, source: Rc<dyn Source>) {
        let mut frames = self.frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        if frame.subscriber.is_none() {
            return;
        }

        let id = source.id();
        if frame.sources.iter().any(|dep| dep.source.id() == id) {
            return;
        }
        let version = source.version();
        frame.sources.push(Dependency { source, version });
    }

    fn pop(&self, expected: Option<NodeId>) -> Dependencies {
        let popped = self.frames.borrow_mut().pop();
        match popped {
            Some(frame) => {
                // Catch mismatched enter/exit pairs early.
                debug_assert_eq!(
                    frame.subscriber, expected,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    expected, frame.subscriber
                );
                frame.sources
            }
            None => Dependencies::new(),
        }
    }
}

/// Guard that pops the context when finished or dropped.
pub(crate) struct ReactiveContext<'a> {
    stack: &'a TrackingStack,
    subscriber: Option<NodeId>,
    finished: bool,
}

impl ReactiveContext<'_> {
    /// Leave the context and return the sources read inside it.
    pub(crate) fn finish(mut self) -> Dependencies {
        self.finished = true;
        self.stack.pop(self.subscriber)
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.stack.pop(self.subscriber);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::reactive::subscriber::Dependents;

    struct Leaf {
        id: NodeId,
        dependents: Dependents,
    }

    impl Source for Leaf {
        fn id(&self) -> NodeId {
            self.id
        }

        fn version(&self) -> u64 {
            3
        }

        fn refresh(&self) -> Result<()> {
            Ok(())
        }

        fn dependents(&self) -> &Dependents {
            &self.dependents
        }
    }

    fn leaf() -> Rc<dyn Source> {
        Rc::new(Leaf {
            id: NodeId::next(),
            dependents: Dependents::default(),
        })
    }

    #[test]
    fn context_tracks_subscriber() {
        let stack = TrackingStack::default();
        let id = NodeId::next();

        assert!(!stack.is_tracking());
        assert!(stack.current_subscriber().is_none());

        {
            let _ctx = stack.enter(Some(id));

            assert!(stack.is_tracking());
            assert_eq!(stack.current_subscriber(), Some(id));
        }

        // Context should be cleaned up after drop
        assert!(!stack.is_tracking());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn context_records_deduplicated_reads() {
        let stack = TrackingStack::default();
        let ctx = stack.enter(Some(NodeId::next()));

        let a = leaf();
        let b = leaf();
        stack.record(a.clone());
        stack.record(b.clone());
        stack.record(a.clone());

        let deps = ctx.finish();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].source.id(), a.id());
        assert_eq!(deps[1].source.id(), b.id());
        assert_eq!(deps[0].version, 3);
    }

    #[test]
    fn nested_contexts_record_innermost_only() {
        let stack = TrackingStack::default();
        let outer_id = NodeId::next();
        let inner_id = NodeId::next();

        let outer = stack.enter(Some(outer_id));
        stack.record(leaf());

        let inner = stack.enter(Some(inner_id));
        assert_eq!(stack.current_subscriber(), Some(inner_id));
        stack.record(leaf());
        stack.record(leaf());
        assert_eq!(inner.finish().len(), 2);

        // After inner context finishes, outer should be current
        assert_eq!(stack.current_subscriber(), Some(outer_id));
        assert_eq!(outer.finish().len(), 1);
    }

    #[test]
    fn untracked_frame_swallows_reads() {
        let stack = TrackingStack::default();
        let outer = stack.enter(Some(NodeId::next()));

        {
            let untracked = stack.enter(None);
            assert!(!stack.is_tracking());
            stack.record(leaf());
            assert!(untracked.finish().is_empty());
        }

        assert!(stack.is_tracking());
        assert!(outer.finish().is_empty());
    }
}
