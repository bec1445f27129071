//! Event types and sinks for observing graph evaluations.
//!
//! [`GraphExecution`](crate::exec::GraphExecution) reports what it does as
//! [`ExecutionEvent`]s. Pass any [`EventSink`] to the `*_with_events` methods
//! to collect, forward or drop them.
use crate::graph::NodeId;

/// Describes events emitted while evaluating a graph.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// Emitted when an evaluation starts.
    EvaluationStarted {
        /// Node the evaluation was requested for.
        target: NodeId,
        /// Number of nodes the plan runs.
        node_count: usize,
    },

    /// Emitted before a node executes.
    NodeStarted {
        node: NodeId,
        /// Display title of the node.
        title: String,
    },

    /// Emitted when a node forwards its inputs instead of executing.
    NodeBypassed { node: NodeId },

    /// Emitted after each step of a progressive node that did not finish it.
    NodeProgress {
        node: NodeId,
        /// Fraction of the node's work done, in `[0, 1]`.
        fraction: f32,
    },

    /// Emitted once a node has published its outputs.
    NodeFinished { node: NodeId },

    /// Emitted after the last node of the plan finished.
    EvaluationFinished { target: NodeId },

    /// Emitted when an evaluation is abandoned.
    EvaluationAborted {
        /// Node that was running, if any.
        node: Option<NodeId>,
    },

    /// Non-fatal warning raised during evaluation.
    Warning {
        /// Context string (e.g. node id).
        context: String,
        /// Human-readable message.
        message: String,
    },
}

/// A generic event sink that accepts [`ExecutionEvent`]s.
pub trait EventSink {
    fn send(&mut self, event: ExecutionEvent);

    fn send_many<I>(&mut self, events: I)
    where
        Self: Sized,
        I: IntoIterator<Item = ExecutionEvent>,
    {
        for e in events {
            self.send(e);
        }
    }
}

/// A no-op event sink.
impl EventSink for () {
    #[inline]
    fn send(&mut self, _event: ExecutionEvent) {}
}

/// An event sink that forwards to a user-provided closure.
pub struct FnSink<F>
where
    F: FnMut(ExecutionEvent),
{
    f: F,
}

impl<F> FnSink<F>
where
    F: FnMut(ExecutionEvent),
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventSink for FnSink<F>
where
    F: FnMut(ExecutionEvent),
{
    #[inline]
    fn send(&mut self, event: ExecutionEvent) {
        (self.f)(event);
    }
}

/// An event sink that collects all events in a `Vec`.
#[derive(Default)]
pub struct VecSink {
    events: Vec<ExecutionEvent>,
}

impl VecSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn into_inner(self) -> Vec<ExecutionEvent> {
        self.events
    }

    pub fn as_slice(&self) -> &[ExecutionEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSink for VecSink {
    #[inline]
    fn send(&mut self, event: ExecutionEvent) {
        self.events.push(event);
    }
}
