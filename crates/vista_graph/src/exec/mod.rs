//! Graph evaluation: the node protocol, the per-evaluation context and the
//! scheduler that drives both.
pub mod context;
pub mod events;
pub mod protocol;
pub mod scheduler;

pub use context::ExecutionContext;
pub use events::{EventSink, ExecutionEvent, FnSink, VecSink};
pub use protocol::{NodeBehavior, Progress, ProgressiveTask};
pub use scheduler::{
    evaluate, EvaluationOutput, ExecutionOptions, ExecutionProgress, GraphExecution, OutputValue,
};
