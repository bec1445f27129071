#![forbid(unsafe_code)]
//! vista_graph: procedural terrain graph engine with pooled resources, bypass
//! aliasing and progressive simulations.
//!
//! Modules:
//! - graph: author graphs of typed nodes, compile them and plan evaluations
//! - exec: execution context, node protocol, cooperative scheduler, events
//! - resource: pooled fields and buffers, position records
//! - nodes: built-in node kinds (sources, filters, simulations, instancing)
//! - kernel: named compute kernels and the reference CPU backend
//!
//! For examples, see the `vista_graph_examples` crate.
pub mod args;
pub mod error;
pub mod exec;
pub mod graph;
pub mod import;
pub mod kernel;
pub mod nodes;
pub mod random;
pub mod resource;

/// Convenient re-exports for common types. Import with `use vista_graph::prelude::*;`.
pub mod prelude {
    pub use crate::args::{ArgValue, ExecutionArgs, WorldBounds};
    pub use crate::error::{Error, Result};
    pub use crate::exec::{
        evaluate, EvaluationOutput, EventSink, ExecutionContext, ExecutionEvent, ExecutionOptions,
        ExecutionProgress, FnSink, GraphExecution, NodeBehavior, OutputValue, Progress,
        ProgressiveTask, VecSink,
    };
    pub use crate::graph::{
        CompileOptions, CompiledGraph, Direction, Graph, GraphCompiler, NodeId, NodeSpec, Slot,
        SlotId, SlotRef, SlotType,
    };
    pub use crate::import::{FieldSource, ImportRegistry};
    pub use crate::kernel::{names, Bindings, Kernel, KernelRegistry};
    pub use crate::nodes::filter::{BlurParams, CombineMode, CombineParams};
    pub use crate::nodes::scatter::{
        FlattenAtParams, InstanceTransform, ScatterPointsParams, SplatBlend, SplatterParams,
    };
    pub use crate::nodes::simulation::particles::{CrackParams, SlideParams};
    pub use crate::nodes::simulation::snow::SnowParams;
    pub use crate::nodes::simulation::thermal::{LandslideParams, ThermalErosionParams};
    pub use crate::nodes::simulation::water::{HydraulicErosionParams, WaterFlowParams};
    pub use crate::nodes::simulation::SimulationSettings;
    pub use crate::nodes::source::{ConstantParams, ImportBufferParams, ImportFieldParams, NoiseParams};
    pub use crate::nodes::variable::{GetVariableParams, OutputParams, SetVariableParams};
    pub use crate::resource::{
        Buffer, BufferDescriptor, Field2D, FieldFormat, InstanceQuad, PositionSample, ResourcePool,
        RtDescriptor,
    };
}
