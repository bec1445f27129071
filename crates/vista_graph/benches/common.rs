#![allow(dead_code)]

use std::rc::Rc;
use std::time::Duration;

use criterion::{Criterion, Throughput};
use vista_graph::prelude::{
    CompileOptions, CompiledGraph, ExecutionArgs, Graph, GraphCompiler, KernelRegistry, NodeId,
    NodeSpec, WorldBounds,
};

pub const SAMPLE_SIZE: usize = 20;
pub const WARM_UP: Duration = Duration::from_secs(1);
pub const MEASUREMENT_TIME: Duration = Duration::from_secs(2);

pub fn default_criterion() -> Criterion {
    Criterion::default()
        .configure_from_args()
        .sample_size(SAMPLE_SIZE)
        .warm_up_time(WARM_UP)
        .measurement_time(MEASUREMENT_TIME)
}

pub fn elements_throughput(elements: usize) -> Throughput {
    Throughput::Elements(elements.max(1) as u64)
}

/// One texel per world unit, fixed seed.
pub fn bench_args(resolution: u32) -> ExecutionArgs {
    ExecutionArgs::new(resolution)
        .with_world_bounds(WorldBounds::square(resolution as f32))
        .with_terrain_height(100.0)
        .with_seed(0x5EED)
}

/// Connects `node`'s first input named `input` to a noise source.
pub fn on_noise(node: NodeSpec, input: &str) -> (Graph, NodeId) {
    let mut graph = Graph::new();
    let noise = graph.add(NodeSpec::noise(64.0));
    let target = graph.add(node);
    graph
        .connect_by_name(noise, "output", target, input)
        .expect("noise output links to a mask input");
    (graph, target)
}

pub fn compile(graph: &Graph) -> CompiledGraph {
    GraphCompiler::compile(graph, Rc::new(KernelRegistry::cpu()), &CompileOptions::default())
        .expect("bench graph compiles")
}
