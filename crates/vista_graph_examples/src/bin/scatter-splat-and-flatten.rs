use std::rc::Rc;

use vista_graph::prelude::*;
use vista_graph_examples::{init_tracing, write_field_png, write_points_png, Ramp};

fn main() -> anyhow::Result<()> {
    init_tracing();

    let bounds = WorldBounds::square(256.0);
    let mut graph = Graph::new();
    let terrain = graph.add(NodeSpec::Noise(NoiseParams::default().with_scale(80.0).with_seed(11)));

    // Scatter points on the terrain, then splat rocks and flatten pads at them.
    let points = graph.add(NodeSpec::ScatterPoints(
        ScatterPointsParams::default()
            .with_spacing(24.0)
            .with_jitter(0.8)
            .with_seed(5),
    ));
    graph.connect_by_name(terrain, "output", points, "height")?;

    let rocks = graph.add(NodeSpec::Splatter(
        SplatterParams::default()
            .with_size(10.0)
            .with_intensity(0.15)
            .with_blend(SplatBlend::Add)
            .with_transform(InstanceTransform::default().with_scale_range(0.6, 1.4))
            .with_max_instances_per_dispatch(32),
    ));
    graph.connect_by_name(terrain, "output", rocks, "base")?;
    graph.connect_by_name(points, "positions", rocks, "positions")?;

    let pads = graph.add(NodeSpec::FlattenAt(
        FlattenAtParams::default().with_size(8.0).with_intensity(0.9),
    ));
    graph.connect_by_name(rocks, "output", pads, "height")?;
    graph.connect_by_name(points, "positions", pads, "positions")?;

    let compiled = GraphCompiler::compile(
        &graph,
        Rc::new(KernelRegistry::cpu()),
        &CompileOptions::default(),
    )?;
    let args = ExecutionArgs::new(256)
        .with_world_bounds(bounds)
        .with_terrain_height(50.0)
        .with_seed(1);
    let mut pool = ResourcePool::new();
    let imports = ImportRegistry::new();

    let scattered = evaluate(&compiled, points, args.clone(), &mut pool, &imports)?;
    if let Some(buffer) = scattered.buffer("positions") {
        let samples = PositionSample::read_all(buffer)
            .ok_or_else(|| anyhow::anyhow!("positions buffer is not a list of records"))?;
        tracing::info!(count = samples.len(), "scattered points");
        write_points_png(&samples, &bounds, 512, "scatter-points.png")?;
    }

    let out = evaluate(&compiled, pads, args, &mut pool, &imports)?;
    if let Some(field) = out.field("height") {
        write_field_png(field, Ramp::Terrain, "scatter-splat-and-flatten.png")?;
    }
    tracing::info!(kernels = ?compiled.kernels().dispatch_count(names::INSTANCES_EXPAND), "expand dispatches");
    Ok(())
}
