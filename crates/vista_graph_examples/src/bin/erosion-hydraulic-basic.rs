use std::rc::Rc;

use vista_graph::prelude::*;
use vista_graph_examples::{init_tracing, write_field_png, Ramp};

fn main() -> anyhow::Result<()> {
    init_tracing();

    // Noise terrain eroded by rain; every output of the erosion node is rendered.
    let mut graph = Graph::new();
    let terrain = graph.add(NodeSpec::Noise(
        NoiseParams::default().with_scale(96.0).with_octaves(6).with_seed(7),
    ));
    let erosion = graph.add(NodeSpec::HydraulicErosion(
        HydraulicErosionParams::default()
            .with_settings(
                SimulationSettings::default()
                    .with_iteration_count(200)
                    .with_detail_level(1.0),
            )
            .with_rain_amount(0.012)
            .with_erosion_rate(0.2, 1.0),
    ));
    graph.connect_by_name(terrain, "output", erosion, "height")?;

    let compiled = GraphCompiler::compile(
        &graph,
        Rc::new(KernelRegistry::cpu()),
        &CompileOptions::default(),
    )?;

    let args = ExecutionArgs::new(256)
        .with_world_bounds(WorldBounds::square(512.0))
        .with_terrain_height(120.0)
        .with_seed(42);
    let mut pool = ResourcePool::new();
    let imports = ImportRegistry::new();

    let before = evaluate(&compiled, terrain, args.clone(), &mut pool, &imports)?;
    let after = evaluate(&compiled, erosion, args, &mut pool, &imports)?;

    if let Some(field) = before.field("output") {
        write_field_png(field, Ramp::Terrain, "erosion-hydraulic-before.png")?;
    }
    for (name, ramp) in [
        ("height", Ramp::Terrain),
        ("erosion", Ramp::Gray),
        ("deposition", Ramp::Gray),
    ] {
        if let Some(field) = after.field(name) {
            write_field_png(field, ramp, format!("erosion-hydraulic-{name}.png"))?;
        }
    }

    tracing::info!(
        allocations = pool.allocations(),
        free_fields = pool.free_fields(),
        "pool after two evaluations"
    );
    Ok(())
}
