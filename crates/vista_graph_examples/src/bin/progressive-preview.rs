use std::rc::Rc;

use vista_graph::prelude::*;
use vista_graph_examples::{init_tracing, write_field_png, Ramp};

/// Writes a snapshot every this many steps.
const PREVIEW_EVERY: usize = 5;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut graph = Graph::new();
    let terrain = graph.add(NodeSpec::noise(64.0));
    let water = graph.add(NodeSpec::WaterFlow(
        WaterFlowParams::default()
            .with_settings(
                SimulationSettings::default()
                    .with_iteration_count(60)
                    .with_iterations_per_frame(3)
                    .with_detail_level(1.0),
            )
            .with_water_amount(0.04),
    ));
    graph.connect_by_name(terrain, "output", water, "height")?;

    let compiled = GraphCompiler::compile(
        &graph,
        Rc::new(KernelRegistry::cpu()),
        &CompileOptions::default(),
    )?;
    let args = ExecutionArgs::new(128)
        .with_world_bounds(WorldBounds::square(256.0))
        .with_terrain_height(60.0)
        .with_output_temp_height(true);
    let mut pool = ResourcePool::new();
    let imports = ImportRegistry::new();

    let mut sink = FnSink::new(|event: ExecutionEvent| {
        if let ExecutionEvent::NodeProgress { node, fraction } = event {
            tracing::debug!(%node, fraction, "progress");
        }
    });

    let mut execution = GraphExecution::new(&compiled, water, args, &mut pool, &imports)?
        .with_options(ExecutionOptions::new().with_progressive(true));

    let mut step = 0usize;
    loop {
        match execution.step_with_events(&mut sink)? {
            ExecutionProgress::Finished => break,
            ExecutionProgress::Running { node, fraction } => {
                step += 1;
                if step % PREVIEW_EVERY != 0 {
                    continue;
                }
                if let Some(preview) = execution.context().preview(node) {
                    tracing::info!(step, fraction, "writing preview");
                    write_field_png(preview, Ramp::Terrain, format!("progressive-preview-{step:03}.png"))?;
                }
            }
        }
    }

    let out = execution.finish()?;
    if let Some(field) = out.field("water") {
        write_field_png(field, Ramp::Water, "progressive-water.png")?;
    }
    Ok(())
}
