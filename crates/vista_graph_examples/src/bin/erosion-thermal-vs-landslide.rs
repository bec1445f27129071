use std::rc::Rc;

use vista_graph::prelude::*;
use vista_graph_examples::{init_tracing, write_field_png, Ramp};

fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = SimulationSettings::default()
        .with_iteration_count(120)
        .with_detail_level(1.0);

    // One terrain feeds both simulations through a variable.
    let mut graph = Graph::new();
    let noise = graph.add(NodeSpec::Noise(
        NoiseParams::default().with_scale(48.0).with_amplitude(1.0).with_seed(3),
    ));
    let store = graph.add(NodeSpec::set_variable("terrain", SlotType::Mask));
    graph.connect_by_name(noise, "output", store, "input")?;

    let thermal_in = graph.add(NodeSpec::get_variable("terrain", SlotType::Mask));
    let thermal = graph.add(NodeSpec::ThermalErosion(
        ThermalErosionParams::default()
            .with_settings(settings.clone())
            .with_resting_angle(30.0, 1.0),
    ));
    graph.connect_by_name(thermal_in, "output", thermal, "height")?;

    let slide_in = graph.add(NodeSpec::get_variable("terrain", SlotType::Mask));
    let landslide = graph.add(NodeSpec::Landslide(
        LandslideParams::default()
            .with_settings(settings)
            .with_soil_depth(0.08),
    ));
    graph.connect_by_name(slide_in, "output", landslide, "height")?;

    let compiled = GraphCompiler::compile(
        &graph,
        Rc::new(KernelRegistry::cpu()),
        &CompileOptions::default(),
    )?;
    let args = ExecutionArgs::new(192)
        .with_world_bounds(WorldBounds::square(256.0))
        .with_terrain_height(80.0);
    let mut pool = ResourcePool::new();
    let imports = ImportRegistry::new();

    for (name, node) in [("thermal", thermal), ("landslide", landslide)] {
        let out = evaluate(&compiled, node, args.clone(), &mut pool, &imports)?;
        for (slot, value) in out.iter() {
            if let OutputValue::Field(field) = value {
                write_field_png(field, Ramp::Terrain, format!("erosion-{name}-{slot}.png"))?;
            }
        }
    }
    Ok(())
}
