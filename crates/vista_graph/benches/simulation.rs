mod common;

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use vista_graph::prelude::{
    evaluate, HydraulicErosionParams, ImportRegistry, NodeSpec, ResourcePool, SimulationSettings,
    ThermalErosionParams,
};

const RESOLUTIONS: [u32; 3] = [64, 128, 256];
const ITERATIONS: u32 = 16;

fn settings() -> SimulationSettings {
    SimulationSettings::default()
        .with_iteration_count(ITERATIONS)
        .with_detail_level(1.0)
}

fn bench_node(c: &mut Criterion, group_name: &str, make: impl Fn() -> NodeSpec) {
    let mut group = c.benchmark_group(group_name);
    let imports = ImportRegistry::new();

    for &resolution in &RESOLUTIONS {
        let (graph, target) = common::on_noise(make(), "height");
        let compiled = common::compile(&graph);
        // The pool persists across iterations so steady-state runs reuse resources.
        let mut pool = ResourcePool::new();

        group.throughput(common::elements_throughput(
            (resolution * resolution * ITERATIONS) as usize,
        ));
        group.bench_with_input(
            BenchmarkId::from_parameter(resolution),
            &resolution,
            |b, &resolution| {
                b.iter(|| {
                    let out = evaluate(
                        &compiled,
                        target,
                        common::bench_args(resolution),
                        &mut pool,
                        &imports,
                    )
                    .expect("evaluation succeeds");
                    black_box(out.field("height").map(|f| f.read()[0]));
                });
            },
        );
    }

    group.finish();
}

pub fn simulation_benches(c: &mut Criterion) {
    bench_node(c, "simulation/hydraulic_erosion", || {
        NodeSpec::HydraulicErosion(HydraulicErosionParams::default().with_settings(settings()))
    });
    bench_node(c, "simulation/thermal_erosion", || {
        NodeSpec::ThermalErosion(ThermalErosionParams::default().with_settings(settings()))
    });
}

criterion_group! {
    name = benches;
    config = common::default_criterion();
    targets = simulation_benches
}
criterion_main!(benches);
