mod common;

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use vista_graph::prelude::{
    evaluate, Graph, ImportRegistry, NodeSpec, ResourcePool, ScatterPointsParams, SplatterParams,
};

const RESOLUTION: u32 = 512;
const CHUNK_SIZES: [u32; 4] = [64, 512, 4096, 65536];

pub fn splatter_benches(c: &mut Criterion) {
    let mut graph = Graph::new();
    let base = graph.add(NodeSpec::noise(64.0));
    let points = graph.add(NodeSpec::ScatterPoints(
        ScatterPointsParams::default().with_spacing(2.0),
    ));
    graph
        .connect_by_name(base, "output", points, "height")
        .expect("height links");

    let instances = ((RESOLUTION as f32 / 2.0) as usize).pow(2);
    let imports = ImportRegistry::new();
    let mut group = c.benchmark_group("scatter/splatter");
    group.throughput(common::elements_throughput(instances));

    for &chunk in &CHUNK_SIZES {
        let mut graph = graph.clone();
        let splat = graph.add(NodeSpec::Splatter(
            SplatterParams::default()
                .with_size(3.0)
                .with_intensity(0.1)
                .with_max_instances_per_dispatch(chunk),
        ));
        graph
            .connect_by_name(base, "output", splat, "base")
            .expect("base links");
        graph
            .connect_by_name(points, "positions", splat, "positions")
            .expect("positions link");
        let compiled = common::compile(&graph);
        let mut pool = ResourcePool::new();

        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, _| {
            b.iter(|| {
                let out = evaluate(
                    &compiled,
                    splat,
                    common::bench_args(RESOLUTION),
                    &mut pool,
                    &imports,
                )
                .expect("evaluation succeeds");
                black_box(out.field("output").map(|f| f.read()[0]));
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = common::default_criterion();
    targets = splatter_benches
}
criterion_main!(benches);
