//! Instance nodes: point generation and stamping instances onto fields.
//!
//! Stamping runs in two kernel passes. Instances are first expanded into quads
//! in chunks of at most `max_instances_per_dispatch`, each dispatch writing its
//! range at the instances' own indices; one composite pass then draws every
//! quad onto the base field.
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::args::WorldBounds;
use crate::error::Result;
use crate::exec::{ExecutionContext, NodeBehavior};
use crate::graph::{NodeId, Slot, SlotType};
use crate::kernel::{names, Bindings};
use crate::nodes::{input, output};
use crate::random::{rand01, seed_for_node};
use crate::resource::{Buffer, BufferDescriptor, InstanceQuad, PositionSample, RtDescriptor};

/// Instances expanded per dispatch unless configured otherwise.
pub const DEFAULT_MAX_INSTANCES_PER_DISPATCH: u32 = 4096;

/// Upper bound on the points one [`ScatterPointsParams`] node generates.
pub const MAX_SCATTER_POINTS: usize = 1 << 20;

/// Jittered grid of points over the world bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct ScatterPointsParams {
    spacing: f32,
    jitter: f32,
    seed: u64,
}

impl Default for ScatterPointsParams {
    fn default() -> Self {
        Self {
            spacing: 8.0,
            jitter: 1.0,
            seed: 0,
        }
    }
}

impl ScatterPointsParams {
    /// Grid cell size in world units.
    pub fn with_spacing(mut self, spacing: f32) -> Self {
        self.spacing = if spacing.is_finite() { spacing.max(1e-3) } else { 8.0 };
        self
    }

    /// Jitter in `[0, 1]`; 0 places points at cell centers.
    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    fn generate(&self, bounds: &WorldBounds, rng: &mut StdRng) -> Vec<PositionSample> {
        let mut spacing = self.spacing;
        let cells = |s: f32| {
            let cols = ((bounds.size_x / s).floor() as usize).max(1);
            let rows = ((bounds.size_z / s).floor() as usize).max(1);
            (cols, rows)
        };
        let (mut cols, mut rows) = cells(spacing);
        if cols.saturating_mul(rows) > MAX_SCATTER_POINTS {
            spacing = (bounds.size_x * bounds.size_z / MAX_SCATTER_POINTS as f32).sqrt();
            warn!(
                "Scatter spacing {} yields too many points; using {} instead.",
                self.spacing, spacing
            );
            (cols, rows) = cells(spacing);
        }

        let cell_w = bounds.size_x / cols as f32;
        let cell_h = bounds.size_z / rows as f32;
        let jitter_x = self.jitter * cell_w * 0.5;
        let jitter_z = self.jitter * cell_h * 0.5;

        let mut points = Vec::with_capacity(cols * rows);
        for j in 0..rows {
            for i in 0..cols {
                let cx = bounds.origin_x + (i as f32 + 0.5) * cell_w;
                let cz = bounds.origin_z + (j as f32 + 0.5) * cell_h;
                let jx = if jitter_x > 0.0 {
                    (rand01(rng) * 2.0 - 1.0) * jitter_x
                } else {
                    0.0
                };
                let jz = if jitter_z > 0.0 {
                    (rand01(rng) * 2.0 - 1.0) * jitter_z
                } else {
                    0.0
                };
                let mut sample = PositionSample::at(cx + jx, cz + jz);
                sample.rotation = rand01(rng) * std::f32::consts::TAU;
                points.push(sample);
            }
        }
        points
    }
}

impl NodeBehavior for ScatterPointsParams {
    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::input(input(0), "height", SlotType::Mask),
            Slot::output(output(0), "positions", SlotType::Buffer),
        ]
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[names::PARTICLES_PROJECT]
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let args = ctx.args().clone();
        let mut rng = StdRng::seed_from_u64(seed_for_node(args.seed, node, self.seed));
        let points = self.generate(&args.world_bounds, &mut rng);
        let height = ctx.input_texture(node, input(0));

        let desc = BufferDescriptor::of::<PositionSample>(points.len() as u32);
        let buffer = ctx.create_buffer(desc, node, output(0));
        PositionSample::write_all(&buffer, &points);
        debug!("Node {} scattered {} points.", node, points.len());
        ctx.dispatch(
            names::PARTICLES_PROJECT,
            &Bindings::new()
                .opt_field("height", height.as_ref())
                .buffer("positions", &buffer)
                .bounds(&args.world_bounds)
                .float("terrain_height", args.terrain_height),
        )
    }
}

/// How per-instance rotation and scale are derived.
///
/// Without a connected field an instance keeps its own value. With one, the
/// field value is mapped into `[min, max]`, blended over the instance's value
/// by the multiplier and clamped to the range.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceTransform {
    rotation_range: (f32, f32),
    rotation_multiplier: f32,
    scale_range: (f32, f32),
    scale_multiplier: f32,
}

impl Default for InstanceTransform {
    fn default() -> Self {
        Self {
            rotation_range: (0.0, std::f32::consts::TAU),
            rotation_multiplier: 1.0,
            scale_range: (0.5, 1.5),
            scale_multiplier: 1.0,
        }
    }
}

impl InstanceTransform {
    /// Rotation range in radians; the bounds are reordered if needed.
    pub fn with_rotation_range(mut self, min: f32, max: f32) -> Self {
        self.rotation_range = (min.min(max), min.max(max));
        self
    }

    pub fn with_rotation_multiplier(mut self, multiplier: f32) -> Self {
        self.rotation_multiplier = multiplier.clamp(0.0, 1.0);
        self
    }

    /// Scale range; negative scales are clamped to zero.
    pub fn with_scale_range(mut self, min: f32, max: f32) -> Self {
        let (min, max) = (min.max(0.0), max.max(0.0));
        self.scale_range = (min.min(max), min.max(max));
        self
    }

    pub fn with_scale_multiplier(mut self, multiplier: f32) -> Self {
        self.scale_multiplier = multiplier.clamp(0.0, 1.0);
        self
    }

    fn bind(&self, bindings: Bindings) -> Bindings {
        bindings
            .float("rotation_min", self.rotation_range.0)
            .float("rotation_max", self.rotation_range.1)
            .float("rotation_mult", self.rotation_multiplier)
            .float("scale_min", self.scale_range.0)
            .float("scale_max", self.scale_range.1)
            .float("scale_mult", self.scale_multiplier)
    }
}

/// Blend used by [`SplatterParams`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SplatBlend {
    #[default]
    Add,
    Max,
    Replace,
}

impl SplatBlend {
    fn kernel_mode(self) -> i64 {
        match self {
            SplatBlend::Add => 0,
            SplatBlend::Max => 1,
            SplatBlend::Replace => 2,
        }
    }
}

const FLATTEN_MODE: i64 = 3;

const BASE: u32 = 0;
const POSITIONS: u32 = 1;
const STAMP: u32 = 2;
const ROTATION: u32 = 3;
const SCALE: u32 = 4;

fn stamp_slots(base: &'static str, out: &'static str) -> Vec<Slot> {
    vec![
        Slot::input(input(BASE), base, SlotType::Mask),
        Slot::input(input(POSITIONS), "positions", SlotType::Buffer),
        Slot::input(input(STAMP), "stamp", SlotType::Mask),
        Slot::input(input(ROTATION), "rotation", SlotType::Mask),
        Slot::input(input(SCALE), "scale", SlotType::Mask),
        Slot::output(output(0), out, SlotType::Mask),
    ]
}

struct StampJob<'p> {
    mode: i64,
    size: f32,
    intensity: f32,
    chunk: usize,
    transform: &'p InstanceTransform,
}

/// Expands and composites the instances connected to `node`. Without
/// instances the base is forwarded unchanged.
fn stamp_instances(node: NodeId, ctx: &mut ExecutionContext<'_>, job: &StampJob<'_>) -> Result<()> {
    let buffer = ctx.input_buffer(node, input(POSITIONS));
    let count = buffer
        .as_ref()
        .and_then(PositionSample::read_all)
        .map_or(0, |samples| samples.len());
    let Some(buffer) = buffer.filter(|_| count > 0) else {
        debug!("Node {} has no instances; forwarding its base.", node);
        ctx.bypass(node, input(BASE), output(0));
        return Ok(());
    };

    let desc = BufferDescriptor::of::<InstanceQuad>(count as u32);
    let quads = ctx.create_temporary_buffer(desc, node, "quads");
    let result = expand_and_composite(node, ctx, job, &buffer, &quads, count);
    ctx.release_temporary(node, "quads");
    result
}

fn expand_and_composite(
    node: NodeId,
    ctx: &mut ExecutionContext<'_>,
    job: &StampJob<'_>,
    positions: &Buffer,
    quads: &Buffer,
    count: usize,
) -> Result<()> {
    let args = ctx.args().clone();
    let base = ctx.input_texture(node, input(BASE));
    let stamp = ctx.input_texture(node, input(STAMP));
    let rotation = ctx.input_texture(node, input(ROTATION));
    let scale = ctx.input_texture(node, input(SCALE));

    let mut first = 0;
    while first < count {
        let n = job.chunk.min(count - first);
        let bindings = Bindings::new()
            .buffer("positions", positions)
            .buffer("quads", quads)
            .opt_field("rotation", rotation.as_ref())
            .opt_field("scale", scale.as_ref())
            .bounds(&args.world_bounds)
            .float("terrain_height", args.terrain_height)
            .float("size", job.size)
            .int("base_index", first as i64)
            .int("count", n as i64);
        ctx.dispatch(names::INSTANCES_EXPAND, &job.transform.bind(bindings))?;
        first += n;
    }

    let resolution = ctx.output_resolution(base.as_ref());
    let dst = ctx.create_render_target(RtDescriptor::mask(resolution), node, output(0));
    ctx.dispatch(
        names::INSTANCES_COMPOSITE,
        &Bindings::new()
            .buffer("quads", quads)
            .opt_field("base", base.as_ref())
            .opt_field("stamp", stamp.as_ref())
            .field("dst", &dst)
            .bounds(&args.world_bounds)
            .int("mode", job.mode)
            .float("intensity", job.intensity)
            .int("count", count as i64),
    )
}

/// Stamps a mask at every instance onto the base field.
#[derive(Clone, Debug, PartialEq)]
pub struct SplatterParams {
    size: f32,
    intensity: f32,
    blend: SplatBlend,
    transform: InstanceTransform,
    max_instances_per_dispatch: u32,
}

impl Default for SplatterParams {
    fn default() -> Self {
        Self {
            size: 8.0,
            intensity: 1.0,
            blend: SplatBlend::Add,
            transform: InstanceTransform::default(),
            max_instances_per_dispatch: DEFAULT_MAX_INSTANCES_PER_DISPATCH,
        }
    }
}

impl SplatterParams {
    /// Stamp size in world units at scale 1.
    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size.max(0.0);
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity.max(0.0);
        self
    }

    pub fn with_blend(mut self, blend: SplatBlend) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_transform(mut self, transform: InstanceTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_max_instances_per_dispatch(mut self, max: u32) -> Self {
        self.max_instances_per_dispatch = max.max(1);
        self
    }
}

impl NodeBehavior for SplatterParams {
    fn slots(&self) -> Vec<Slot> {
        stamp_slots("base", "output")
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[names::INSTANCES_EXPAND, names::INSTANCES_COMPOSITE]
    }

    fn is_noop(&self) -> bool {
        self.intensity <= 0.0 || self.size <= 0.0
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let job = StampJob {
            mode: self.blend.kernel_mode(),
            size: self.size,
            intensity: self.intensity,
            chunk: self.max_instances_per_dispatch as usize,
            transform: &self.transform,
        };
        stamp_instances(node, ctx, &job)
    }
}

/// Pulls the height towards each instance's own height under its stamp.
#[derive(Clone, Debug, PartialEq)]
pub struct FlattenAtParams {
    size: f32,
    intensity: f32,
    transform: InstanceTransform,
    max_instances_per_dispatch: u32,
}

impl Default for FlattenAtParams {
    fn default() -> Self {
        Self {
            size: 8.0,
            intensity: 1.0,
            transform: InstanceTransform::default(),
            max_instances_per_dispatch: DEFAULT_MAX_INSTANCES_PER_DISPATCH,
        }
    }
}

impl FlattenAtParams {
    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size.max(0.0);
        self
    }

    /// Blend weight towards the instance height, in `[0, 1]`.
    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity.clamp(0.0, 1.0);
        self
    }

    pub fn with_transform(mut self, transform: InstanceTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_max_instances_per_dispatch(mut self, max: u32) -> Self {
        self.max_instances_per_dispatch = max.max(1);
        self
    }
}

impl NodeBehavior for FlattenAtParams {
    fn slots(&self) -> Vec<Slot> {
        stamp_slots("height", "height")
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[names::INSTANCES_EXPAND, names::INSTANCES_COMPOSITE]
    }

    fn is_noop(&self) -> bool {
        self.intensity <= 0.0 || self.size <= 0.0
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let job = StampJob {
            mode: FLATTEN_MODE,
            size: self.size,
            intensity: self.intensity,
            chunk: self.max_instances_per_dispatch as usize,
            transform: &self.transform,
        };
        stamp_instances(node, ctx, &job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::GraphExecution;
    use crate::graph::{Graph, NodeSpec};
    use crate::import::ImportRegistry;
    use crate::kernel::KernelRegistry;
    use crate::nodes::source::ImportBufferParams;
    use crate::nodes::testing::{args, compile, compile_with, run};
    use crate::resource::ResourcePool;

    #[test]
    fn scatter_is_seeded_and_inside_bounds() {
        let mut graph = Graph::new();
        let a = graph.add(NodeSpec::ScatterPoints(ScatterPointsParams::default().with_spacing(4.0)));
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let points = |seed: i64, pool: &mut ResourcePool| {
            let out = run(&compiled, a, args(32).with_seed(seed), pool, false).unwrap();
            PositionSample::read_all(out.buffer("positions").unwrap()).unwrap()
        };
        let first = points(3, &mut pool);
        assert_eq!(first.len(), 64);
        assert_eq!(first, points(3, &mut pool));
        assert_ne!(first, points(4, &mut pool));
        assert!(first
            .iter()
            .all(|p| (0.0..32.0).contains(&p.position[0]) && (0.0..32.0).contains(&p.position[2])));
    }

    #[test]
    fn scatter_samples_height_input() {
        let mut graph = Graph::new();
        let height = graph.add(NodeSpec::constant(0.5));
        let points = graph.add(NodeSpec::ScatterPoints(ScatterPointsParams::default().with_spacing(8.0)));
        graph.connect_by_name(height, "output", points, "height").unwrap();
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let out = run(&compiled, points, args(16), &mut pool, false).unwrap();
        let samples = PositionSample::read_all(out.buffer("positions").unwrap()).unwrap();
        assert!(samples.iter().all(|s| (s.position[1] - 5.0).abs() < 1e-5));
    }

    fn line_of_instances(n: usize) -> Vec<PositionSample> {
        (0..n)
            .map(|i| PositionSample::at(1.0 + (i % 14) as f32 * 2.0, 2.0 + (i / 14) as f32 * 2.0))
            .collect()
    }

    fn splat(n: usize, chunk: u32) -> (Vec<f32>, usize) {
        let mut graph = Graph::new();
        let points = graph.add(NodeSpec::ImportBuffer(ImportBufferParams::new("points")));
        let base = graph.add(NodeSpec::constant(0.1));
        let splatter = graph.add(NodeSpec::Splatter(
            SplatterParams::default()
                .with_size(3.0)
                .with_intensity(0.25)
                .with_max_instances_per_dispatch(chunk),
        ));
        graph.connect_by_name(points, "positions", splatter, "positions").unwrap();
        graph.connect_by_name(base, "output", splatter, "base").unwrap();
        let compiled = compile(&graph);

        let mut imports = ImportRegistry::new();
        imports.register_positions("points", line_of_instances(n));
        let mut pool = ResourcePool::new();
        let out = GraphExecution::new(&compiled, splatter, args(32), &mut pool, &imports)
            .unwrap()
            .finish()
            .unwrap();
        let dispatches = compiled.kernels().dispatch_count(names::INSTANCES_EXPAND);
        (out.field("output").unwrap().to_vec(), dispatches)
    }

    #[test]
    fn chunking_does_not_change_the_result() {
        let chunk = 8;
        for n in [chunk - 1, chunk, chunk + 1] {
            let (whole, one) = splat(n, 4096);
            let (chunked, dispatches) = splat(n, chunk as u32);
            assert_eq!(one, 1);
            assert_eq!(dispatches, n.div_ceil(chunk));
            assert_eq!(whole, chunked);
            assert!(whole.iter().any(|v| *v > 0.1));
        }
    }

    #[test]
    fn no_instances_forwards_the_base() {
        let mut graph = Graph::new();
        let base = graph.add(NodeSpec::constant(0.4));
        let splatter = graph.add(NodeSpec::Splatter(SplatterParams::default()));
        graph.connect_by_name(base, "output", splatter, "base").unwrap();
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let out = run(&compiled, splatter, args(8), &mut pool, false).unwrap();
        assert!(out.field("output").unwrap().read().iter().all(|v| *v == 0.4));
        assert_eq!(compiled.kernels().dispatch_count(names::INSTANCES_COMPOSITE), 0);
    }

    #[test]
    fn malformed_positions_are_ignored() {
        let mut kernels = KernelRegistry::cpu();
        kernels.register(names::PARTICLES_PROJECT, |b: &Bindings| -> Result<()> {
            b.get_buffer("positions")?.replace(vec![0.0; PositionSample::SIZE + 3]);
            Ok(())
        });
        let mut graph = Graph::new();
        let points = graph.add(NodeSpec::ScatterPoints(ScatterPointsParams::default()));
        let base = graph.add(NodeSpec::constant(0.2));
        let flatten = graph.add(NodeSpec::FlattenAt(FlattenAtParams::default()));
        graph.connect_by_name(points, "positions", flatten, "positions").unwrap();
        graph.connect_by_name(base, "output", flatten, "height").unwrap();
        let compiled = compile_with(&graph, kernels);
        let mut pool = ResourcePool::new();
        let out = run(&compiled, flatten, args(8), &mut pool, false).unwrap();
        assert!(out.field("height").unwrap().read().iter().all(|v| *v == 0.2));
        assert_eq!(pool.live_temporaries(), 0);
    }

    #[test]
    fn flatten_pulls_height_towards_instances() {
        let mut sample = PositionSample::at(8.0, 8.0);
        sample.position[1] = 10.0;
        let mut graph = Graph::new();
        let points = graph.add(NodeSpec::ImportBuffer(ImportBufferParams::new("p")));
        let base = graph.add(NodeSpec::constant(0.0));
        let flatten = graph.add(NodeSpec::FlattenAt(
            FlattenAtParams::default()
                .with_size(4.0)
                .with_transform(InstanceTransform::default().with_scale_range(1.0, 1.0)),
        ));
        graph.connect_by_name(points, "positions", flatten, "positions").unwrap();
        graph.connect_by_name(base, "output", flatten, "height").unwrap();
        let compiled = compile(&graph);
        let mut imports = ImportRegistry::new();
        imports.register_positions("p", vec![sample]);
        let mut pool = ResourcePool::new();
        let out = GraphExecution::new(&compiled, flatten, args(16), &mut pool, &imports)
            .unwrap()
            .finish()
            .unwrap();
        let height = out.field("height").unwrap().to_vec();
        // terrain height is 10, so the instance sits at normalized height 1
        assert_eq!(height[8 * 16 + 8], 1.0);
        assert_eq!(height[0], 0.0);
        assert_eq!(pool.live_temporaries(), 0);
    }
}
