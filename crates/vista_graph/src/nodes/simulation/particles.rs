//! Simulations moving a position buffer over the terrain.
//!
//! Samples are projected onto the simulated height, then slide downhill one
//! step per iteration, drawing a ribbon between their previous and new
//! positions into the trail. [`CrackParams`] also carves the ribbon into the
//! height. A missing or malformed position buffer simply means no samples.
use tracing::debug;

use crate::error::Result;
use crate::exec::{ExecutionContext, NodeBehavior, ProgressiveTask};
use crate::graph::{NodeId, Slot, SlotId, SlotRef, SlotType};
use crate::kernel::{names, Bindings};
use crate::nodes::simulation::{begin, run_to_completion, trail_window, SimState, Simulation, SimulationSettings};
use crate::nodes::{input, output};
use crate::resource::{Buffer, BufferDescriptor, Field2D, PositionSample};

const HEIGHT: u32 = 0;
const POSITIONS: u32 = 1;
const OUT_TRAIL: u32 = 1;

/// How samples move, shared by both nodes. Lengths are in world units.
#[derive(Clone, Debug, PartialEq)]
struct Motion {
    friction: f32,
    step_size: f32,
    trail_width: f32,
    trail_intensity: f32,
}

impl Default for Motion {
    fn default() -> Self {
        Self {
            friction: 0.1,
            step_size: 1.0,
            trail_width: 2.0,
            trail_intensity: 1.0,
        }
    }
}

pub(crate) struct ParticleState {
    positions: Buffer,
    trail: Option<Field2D>,
}

fn setup_particles(ctx: &mut ExecutionContext<'_>, sim: &mut SimState) -> Result<ParticleState> {
    let samples = ctx
        .input_buffer(sim.node, input(POSITIONS))
        .and_then(|buffer| PositionSample::read_all(&buffer))
        .unwrap_or_default();
    debug!("Node {} moves {} samples.", sim.node, samples.len());

    let desc = BufferDescriptor::of::<PositionSample>(samples.len() as u32);
    let positions = sim.temporary_buffer(ctx, "positions", desc);
    PositionSample::write_all(&positions, &samples);
    let trail = sim
        .wants(ctx, output(OUT_TRAIL))
        .then(|| sim.temporary(ctx, "trail"));

    ctx.dispatch(
        names::PARTICLES_PROJECT,
        &sim.bindings()
            .field("height", &sim.height)
            .buffer("positions", &positions),
    )?;
    Ok(ParticleState { positions, trail })
}

fn step_particles(
    ctx: &ExecutionContext<'_>,
    sim: &SimState,
    state: &ParticleState,
    motion: &Motion,
    settings: &SimulationSettings,
    iteration: u32,
    carve: impl FnOnce(Bindings) -> Bindings,
) -> Result<()> {
    let count = settings.iteration_count().max(1);
    let bindings = sim
        .bindings()
        .field("height", &sim.height)
        .buffer("positions", &state.positions)
        .opt_field("trail", state.trail.as_ref())
        .float("friction", motion.friction)
        .float("step_size", motion.step_size)
        .float("age_step", 1.0 / count as f32)
        .float("trail_width", motion.trail_width)
        .float(
            "trail_weight",
            motion.trail_intensity * trail_window(iteration, count),
        );
    ctx.dispatch(names::PARTICLES_STEP, &carve(bindings))
}

fn particle_slots(first_output: &'static str, first_type: SlotType) -> Vec<Slot> {
    vec![
        Slot::input(input(HEIGHT), "height", SlotType::Mask),
        Slot::input(input(POSITIONS), "positions", SlotType::Buffer),
        Slot::output(output(0), first_output, first_type),
        Slot::output(output(OUT_TRAIL), "trail", SlotType::Mask),
    ]
}

/// Samples slide downhill; outputs their final positions and their trail.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SlideParams {
    settings: SimulationSettings,
    motion: Motion,
}

impl SlideParams {
    pub fn with_settings(mut self, settings: SimulationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Velocity and energy lost per step, in `[0, 1]`.
    pub fn with_friction(mut self, friction: f32) -> Self {
        self.motion.friction = friction.clamp(0.0, 1.0);
        self
    }

    /// Longest move per step.
    pub fn with_step_size(mut self, step_size: f32) -> Self {
        self.motion.step_size = step_size.max(1e-3);
        self
    }

    pub fn with_trail_width(mut self, width: f32) -> Self {
        self.motion.trail_width = width.max(0.0);
        self
    }

    pub fn with_trail_intensity(mut self, intensity: f32) -> Self {
        self.motion.trail_intensity = intensity.max(0.0);
        self
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }
}

impl Simulation for SlideParams {
    type State = ParticleState;

    fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    fn setup(&self, ctx: &mut ExecutionContext<'_>, sim: &mut SimState) -> Result<ParticleState> {
        setup_particles(ctx, sim)
    }

    fn iterate(
        &self,
        ctx: &ExecutionContext<'_>,
        sim: &SimState,
        state: &mut ParticleState,
        iteration: u32,
    ) -> Result<()> {
        step_particles(ctx, sim, state, &self.motion, &self.settings, iteration, |b| b)
    }

    fn resolve(&self, ctx: &mut ExecutionContext<'_>, sim: &SimState, state: &ParticleState) -> Result<()> {
        let out = SlotRef::new(sim.node, output(0));
        if ctx.is_output_consumed(out) {
            let buffer = ctx.create_buffer(state.positions.descriptor(), sim.node, output(0));
            buffer.replace(state.positions.to_vec());
        } else {
            ctx.link_to_invalid(out);
        }
        sim.resolve_layer(ctx, names::RESOLVE_TRAIL, output(OUT_TRAIL), state.trail.as_ref())
    }
}

impl NodeBehavior for SlideParams {
    fn slots(&self) -> Vec<Slot> {
        particle_slots("positions", SlotType::Buffer)
    }

    fn passthrough(&self, out: SlotId) -> Option<SlotId> {
        (out == output(0)).then_some(input(POSITIONS))
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[
            names::RESAMPLE,
            names::PARTICLES_PROJECT,
            names::PARTICLES_STEP,
            names::RESOLVE_TRAIL,
        ]
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        run_to_completion(self, node, ctx)
    }

    fn begin(
        &self,
        node: NodeId,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Option<Box<dyn ProgressiveTask>>> {
        begin(self, node, ctx)
    }
}

/// Samples slide downhill and carve a V-shaped groove along their path.
#[derive(Clone, Debug, PartialEq)]
pub struct CrackParams {
    settings: SimulationSettings,
    motion: Motion,
    depth: f32,
}

impl Default for CrackParams {
    fn default() -> Self {
        Self {
            settings: SimulationSettings::default(),
            motion: Motion {
                friction: 0.05,
                ..Motion::default()
            },
            depth: 0.02,
        }
    }
}

impl CrackParams {
    pub fn with_settings(mut self, settings: SimulationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.motion.friction = friction.clamp(0.0, 1.0);
        self
    }

    pub fn with_step_size(mut self, step_size: f32) -> Self {
        self.motion.step_size = step_size.max(1e-3);
        self
    }

    /// Width of the groove in world units.
    pub fn with_width(mut self, width: f32) -> Self {
        self.motion.trail_width = width.max(0.0);
        self
    }

    /// Normalized depth carved per step at the groove's center line.
    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = depth.max(0.0);
        self
    }

    pub fn with_trail_intensity(mut self, intensity: f32) -> Self {
        self.motion.trail_intensity = intensity.max(0.0);
        self
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }
}

impl Simulation for CrackParams {
    type State = ParticleState;

    fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    fn setup(&self, ctx: &mut ExecutionContext<'_>, sim: &mut SimState) -> Result<ParticleState> {
        setup_particles(ctx, sim)
    }

    fn iterate(
        &self,
        ctx: &ExecutionContext<'_>,
        sim: &SimState,
        state: &mut ParticleState,
        iteration: u32,
    ) -> Result<()> {
        step_particles(ctx, sim, state, &self.motion, &self.settings, iteration, |b| {
            b.int("mode", 1).float("carve_depth", self.depth)
        })
    }

    fn resolve(&self, ctx: &mut ExecutionContext<'_>, sim: &SimState, state: &ParticleState) -> Result<()> {
        sim.resolve_height(ctx, output(0), &sim.height, Some(&sim.initial))?;
        sim.resolve_layer(ctx, names::RESOLVE_TRAIL, output(OUT_TRAIL), state.trail.as_ref())
    }
}

impl NodeBehavior for CrackParams {
    fn slots(&self) -> Vec<Slot> {
        particle_slots("height", SlotType::Mask)
    }

    fn passthrough(&self, out: SlotId) -> Option<SlotId> {
        (out == output(0)).then_some(input(HEIGHT))
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[
            names::RESAMPLE,
            names::PARTICLES_PROJECT,
            names::PARTICLES_STEP,
            names::RESOLVE_HEIGHT,
            names::RESOLVE_TRAIL,
        ]
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        run_to_completion(self, node, ctx)
    }

    fn begin(
        &self,
        node: NodeId,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Option<Box<dyn ProgressiveTask>>> {
        begin(self, node, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{EvaluationOutput, ExecutionOptions, GraphExecution, OutputValue};
    use crate::graph::{Graph, NodeSpec};
    use crate::import::ImportRegistry;
    use crate::nodes::source::{ImportBufferParams, ImportFieldParams};
    use crate::nodes::testing::{approx_eq, args, compile};
    use crate::resource::ResourcePool;

    fn settings(iterations: u32, per_frame: u32) -> SimulationSettings {
        SimulationSettings::default()
            .with_iteration_count(iterations)
            .with_iterations_per_frame(per_frame)
            .with_detail_level(1.0)
    }

    /// Runs `spec` on a ramp rising along +x with samples at `points`.
    /// Returns the ramp's own output and the node's.
    fn on_ramp(spec: NodeSpec, points: Option<&[(f32, f32)]>, progressive: bool) -> (EvaluationOutput, EvaluationOutput) {
        let mut graph = Graph::new();
        let ramp = graph.add(NodeSpec::ImportField(ImportFieldParams::new("ramp")));
        let node = graph.add(spec);
        graph.connect_by_name(ramp, "output", node, "height").unwrap();
        let mut imports = ImportRegistry::new();
        imports.register_field("ramp", |_: usize, p: glam::Vec2| p.x / 16.0);
        if let Some(points) = points {
            let samples = points.iter().map(|(x, z)| PositionSample::at(*x, *z)).collect();
            imports.register_positions("points", samples);
            let source = graph.add(NodeSpec::ImportBuffer(ImportBufferParams::new("points")));
            graph.connect_by_name(source, "positions", node, "positions").unwrap();
        }
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let mut evaluate = |target| {
            GraphExecution::new(&compiled, target, args(16), &mut pool, &imports)
                .unwrap()
                .with_options(ExecutionOptions::new().with_progressive(progressive))
                .finish()
                .unwrap()
        };
        let input = evaluate(ramp);
        let output = evaluate(node);
        assert_eq!(pool.live_temporaries(), 0);
        (input, output)
    }

    #[test]
    fn slide_moves_samples_downhill_and_draws_a_trail() {
        let slide = SlideParams::default().with_settings(settings(6, 2));
        let (_, out) = on_ramp(NodeSpec::Slide(slide), Some(&[(12.0, 8.0), (10.0, 4.0)]), false);
        let samples = PositionSample::read_all(out.buffer("positions").unwrap()).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].position[0] < 12.0);
        assert!(samples[1].position[0] < 10.0);
        // the ramp has no slope along z
        assert!((samples[0].position[2] - 8.0).abs() < 1e-4);
        assert!((samples[1].position[2] - 4.0).abs() < 1e-4);
        assert!(out.field("trail").unwrap().read().iter().any(|v| *v > 0.0));
    }

    #[test]
    fn slide_without_samples_outputs_nothing_to_move() {
        let slide = SlideParams::default().with_settings(settings(4, 4));
        let (_, out) = on_ramp(NodeSpec::Slide(slide), None, true);
        let samples = PositionSample::read_all(out.buffer("positions").unwrap()).unwrap();
        assert!(samples.is_empty());
        assert!(out.field("trail").unwrap().read().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn crack_without_iterations_reproduces_the_input_height() {
        let crack = CrackParams::default().with_settings(settings(0, 1));
        let (input, out) = on_ramp(NodeSpec::Crack(crack), Some(&[(12.0, 8.0)]), true);
        assert!(approx_eq(
            &out.field("height").unwrap().to_vec(),
            &input.field("output").unwrap().to_vec(),
            1e-6
        ));
    }

    #[test]
    fn crack_carves_and_matches_progressive_run() {
        let make = |k| {
            NodeSpec::Crack(
                CrackParams::default()
                    .with_settings(settings(8, k))
                    .with_depth(0.05),
            )
        };
        let points: &[(f32, f32)] = &[(12.0, 8.0), (14.0, 3.0)];
        let (input, immediate) = on_ramp(make(1), Some(points), false);
        let before = input.field("output").unwrap().to_vec();
        let after = immediate.field("height").unwrap().to_vec();
        assert!(after.iter().zip(&before).all(|(a, b)| *a <= *b + 1e-6));
        assert!(after.iter().zip(&before).any(|(a, b)| *a < *b - 1e-4));

        for k in [1, 3] {
            let (_, progressive) = on_ramp(make(k), Some(points), true);
            for name in ["height", "trail"] {
                assert!(approx_eq(
                    &progressive.field(name).unwrap().to_vec(),
                    &immediate.field(name).unwrap().to_vec(),
                    1e-6
                ));
            }
        }
    }

    #[test]
    fn disabled_slide_forwards_positions_without_a_trail() {
        let mut graph = Graph::new();
        let source = graph.add(NodeSpec::ImportBuffer(ImportBufferParams::new("points")));
        let slide = graph.add(NodeSpec::Slide(SlideParams::default()));
        graph.connect_by_name(source, "positions", slide, "positions").unwrap();
        graph.set_enabled(slide, false);
        let mut imports = ImportRegistry::new();
        imports.register_positions("points", vec![PositionSample::at(3.0, 4.0), PositionSample::at(9.0, 2.0)]);
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();

        let out = GraphExecution::new(&compiled, slide, args(16), &mut pool, &imports)
            .unwrap()
            .finish()
            .unwrap();
        let samples = PositionSample::read_all(out.buffer("positions").unwrap()).unwrap();
        assert_eq!(samples, vec![PositionSample::at(3.0, 4.0), PositionSample::at(9.0, 2.0)]);
        assert!(matches!(out.get("trail"), Some(OutputValue::Empty)));
        assert_eq!(compiled.kernels().dispatch_count(names::PARTICLES_STEP), 0);
    }
}
