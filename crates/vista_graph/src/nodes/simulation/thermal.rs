//! Slope-driven material transport: thermal erosion and landslides.
use crate::error::Result;
use crate::exec::{ExecutionContext, NodeBehavior, ProgressiveTask};
use crate::graph::{NodeId, Slot, SlotId, SlotType};
use crate::kernel::{names, Bindings};
use crate::nodes::simulation::{
    begin, run_to_completion, talus, trail_window, SimState, Simulation, SimulationSettings,
};
use crate::nodes::{input, output};
use crate::resource::{Buffer, Field2D};

const HEIGHT: u32 = 0;
const MASK: u32 = 1;

/// Resting angle and rate shared by both nodes, each as `base * multiplier`.
#[derive(Clone, Debug, PartialEq)]
struct Transport {
    resting_angle: f32,
    resting_angle_multiplier: f32,
    rate: f32,
    rate_multiplier: f32,
}

impl Transport {
    fn bind(&self, bindings: Bindings) -> Bindings {
        let angle = (self.resting_angle * self.resting_angle_multiplier).clamp(0.0, 90.0);
        bindings
            .float("talus", talus(angle))
            .float("rate", (self.rate * self.rate_multiplier).clamp(0.0, 1.0))
    }
}

/// Material steeper than the resting angle crumbles towards lower neighbours.
#[derive(Clone, Debug, PartialEq)]
pub struct ThermalErosionParams {
    settings: SimulationSettings,
    transport: Transport,
}

impl Default for ThermalErosionParams {
    fn default() -> Self {
        Self {
            settings: SimulationSettings::default(),
            transport: Transport {
                resting_angle: 35.0,
                resting_angle_multiplier: 1.0,
                rate: 0.5,
                rate_multiplier: 1.0,
            },
        }
    }
}

impl ThermalErosionParams {
    pub fn with_settings(mut self, settings: SimulationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Resting angle in degrees, clamped to `[0, 90]`.
    pub fn with_resting_angle(mut self, degrees: f32, multiplier: f32) -> Self {
        self.transport.resting_angle = degrees.clamp(0.0, 90.0);
        self.transport.resting_angle_multiplier = multiplier.max(0.0);
        self
    }

    /// Fraction of the excess material moved per iteration.
    pub fn with_erosion_rate(mut self, rate: f32, multiplier: f32) -> Self {
        self.transport.rate = rate.clamp(0.0, 1.0);
        self.transport.rate_multiplier = multiplier.max(0.0);
        self
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }
}

const OUT_HEIGHT: u32 = 0;
const OUT_EROSION: u32 = 1;
const OUT_DEPOSITION: u32 = 2;

pub(crate) struct ThermalState {
    flux: Buffer,
    erosion: Option<Field2D>,
    deposition: Option<Field2D>,
}

impl Simulation for ThermalErosionParams {
    type State = ThermalState;

    fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    fn mask_slot(&self) -> Option<SlotId> {
        Some(input(MASK))
    }

    fn setup(&self, ctx: &mut ExecutionContext<'_>, sim: &mut SimState) -> Result<ThermalState> {
        let erosion = sim
            .wants(ctx, output(OUT_EROSION))
            .then(|| sim.temporary(ctx, "erosion"));
        let deposition = sim
            .wants(ctx, output(OUT_DEPOSITION))
            .then(|| sim.temporary(ctx, "deposition"));
        Ok(ThermalState {
            flux: sim.flux_buffer(ctx),
            erosion,
            deposition,
        })
    }

    fn iterate(&self, ctx: &ExecutionContext<'_>, sim: &SimState, state: &mut ThermalState, _: u32) -> Result<()> {
        ctx.dispatch(
            names::THERMAL_OUTFLOW,
            &self.transport.bind(
                sim.bindings()
                    .field("height", &sim.height)
                    .opt_field("mask", sim.mask.as_ref())
                    .buffer("flux", &state.flux),
            ),
        )?;
        ctx.dispatch(
            names::THERMAL_APPLY,
            &sim.bindings()
                .field("height", &sim.height)
                .buffer("flux", &state.flux)
                .opt_field("erosion", state.erosion.as_ref())
                .opt_field("deposition", state.deposition.as_ref()),
        )
    }

    fn resolve(&self, ctx: &mut ExecutionContext<'_>, sim: &SimState, state: &ThermalState) -> Result<()> {
        sim.resolve_height(ctx, output(OUT_HEIGHT), &sim.height, Some(&sim.initial))?;
        sim.resolve_layer(ctx, names::RESOLVE_EROSION, output(OUT_EROSION), state.erosion.as_ref())?;
        sim.resolve_layer(
            ctx,
            names::RESOLVE_DEPOSITION,
            output(OUT_DEPOSITION),
            state.deposition.as_ref(),
        )
    }
}

impl NodeBehavior for ThermalErosionParams {
    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::input(input(HEIGHT), "height", SlotType::Mask),
            Slot::input(input(MASK), "mask", SlotType::Mask),
            Slot::output(output(OUT_HEIGHT), "height", SlotType::Mask),
            Slot::output(output(OUT_EROSION), "erosion", SlotType::Mask),
            Slot::output(output(OUT_DEPOSITION), "deposition", SlotType::Mask),
        ]
    }

    /// Only the height survives a bypass; derived layers read as unconnected.
    fn passthrough(&self, out: SlotId) -> Option<SlotId> {
        (out == output(OUT_HEIGHT)).then_some(input(HEIGHT))
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[
            names::RESAMPLE,
            names::THERMAL_OUTFLOW,
            names::THERMAL_APPLY,
            names::RESOLVE_HEIGHT,
            names::RESOLVE_EROSION,
            names::RESOLVE_DEPOSITION,
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

/// A loose soil layer (soil depth times the mask) slides off steep slopes,
/// taking the terrain with it. The trail output records where soil moved,
/// weighted towards the middle of the run.
#[derive(Clone, Debug, PartialEq)]
pub struct LandslideParams {
    settings: SimulationSettings,
    transport: Transport,
    soil_depth: f32,
    trail_intensity: f32,
}

impl Default for LandslideParams {
    fn default() -> Self {
        Self {
            settings: SimulationSettings::default(),
            transport: Transport {
                resting_angle: 30.0,
                resting_angle_multiplier: 1.0,
                rate: 0.5,
                rate_multiplier: 1.0,
            },
            soil_depth: 0.05,
            trail_intensity: 1.0,
        }
    }
}

impl LandslideParams {
    pub fn with_settings(mut self, settings: SimulationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_resting_angle(mut self, degrees: f32, multiplier: f32) -> Self {
        self.transport.resting_angle = degrees.clamp(0.0, 90.0);
        self.transport.resting_angle_multiplier = multiplier.max(0.0);
        self
    }

    pub fn with_flow_rate(mut self, rate: f32, multiplier: f32) -> Self {
        self.transport.rate = rate.clamp(0.0, 1.0);
        self.transport.rate_multiplier = multiplier.max(0.0);
        self
    }

    /// Normalized depth of the loose layer under a white mask.
    pub fn with_soil_depth(mut self, depth: f32) -> Self {
        self.soil_depth = depth.max(0.0);
        self
    }

    pub fn with_trail_intensity(mut self, intensity: f32) -> Self {
        self.trail_intensity = intensity.max(0.0);
        self
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }
}

const OUT_SOIL: u32 = 1;
const OUT_TRAIL: u32 = 2;

pub(crate) struct LandslideState {
    soil: Field2D,
    flux: Buffer,
    trail: Option<Field2D>,
}

impl Simulation for LandslideParams {
    type State = LandslideState;

    fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    fn mask_slot(&self) -> Option<SlotId> {
        Some(input(MASK))
    }

    fn setup(&self, ctx: &mut ExecutionContext<'_>, sim: &mut SimState) -> Result<LandslideState> {
        let trail = sim
            .wants(ctx, output(OUT_TRAIL))
            .then(|| sim.temporary(ctx, "trail"));
        let state = LandslideState {
            soil: sim.temporary(ctx, "soil"),
            flux: sim.flux_buffer(ctx),
            trail,
        };
        ctx.dispatch(
            names::COMBINE,
            &Bindings::new()
                .opt_field("b", sim.mask.as_ref())
                .field("dst", &state.soil)
                .int("mode", 0)
                .float("factor", self.soil_depth)
                .float("default_b", 1.0),
        )?;
        Ok(state)
    }

    fn iterate(
        &self,
        ctx: &ExecutionContext<'_>,
        sim: &SimState,
        state: &mut LandslideState,
        iteration: u32,
    ) -> Result<()> {
        ctx.dispatch(
            names::THERMAL_OUTFLOW,
            &self.transport.bind(
                sim.bindings()
                    .field("height", &sim.height)
                    .field("layer", &state.soil)
                    .buffer("flux", &state.flux),
            ),
        )?;
        let weight = self.trail_intensity * trail_window(iteration, self.settings.iteration_count());
        ctx.dispatch(
            names::THERMAL_APPLY,
            &sim.bindings()
                .field("height", &sim.height)
                .field("layer", &state.soil)
                .buffer("flux", &state.flux)
                .opt_field("trail", state.trail.as_ref())
                .float("trail_weight", weight),
        )
    }

    fn resolve(&self, ctx: &mut ExecutionContext<'_>, sim: &SimState, state: &LandslideState) -> Result<()> {
        sim.resolve_height(ctx, output(OUT_HEIGHT), &sim.height, Some(&sim.initial))?;
        sim.resolve_layer(ctx, names::RESOLVE_SOIL, output(OUT_SOIL), Some(&state.soil))?;
        sim.resolve_layer(ctx, names::RESOLVE_TRAIL, output(OUT_TRAIL), state.trail.as_ref())
    }
}

impl NodeBehavior for LandslideParams {
    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::input(input(HEIGHT), "height", SlotType::Mask),
            Slot::input(input(MASK), "mask", SlotType::Mask),
            Slot::output(output(OUT_HEIGHT), "height", SlotType::Mask),
            Slot::output(output(OUT_SOIL), "soil", SlotType::Mask),
            Slot::output(output(OUT_TRAIL), "trail", SlotType::Mask),
        ]
    }

    /// Only the height survives a bypass; derived layers read as unconnected.
    fn passthrough(&self, out: SlotId) -> Option<SlotId> {
        (out == output(OUT_HEIGHT)).then_some(input(HEIGHT))
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[
            names::RESAMPLE,
            names::COMBINE,
            names::THERMAL_OUTFLOW,
            names::THERMAL_APPLY,
            names::RESOLVE_HEIGHT,
            names::RESOLVE_SOIL,
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
    use crate::exec::{EvaluationOutput, ExecutionOptions, GraphExecution};
    use crate::graph::{Graph, NodeSpec};
    use crate::import::ImportRegistry;
    use crate::nodes::source::ImportFieldParams;
    use crate::nodes::testing::{approx_eq, args, compile};
    use crate::resource::ResourcePool;

    /// A steep ramp: one unit of normalized height over a 16-unit world.
    fn on_ramp(spec: NodeSpec, progressive: bool) -> (EvaluationOutput, EvaluationOutput) {
        let mut graph = Graph::new();
        let ramp = graph.add(NodeSpec::ImportField(ImportFieldParams::new("ramp")));
        let node = graph.add(spec);
        graph.connect_by_name(ramp, "output", node, "height").unwrap();
        let compiled = compile(&graph);

        let mut imports = ImportRegistry::new();
        imports.register_field("ramp", |_: usize, p: glam::Vec2| p.x / 16.0);
        let mut pool = ResourcePool::new();
        let evaluate = |target: NodeId, pool: &mut ResourcePool| {
            GraphExecution::new(&compiled, target, args(16), pool, &imports)
                .unwrap()
                .with_options(ExecutionOptions::new().with_progressive(progressive))
                .finish()
                .unwrap()
        };
        let input = evaluate(ramp, &mut pool);
        let output = evaluate(node, &mut pool);
        assert_eq!(pool.live_temporaries(), 0);
        (input, output)
    }

    fn settings(iterations: u32, per_frame: u32) -> SimulationSettings {
        SimulationSettings::default()
            .with_iteration_count(iterations)
            .with_iterations_per_frame(per_frame)
            .with_detail_level(1.0)
    }

    #[test]
    fn zero_iterations_reproduce_the_input_height() {
        for progressive in [false, true] {
            let thermal = ThermalErosionParams::default().with_settings(settings(0, 1));
            let (input, out) = on_ramp(NodeSpec::ThermalErosion(thermal), progressive);
            let expected = input.field("output").unwrap().to_vec();
            assert!(approx_eq(&out.field("height").unwrap().to_vec(), &expected, 1e-6));

            let landslide = LandslideParams::default().with_settings(settings(0, 1));
            let (_, out) = on_ramp(NodeSpec::Landslide(landslide), progressive);
            assert!(approx_eq(&out.field("height").unwrap().to_vec(), &expected, 1e-6));
        }
    }

    #[test]
    fn steep_ramp_is_flattened_and_material_is_conserved() {
        let thermal = ThermalErosionParams::default()
            .with_settings(settings(20, 20))
            .with_resting_angle(10.0, 1.0);
        let (input, out) = on_ramp(NodeSpec::ThermalErosion(thermal), false);
        let before = input.field("output").unwrap().to_vec();
        let after = out.field("height").unwrap().to_vec();
        assert!(!approx_eq(&before, &after, 1e-4));
        let sum = |v: &[f32]| v.iter().sum::<f32>();
        assert!((sum(&before) - sum(&after)).abs() < 1e-2);

        let eroded = out.field("erosion").unwrap().to_vec();
        assert!(eroded.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn progressive_matches_immediate() {
        let make = |k| {
            NodeSpec::Landslide(
                LandslideParams::default()
                    .with_settings(settings(9, k))
                    .with_resting_angle(10.0, 1.0)
                    .with_soil_depth(0.2),
            )
        };
        let (_, immediate) = on_ramp(make(1), false);
        for k in [1, 3] {
            let (_, progressive) = on_ramp(make(k), true);
            for name in ["height", "soil", "trail"] {
                assert!(approx_eq(
                    &progressive.field(name).unwrap().to_vec(),
                    &immediate.field(name).unwrap().to_vec(),
                    1e-6
                ));
            }
        }
        assert!(immediate.field("trail").unwrap().read().iter().any(|v| *v > 0.0));
    }

    #[test]
    fn landslide_never_digs_below_the_soil() {
        let landslide = LandslideParams::default()
            .with_settings(settings(30, 30))
            .with_resting_angle(5.0, 1.0)
            .with_soil_depth(0.01);
        let (input, out) = on_ramp(NodeSpec::Landslide(landslide), false);
        let before = input.field("output").unwrap().to_vec();
        let after = out.field("height").unwrap().to_vec();
        // Bilinear resampling spreads each change over neighbouring texels.
        let lowest = before
            .iter()
            .zip(&after)
            .map(|(b, a)| a - b)
            .fold(f32::MAX, f32::min);
        assert!(lowest > -0.05);
        assert!(out.field("soil").unwrap().read().iter().all(|v| *v >= 0.0));
    }
}
