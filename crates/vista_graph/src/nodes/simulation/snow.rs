//! Snow accumulation.
//!
//! Snow falls where the mask allows and sticks less on steep slopes, then
//! settles like a loose layer on top of the terrain. The terrain itself is
//! never moved; the height output is the terrain plus the snow cover.
use crate::error::Result;
use crate::exec::{ExecutionContext, NodeBehavior, ProgressiveTask};
use crate::graph::{NodeId, Slot, SlotId, SlotType};
use crate::kernel::names;
use crate::nodes::simulation::{begin, run_to_completion, talus, SimState, Simulation, SimulationSettings};
use crate::nodes::{input, output};
use crate::resource::{Buffer, Field2D};

#[derive(Clone, Debug, PartialEq)]
pub struct SnowParams {
    settings: SimulationSettings,
    snow_amount: f32,
    resting_angle: f32,
    resting_angle_multiplier: f32,
    flow_rate: f32,
}

impl Default for SnowParams {
    fn default() -> Self {
        Self {
            settings: SimulationSettings::default(),
            snow_amount: 0.002,
            resting_angle: 40.0,
            resting_angle_multiplier: 1.0,
            flow_rate: 0.5,
        }
    }
}

impl SnowParams {
    pub fn with_settings(mut self, settings: SimulationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Normalized snow depth added per iteration on flat ground.
    pub fn with_snow_amount(mut self, amount: f32) -> Self {
        self.snow_amount = amount.max(0.0);
        self
    }

    /// Steepest slope snow rests on, in degrees.
    pub fn with_resting_angle(mut self, degrees: f32, multiplier: f32) -> Self {
        self.resting_angle = degrees.clamp(0.0, 90.0);
        self.resting_angle_multiplier = multiplier.max(0.0);
        self
    }

    pub fn with_flow_rate(mut self, rate: f32) -> Self {
        self.flow_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    fn talus(&self) -> f32 {
        talus(self.resting_angle * self.resting_angle_multiplier)
    }
}

const OUT_HEIGHT: u32 = 0;
const OUT_SNOW: u32 = 1;

pub(crate) struct SnowState {
    snow: Field2D,
    flux: Buffer,
}

impl Simulation for SnowParams {
    type State = SnowState;

    fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    fn mask_slot(&self) -> Option<SlotId> {
        Some(input(1))
    }

    fn setup(&self, ctx: &mut ExecutionContext<'_>, sim: &mut SimState) -> Result<SnowState> {
        Ok(SnowState {
            snow: sim.temporary(ctx, "snow"),
            flux: sim.flux_buffer(ctx),
        })
    }

    fn iterate(&self, ctx: &ExecutionContext<'_>, sim: &SimState, state: &mut SnowState, _: u32) -> Result<()> {
        let talus = self.talus();
        ctx.dispatch(
            names::SNOW_FALL,
            &sim.bindings()
                .field("snow", &state.snow)
                .field("height", &sim.height)
                .opt_field("mask", sim.mask.as_ref())
                .float("amount", self.snow_amount)
                .float("talus", talus),
        )?;
        ctx.dispatch(
            names::THERMAL_OUTFLOW,
            &sim.bindings()
                .field("height", &sim.height)
                .field("layer", &state.snow)
                .buffer("flux", &state.flux)
                .flag("stacked", true)
                .float("talus", talus)
                .float("rate", self.flow_rate),
        )?;
        ctx.dispatch(
            names::THERMAL_APPLY,
            &sim.bindings()
                .field("height", &sim.height)
                .field("layer", &state.snow)
                .buffer("flux", &state.flux)
                .flag("stacked", true),
        )
    }

    fn resolve(&self, ctx: &mut ExecutionContext<'_>, sim: &SimState, state: &SnowState) -> Result<()> {
        sim.resolve_height(ctx, output(OUT_HEIGHT), &state.snow, None)?;
        sim.resolve_layer(ctx, names::RESOLVE_SNOW, output(OUT_SNOW), Some(&state.snow))
    }
}

impl NodeBehavior for SnowParams {
    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::input(input(0), "height", SlotType::Mask),
            Slot::input(input(1), "mask", SlotType::Mask),
            Slot::output(output(OUT_HEIGHT), "height", SlotType::Mask),
            Slot::output(output(OUT_SNOW), "snow", SlotType::Mask),
        ]
    }

    fn passthrough(&self, out: SlotId) -> Option<SlotId> {
        (out == output(OUT_HEIGHT)).then_some(input(0))
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[
            names::RESAMPLE,
            names::SNOW_FALL,
            names::THERMAL_OUTFLOW,
            names::THERMAL_APPLY,
            names::RESOLVE_HEIGHT,
            names::RESOLVE_SNOW,
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
