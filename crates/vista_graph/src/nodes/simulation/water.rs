//! Shallow-water flow and hydraulic erosion.
use crate::error::Result;
use crate::exec::{ExecutionContext, NodeBehavior, ProgressiveTask};
use crate::graph::{NodeId, Slot, SlotId, SlotType};
use crate::kernel::names;
use crate::nodes::simulation::{begin, run_to_completion, SimState, Simulation, SimulationSettings};
use crate::nodes::{input, output};
use crate::resource::{Buffer, Field2D};

const HEIGHT: u32 = 0;
const MASK: u32 = 1;

/// Rains on the terrain and lets the water settle; outputs the water depth.
#[derive(Clone, Debug, PartialEq)]
pub struct WaterFlowParams {
    settings: SimulationSettings,
    water_amount: f32,
    flow_rate: f32,
    flow_rate_multiplier: f32,
    evaporation: f32,
}

impl Default for WaterFlowParams {
    fn default() -> Self {
        Self {
            settings: SimulationSettings::default(),
            water_amount: 0.05,
            flow_rate: 1.0,
            flow_rate_multiplier: 1.0,
            evaporation: 0.03,
        }
    }
}

impl WaterFlowParams {
    pub fn with_settings(mut self, settings: SimulationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Water added per iteration, scaled by the mask.
    pub fn with_water_amount(mut self, amount: f32) -> Self {
        self.water_amount = amount.max(0.0);
        self
    }

    pub fn with_flow_rate(mut self, rate: f32, multiplier: f32) -> Self {
        self.flow_rate = rate.max(0.0);
        self.flow_rate_multiplier = multiplier.max(0.0);
        self
    }

    /// Fraction of the water evaporating per iteration.
    pub fn with_evaporation(mut self, evaporation: f32) -> Self {
        self.evaporation = evaporation.clamp(0.0, 1.0);
        self
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }
}

pub(crate) struct WaterState {
    water: Field2D,
    flux: Buffer,
}

fn rain(ctx: &ExecutionContext<'_>, sim: &SimState, water: &Field2D, amount: f32) -> Result<()> {
    ctx.dispatch(
        names::FLOW_ADD_WATER,
        &sim.bindings()
            .field("water", water)
            .opt_field("mask", sim.mask.as_ref())
            .float("amount", amount),
    )
}

fn outflow(ctx: &ExecutionContext<'_>, sim: &SimState, water: &Field2D, flux: &Buffer, rate: f32) -> Result<()> {
    ctx.dispatch(
        names::FLOW_OUTFLOW,
        &sim.bindings()
            .field("height", &sim.height)
            .field("water", water)
            .buffer("flux", flux)
            .float("flow_rate", rate),
    )
}

impl Simulation for WaterFlowParams {
    type State = WaterState;

    fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    fn mask_slot(&self) -> Option<SlotId> {
        Some(input(MASK))
    }

    fn setup(&self, ctx: &mut ExecutionContext<'_>, sim: &mut SimState) -> Result<WaterState> {
        Ok(WaterState {
            water: sim.temporary(ctx, "water"),
            flux: sim.flux_buffer(ctx),
        })
    }

    fn iterate(&self, ctx: &ExecutionContext<'_>, sim: &SimState, state: &mut WaterState, _: u32) -> Result<()> {
        rain(ctx, sim, &state.water, self.water_amount)?;
        outflow(
            ctx,
            sim,
            &state.water,
            &state.flux,
            self.flow_rate * self.flow_rate_multiplier,
        )?;
        ctx.dispatch(
            names::FLOW_APPLY,
            &sim.bindings()
                .field("water", &state.water)
                .buffer("flux", &state.flux)
                .float("evaporation", self.evaporation),
        )
    }

    fn resolve(&self, ctx: &mut ExecutionContext<'_>, sim: &SimState, state: &WaterState) -> Result<()> {
        sim.resolve_layer(ctx, names::RESOLVE_WATER, output(0), Some(&state.water))
    }
}

impl NodeBehavior for WaterFlowParams {
    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::input(input(HEIGHT), "height", SlotType::Mask),
            Slot::input(input(MASK), "mask", SlotType::Mask),
            Slot::output(output(0), "water", SlotType::Mask),
        ]
    }

    /// Water is not a copy of the terrain, so a bypass produces none.
    fn passthrough(&self, _out: SlotId) -> Option<SlotId> {
        None
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[
            names::RESAMPLE,
            names::FLOW_ADD_WATER,
            names::FLOW_OUTFLOW,
            names::FLOW_APPLY,
            names::RESOLVE_WATER,
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

/// Water-driven erosion: flowing water picks up sediment where it is fast and
/// steep and drops it where it slows down.
#[derive(Clone, Debug, PartialEq)]
pub struct HydraulicErosionParams {
    settings: SimulationSettings,
    rain_amount: f32,
    flow_rate: f32,
    flow_rate_multiplier: f32,
    erosion_rate: f32,
    erosion_rate_multiplier: f32,
    deposition_rate: f32,
    capacity: f32,
    evaporation: f32,
}

impl Default for HydraulicErosionParams {
    fn default() -> Self {
        Self {
            settings: SimulationSettings::default(),
            rain_amount: 0.01,
            flow_rate: 1.0,
            flow_rate_multiplier: 1.0,
            erosion_rate: 0.1,
            erosion_rate_multiplier: 1.0,
            deposition_rate: 0.1,
            capacity: 1.0,
            evaporation: 0.02,
        }
    }
}

impl HydraulicErosionParams {
    pub fn with_settings(mut self, settings: SimulationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_rain_amount(mut self, amount: f32) -> Self {
        self.rain_amount = amount.max(0.0);
        self
    }

    pub fn with_flow_rate(mut self, rate: f32, multiplier: f32) -> Self {
        self.flow_rate = rate.max(0.0);
        self.flow_rate_multiplier = multiplier.max(0.0);
        self
    }

    pub fn with_erosion_rate(mut self, rate: f32, multiplier: f32) -> Self {
        self.erosion_rate = rate.clamp(0.0, 1.0);
        self.erosion_rate_multiplier = multiplier.max(0.0);
        self
    }

    pub fn with_deposition_rate(mut self, rate: f32) -> Self {
        self.deposition_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sediment carried per unit of flow and slope.
    pub fn with_capacity(mut self, capacity: f32) -> Self {
        self.capacity = capacity.max(0.0);
        self
    }

    pub fn with_evaporation(mut self, evaporation: f32) -> Self {
        self.evaporation = evaporation.clamp(0.0, 1.0);
        self
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }
}

const OUT_HEIGHT: u32 = 0;
const OUT_EROSION: u32 = 1;
const OUT_DEPOSITION: u32 = 2;

pub(crate) struct HydraulicState {
    water: Field2D,
    sediment: Field2D,
    flux: Buffer,
    erosion: Option<Field2D>,
    deposition: Option<Field2D>,
}

impl Simulation for HydraulicErosionParams {
    type State = HydraulicState;

    fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    fn mask_slot(&self) -> Option<SlotId> {
        Some(input(MASK))
    }

    fn setup(&self, ctx: &mut ExecutionContext<'_>, sim: &mut SimState) -> Result<HydraulicState> {
        let erosion = sim
            .wants(ctx, output(OUT_EROSION))
            .then(|| sim.temporary(ctx, "erosion"));
        let deposition = sim
            .wants(ctx, output(OUT_DEPOSITION))
            .then(|| sim.temporary(ctx, "deposition"));
        Ok(HydraulicState {
            water: sim.temporary(ctx, "water"),
            sediment: sim.temporary(ctx, "sediment"),
            flux: sim.flux_buffer(ctx),
            erosion,
            deposition,
        })
    }

    fn iterate(
        &self,
        ctx: &ExecutionContext<'_>,
        sim: &SimState,
        state: &mut HydraulicState,
        _: u32,
    ) -> Result<()> {
        rain(ctx, sim, &state.water, self.rain_amount)?;
        outflow(
            ctx,
            sim,
            &state.water,
            &state.flux,
            self.flow_rate * self.flow_rate_multiplier,
        )?;
        ctx.dispatch(
            names::HYDRAULIC_ERODE,
            &sim.bindings()
                .field("height", &sim.height)
                .field("sediment", &state.sediment)
                .field("water", &state.water)
                .buffer("flux", &state.flux)
                .opt_field("erosion", state.erosion.as_ref())
                .opt_field("deposition", state.deposition.as_ref())
                .float("erosion_rate", self.erosion_rate * self.erosion_rate_multiplier)
                .float("deposition_rate", self.deposition_rate)
                .float("capacity", self.capacity),
        )?;
        ctx.dispatch(
            names::FLOW_APPLY,
            &sim.bindings()
                .field("water", &state.water)
                .field("sediment", &state.sediment)
                .buffer("flux", &state.flux)
                .float("evaporation", self.evaporation),
        )
    }

    fn resolve(&self, ctx: &mut ExecutionContext<'_>, sim: &SimState, state: &HydraulicState) -> Result<()> {
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

impl NodeBehavior for HydraulicErosionParams {
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
            names::FLOW_ADD_WATER,
            names::FLOW_OUTFLOW,
            names::FLOW_APPLY,
            names::HYDRAULIC_ERODE,
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
