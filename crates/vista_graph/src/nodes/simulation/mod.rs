//! Iterative grid simulations.
//!
//! Every simulation node follows the same shape:
//!
//! 1. The input height (and optional mask) is resampled into a square
//!    simulation grid whose size depends on the world extent and the node's
//!    detail level, not on the evaluation resolution.
//! 2. A fixed number of iterations runs, `iterations_per_frame` per
//!    progressive step.
//! 3. Each output is produced only if something reads it, resampled back to
//!    the node's output resolution. Height outputs are the input plus the
//!    simulated change, so a run without iterations reproduces the input.
//! 4. Temporaries and input references are released on every exit path.
//!
//! The synchronous path drives the same [`SimulationTask`] as the progressive
//! one, so both produce identical results.
use tracing::{debug, trace};

use crate::args::WorldBounds;
use crate::error::Result;
use crate::exec::{ExecutionContext, Progress, ProgressiveTask};
use crate::graph::{NodeId, SlotId, SlotRef};
use crate::kernel::{names, Bindings};
use crate::resource::{Buffer, BufferDescriptor, Field2D, RtDescriptor};

pub mod particles;
pub mod snow;
pub mod thermal;
pub mod water;

/// Largest simulation grid side.
pub const MAX_SIMULATION_RESOLUTION: u32 = 4096;

/// Rounds `value` up to a multiple of 8, never below 8.
pub fn multiple_of_8(value: u32) -> u32 {
    value.max(1).div_ceil(8) * 8
}

/// Side of the simulation grid for `detail_level` texels per world unit.
pub fn simulation_resolution(detail_level: f32, bounds: &WorldBounds) -> u32 {
    let texels = (detail_level * bounds.max_extent()).ceil();
    let texels = if texels.is_finite() { texels.max(1.0) as u32 } else { 1 };
    multiple_of_8(texels).min(MAX_SIMULATION_RESOLUTION)
}

/// Weight of iteration `iteration` of `count` for trail outputs: zero at the
/// ends of the run, one half-way through.
pub fn trail_window(iteration: u32, count: u32) -> f32 {
    if count == 0 {
        return 0.0;
    }
    let t = (iteration as f32 + 0.5) / count as f32;
    1.0 - (2.0 * t - 1.0).powi(2)
}

/// Parameters shared by every simulation node.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationSettings {
    iteration_count: u32,
    iterations_per_frame: u32,
    detail_level: f32,
    high_quality: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            iteration_count: 32,
            iterations_per_frame: 4,
            detail_level: 0.5,
            high_quality: false,
        }
    }
}

impl SimulationSettings {
    pub fn with_iteration_count(mut self, count: u32) -> Self {
        self.iteration_count = count.min(100_000);
        self
    }

    /// Iterations per progressive step, at least one.
    pub fn with_iterations_per_frame(mut self, per_frame: u32) -> Self {
        self.iterations_per_frame = per_frame.max(1);
        self
    }

    /// Simulation texels per world unit, clamped to `[0.01, 8]`.
    pub fn with_detail_level(mut self, detail_level: f32) -> Self {
        self.detail_level = if detail_level.is_finite() {
            detail_level.clamp(0.01, 8.0)
        } else {
            0.5
        };
        self
    }

    /// Use all eight neighbours instead of four.
    pub fn with_high_quality(mut self, high_quality: bool) -> Self {
        self.high_quality = high_quality;
        self
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn iterations_per_frame(&self) -> u32 {
        self.iterations_per_frame
    }

    pub fn detail_level(&self) -> f32 {
        self.detail_level
    }

    pub fn high_quality(&self) -> bool {
        self.high_quality
    }
}

/// Working state every simulation shares: the simulation grid, the input
/// height carried into it and the temporaries the node owns.
pub(crate) struct SimState {
    pub node: NodeId,
    /// Side of the simulation grid.
    pub resolution: u32,
    /// Resolution of the node's field outputs.
    pub output_resolution: u32,
    pub bounds: WorldBounds,
    pub terrain_height: f32,
    pub neighbors: i64,
    pub input_height: Option<Field2D>,
    /// Simulated height, normalized like every height field.
    pub height: Field2D,
    /// Height before the first iteration.
    pub initial: Field2D,
    pub mask: Option<Field2D>,
    temporaries: Vec<&'static str>,
}

impl SimState {
    /// Allocates the grid and brings the input height (and the mask on
    /// `mask_slot`, if connected) into simulation space.
    ///
    /// On failure every temporary allocated so far is released.
    fn start(
        node: NodeId,
        ctx: &mut ExecutionContext<'_>,
        settings: &SimulationSettings,
        height_slot: SlotId,
        mask_slot: Option<SlotId>,
    ) -> Result<Self> {
        let args = ctx.args().clone();
        let input_height = ctx.input_texture(node, height_slot);
        let mask_input = mask_slot.and_then(|slot| ctx.input_texture(node, slot));
        let resolution = simulation_resolution(settings.detail_level, &args.world_bounds);
        let output_resolution = ctx.output_resolution(input_height.as_ref());

        let height = ctx.create_temporary(RtDescriptor::mask(resolution), node, "height");
        let initial = ctx.create_temporary(RtDescriptor::mask(resolution), node, "initial");
        let mut state = Self {
            node,
            resolution,
            output_resolution,
            bounds: args.world_bounds,
            terrain_height: args.terrain_height,
            neighbors: if settings.high_quality { 8 } else { 4 },
            input_height,
            height,
            initial,
            mask: None,
            temporaries: vec!["height", "initial"],
        };
        if mask_input.is_some() {
            state.mask = Some(state.temporary(ctx, "mask"));
        }

        let input = state.input_height.clone();
        let prepared = resample(ctx, input.as_ref(), &state.height, 0.0)
            .and_then(|_| resample(ctx, input.as_ref(), &state.initial, 0.0))
            .and_then(|_| match &state.mask {
                Some(mask) => resample(ctx, mask_input.as_ref(), mask, 1.0),
                None => Ok(()),
            });
        if let Err(err) = prepared {
            state.release(ctx);
            return Err(err);
        }
        debug!(
            "Node {} simulating at {}x{} (output {}).",
            node, resolution, resolution, output_resolution
        );
        Ok(state)
    }

    /// Allocates a simulation-sized scratch field released with the state.
    pub fn temporary(&mut self, ctx: &mut ExecutionContext<'_>, name: &'static str) -> Field2D {
        self.temporaries.push(name);
        ctx.create_temporary(RtDescriptor::mask(self.resolution), self.node, name)
    }

    /// Allocates a scratch buffer released with the state.
    pub fn temporary_buffer(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        name: &'static str,
        desc: BufferDescriptor,
    ) -> Buffer {
        self.temporaries.push(name);
        ctx.create_temporary_buffer(desc, self.node, name)
    }

    /// Per-cell outflow buffer for the transport kernels.
    pub fn flux_buffer(&mut self, ctx: &mut ExecutionContext<'_>) -> Buffer {
        let cells = self.resolution * self.resolution;
        let stride = (crate::kernel::cpu::FLUX_CHANNELS * std::mem::size_of::<f32>()) as u32;
        self.temporary_buffer(ctx, "flux", BufferDescriptor::new(stride, cells))
    }

    /// True if output `slot` of this node is read by anything.
    pub fn wants(&self, ctx: &ExecutionContext<'_>, slot: SlotId) -> bool {
        ctx.is_output_consumed(SlotRef::new(self.node, slot))
    }

    /// Bindings every simulation kernel reads.
    pub fn bindings(&self) -> Bindings {
        Bindings::new()
            .bounds(&self.bounds)
            .float("terrain_height", self.terrain_height)
            .int("neighbors", self.neighbors)
    }

    /// Publishes `input + (src - subtract)` on the height output `slot`.
    pub fn resolve_height(
        &self,
        ctx: &mut ExecutionContext<'_>,
        slot: SlotId,
        src: &Field2D,
        subtract: Option<&Field2D>,
    ) -> Result<()> {
        let base = self.input_height.clone();
        self.resolve(ctx, names::RESOLVE_HEIGHT, slot, Some(src), subtract, base.as_ref())
    }

    /// Publishes the simulation layer `src` on output `slot`.
    ///
    /// `src` is `None` when the layer was never simulated because nothing
    /// read it; the output then produces nothing.
    pub fn resolve_layer(
        &self,
        ctx: &mut ExecutionContext<'_>,
        kernel: &'static str,
        slot: SlotId,
        src: Option<&Field2D>,
    ) -> Result<()> {
        self.resolve(ctx, kernel, slot, src, None, None)
    }

    fn resolve(
        &self,
        ctx: &mut ExecutionContext<'_>,
        kernel: &'static str,
        slot: SlotId,
        src: Option<&Field2D>,
        subtract: Option<&Field2D>,
        base: Option<&Field2D>,
    ) -> Result<()> {
        let out = SlotRef::new(self.node, slot);
        let Some(src) = src.filter(|_| ctx.is_output_consumed(out)) else {
            trace!("Output {} is not read; skipping.", out);
            ctx.link_to_invalid(out);
            return Ok(());
        };
        let dst = ctx.create_render_target(RtDescriptor::mask(self.output_resolution), self.node, slot);
        ctx.dispatch(
            kernel,
            &Bindings::new()
                .field("src", src)
                .opt_field("subtract", subtract)
                .opt_field("base", base)
                .field("dst", &dst),
        )
    }

    /// Releases every temporary and the node's input references.
    fn release(&mut self, ctx: &mut ExecutionContext<'_>) {
        for name in self.temporaries.drain(..) {
            ctx.release_temporary(self.node, name);
        }
        ctx.release_inputs(self.node);
    }
}

/// One iterative simulation node.
pub(crate) trait Simulation: Clone + 'static {
    /// Node-specific working state.
    type State: 'static;

    fn settings(&self) -> &SimulationSettings;

    /// Input slot of the mask, if the node takes one.
    fn mask_slot(&self) -> Option<SlotId> {
        None
    }

    fn setup(&self, ctx: &mut ExecutionContext<'_>, sim: &mut SimState) -> Result<Self::State>;

    fn iterate(
        &self,
        ctx: &ExecutionContext<'_>,
        sim: &SimState,
        state: &mut Self::State,
        iteration: u32,
    ) -> Result<()>;

    /// Publishes the outputs after the last iteration.
    fn resolve(&self, ctx: &mut ExecutionContext<'_>, sim: &SimState, state: &Self::State) -> Result<()>;
}

/// Resumable run of a [`Simulation`].
pub(crate) struct SimulationTask<S: Simulation> {
    params: S,
    sim: SimState,
    state: S::State,
    iteration: u32,
    released: bool,
}

impl<S: Simulation> SimulationTask<S> {
    pub fn start(params: &S, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<Self> {
        let settings = params.settings();
        let mut sim = SimState::start(node, ctx, settings, crate::nodes::input(0), params.mask_slot())?;
        let state = match params.setup(ctx, &mut sim) {
            Ok(state) => state,
            Err(err) => {
                sim.release(ctx);
                return Err(err);
            }
        };
        Ok(Self {
            params: params.clone(),
            sim,
            state,
            iteration: 0,
            released: false,
        })
    }

    fn advance(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Progress> {
        let settings = self.params.settings();
        let total = settings.iteration_count;
        let end = total.min(self.iteration.saturating_add(settings.iterations_per_frame));
        while self.iteration < end {
            self.params
                .iterate(ctx, &self.sim, &mut self.state, self.iteration)?;
            self.iteration += 1;
        }

        if self.iteration < total {
            if ctx.args().output_temp_height {
                let height = &self.sim.height;
                let snapshot = Field2D::detached(height.descriptor(), height.to_vec());
                ctx.publish_preview(self.sim.node, snapshot);
            }
            return Ok(Progress::Running(self.iteration as f32 / total as f32));
        }

        self.params.resolve(ctx, &self.sim, &self.state)?;
        self.cleanup(ctx);
        Ok(Progress::Done)
    }

    fn cleanup(&mut self, ctx: &mut ExecutionContext<'_>) {
        if !self.released {
            self.released = true;
            self.sim.release(ctx);
        }
    }
}

impl<S: Simulation> ProgressiveTask for SimulationTask<S> {
    fn step(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Progress> {
        self.advance(ctx)
    }

    fn abort(&mut self, ctx: &mut ExecutionContext<'_>) {
        debug!(
            "Node {} abandoned after {} iterations.",
            self.sim.node, self.iteration
        );
        self.cleanup(ctx);
    }
}

/// Starts `params` as a progressive task.
pub(crate) fn begin<S: Simulation>(
    params: &S,
    node: NodeId,
    ctx: &mut ExecutionContext<'_>,
) -> Result<Option<Box<dyn ProgressiveTask>>> {
    let task = SimulationTask::start(params, node, ctx)?;
    Ok(Some(Box::new(task)))
}

/// Runs `params` to completion in one call.
pub(crate) fn run_to_completion<S: Simulation>(
    params: &S,
    node: NodeId,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    let mut task = SimulationTask::start(params, node, ctx)?;
    loop {
        match task.advance(ctx) {
            Ok(Progress::Done) => return Ok(()),
            Ok(Progress::Running(_)) => {}
            Err(err) => {
                task.abort(ctx);
                return Err(err);
            }
        }
    }
}

fn resample(
    ctx: &ExecutionContext<'_>,
    src: Option<&Field2D>,
    dst: &Field2D,
    default: f32,
) -> Result<()> {
    ctx.dispatch(
        names::RESAMPLE,
        &Bindings::new()
            .opt_field("src", src)
            .field("dst", dst)
            .float("default", default),
    )
}

/// Angle in degrees as the `talus` slope (rise over run) the transport kernels use.
pub(crate) fn talus(angle_degrees: f32) -> f32 {
    angle_degrees.clamp(0.0, 89.9).to_radians().tan()
}
