//! Nodes producing data from nothing: constants, noise and host imports.
use tracing::debug;

use crate::error::Result;
use crate::exec::{ExecutionContext, NodeBehavior};
use crate::graph::{NodeId, Slot, SlotRef, SlotType};
use crate::kernel::cpu::texel_world;
use crate::kernel::{names, Bindings};
use crate::nodes::output;
use crate::random::seed_for_node;
use crate::resource::{BufferDescriptor, PositionSample, RtDescriptor};

const OUT: u32 = 0;

fn field_descriptor(slot_type: SlotType, resolution: u32) -> RtDescriptor {
    match slot_type {
        SlotType::ColorTexture => RtDescriptor::color(resolution),
        _ => RtDescriptor::mask(resolution),
    }
}

/// Fills a mask or color field with one value.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantParams {
    value: [f32; 4],
    slot_type: SlotType,
}

impl ConstantParams {
    pub fn mask(value: f32) -> Self {
        Self {
            value: [value, value, value, 1.0],
            slot_type: SlotType::Mask,
        }
    }

    pub fn color(rgba: [f32; 4]) -> Self {
        Self {
            value: rgba,
            slot_type: SlotType::ColorTexture,
        }
    }

    pub fn value(&self) -> [f32; 4] {
        self.value
    }
}

impl Default for ConstantParams {
    fn default() -> Self {
        Self::mask(0.0)
    }
}

impl NodeBehavior for ConstantParams {
    fn slots(&self) -> Vec<Slot> {
        vec![Slot::output(output(OUT), "output", self.slot_type)]
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[names::FILL]
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let desc = field_descriptor(self.slot_type, ctx.args().resolution);
        let dst = ctx.create_render_target(desc, node, output(OUT));
        let [r, g, b, a] = self.value;
        ctx.dispatch(
            names::FILL,
            &Bindings::new()
                .field("dst", &dst)
                .float("r", r)
                .float("g", g)
                .float("b", b)
                .float("a", a),
        )
    }
}

/// Fractal value noise in world space.
#[derive(Clone, Debug, PartialEq)]
pub struct NoiseParams {
    scale: f32,
    octaves: u32,
    persistence: f32,
    amplitude: f32,
    seed: u64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            scale: 64.0,
            octaves: 4,
            persistence: 0.5,
            amplitude: 1.0,
            seed: 0,
        }
    }
}

impl NoiseParams {
    /// Feature size in world units.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale.max(1e-3);
        self
    }

    pub fn with_octaves(mut self, octaves: u32) -> Self {
        self.octaves = octaves.clamp(1, 12);
        self
    }

    pub fn with_persistence(mut self, persistence: f32) -> Self {
        self.persistence = persistence.clamp(0.0, 1.0);
        self
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.max(0.0);
        self
    }

    /// Per-node salt mixed into the evaluation seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

impl NodeBehavior for NoiseParams {
    fn slots(&self) -> Vec<Slot> {
        vec![Slot::output(output(OUT), "output", SlotType::Mask)]
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[names::NOISE]
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let args = ctx.args().clone();
        let dst = ctx.create_render_target(RtDescriptor::mask(args.resolution), node, output(OUT));
        let seed = seed_for_node(args.seed, node, self.seed);
        ctx.dispatch(
            names::NOISE,
            &Bindings::new()
                .field("dst", &dst)
                .bounds(&args.world_bounds)
                .int("seed", (seed >> 1) as i64)
                .float("scale", self.scale)
                .int("octaves", self.octaves as i64)
                .float("persistence", self.persistence)
                .float("amplitude", self.amplitude),
        )
    }
}

/// Samples a host-provided [`FieldSource`](crate::import::FieldSource).
#[derive(Clone, Debug, PartialEq)]
pub struct ImportFieldParams {
    id: String,
    slot_type: SlotType,
    resolution: Option<u32>,
}

impl ImportFieldParams {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slot_type: SlotType::Mask,
            resolution: None,
        }
    }

    /// Samples at a fixed resolution instead of the evaluation's base resolution.
    pub fn with_resolution(mut self, resolution: Option<u32>) -> Self {
        self.resolution = resolution.map(|r| r.clamp(1, 8192));
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.slot_type = if color {
            SlotType::ColorTexture
        } else {
            SlotType::Mask
        };
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for ImportFieldParams {
    fn default() -> Self {
        Self::new("")
    }
}

impl NodeBehavior for ImportFieldParams {
    fn slots(&self) -> Vec<Slot> {
        vec![Slot::output(output(OUT), "output", self.slot_type)]
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let out = SlotRef::new(node, output(OUT));
        let Some(source) = ctx.imports().field(&self.id) else {
            ctx.link_to_invalid(out);
            return Ok(());
        };
        let args = ctx.args().clone();
        let resolution = self.resolution.unwrap_or(args.resolution);
        let dst = ctx.create_render_target(field_descriptor(self.slot_type, resolution), node, output(OUT));
        let (w, h, c) = (dst.width(), dst.height(), dst.channels());
        let mut data = dst.write();
        for y in 0..h {
            for x in 0..w {
                let p = texel_world(&args.world_bounds, x, y, w, h);
                for ch in 0..c {
                    data[(y * w + x) * c + ch] = source.sample(ch, p);
                }
            }
        }
        debug!("Imported field '{}' at {}x{}.", self.id, w, h);
        Ok(())
    }
}

/// Publishes host-provided position samples as a buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportBufferParams {
    id: String,
}

impl ImportBufferParams {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl NodeBehavior for ImportBufferParams {
    fn slots(&self) -> Vec<Slot> {
        vec![Slot::output(output(OUT), "positions", SlotType::Buffer)]
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let Some(samples) = ctx.imports().positions(&self.id) else {
            ctx.link_to_invalid(SlotRef::new(node, output(OUT)));
            return Ok(());
        };
        let desc = BufferDescriptor::of::<PositionSample>(samples.len() as u32);
        let buffer = ctx.create_buffer(desc, node, output(OUT));
        PositionSample::write_all(&buffer, &samples);
        Ok(())
    }
}
