//! Field adjustments.
use crate::error::Result;
use crate::exec::{ExecutionContext, NodeBehavior};
use crate::graph::{NodeId, Slot, SlotType};
use crate::kernel::{names, Bindings};
use crate::nodes::{input, output};
use crate::resource::RtDescriptor;

/// Box blur, blended with the unblurred input by `intensity`.
///
/// A zero radius or intensity makes the node an identity, so it is bypassed.
#[derive(Clone, Debug, PartialEq)]
pub struct BlurParams {
    radius: u32,
    intensity: f32,
}

impl Default for BlurParams {
    fn default() -> Self {
        Self {
            radius: 1,
            intensity: 1.0,
        }
    }
}

impl BlurParams {
    /// Radius in texels, at most 64.
    pub fn with_radius(mut self, radius: u32) -> Self {
        self.radius = radius.min(64);
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity.clamp(0.0, 1.0);
        self
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }
}

impl NodeBehavior for BlurParams {
    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::input(input(0), "input", SlotType::Mask),
            Slot::output(output(0), "output", SlotType::Mask),
        ]
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[names::BLUR]
    }

    fn is_noop(&self) -> bool {
        self.radius == 0 || self.intensity <= 0.0
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let src = ctx.input_texture(node, input(0));
        let resolution = ctx.output_resolution(src.as_ref());
        let dst = ctx.create_render_target(RtDescriptor::mask(resolution), node, output(0));
        ctx.dispatch(
            names::BLUR,
            &Bindings::new()
                .opt_field("src", src.as_ref())
                .field("dst", &dst)
                .int("radius", self.radius as i64)
                .float("intensity", self.intensity),
        )
    }
}

/// Per-texel operation applied by [`CombineParams`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CombineMode {
    #[default]
    Add,
    Subtract,
    Multiply,
    Max,
    Min,
    /// Blend from `a` to `b` by the factor.
    Lerp,
}

impl CombineMode {
    fn kernel_mode(self) -> i64 {
        match self {
            CombineMode::Add => 0,
            CombineMode::Subtract => 1,
            CombineMode::Multiply => 2,
            CombineMode::Max => 3,
            CombineMode::Min => 4,
            CombineMode::Lerp => 5,
        }
    }

    /// Value used for an unconnected `b`: white where black would erase `a`.
    fn default_b(self) -> f32 {
        match self {
            CombineMode::Multiply | CombineMode::Min => 1.0,
            _ => 0.0,
        }
    }
}

/// Combines two masks texel by texel.
#[derive(Clone, Debug, PartialEq)]
pub struct CombineParams {
    mode: CombineMode,
    factor: f32,
}

impl Default for CombineParams {
    fn default() -> Self {
        Self {
            mode: CombineMode::Add,
            factor: 1.0,
        }
    }
}

impl CombineParams {
    pub fn with_mode(mut self, mode: CombineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Weight of `b`; clamped to `[0, 1]` for [`CombineMode::Lerp`] when used.
    pub fn with_factor(mut self, factor: f32) -> Self {
        self.factor = factor.clamp(-16.0, 16.0);
        self
    }

    pub fn mode(&self) -> CombineMode {
        self.mode
    }
}

impl NodeBehavior for CombineParams {
    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::input(input(0), "a", SlotType::Mask),
            Slot::input(input(1), "b", SlotType::Mask),
            Slot::output(output(0), "output", SlotType::Mask),
        ]
    }

    fn kernels(&self) -> &'static [&'static str] {
        &[names::COMBINE]
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let a = ctx.input_texture(node, input(0));
        let b = ctx.input_texture(node, input(1));
        let resolution = ctx
            .output_resolution(a.as_ref())
            .max(ctx.output_resolution(b.as_ref()));
        let dst = ctx.create_render_target(RtDescriptor::mask(resolution), node, output(0));
        let factor = match self.mode {
            CombineMode::Lerp => self.factor.clamp(0.0, 1.0),
            _ => self.factor,
        };
        ctx.dispatch(
            names::COMBINE,
            &Bindings::new()
                .opt_field("a", a.as_ref())
                .opt_field("b", b.as_ref())
                .field("dst", &dst)
                .int("mode", self.mode.kernel_mode())
                .float("factor", factor)
                .float("default_b", self.mode.default_b()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{GraphExecution, OutputValue};
    use crate::graph::{Graph, NodeSpec, SlotType};
    use crate::import::ImportRegistry;
    use crate::nodes::source::ImportFieldParams;
    use crate::nodes::testing::{args, compile, run};
    use crate::resource::ResourcePool;

    fn resolution_through(import_resolution: u32, base: u32) -> u32 {
        let mut graph = Graph::new();
        let src = graph.add(NodeSpec::ImportField(
            ImportFieldParams::new("x").with_resolution(Some(import_resolution)),
        ));
        let blur = graph.add(NodeSpec::blur(1));
        graph.connect_by_name(src, "output", blur, "input").unwrap();
        let compiled = compile(&graph);

        let mut imports = ImportRegistry::new();
        imports.register_field("x", |_: usize, p: glam::Vec2| p.x);
        let mut pool = ResourcePool::new();
        let out = GraphExecution::new(&compiled, blur, args(base), &mut pool, &imports)
            .unwrap()
            .finish()
            .unwrap();
        out.field("output").unwrap().resolution()
    }

    #[test]
    fn output_resolution_never_drops_below_input_or_base() {
        assert_eq!(resolution_through(32, 8), 32);
        assert_eq!(resolution_through(4, 8), 8);
        assert_eq!(resolution_through(8, 8), 8);
    }

    #[test]
    fn combine_uses_white_for_missing_multiplier() {
        let mut graph = Graph::new();
        let a = graph.add(NodeSpec::constant(0.5));
        let mul = graph.add(NodeSpec::combine(CombineMode::Multiply));
        graph.connect_by_name(a, "output", mul, "a").unwrap();
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let out = run(&compiled, mul, args(4), &mut pool, false).unwrap();
        assert!(out.field("output").unwrap().read().iter().all(|v| *v == 0.5));
    }

    #[test]
    fn noop_blur_forwards_the_input_resource() {
        let mut graph = Graph::new();
        let src = graph.add(NodeSpec::constant(0.3));
        let blur = graph.add(NodeSpec::Blur(BlurParams::default().with_radius(0)));
        let out = graph.add(NodeSpec::output(SlotType::Mask));
        graph.connect_by_name(src, "output", blur, "input").unwrap();
        graph.connect_by_name(blur, "output", out, "input").unwrap();
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let imports = ImportRegistry::new();

        let mut exec = GraphExecution::new(&compiled, out, args(4), &mut pool, &imports).unwrap();
        exec.run_until(blur).unwrap();
        let ctx = exec.context();
        let src_field = ctx.texture(graph.slot_ref(src, "output", crate::graph::Direction::Output).unwrap());
        let blurred = ctx.texture(crate::graph::SlotRef::new(blur, output(0)));
        assert!(src_field.unwrap().same_resource(&blurred.unwrap()));
        drop(exec);

        let result = run(&compiled, out, args(4), &mut pool, false).unwrap();
        match result.get("output") {
            Some(OutputValue::Field(f)) => assert!(f.read().iter().all(|v| (*v - 0.3).abs() < 1e-6)),
            other => panic!("unexpected output {other:?}"),
        }
    }
}
