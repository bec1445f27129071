//! The contract every node kind implements.
use crate::error::Result;
use crate::exec::ExecutionContext;
use crate::graph::{Direction, NodeId, Slot, SlotId, SlotRef};
use crate::nodes::{input, OUTPUT_BASE};

/// Outcome of one progressive step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Progress {
    /// More work remains; the fraction done so far is in `[0, 1]`.
    Running(f32),
    Done,
}

/// Resumable work of an iterative node.
///
/// The scheduler calls [`step`](ProgressiveTask::step) until it reports
/// [`Progress::Done`]. Each step does a bounded slice of work. A task that is
/// abandoned before completion is told so through [`abort`](ProgressiveTask::abort)
/// and must release every temporary and input reference it still holds.
pub trait ProgressiveTask {
    fn step(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Progress>;

    fn abort(&mut self, ctx: &mut ExecutionContext<'_>);
}

/// Behavior of a node kind, implemented by its parameter struct.
pub trait NodeBehavior {
    /// Ordered input and output slots for the current parameters.
    fn slots(&self) -> Vec<Slot>;

    /// Kernels this node dispatches, checked when the graph is compiled.
    fn kernels(&self) -> &'static [&'static str] {
        &[]
    }

    /// True when the current parameters make the node an identity.
    fn is_noop(&self) -> bool {
        false
    }

    /// Runs the node to completion.
    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()>;

    /// Starts progressive execution. Non-iterative nodes return `None` and are
    /// executed immediately instead.
    fn begin(
        &self,
        _node: NodeId,
        _ctx: &mut ExecutionContext<'_>,
    ) -> Result<Option<Box<dyn ProgressiveTask>>> {
        Ok(None)
    }

    /// Input whose resource `output` carries when the node is bypassed.
    ///
    /// Defaults to the input at the same index when it has the same type.
    /// Outputs that are not a transformed copy of an input return `None`.
    fn passthrough(&self, output: SlotId) -> Option<SlotId> {
        let slots = self.slots();
        let out = slots
            .iter()
            .find(|s| s.id == output && s.direction == Direction::Output)?;
        let index = output.0.checked_sub(OUTPUT_BASE)?;
        slots
            .iter()
            .find(|s| s.id == input(index) && s.direction == Direction::Input)
            .filter(|s| s.slot_type == out.slot_type)
            .map(|s| s.id)
    }

    /// Forwards each output's [`passthrough`](NodeBehavior::passthrough) input.
    ///
    /// Outputs without one are linked to nothing, which downstream nodes see as
    /// an unconnected input.
    fn bypass(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        for output in self.slots().iter().filter(|s| s.direction == Direction::Output) {
            match self.passthrough(output.id) {
                Some(input) => ctx.bypass(node, input, output.id),
                None => ctx.link_to_invalid(SlotRef::new(node, output.id)),
            }
        }
        Ok(())
    }
}
