//! Named aliases and the terminal output node.
//!
//! None of these nodes copies data: they only point slots at resources that
//! already exist, so the reference count of the physical owner carries every
//! read made through an alias.
use tracing::debug;

use crate::error::Result;
use crate::exec::{ExecutionContext, NodeBehavior};
use crate::graph::{NodeId, Slot, SlotRef, SlotType};
use crate::nodes::{input, output};

/// Publishes its input under a name for [`GetVariableParams`] readers.
#[derive(Clone, Debug, PartialEq)]
pub struct SetVariableParams {
    name: String,
    slot_type: SlotType,
}

impl SetVariableParams {
    pub fn new(name: impl Into<String>, slot_type: SlotType) -> Self {
        Self {
            name: name.into(),
            slot_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_type(&self) -> SlotType {
        self.slot_type
    }
}

impl NodeBehavior for SetVariableParams {
    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::input(input(0), "input", self.slot_type),
            Slot::output(output(0), "output", self.slot_type),
        ]
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let upstream = ctx.input_link(node, input(0));
        ctx.set_variable(&self.name, upstream);
        ctx.link_to_variable(SlotRef::new(node, output(0)), &self.name);
        debug!("Variable '{}' set by {}.", self.name, node);
        Ok(())
    }

    fn bypass(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.execute_immediate(node, ctx)
    }
}

/// Reads the resource published under a name.
#[derive(Clone, Debug, PartialEq)]
pub struct GetVariableParams {
    name: String,
    slot_type: SlotType,
}

impl GetVariableParams {
    pub fn new(name: impl Into<String>, slot_type: SlotType) -> Self {
        Self {
            name: name.into(),
            slot_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_type(&self) -> SlotType {
        self.slot_type
    }
}

impl NodeBehavior for GetVariableParams {
    fn slots(&self) -> Vec<Slot> {
        vec![Slot::output(output(0), "output", self.slot_type)]
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let out = SlotRef::new(node, output(0));
        if ctx.has_variable(&self.name) {
            ctx.link_to_variable(out, &self.name);
            ctx.release_variable_reader(&self.name);
        } else {
            ctx.link_to_invalid(out);
        }
        Ok(())
    }

    fn bypass(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.execute_immediate(node, ctx)
    }
}

/// Terminal pass-through of whatever type it is configured for. Always bypassed.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputParams {
    slot_type: SlotType,
}

impl OutputParams {
    pub fn new(slot_type: SlotType) -> Self {
        Self { slot_type }
    }

    pub fn slot_type(&self) -> SlotType {
        self.slot_type
    }
}

impl Default for OutputParams {
    fn default() -> Self {
        Self::new(SlotType::Mask)
    }
}

impl NodeBehavior for OutputParams {
    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::input(input(0), "input", self.slot_type),
            Slot::output(output(0), "output", self.slot_type),
        ]
    }

    fn is_noop(&self) -> bool {
        true
    }

    fn execute_immediate(&self, node: NodeId, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.bypass(node, ctx)
    }
}
