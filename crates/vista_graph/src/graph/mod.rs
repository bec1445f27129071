//! Graph model: nodes, typed slots and directed links.
//!
//! This is pure data. Execution lives in [`crate::exec`]; the compiler in
//! [`compiler`] validates a [`Graph`] and derives evaluation plans from it.
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

pub mod compiler;
pub mod spec;

pub use compiler::{CompileOptions, CompiledGraph, ExecutionPlan, GraphCompiler};
pub use spec::NodeSpec;

/// Identifier of a node within one graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifier of a slot within one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

/// Address of a slot's data within one evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotRef {
    pub node: NodeId,
    pub slot: SlotId,
}

impl SlotRef {
    /// The empty reference, used for unconnected inputs.
    pub const INVALID: SlotRef = SlotRef {
        node: NodeId(u32::MAX),
        slot: SlotId(u32::MAX),
    };

    pub fn new(node: NodeId, slot: SlotId) -> Self {
        Self { node, slot }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Key under which bypassing nodes share this slot's resource.
    pub fn variable_key(&self) -> String {
        format!("slot:{}:{}", self.node.0, self.slot.0)
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}.{}", self.node, self.slot.0)
        } else {
            f.write_str("<invalid>")
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

/// Semantic type carried by a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotType {
    /// Single-channel 2D field.
    Mask,
    /// Multi-channel 2D field.
    ColorTexture,
    /// Structured array of fixed-stride records.
    Buffer,
}

impl SlotType {
    pub fn is_field(self) -> bool {
        matches!(self, SlotType::Mask | SlotType::ColorTexture)
    }
}

/// A typed input or output port on a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
    pub name: &'static str,
    pub direction: Direction,
    pub slot_type: SlotType,
}

impl Slot {
    pub fn input(id: SlotId, name: &'static str, slot_type: SlotType) -> Self {
        Self {
            id,
            name,
            direction: Direction::Input,
            slot_type,
        }
    }

    pub fn output(id: SlotId, name: &'static str, slot_type: SlotType) -> Self {
        Self {
            id,
            name,
            direction: Direction::Output,
            slot_type,
        }
    }
}

/// Directed edge from an output slot to an input slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Link {
    pub from: SlotRef,
    pub to: SlotRef,
}

/// A node instance: identity, presentation metadata and typed parameters.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    pub category: String,
    pub spec: NodeSpec,
    /// Disabled nodes forward their inputs instead of executing.
    pub enabled: bool,
}

impl Node {
    pub fn slots(&self) -> Vec<Slot> {
        self.spec.behavior().slots()
    }

    pub fn slot(&self, id: SlotId) -> Option<Slot> {
        self.slots().into_iter().find(|s| s.id == id)
    }

    pub fn slot_by_name(&self, name: &str, direction: Direction) -> Option<Slot> {
        self.slots()
            .into_iter()
            .find(|s| s.name == name && s.direction == direction)
    }

    pub fn inputs(&self) -> Vec<Slot> {
        self.slots()
            .into_iter()
            .filter(|s| s.direction == Direction::Input)
            .collect()
    }

    pub fn outputs(&self) -> Vec<Slot> {
        self.slots()
            .into_iter()
            .filter(|s| s.direction == Direction::Output)
            .collect()
    }
}

/// An authored node graph.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    links: Vec<Link>,
    next_id: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its id.
    pub fn add(&mut self, spec: NodeSpec) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                id,
                title: spec.title().to_string(),
                category: spec.category().to_string(),
                spec,
                enabled: true,
            },
        );
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Enables or disables a node. Returns `false` if the node does not exist.
    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Mutable access for parameter edits.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Output feeding the input `to`, if connected.
    pub fn input_link(&self, to: SlotRef) -> Option<SlotRef> {
        self.links.iter().find(|l| l.to == to).map(|l| l.from)
    }

    /// Connects an output slot to an input slot.
    pub fn connect(&mut self, from: SlotRef, to: SlotRef) -> Result<()> {
        let from_slot = self.lookup_slot(from)?;
        let to_slot = self.lookup_slot(to)?;
        if from_slot.direction != Direction::Output {
            return Err(Error::InvalidConfig(format!("{} is not an output", from)));
        }
        if to_slot.direction != Direction::Input {
            return Err(Error::InvalidConfig(format!("{} is not an input", to)));
        }
        if from.node == to.node {
            return Err(Error::InvalidConfig(format!(
                "cannot link node {} to itself",
                from.node
            )));
        }
        if from_slot.slot_type != to_slot.slot_type {
            return Err(Error::InvalidConfig(format!(
                "slot types differ: {} is {:?}, {} is {:?}",
                from, from_slot.slot_type, to, to_slot.slot_type
            )));
        }
        if self.input_link(to).is_some() {
            return Err(Error::InvalidConfig(format!("input {} is already linked", to)));
        }
        self.links.push(Link { from, to });
        Ok(())
    }

    /// Connects slots addressed by name.
    pub fn connect_by_name(
        &mut self,
        from_node: NodeId,
        output: &str,
        to_node: NodeId,
        input: &str,
    ) -> Result<()> {
        let from = self.slot_ref(from_node, output, Direction::Output)?;
        let to = self.slot_ref(to_node, input, Direction::Input)?;
        self.connect(from, to)
    }

    /// Resolves a named slot of a node.
    pub fn slot_ref(&self, node: NodeId, name: &str, direction: Direction) -> Result<SlotRef> {
        let slot = self
            .node(node)
            .ok_or(Error::UnknownNode(node))?
            .slot_by_name(name, direction)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("node {} has no {:?} slot '{}'", node, direction, name))
            })?;
        Ok(SlotRef::new(node, slot.id))
    }

    /// Removes the link feeding `to`, returning it if present.
    pub fn disconnect(&mut self, to: SlotRef) -> Option<Link> {
        let index = self.links.iter().position(|l| l.to == to)?;
        Some(self.links.remove(index))
    }

    /// Removes a node together with every link touching it.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        self.links.retain(|l| l.from.node != id && l.to.node != id);
        Some(node)
    }

    fn lookup_slot(&self, slot_ref: SlotRef) -> Result<Slot> {
        self.node(slot_ref.node)
            .ok_or(Error::UnknownNode(slot_ref.node))?
            .slot(slot_ref.slot)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown slot {}", slot_ref)))
    }
}
