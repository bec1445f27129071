//! Per-evaluation state shared by the nodes of one run.
//!
//! The [`ExecutionContext`] is the only way a node sees the rest of the graph.
//! It resolves inputs to pooled resources, hands out outputs and scratch
//! resources, keeps reference counts exact across bypasses and variables, and
//! forwards kernel dispatches to the registry the graph was compiled against.
use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::args::{ArgValue, ExecutionArgs};
use crate::error::Result;
use crate::graph::{CompiledGraph, Direction, ExecutionPlan, Node, NodeId, SlotId, SlotRef};
use crate::import::ImportRegistry;
use crate::kernel::Bindings;
use crate::resource::{Buffer, BufferDescriptor, Field2D, ResourcePool, RtDescriptor};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Alias {
    Variable(String),
    Invalid,
}

/// Upper bound on alias hops followed while resolving a reference.
const MAX_ALIAS_DEPTH: usize = 64;

/// Resolution, aliasing and reference-count state for one evaluation.
pub struct ExecutionContext<'a> {
    compiled: &'a CompiledGraph,
    plan: ExecutionPlan,
    args: ExecutionArgs,
    imports: &'a ImportRegistry,
    pool: &'a mut ResourcePool,
    variables: HashMap<String, SlotRef>,
    aliases: HashMap<SlotRef, Alias>,
    released_inputs: HashSet<SlotRef>,
    previews: HashMap<NodeId, Field2D>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        compiled: &'a CompiledGraph,
        plan: ExecutionPlan,
        args: ExecutionArgs,
        imports: &'a ImportRegistry,
        pool: &'a mut ResourcePool,
    ) -> Self {
        Self {
            compiled,
            plan,
            args,
            imports,
            pool,
            variables: HashMap::new(),
            aliases: HashMap::new(),
            released_inputs: HashSet::new(),
            previews: HashMap::new(),
        }
    }

    pub fn compiled(&self) -> &'a CompiledGraph {
        self.compiled
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn args(&self) -> &ExecutionArgs {
        &self.args
    }

    /// Keyed lookup of a global argument.
    pub fn arg(&self, name: &str) -> Option<ArgValue> {
        self.args.get(name)
    }

    pub fn imports(&self) -> &'a ImportRegistry {
        self.imports
    }

    pub fn pool(&self) -> &ResourcePool {
        self.pool
    }

    pub fn node(&self, id: NodeId) -> Option<&'a Node> {
        self.compiled.node(id)
    }

    /// True if `node` is the node this evaluation was requested for.
    pub fn is_target_node(&self, node: NodeId) -> bool {
        self.plan.target == node
    }

    /// Output feeding input `slot` of `node`, or [`SlotRef::INVALID`].
    pub fn input_link(&self, node: NodeId, slot: SlotId) -> SlotRef {
        self.compiled.input_link(SlotRef::new(node, slot))
    }

    /// Follows aliases to the physical output owning the data of `slot_ref`.
    ///
    /// Returns `None` for unconnected references and for outputs linked to nothing.
    pub fn resolve(&self, slot_ref: SlotRef) -> Option<SlotRef> {
        let mut current = slot_ref;
        for _ in 0..MAX_ALIAS_DEPTH {
            if !current.is_valid() {
                return None;
            }
            match self.aliases.get(&current) {
                None => return Some(current),
                Some(Alias::Invalid) => return None,
                Some(Alias::Variable(name)) => current = *self.variables.get(name)?,
            }
        }
        debug!("Alias chain from {} is too deep; treating as unconnected.", slot_ref);
        None
    }

    /// Field behind `slot_ref`, or `None` when the caller should use its default.
    pub fn texture(&self, slot_ref: SlotRef) -> Option<Field2D> {
        let physical = self.resolve(slot_ref)?;
        self.pool.resource(physical)?.as_field().cloned()
    }

    /// Buffer behind `slot_ref`, or `None` when the caller should use its default.
    pub fn buffer(&self, slot_ref: SlotRef) -> Option<Buffer> {
        let physical = self.resolve(slot_ref)?;
        self.pool.resource(physical)?.as_buffer().cloned()
    }

    pub fn input_texture(&self, node: NodeId, slot: SlotId) -> Option<Field2D> {
        self.texture(self.input_link(node, slot))
    }

    pub fn input_buffer(&self, node: NodeId, slot: SlotId) -> Option<Buffer> {
        self.buffer(self.input_link(node, slot))
    }

    /// Allocates the field published on output `slot` of `node`.
    pub fn create_render_target(&mut self, desc: RtDescriptor, node: NodeId, slot: SlotId) -> Field2D {
        self.pool.create_render_target(desc, SlotRef::new(node, slot))
    }

    /// Allocates the buffer published on output `slot` of `node`.
    pub fn create_buffer(&mut self, desc: BufferDescriptor, node: NodeId, slot: SlotId) -> Buffer {
        self.pool.create_buffer(desc, SlotRef::new(node, slot))
    }

    /// Scratch field owned by `node`, released with [`release_temporary`](Self::release_temporary).
    pub fn create_temporary(&mut self, desc: RtDescriptor, node: NodeId, name: &str) -> Field2D {
        self.pool.create_temporary(desc, &temporary_key(node, name))
    }

    pub fn create_temporary_buffer(
        &mut self,
        desc: BufferDescriptor,
        node: NodeId,
        name: &str,
    ) -> Buffer {
        self.pool
            .create_temporary_buffer(desc, &temporary_key(node, name))
    }

    pub fn release_temporary(&mut self, node: NodeId, name: &str) -> bool {
        self.pool.release_temporary(&temporary_key(node, name))
    }

    /// Current reference count of the physical owner of `slot_ref`.
    pub fn reference_count(&self, slot_ref: SlotRef) -> i32 {
        match self.resolve(slot_ref) {
            Some(physical) => self.pool.reference_count(physical),
            None => 0,
        }
    }

    /// True if output `slot_ref` is read downstream or belongs to the target node.
    pub fn is_output_consumed(&self, slot_ref: SlotRef) -> bool {
        self.pool.planned_count(slot_ref) > 0 || self.is_target_node(slot_ref.node)
    }

    /// Drops one reference on the physical owner of `slot_ref`.
    pub fn release_reference(&mut self, slot_ref: SlotRef) {
        if let Some(physical) = self.resolve(slot_ref) {
            self.pool.release_reference(physical);
        }
    }

    /// Releases the reference `node` holds through input `slot`. Repeated calls are ignored.
    pub fn release_input(&mut self, node: NodeId, slot: SlotId) {
        let input = SlotRef::new(node, slot);
        if !self.released_inputs.insert(input) {
            return;
        }
        let upstream = self.input_link(node, slot);
        self.release_reference(upstream);
    }

    /// Releases every input reference `node` still holds.
    pub fn release_inputs(&mut self, node: NodeId) {
        let compiled = self.compiled;
        let Some(n) = compiled.node(node) else {
            return;
        };
        for slot in n.inputs() {
            self.release_input(node, slot.id);
        }
    }

    /// Publishes the data of `slot_ref` under `name`.
    ///
    /// The physical owner keeps one extra reference per planned reader of `name`;
    /// readers hand theirs back through [`release_variable_reader`](Self::release_variable_reader).
    pub fn set_variable(&mut self, name: &str, slot_ref: SlotRef) {
        let physical = self.resolve(slot_ref);
        let readers = self.plan.variable_readers.get(name).copied().unwrap_or(0);
        match physical {
            Some(physical) => {
                if readers > 0 {
                    self.pool.adjust_reference(physical, readers);
                }
                self.variables.insert(name.to_string(), physical);
            }
            None => {
                self.variables.insert(name.to_string(), SlotRef::INVALID);
            }
        }
        trace!("Variable '{}' -> {:?} ({} readers).", name, physical, readers);
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Returns the reference a planned reader of `name` was holding.
    pub fn release_variable_reader(&mut self, name: &str) {
        if let Some(physical) = self.variables.get(name).copied() {
            if physical.is_valid() {
                self.pool.release_reference(physical);
            }
        }
    }

    /// Makes `output` share the resource published under `name`.
    ///
    /// Consumers of `output` release the physical owner instead, so the owner
    /// takes over the planned count of `output`.
    pub fn link_to_variable(&mut self, output: SlotRef, name: &str) {
        let physical = self.variables.get(name).copied();
        match physical {
            Some(physical) if physical.is_valid() => {
                let planned = self.pool.planned_count(output);
                if planned > 0 {
                    self.pool.adjust_reference(physical, planned);
                }
                self.aliases
                    .insert(output, Alias::Variable(name.to_string()));
            }
            _ => self.link_to_invalid(output),
        }
    }

    /// Marks `output` as producing nothing.
    pub fn link_to_invalid(&mut self, output: SlotRef) {
        self.aliases.insert(output, Alias::Invalid);
    }

    /// Forwards input `input` of `node` to its output `output` without copying.
    ///
    /// The alias key is derived from the physical upstream output, so every
    /// bypass chain ending at the same resource shares one key.
    pub fn bypass(&mut self, node: NodeId, input: SlotId, output: SlotId) {
        let out_ref = SlotRef::new(node, output);
        let upstream = self.input_link(node, input);
        match self.resolve(upstream) {
            Some(physical) => {
                let key = physical.variable_key();
                if !self.variables.contains_key(&key) {
                    self.variables.insert(key.clone(), physical);
                }
                self.link_to_variable(out_ref, &key);
                debug!("Node {} forwards {} as {}.", node, physical, out_ref);
            }
            None => {
                self.link_to_invalid(out_ref);
                debug!("Node {} forwards nothing to {}.", node, out_ref);
            }
        }
        self.release_input(node, input);
    }

    /// Resolution of fields produced from `input`: never below the base resolution
    /// and never below the input's.
    pub fn output_resolution(&self, input: Option<&Field2D>) -> u32 {
        let base = self.args.resolution;
        input.map_or(base, |f| base.max(f.resolution()))
    }

    /// Runs the kernel registered under `name`.
    pub fn dispatch(&self, name: &str, bindings: &Bindings) -> Result<()> {
        trace!("Dispatching kernel '{}'.", name);
        self.compiled.kernels().dispatch(name, bindings)
    }

    /// Publishes a work-in-progress field for `node`.
    pub fn publish_preview(&mut self, node: NodeId, field: Field2D) {
        self.previews.insert(node, field);
    }

    pub fn preview(&self, node: NodeId) -> Option<&Field2D> {
        self.previews.get(&node)
    }

    /// Releases the inputs of a finished node and reclaims its unread outputs.
    pub(crate) fn finish_node(&mut self, node: NodeId) {
        self.release_inputs(node);
        let compiled = self.compiled;
        let Some(n) = compiled.node(node) else {
            return;
        };
        for slot in n.slots().iter().filter(|s| s.direction == Direction::Output) {
            let out = SlotRef::new(node, slot.id);
            if self.pool.reclaim_if_unreferenced(out) {
                trace!("Output {} has no readers and was reclaimed.", out);
            }
        }
    }

    /// Returns every output still registered to the pool.
    pub(crate) fn reclaim_all(&mut self) -> usize {
        self.previews.clear();
        self.pool.reclaim_outputs()
    }
}

fn temporary_key(node: NodeId, name: &str) -> String {
    format!("{}/{}", node, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::GraphExecution;
    use crate::graph::{Graph, NodeSpec};
    use crate::nodes::filter::CombineMode;
    use crate::nodes::testing::{args, compile};
    use crate::nodes::{input, output};

    /// Constant feeding two no-op blurs that both feed one combine.
    fn twin_bypass() -> (Graph, [NodeId; 4]) {
        let mut graph = Graph::new();
        let c = graph.add(NodeSpec::constant(0.5));
        let left = graph.add(NodeSpec::blur(0));
        let right = graph.add(NodeSpec::blur(0));
        let join = graph.add(NodeSpec::combine(CombineMode::Max));
        graph.connect_by_name(c, "output", left, "input").unwrap();
        graph.connect_by_name(c, "output", right, "input").unwrap();
        graph.connect_by_name(left, "output", join, "a").unwrap();
        graph.connect_by_name(right, "output", join, "b").unwrap();
        (graph, [c, left, right, join])
    }

    #[test]
    fn bypass_chains_share_the_upstream_resource() {
        let (graph, [c, left, right, join]) = twin_bypass();
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let imports = ImportRegistry::new();
        let mut exec = GraphExecution::new(&compiled, join, args(8), &mut pool, &imports).unwrap();
        exec.run_until(left).unwrap();
        exec.run_until(right).unwrap();

        let ctx = exec.context();
        let source = SlotRef::new(c, output(0));
        assert_eq!(ctx.resolve(SlotRef::new(left, output(0))), Some(source));
        assert_eq!(ctx.resolve(SlotRef::new(right, output(0))), Some(source));
        // Each blur handed its own read back and passed one on to the combine.
        assert_eq!(ctx.reference_count(source), 2);
        let a = ctx.input_texture(join, input(0)).unwrap();
        let b = ctx.input_texture(join, input(1)).unwrap();
        assert!(a.same_resource(&b));
        assert!(ctx.has_variable(&source.variable_key()));
    }

    #[test]
    fn released_inputs_are_released_once() {
        let (graph, [c, left, _, join]) = twin_bypass();
        let compiled = compile(&graph);
        let plan = compiled.plan(join).unwrap();
        let mut pool = ResourcePool::new();
        pool.begin_evaluation(plan.ref_counts.clone());
        let imports = ImportRegistry::new();
        let mut ctx = ExecutionContext::new(&compiled, plan, args(8), &imports, &mut pool);

        let source = SlotRef::new(c, output(0));
        ctx.create_render_target(RtDescriptor::mask(8), c, output(0));
        assert_eq!(ctx.reference_count(source), 2);
        ctx.release_input(left, input(0));
        ctx.release_input(left, input(0));
        assert_eq!(ctx.reference_count(source), 1);
        assert!(ctx.is_output_consumed(source));
        assert!(ctx.is_output_consumed(SlotRef::new(join, output(0))));
    }

    #[test]
    fn unconnected_inputs_resolve_to_nothing() {
        let (graph, [_, _, _, join]) = twin_bypass();
        let mut graph = graph;
        graph.disconnect(SlotRef::new(join, input(1)));
        let compiled = compile(&graph);
        let plan = compiled.plan(join).unwrap();
        let mut pool = ResourcePool::new();
        pool.begin_evaluation(plan.ref_counts.clone());
        let imports = ImportRegistry::new();
        let ctx = ExecutionContext::new(&compiled, plan, args(8), &imports, &mut pool);

        assert_eq!(ctx.input_link(join, input(1)), SlotRef::INVALID);
        assert!(ctx.input_texture(join, input(1)).is_none());
        assert_eq!(ctx.reference_count(SlotRef::INVALID), 0);
        assert_eq!(ctx.output_resolution(None), 8);
    }
}
