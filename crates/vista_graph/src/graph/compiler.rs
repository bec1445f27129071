//! Compiler from authored graphs into executable form.
//!
//! This module turns a [`Graph`] into a [`CompiledGraph`].
//! It validates links and variables, resolves every kernel the nodes need
//! against the [`KernelRegistry`], and computes a topological order. A compiled
//! graph then derives an [`ExecutionPlan`] per evaluation target: the set of
//! nodes that must run and the static reference count of every output.
//!
//! Typical usage:
//! - [`GraphCompiler::compile`] once per graph edit
//! - [`CompiledGraph::plan`] once per evaluation
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::graph::{Direction, Graph, Node, NodeId, NodeSpec, SlotRef, SlotType};
use crate::kernel::KernelRegistry;

/// Options for compiling a graph.
#[derive(Clone, Debug, Default)]
pub struct CompileOptions {
    /// Kernels that must be present even if no node asks for them.
    pub required_kernels: HashSet<String>,
}

/// Compiler for graphs into [`CompiledGraph`]s.
pub struct GraphCompiler;

impl GraphCompiler {
    /// Compiles `graph`, resolving kernels against `kernels`.
    pub fn compile(
        graph: &Graph,
        kernels: Rc<KernelRegistry>,
        opts: &CompileOptions,
    ) -> Result<CompiledGraph> {
        let mut inputs: HashMap<SlotRef, SlotRef> = HashMap::new();
        for link in graph.links() {
            validate_link(graph, link.from, link.to)?;
            if inputs.insert(link.to, link.from).is_some() {
                return Err(Error::Compile(format!(
                    "input {} is fed by more than one link",
                    link.to
                )));
            }
        }

        let variable_setters = collect_variables(graph)?;

        for node in graph.nodes() {
            for name in node.spec.behavior().kernels() {
                if !kernels.contains(name) {
                    return Err(Error::UnknownKernel {
                        name: name.to_string(),
                    });
                }
            }
        }
        for name in &opts.required_kernels {
            if !kernels.contains(name) {
                return Err(Error::UnknownKernel { name: name.clone() });
            }
        }

        let mut dependencies: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
        for node in graph.nodes() {
            dependencies.entry(node.id).or_default();
        }
        for (to, from) in &inputs {
            dependencies.entry(to.node).or_default().insert(from.node);
        }
        for node in graph.nodes() {
            if let NodeSpec::GetVariable(params) = &node.spec {
                match variable_setters.get(params.name()) {
                    Some(setter) => {
                        dependencies.entry(node.id).or_default().insert(*setter);
                    }
                    None => warn!(
                        "Variable '{}' read by node {} is never set.",
                        params.name(),
                        node.id
                    ),
                }
            }
        }

        let order = topo_sort(&dependencies)?;
        Ok(CompiledGraph {
            graph: graph.clone(),
            order,
            inputs,
            dependencies,
            kernels,
        })
    }
}

fn validate_link(graph: &Graph, from: SlotRef, to: SlotRef) -> Result<()> {
    let slot_of = |r: SlotRef| {
        graph
            .node(r.node)
            .and_then(|n| n.slot(r.slot))
            .ok_or_else(|| Error::Compile(format!("link references unknown slot {}", r)))
    };
    let from_slot = slot_of(from)?;
    let to_slot = slot_of(to)?;
    if from_slot.direction != Direction::Output || to_slot.direction != Direction::Input {
        return Err(Error::Compile(format!(
            "link {} -> {} must go from an output to an input",
            from, to
        )));
    }
    if from_slot.slot_type != to_slot.slot_type {
        return Err(Error::Compile(format!(
            "link {} -> {} joins {:?} to {:?}",
            from, to, from_slot.slot_type, to_slot.slot_type
        )));
    }
    Ok(())
}

fn collect_variables(graph: &Graph) -> Result<HashMap<String, NodeId>> {
    let mut setters: HashMap<String, (NodeId, SlotType)> = HashMap::new();
    for node in graph.nodes() {
        if let NodeSpec::SetVariable(params) = &node.spec {
            if let Some((other, _)) =
                setters.insert(params.name().to_string(), (node.id, params.slot_type()))
            {
                return Err(Error::Compile(format!(
                    "variable '{}' is set by both {} and {}",
                    params.name(),
                    other,
                    node.id
                )));
            }
        }
    }
    for node in graph.nodes() {
        if let NodeSpec::GetVariable(params) = &node.spec {
            if let Some((setter, slot_type)) = setters.get(params.name()) {
                if *slot_type != params.slot_type() {
                    return Err(Error::Compile(format!(
                        "variable '{}' is {:?} at {} but read as {:?} by {}",
                        params.name(),
                        slot_type,
                        setter,
                        params.slot_type(),
                        node.id
                    )));
                }
            }
        }
    }
    Ok(setters
        .into_iter()
        .map(|(name, (id, _))| (name, id))
        .collect())
}

fn topo_sort(dependencies: &HashMap<NodeId, BTreeSet<NodeId>>) -> Result<Vec<NodeId>> {
    let mut indeg: HashMap<NodeId, usize> = HashMap::new();
    let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

    for (id, deps) in dependencies {
        indeg.insert(*id, deps.len());
        for dep in deps {
            dependents.entry(*dep).or_default().push(*id);
        }
    }

    let mut ready: BTreeSet<NodeId> = indeg
        .iter()
        .filter_map(|(k, &v)| if v == 0 { Some(*k) } else { None })
        .collect();
    let mut out: Vec<NodeId> = Vec::with_capacity(dependencies.len());

    while let Some(n) = ready.pop_first() {
        out.push(n);

        if let Some(children) = dependents.get(&n) {
            for child in children {
                if let Some(e) = indeg.get_mut(child) {
                    *e = e.saturating_sub(1);
                    if *e == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }
    }

    if out.len() != dependencies.len() {
        return Err(Error::Compile("Cycle detected in graph".into()));
    }

    Ok(out)
}

/// A validated graph with its kernels resolved.
pub struct CompiledGraph {
    graph: Graph,
    order: Vec<NodeId>,
    inputs: HashMap<SlotRef, SlotRef>,
    dependencies: HashMap<NodeId, BTreeSet<NodeId>>,
    kernels: Rc<KernelRegistry>,
}

impl CompiledGraph {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node(id)
    }

    /// Topological order of every node in the graph.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    /// Output feeding the input `to`, or [`SlotRef::INVALID`] if unconnected.
    pub fn input_link(&self, to: SlotRef) -> SlotRef {
        self.inputs.get(&to).copied().unwrap_or(SlotRef::INVALID)
    }

    /// Plans an evaluation of `target`: which nodes run and how often each output is read.
    pub fn plan(&self, target: NodeId) -> Result<ExecutionPlan> {
        let target_node = self.graph.node(target).ok_or(Error::UnknownNode(target))?;

        let mut needed: HashSet<NodeId> = HashSet::new();
        let mut stack = vec![target];
        while let Some(id) = stack.pop() {
            if !needed.insert(id) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(&id) {
                stack.extend(deps.iter().copied());
            }
        }

        let order: Vec<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|id| needed.contains(id))
            .collect();

        let mut ref_counts: HashMap<SlotRef, i32> = HashMap::new();
        for (to, from) in &self.inputs {
            if needed.contains(&to.node) && needed.contains(&from.node) {
                *ref_counts.entry(*from).or_default() += 1;
            }
        }
        for slot in target_node.outputs() {
            *ref_counts.entry(SlotRef::new(target, slot.id)).or_default() += 1;
        }

        let mut variable_readers: HashMap<String, i32> = HashMap::new();
        for id in &order {
            if let Some(NodeSpec::GetVariable(params)) = self.graph.node(*id).map(|n| &n.spec) {
                *variable_readers.entry(params.name().to_string()).or_default() += 1;
            }
        }

        Ok(ExecutionPlan {
            target,
            order,
            ref_counts,
            variable_readers,
        })
    }
}

/// Nodes and static reference counts for one evaluation target.
#[derive(Clone, Debug)]
pub struct ExecutionPlan {
    pub target: NodeId,
    /// Nodes that must run, in topological order.
    pub order: Vec<NodeId>,
    /// Number of planned reads per output; target outputs carry one extra read.
    pub ref_counts: HashMap<SlotRef, i32>,
    /// Number of planned readers per variable name.
    pub variable_readers: HashMap<String, i32>,
}
