//! Host-side evaluation loop.
//!
//! A [`GraphExecution`] walks the plan of one target node in topological order.
//! Each call to [`GraphExecution::step`] performs one unit of work: a whole
//! immediate node, a bypass, or one slice of a progressive task. The host owns
//! the loop, so step boundaries are the only points where it can inspect the
//! evaluation or abandon it with [`GraphExecution::abort`].
use tracing::{debug, info, warn};

use crate::args::ExecutionArgs;
use crate::error::{Error, Result};
use crate::exec::events::{EventSink, ExecutionEvent};
use crate::exec::{ExecutionContext, Progress, ProgressiveTask};
use crate::graph::{CompiledGraph, NodeId, SlotRef, SlotType};
use crate::import::ImportRegistry;
use crate::resource::{Buffer, Field2D, ResourcePool};

/// How nodes are driven during an evaluation.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionOptions {
    /// Run iterative nodes as progressive tasks spread over several steps.
    pub progressive: bool,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progressive(mut self, progressive: bool) -> Self {
        self.progressive = progressive;
        self
    }
}

/// Result of one [`GraphExecution::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecutionProgress {
    /// `node` did work; `fraction` is its progress in `[0, 1]`.
    Running { node: NodeId, fraction: f32 },
    /// Every node of the plan has run.
    Finished,
}

/// Host copy of one output of the target node.
#[derive(Debug, Clone)]
pub enum OutputValue {
    Field(Field2D),
    Buffer(Buffer),
    /// The output was linked to nothing.
    Empty,
}

/// Outputs of the target node, copied out of the pool.
#[derive(Debug, Clone)]
pub struct EvaluationOutput {
    pub target: NodeId,
    values: Vec<(&'static str, OutputValue)>,
}

impl EvaluationOutput {
    pub fn get(&self, slot_name: &str) -> Option<&OutputValue> {
        self.values
            .iter()
            .find(|(name, _)| *name == slot_name)
            .map(|(_, v)| v)
    }

    pub fn field(&self, slot_name: &str) -> Option<&Field2D> {
        match self.get(slot_name)? {
            OutputValue::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn buffer(&self, slot_name: &str) -> Option<&Buffer> {
        match self.get(slot_name)? {
            OutputValue::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &OutputValue)> {
        self.values.iter().map(|(n, v)| (*n, v))
    }
}

/// One evaluation of a compiled graph.
pub struct GraphExecution<'a> {
    ctx: ExecutionContext<'a>,
    options: ExecutionOptions,
    cursor: usize,
    running: Option<(NodeId, Box<dyn ProgressiveTask>)>,
    completed: Vec<NodeId>,
    started: bool,
    finished: bool,
    aborted: bool,
}

impl<'a> GraphExecution<'a> {
    /// Prepares an evaluation of `target`.
    ///
    /// Validates `args`, plans the evaluation and primes `pool` with the planned
    /// reference counts. No node runs until the first step.
    pub fn new(
        compiled: &'a CompiledGraph,
        target: NodeId,
        args: ExecutionArgs,
        pool: &'a mut ResourcePool,
        imports: &'a ImportRegistry,
    ) -> Result<Self> {
        args.validate()?;
        let plan = compiled.plan(target)?;
        pool.begin_evaluation(plan.ref_counts.clone());
        Ok(Self {
            ctx: ExecutionContext::new(compiled, plan, args, imports, pool),
            options: ExecutionOptions::default(),
            cursor: 0,
            running: None,
            completed: Vec::new(),
            started: false,
            finished: false,
            aborted: false,
        })
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn context(&self) -> &ExecutionContext<'a> {
        &self.ctx
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True once `node` has published its outputs in this evaluation.
    pub fn is_node_finished(&self, node: NodeId) -> bool {
        self.completed.contains(&node)
    }

    /// Node whose progressive task is currently suspended, if any.
    pub fn running_node(&self) -> Option<NodeId> {
        self.running.as_ref().map(|(id, _)| *id)
    }

    pub fn step(&mut self) -> Result<ExecutionProgress> {
        self.step_with_events(&mut ())
    }

    /// Performs one unit of work, reporting events to `sink`.
    pub fn step_with_events(&mut self, sink: &mut dyn EventSink) -> Result<ExecutionProgress> {
        if self.finished {
            return Ok(ExecutionProgress::Finished);
        }
        if !self.started {
            self.started = true;
            let target = self.ctx.plan().target;
            let node_count = self.ctx.plan().order.len();
            info!("Evaluating {} ({} nodes).", target, node_count);
            sink.send(ExecutionEvent::EvaluationStarted { target, node_count });
        }

        if let Some((node, mut task)) = self.running.take() {
            return match task.step(&mut self.ctx) {
                Ok(Progress::Running(fraction)) => {
                    let fraction = fraction.clamp(0.0, 1.0);
                    self.running = Some((node, task));
                    sink.send(ExecutionEvent::NodeProgress { node, fraction });
                    Ok(ExecutionProgress::Running { node, fraction })
                }
                Ok(Progress::Done) => {
                    self.complete(node, sink);
                    Ok(ExecutionProgress::Running {
                        node,
                        fraction: 1.0,
                    })
                }
                Err(err) => {
                    task.abort(&mut self.ctx);
                    self.fail(node, &err, sink);
                    Err(err)
                }
            };
        }

        let Some(node) = self.ctx.plan().order.get(self.cursor).copied() else {
            self.finished = true;
            let target = self.ctx.plan().target;
            info!("Evaluation of {} finished.", target);
            sink.send(ExecutionEvent::EvaluationFinished { target });
            return Ok(ExecutionProgress::Finished);
        };
        self.cursor += 1;

        match self.start_node(node, sink) {
            Ok(Some(task)) => {
                self.running = Some((node, task));
                Ok(ExecutionProgress::Running {
                    node,
                    fraction: 0.0,
                })
            }
            Ok(None) => {
                self.complete(node, sink);
                Ok(ExecutionProgress::Running {
                    node,
                    fraction: 1.0,
                })
            }
            Err(err) => {
                self.fail(node, &err, sink);
                Err(err)
            }
        }
    }

    /// Runs every remaining step.
    pub fn run(&mut self) -> Result<()> {
        self.run_with_events(&mut ())
    }

    pub fn run_with_events(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        while self.step_with_events(sink)? != ExecutionProgress::Finished {}
        Ok(())
    }

    /// Steps until `node` has published its outputs or the evaluation ends.
    pub fn run_until(&mut self, node: NodeId) -> Result<()> {
        while !self.is_node_finished(node) {
            if self.step()? == ExecutionProgress::Finished {
                break;
            }
        }
        Ok(())
    }

    /// Abandons the evaluation.
    ///
    /// The suspended task, if any, releases its temporaries and inputs; every
    /// output still registered goes back to the pool.
    pub fn abort(&mut self) {
        self.abort_with_events(&mut ());
    }

    pub fn abort_with_events(&mut self, sink: &mut dyn EventSink) {
        if self.finished && self.running.is_none() {
            return;
        }
        let node = self.running.as_ref().map(|(id, _)| *id);
        if let Some((node, mut task)) = self.running.take() {
            task.abort(&mut self.ctx);
            self.ctx.release_inputs(node);
        }
        let reclaimed = self.ctx.reclaim_all();
        self.finished = true;
        self.aborted = true;
        warn!(
            "Evaluation of {} aborted; {} outputs reclaimed.",
            self.ctx.plan().target,
            reclaimed
        );
        sink.send(ExecutionEvent::EvaluationAborted { node });
    }

    /// Completes the evaluation and copies the outputs of the target node.
    pub fn finish(mut self) -> Result<EvaluationOutput> {
        if self.aborted {
            return Err(Error::Runtime("evaluation was aborted".into()));
        }
        self.run()?;
        let target = self.ctx.plan().target;
        let node = self.ctx.node(target).ok_or(Error::UnknownNode(target))?;
        let values = node
            .outputs()
            .into_iter()
            .map(|slot| {
                let slot_ref = SlotRef::new(target, slot.id);
                let value = match slot.slot_type {
                    SlotType::Buffer => self
                        .ctx
                        .buffer(slot_ref)
                        .map(|b| OutputValue::Buffer(Buffer::detached(b.descriptor(), b.to_vec()))),
                    SlotType::Mask | SlotType::ColorTexture => self
                        .ctx
                        .texture(slot_ref)
                        .map(|f| OutputValue::Field(Field2D::detached(f.descriptor(), f.to_vec()))),
                };
                (slot.name, value.unwrap_or(OutputValue::Empty))
            })
            .collect();
        self.ctx.reclaim_all();
        Ok(EvaluationOutput { target, values })
    }

    fn start_node(
        &mut self,
        node: NodeId,
        sink: &mut dyn EventSink,
    ) -> Result<Option<Box<dyn ProgressiveTask>>> {
        let n = self.ctx.node(node).ok_or(Error::UnknownNode(node))?;
        let behavior = n.spec.behavior();
        debug!("Node {} ({}) started.", node, n.title);
        sink.send(ExecutionEvent::NodeStarted {
            node,
            title: n.title.clone(),
        });

        if !n.enabled || behavior.is_noop() {
            debug!(
                "Node {} is {}; bypassing.",
                node,
                if n.enabled { "a no-op for its parameters" } else { "disabled" }
            );
            behavior.bypass(node, &mut self.ctx)?;
            sink.send(ExecutionEvent::NodeBypassed { node });
            return Ok(None);
        }
        if self.options.progressive {
            if let Some(task) = behavior.begin(node, &mut self.ctx)? {
                return Ok(Some(task));
            }
        }
        behavior.execute_immediate(node, &mut self.ctx)?;
        Ok(None)
    }

    fn complete(&mut self, node: NodeId, sink: &mut dyn EventSink) {
        self.ctx.finish_node(node);
        self.completed.push(node);
        debug!("Node {} finished.", node);
        sink.send(ExecutionEvent::NodeFinished { node });
    }

    fn fail(&mut self, node: NodeId, err: &Error, sink: &mut dyn EventSink) {
        sink.send(ExecutionEvent::Warning {
            context: node.to_string(),
            message: err.to_string(),
        });
        self.ctx.release_inputs(node);
        self.ctx.reclaim_all();
        self.finished = true;
        self.aborted = true;
        sink.send(ExecutionEvent::EvaluationAborted { node: Some(node) });
    }
}

impl Drop for GraphExecution<'_> {
    fn drop(&mut self) {
        if self.running.is_some() {
            self.abort();
        } else {
            self.ctx.reclaim_all();
        }
    }
}

/// Evaluates `target` to completion and returns its outputs.
pub fn evaluate(
    compiled: &CompiledGraph,
    target: NodeId,
    args: ExecutionArgs,
    pool: &mut ResourcePool,
    imports: &ImportRegistry,
) -> Result<EvaluationOutput> {
    GraphExecution::new(compiled, target, args, pool, imports)?.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::VecSink;
    use crate::graph::{Graph, NodeSpec};
    use crate::kernel::names;
    use crate::nodes::filter::CombineMode;
    use crate::nodes::output;
    use crate::nodes::simulation::water::{HydraulicErosionParams, WaterFlowParams};
    use crate::nodes::simulation::SimulationSettings;
    use crate::nodes::testing::{args, compile};

    #[derive(Debug, PartialEq)]
    enum Seen {
        Started,
        Node(NodeId),
        Bypassed(NodeId),
        Done(NodeId),
        Finished,
        Aborted,
        Other,
    }

    fn seen(events: &[ExecutionEvent]) -> Vec<Seen> {
        events
            .iter()
            .map(|e| match e {
                ExecutionEvent::EvaluationStarted { .. } => Seen::Started,
                ExecutionEvent::NodeStarted { node, .. } => Seen::Node(*node),
                ExecutionEvent::NodeBypassed { node } => Seen::Bypassed(*node),
                ExecutionEvent::NodeFinished { node } => Seen::Done(*node),
                ExecutionEvent::EvaluationFinished { .. } => Seen::Finished,
                ExecutionEvent::EvaluationAborted { .. } => Seen::Aborted,
                _ => Seen::Other,
            })
            .collect()
    }

    #[test]
    fn events_follow_the_plan_and_report_bypasses() {
        let mut graph = Graph::new();
        let c = graph.add(NodeSpec::constant(0.5));
        let skip = graph.add(NodeSpec::blur(0));
        let blur = graph.add(NodeSpec::blur(1));
        graph.connect_by_name(c, "output", skip, "input").unwrap();
        graph.connect_by_name(skip, "output", blur, "input").unwrap();
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let imports = ImportRegistry::new();

        let mut sink = VecSink::new();
        let mut exec = GraphExecution::new(&compiled, blur, args(8), &mut pool, &imports).unwrap();
        exec.run_with_events(&mut sink).unwrap();
        assert!(exec.is_finished());
        assert_eq!(
            seen(sink.as_slice()),
            vec![
                Seen::Started,
                Seen::Node(c),
                Seen::Done(c),
                Seen::Node(skip),
                Seen::Bypassed(skip),
                Seen::Done(skip),
                Seen::Node(blur),
                Seen::Done(blur),
                Seen::Finished,
            ]
        );
    }

    #[test]
    fn finished_evaluations_return_everything_and_reuse_it() {
        let mut graph = Graph::new();
        let a = graph.add(NodeSpec::constant(0.25));
        let b = graph.add(NodeSpec::constant(0.5));
        let sum = graph.add(NodeSpec::combine(CombineMode::Add));
        graph.connect_by_name(a, "output", sum, "a").unwrap();
        graph.connect_by_name(b, "output", sum, "b").unwrap();
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let imports = ImportRegistry::new();

        let out = evaluate(&compiled, sum, args(8), &mut pool, &imports).unwrap();
        assert!(out.field("output").unwrap().read().iter().all(|v| (v - 0.75).abs() < 1e-6));
        assert_eq!(pool.registered_outputs(), 0);
        assert_eq!(pool.live_temporaries(), 0);
        let allocated = pool.allocations();

        evaluate(&compiled, sum, args(8), &mut pool, &imports).unwrap();
        assert_eq!(pool.allocations(), allocated);
    }

    #[test]
    fn abort_mid_simulation_releases_every_resource() {
        let mut graph = Graph::new();
        let ground = graph.add(NodeSpec::noise(4.0));
        let water = graph.add(NodeSpec::WaterFlow(
            WaterFlowParams::default().with_settings(
                SimulationSettings::default()
                    .with_iteration_count(20)
                    .with_iterations_per_frame(2)
                    .with_detail_level(1.0),
            ),
        ));
        graph.connect_by_name(ground, "output", water, "height").unwrap();
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let imports = ImportRegistry::new();

        {
            let mut sink = VecSink::new();
            let mut exec = GraphExecution::new(&compiled, water, args(16), &mut pool, &imports)
                .unwrap()
                .with_options(ExecutionOptions::new().with_progressive(true));
            let mut fractions = Vec::new();
            while fractions.len() < 3 {
                if let ExecutionProgress::Running { node, fraction } = exec.step().unwrap() {
                    if node == water && exec.running_node() == Some(water) {
                        fractions.push(fraction);
                    }
                }
            }
            assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
            assert!(exec.context().pool().live_temporaries() > 0);

            exec.abort_with_events(&mut sink);
            assert_eq!(seen(sink.as_slice()), vec![Seen::Aborted]);
            assert!(exec.is_finished());
            assert!(exec.running_node().is_none());
            assert!(matches!(exec.finish(), Err(Error::Runtime(_))));
        }
        assert_eq!(pool.live_temporaries(), 0);
        assert_eq!(pool.registered_outputs(), 0);
    }

    #[test]
    fn dropping_a_suspended_evaluation_aborts_it() {
        let mut graph = Graph::new();
        let ground = graph.add(NodeSpec::noise(4.0));
        let water = graph.add(NodeSpec::WaterFlow(WaterFlowParams::default()));
        graph.connect_by_name(ground, "output", water, "height").unwrap();
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let imports = ImportRegistry::new();

        {
            let mut exec = GraphExecution::new(&compiled, water, args(16), &mut pool, &imports)
                .unwrap()
                .with_options(ExecutionOptions::new().with_progressive(true));
            exec.run_until(ground).unwrap();
            exec.step().unwrap();
            assert_eq!(exec.running_node(), Some(water));
        }
        assert_eq!(pool.live_temporaries(), 0);
        assert_eq!(pool.registered_outputs(), 0);
    }

    #[test]
    fn disabled_simulation_forwards_its_input_untouched() {
        let mut graph = Graph::new();
        let ground = graph.add(NodeSpec::noise(4.0));
        let erosion = graph.add(NodeSpec::HydraulicErosion(HydraulicErosionParams::default()));
        let through = graph.add(NodeSpec::blur(1));
        let direct = graph.add(NodeSpec::blur(1));
        graph.connect_by_name(ground, "output", erosion, "height").unwrap();
        graph.connect_by_name(erosion, "height", through, "input").unwrap();
        graph.connect_by_name(ground, "output", direct, "input").unwrap();
        assert!(graph.set_enabled(erosion, false));
        assert!(!graph.set_enabled(NodeId(99), false));
        let compiled = compile(&graph);
        let mut pool = ResourcePool::new();
        let imports = ImportRegistry::new();

        let mut sink = VecSink::new();
        let mut exec = GraphExecution::new(&compiled, through, args(16), &mut pool, &imports)
            .unwrap()
            .with_options(ExecutionOptions::new().with_progressive(true));
        exec.run_until(erosion).unwrap();
        assert_eq!(
            exec.context().resolve(SlotRef::new(erosion, output(0))),
            Some(SlotRef::new(ground, output(0)))
        );
        exec.run_with_events(&mut sink).unwrap();
        assert!(seen(sink.as_slice()).contains(&Seen::Bypassed(erosion)));
        let forwarded = exec.finish().unwrap();

        for kernel in [
            names::FLOW_ADD_WATER,
            names::FLOW_OUTFLOW,
            names::HYDRAULIC_ERODE,
            names::RESOLVE_HEIGHT,
        ] {
            assert_eq!(compiled.kernels().dispatch_count(kernel), 0, "{kernel}");
        }
        assert_eq!(pool.registered_outputs(), 0);
        assert_eq!(pool.live_temporaries(), 0);

        let reference = evaluate(&compiled, direct, args(16), &mut pool, &imports).unwrap();
        assert_eq!(
            forwarded.field("output").unwrap().to_vec(),
            reference.field("output").unwrap().to_vec()
        );
    }
}
