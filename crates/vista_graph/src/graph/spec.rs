//! Node kinds and their dispatch table.
//!
//! [`NodeSpec`] is the closed set of node kinds. Each variant carries a typed
//! parameter struct that implements [`NodeBehavior`]; [`NodeSpec::behavior`] is
//! the single place where a kind is mapped to its implementation.
use crate::exec::NodeBehavior;
use crate::graph::SlotType;
use crate::nodes::filter::{BlurParams, CombineMode, CombineParams};
use crate::nodes::scatter::{FlattenAtParams, ScatterPointsParams, SplatterParams};
use crate::nodes::simulation::particles::{CrackParams, SlideParams};
use crate::nodes::simulation::snow::SnowParams;
use crate::nodes::simulation::thermal::{LandslideParams, ThermalErosionParams};
use crate::nodes::simulation::water::{HydraulicErosionParams, WaterFlowParams};
use crate::nodes::source::{ConstantParams, ImportBufferParams, ImportFieldParams, NoiseParams};
use crate::nodes::variable::{GetVariableParams, OutputParams, SetVariableParams};

/// Specification of a node in the graph.
#[derive(Clone, Debug)]
pub enum NodeSpec {
    Constant(ConstantParams),
    Noise(NoiseParams),
    ImportField(ImportFieldParams),
    ImportBuffer(ImportBufferParams),
    Blur(BlurParams),
    Combine(CombineParams),
    SetVariable(SetVariableParams),
    GetVariable(GetVariableParams),
    Output(OutputParams),
    WaterFlow(WaterFlowParams),
    HydraulicErosion(HydraulicErosionParams),
    ThermalErosion(ThermalErosionParams),
    Snow(SnowParams),
    Landslide(LandslideParams),
    Slide(SlideParams),
    Crack(CrackParams),
    ScatterPoints(ScatterPointsParams),
    Splatter(SplatterParams),
    FlattenAt(FlattenAtParams),
}

impl NodeSpec {
    /// Implementation of this node kind.
    pub fn behavior(&self) -> &dyn NodeBehavior {
        match self {
            NodeSpec::Constant(p) => p,
            NodeSpec::Noise(p) => p,
            NodeSpec::ImportField(p) => p,
            NodeSpec::ImportBuffer(p) => p,
            NodeSpec::Blur(p) => p,
            NodeSpec::Combine(p) => p,
            NodeSpec::SetVariable(p) => p,
            NodeSpec::GetVariable(p) => p,
            NodeSpec::Output(p) => p,
            NodeSpec::WaterFlow(p) => p,
            NodeSpec::HydraulicErosion(p) => p,
            NodeSpec::ThermalErosion(p) => p,
            NodeSpec::Snow(p) => p,
            NodeSpec::Landslide(p) => p,
            NodeSpec::Slide(p) => p,
            NodeSpec::Crack(p) => p,
            NodeSpec::ScatterPoints(p) => p,
            NodeSpec::Splatter(p) => p,
            NodeSpec::FlattenAt(p) => p,
        }
    }

    /// Display title. Presentation only.
    pub fn title(&self) -> &'static str {
        match self {
            NodeSpec::Constant(_) => "Constant",
            NodeSpec::Noise(_) => "Noise",
            NodeSpec::ImportField(_) => "Import Field",
            NodeSpec::ImportBuffer(_) => "Import Buffer",
            NodeSpec::Blur(_) => "Blur",
            NodeSpec::Combine(_) => "Combine",
            NodeSpec::SetVariable(_) => "Set Variable",
            NodeSpec::GetVariable(_) => "Get Variable",
            NodeSpec::Output(_) => "Output",
            NodeSpec::WaterFlow(_) => "Water Flow",
            NodeSpec::HydraulicErosion(_) => "Hydraulic Erosion",
            NodeSpec::ThermalErosion(_) => "Thermal Erosion",
            NodeSpec::Snow(_) => "Snow",
            NodeSpec::Landslide(_) => "Landslide",
            NodeSpec::Slide(_) => "Slide",
            NodeSpec::Crack(_) => "Crack",
            NodeSpec::ScatterPoints(_) => "Scatter Points",
            NodeSpec::Splatter(_) => "Splatter",
            NodeSpec::FlattenAt(_) => "Flatten At",
        }
    }

    /// Menu category. Presentation only.
    pub fn category(&self) -> &'static str {
        match self {
            NodeSpec::Constant(_)
            | NodeSpec::Noise(_)
            | NodeSpec::ImportField(_)
            | NodeSpec::ImportBuffer(_) => "Base Shape",
            NodeSpec::Blur(_) | NodeSpec::Combine(_) => "Adjustments",
            NodeSpec::SetVariable(_) | NodeSpec::GetVariable(_) | NodeSpec::Output(_) => "Utilities",
            NodeSpec::WaterFlow(_)
            | NodeSpec::HydraulicErosion(_)
            | NodeSpec::ThermalErosion(_)
            | NodeSpec::Snow(_)
            | NodeSpec::Landslide(_)
            | NodeSpec::Slide(_)
            | NodeSpec::Crack(_) => "Nature",
            NodeSpec::ScatterPoints(_) | NodeSpec::Splatter(_) | NodeSpec::FlattenAt(_) => {
                "Instancing"
            }
        }
    }

    /// Creates a constant mask node.
    pub fn constant(value: f32) -> Self {
        NodeSpec::Constant(ConstantParams::mask(value))
    }

    /// Creates a noise node with the given feature scale in world units.
    pub fn noise(scale: f32) -> Self {
        NodeSpec::Noise(NoiseParams::default().with_scale(scale))
    }

    /// Creates a blur node.
    pub fn blur(radius: u32) -> Self {
        NodeSpec::Blur(BlurParams::default().with_radius(radius))
    }

    /// Creates a combine node.
    pub fn combine(mode: CombineMode) -> Self {
        NodeSpec::Combine(CombineParams::default().with_mode(mode))
    }

    /// Creates a terminal output node.
    pub fn output(slot_type: SlotType) -> Self {
        NodeSpec::Output(OutputParams::new(slot_type))
    }

    /// Creates a node publishing its input under `name`.
    pub fn set_variable(name: impl Into<String>, slot_type: SlotType) -> Self {
        NodeSpec::SetVariable(SetVariableParams::new(name, slot_type))
    }

    /// Creates a node reading the value published under `name`.
    pub fn get_variable(name: impl Into<String>, slot_type: SlotType) -> Self {
        NodeSpec::GetVariable(GetVariableParams::new(name, slot_type))
    }
}
