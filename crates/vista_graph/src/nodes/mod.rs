//! Built-in node kinds.
//!
//! Every node kind is a parameter struct implementing
//! [`NodeBehavior`](crate::exec::NodeBehavior). Slot ids are stable per kind:
//! inputs count up from [`input`]`(0)` and outputs from [`output`]`(0)`, so
//! links survive parameter edits that do not change a slot's type.
use crate::graph::SlotId;

pub mod filter;
pub mod scatter;
pub mod simulation;
pub mod source;
pub mod variable;

/// First slot id used for outputs.
pub const OUTPUT_BASE: u32 = 16;

/// Id of the `index`-th input slot.
pub const fn input(index: u32) -> SlotId {
    SlotId(index)
}

/// Id of the `index`-th output slot.
pub const fn output(index: u32) -> SlotId {
    SlotId(OUTPUT_BASE + index)
}
