#![forbid(unsafe_code)]

mod rendering;

pub use rendering::{init_tracing, write_field_png, write_points_png, Ramp};
