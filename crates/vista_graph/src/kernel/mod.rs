//! Compute kernels invoked by logical name.
//!
//! Nodes never touch a compute backend directly: they fill a [`Bindings`] set
//! with resources and parameters and ask the execution context to dispatch a
//! named kernel. Kernels live in a [`KernelRegistry`] that is resolved when the
//! graph is compiled, so a missing kernel is a compile error rather than a
//! failure halfway through an evaluation.
//!
//! - Implement custom kernels with [`Kernel`] (closures work too).
//! - [`KernelRegistry::cpu`] provides the reference CPU backend.
use std::cell::Cell;
use std::collections::HashMap;

use crate::args::WorldBounds;
use crate::error::{Error, Result};
use crate::resource::{Buffer, Field2D};

pub mod cpu;

/// Logical kernel names used by the built-in nodes.
pub mod names {
    pub const FILL: &str = "fill";
    pub const RESAMPLE: &str = "resample";
    pub const BLUR: &str = "blur";
    pub const COMBINE: &str = "combine";
    pub const NOISE: &str = "noise";

    pub const FLOW_ADD_WATER: &str = "flow.add_water";
    pub const FLOW_OUTFLOW: &str = "flow.outflow";
    pub const FLOW_APPLY: &str = "flow.apply";
    pub const HYDRAULIC_ERODE: &str = "hydraulic.erode";
    pub const THERMAL_OUTFLOW: &str = "thermal.outflow";
    pub const THERMAL_APPLY: &str = "thermal.apply";
    pub const SNOW_FALL: &str = "snow.fall";

    pub const PARTICLES_PROJECT: &str = "particles.project";
    pub const PARTICLES_STEP: &str = "particles.step";
    pub const INSTANCES_EXPAND: &str = "instances.expand";
    pub const INSTANCES_COMPOSITE: &str = "instances.composite";

    pub const RESOLVE_HEIGHT: &str = "resolve.height";
    pub const RESOLVE_WATER: &str = "resolve.water";
    pub const RESOLVE_EROSION: &str = "resolve.erosion";
    pub const RESOLVE_DEPOSITION: &str = "resolve.deposition";
    pub const RESOLVE_SNOW: &str = "resolve.snow";
    pub const RESOLVE_SOIL: &str = "resolve.soil";
    pub const RESOLVE_TRAIL: &str = "resolve.trail";
}

/// Named resources and parameters handed to a kernel.
#[derive(Default)]
pub struct Bindings {
    fields: Vec<(&'static str, Field2D)>,
    buffers: Vec<(&'static str, Buffer)>,
    floats: Vec<(&'static str, f32)>,
    ints: Vec<(&'static str, i64)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &'static str, field: &Field2D) -> Self {
        self.fields.push((name, field.clone()));
        self
    }

    /// Binds `field` only when present; kernels apply their documented default otherwise.
    pub fn opt_field(self, name: &'static str, field: Option<&Field2D>) -> Self {
        match field {
            Some(f) => self.field(name, f),
            None => self,
        }
    }

    pub fn buffer(mut self, name: &'static str, buffer: &Buffer) -> Self {
        self.buffers.push((name, buffer.clone()));
        self
    }

    pub fn float(mut self, name: &'static str, value: f32) -> Self {
        self.floats.push((name, value));
        self
    }

    pub fn int(mut self, name: &'static str, value: i64) -> Self {
        self.ints.push((name, value));
        self
    }

    pub fn flag(self, name: &'static str, value: bool) -> Self {
        self.int(name, value as i64)
    }

    /// Binds the world rectangle covered by the bound fields.
    pub fn bounds(self, bounds: &WorldBounds) -> Self {
        self.float("origin_x", bounds.origin_x)
            .float("origin_z", bounds.origin_z)
            .float("size_x", bounds.size_x)
            .float("size_z", bounds.size_z)
    }

    /// World rectangle bound with [`bounds`](Self::bounds), or the unit square.
    pub fn get_bounds(&self) -> WorldBounds {
        WorldBounds::new(
            self.float_or("origin_x", 0.0),
            self.float_or("origin_z", 0.0),
            self.float_or("size_x", 1.0),
            self.float_or("size_z", 1.0),
        )
    }

    pub fn get_field(&self, name: &str) -> Result<&Field2D> {
        self.try_field(name).ok_or_else(|| missing(name))
    }

    pub fn try_field(&self, name: &str) -> Option<&Field2D> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, f)| f)
    }

    pub fn get_buffer(&self, name: &str) -> Result<&Buffer> {
        self.try_buffer(name).ok_or_else(|| missing(name))
    }

    pub fn try_buffer(&self, name: &str) -> Option<&Buffer> {
        self.buffers.iter().find(|(n, _)| *n == name).map(|(_, b)| b)
    }

    pub fn get_float(&self, name: &str) -> Result<f32> {
        self.floats
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| missing(name))
    }

    pub fn float_or(&self, name: &str, default: f32) -> f32 {
        self.get_float(name).unwrap_or(default)
    }

    pub fn get_int(&self, name: &str) -> Result<i64> {
        self.ints
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| missing(name))
    }

    pub fn int_or(&self, name: &str, default: i64) -> i64 {
        self.get_int(name).unwrap_or(default)
    }

    pub fn flag_or(&self, name: &str, default: bool) -> bool {
        self.get_int(name).map(|v| v != 0).unwrap_or(default)
    }
}

fn missing(binding: &str) -> Error {
    Error::MissingBinding {
        kernel: String::new(),
        binding: binding.to_string(),
    }
}

/// A compute pass invoked by name.
pub trait Kernel {
    fn dispatch(&self, bindings: &Bindings) -> Result<()>;
}

impl<F> Kernel for F
where
    F: Fn(&Bindings) -> Result<()>,
{
    #[inline]
    fn dispatch(&self, bindings: &Bindings) -> Result<()> {
        self(bindings)
    }
}

struct KernelEntry {
    kernel: Box<dyn Kernel>,
    dispatches: Cell<usize>,
}

/// Registry for kernels keyed by logical name, with per-name dispatch counts.
pub struct KernelRegistry {
    kernels: HashMap<String, KernelEntry>,
}

impl KernelRegistry {
    /// Creates a new, empty [`KernelRegistry`].
    pub fn new() -> Self {
        Self {
            kernels: HashMap::new(),
        }
    }

    /// Registry holding the reference CPU implementation of every built-in kernel.
    pub fn cpu() -> Self {
        let mut registry = Self::new();
        cpu::register_all(&mut registry);
        registry
    }

    /// Registers a kernel, replacing any kernel of the same name.
    pub fn register<K>(&mut self, name: impl Into<String>, kernel: K)
    where
        K: Kernel + 'static,
    {
        self.kernels.insert(
            name.into(),
            KernelEntry {
                kernel: Box::new(kernel),
                dispatches: Cell::new(0),
            },
        );
    }

    /// Unregisters a kernel. Returns `true` if it was found and removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.kernels.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Runs the kernel registered under `name`.
    pub fn dispatch(&self, name: &str, bindings: &Bindings) -> Result<()> {
        let entry = self.kernels.get(name).ok_or_else(|| Error::UnknownKernel {
            name: name.to_string(),
        })?;
        entry.dispatches.set(entry.dispatches.get() + 1);
        entry.kernel.dispatch(bindings).map_err(|err| match err {
            Error::MissingBinding { binding, .. } => Error::MissingBinding {
                kernel: name.to_string(),
                binding,
            },
            other => other,
        })
    }

    /// How many times `name` has been dispatched since the last reset.
    pub fn dispatch_count(&self, name: &str) -> usize {
        self.kernels
            .get(name)
            .map(|e| e.dispatches.get())
            .unwrap_or(0)
    }

    pub fn reset_counts(&self) {
        for entry in self.kernels.values() {
            entry.dispatches.set(0);
        }
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::RtDescriptor;

    #[test]
    fn dispatch_counts_per_name() {
        let mut registry = KernelRegistry::new();
        registry.register("noop", |_: &Bindings| -> Result<()> { Ok(()) });
        registry.dispatch("noop", &Bindings::new()).unwrap();
        registry.dispatch("noop", &Bindings::new()).unwrap();
        assert_eq!(registry.dispatch_count("noop"), 2);
        assert_eq!(registry.dispatch_count("other"), 0);
        registry.reset_counts();
        assert_eq!(registry.dispatch_count("noop"), 0);
    }

    #[test]
    fn unknown_kernel_is_an_error() {
        let registry = KernelRegistry::new();
        let err = registry.dispatch("missing", &Bindings::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownKernel { .. }));
    }

    #[test]
    fn missing_binding_reports_kernel_name() {
        let mut registry = KernelRegistry::new();
        registry.register("needs_dst", |b: &Bindings| -> Result<()> {
            b.get_field("dst").map(|_| ())
        });
        let err = registry
            .dispatch("needs_dst", &Bindings::new())
            .unwrap_err();
        assert!(
            matches!(err, Error::MissingBinding { ref kernel, ref binding } if kernel == "needs_dst" && binding == "dst")
        );
    }

    #[test]
    fn optional_bindings_are_skipped_when_absent() {
        let field = Field2D::detached(RtDescriptor::mask(1), vec![1.0]);
        let b = Bindings::new()
            .opt_field("mask", None)
            .opt_field("height", Some(&field))
            .float("rate", 0.5)
            .flag("hq", true);
        assert!(b.try_field("mask").is_none());
        assert!(b.try_field("height").is_some());
        assert_eq!(b.float_or("rate", 0.0), 0.5);
        assert_eq!(b.float_or("other", 2.0), 2.0);
        assert!(b.flag_or("hq", false));
    }

    #[test]
    fn cpu_registry_provides_builtin_kernels() {
        let registry = KernelRegistry::cpu();
        for name in [
            names::FILL,
            names::RESAMPLE,
            names::FLOW_OUTFLOW,
            names::THERMAL_APPLY,
            names::INSTANCES_EXPAND,
            names::RESOLVE_DEPOSITION,
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
    }
}
