//! Host-provided data for import nodes.
//!
//! External data enters a graph through an [`ImportRegistry`]:
//! - Field sources implement [`FieldSource`] and are sampled in world coordinates
//!   at whatever resolution the importing node runs at.
//! - Position sets are registered as plain [`PositionSample`] records.
use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec2;
use tracing::warn;

use crate::resource::PositionSample;

/// A 2D source sampled at a position in world coordinates.
pub trait FieldSource: Send + Sync {
    /// Value of `channel` at world position `p`.
    fn sample(&self, channel: usize, p: Vec2) -> f32;
}

impl<F> FieldSource for F
where
    F: Fn(usize, Vec2) -> f32 + Send + Sync,
{
    #[inline]
    fn sample(&self, channel: usize, p: Vec2) -> f32 {
        self(channel, p)
    }
}

/// Row-major grid covering a world rectangle, sampled with nearest-texel lookup.
#[derive(Clone, Debug)]
pub struct GridSource {
    width: usize,
    height: usize,
    origin: Vec2,
    size: Vec2,
    values: Vec<f32>,
}

impl GridSource {
    /// Creates a single-channel grid. `values` is padded or cut to `width * height`.
    pub fn new(width: usize, height: usize, origin: Vec2, size: Vec2, mut values: Vec<f32>) -> Self {
        values.resize(width * height, 0.0);
        Self {
            width,
            height,
            origin,
            size,
            values,
        }
    }
}

impl FieldSource for GridSource {
    fn sample(&self, _channel: usize, p: Vec2) -> f32 {
        if self.width == 0 || self.height == 0 || self.size.x <= 0.0 || self.size.y <= 0.0 {
            return 0.0;
        }
        let uv = (p - self.origin) / self.size;
        let x = ((uv.x * self.width as f32).floor() as isize).clamp(0, self.width as isize - 1);
        let y = ((uv.y * self.height as f32).floor() as isize).clamp(0, self.height as isize - 1);
        self.values[y as usize * self.width + x as usize]
    }
}

/// Registry of named imports for a graph evaluation.
#[non_exhaustive]
pub struct ImportRegistry {
    fields: HashMap<String, Arc<dyn FieldSource>>,
    positions: HashMap<String, Arc<[PositionSample]>>,
}

impl ImportRegistry {
    /// Creates a new, empty [`ImportRegistry`].
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len() + self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
        self.positions.clear();
    }

    /// Registers a field source under `id`, replacing any previous one.
    pub fn register_field<T>(&mut self, id: impl Into<String>, source: T)
    where
        T: FieldSource + 'static,
    {
        self.fields.insert(id.into(), Arc::new(source));
    }

    pub fn register_field_arc(&mut self, id: impl Into<String>, source: Arc<dyn FieldSource>) {
        self.fields.insert(id.into(), source);
    }

    /// Registers a set of position samples under `id`.
    pub fn register_positions(&mut self, id: impl Into<String>, samples: Vec<PositionSample>) {
        self.positions.insert(id.into(), samples.into());
    }

    /// Unregisters every import named `id`. Returns `true` if something was removed.
    pub fn unregister(&mut self, id: &str) -> bool {
        let field = self.fields.remove(id).is_some();
        let positions = self.positions.remove(id).is_some();
        field || positions
    }

    pub fn contains_field(&self, id: &str) -> bool {
        self.fields.contains_key(id)
    }

    pub fn contains_positions(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Field source registered under `id`; logs a warning when unknown.
    pub fn field(&self, id: &str) -> Option<Arc<dyn FieldSource>> {
        let source = self.fields.get(id).cloned();
        if source.is_none() {
            warn!("Unknown field import '{}'.", id);
        }
        source
    }

    /// Position samples registered under `id`; logs a warning when unknown.
    pub fn positions(&self, id: &str) -> Option<Arc<[PositionSample]>> {
        let samples = self.positions.get(id).cloned();
        if samples.is_none() {
            warn!("Unknown position import '{}'.", id);
        }
        samples
    }
}

impl Default for ImportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister_imports() {
        let mut registry = ImportRegistry::new();
        assert!(registry.is_empty());
        registry.register_field("slope", |_c: usize, p: Vec2| p.x);
        registry.register_positions("trees", vec![PositionSample::at(1.0, 2.0)]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains_field("slope"));
        assert!(registry.contains_positions("trees"));
        assert!(registry.unregister("slope"));
        assert!(!registry.unregister("slope"));
        assert!(registry.field("slope").is_none());
        assert_eq!(registry.positions("trees").map(|p| p.len()), Some(1));
    }

    #[test]
    fn closure_sources_sample_world_positions() {
        let mut registry = ImportRegistry::new();
        registry.register_field("ramp", |_c: usize, p: Vec2| p.x * 0.5);
        let source = registry.field("ramp").unwrap();
        assert_eq!(source.sample(0, Vec2::new(4.0, 0.0)), 2.0);
    }

    #[test]
    fn grid_source_clamps_outside_its_rectangle() {
        let grid = GridSource::new(2, 2, Vec2::ZERO, Vec2::splat(2.0), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(grid.sample(0, Vec2::new(0.5, 0.5)), 1.0);
        assert_eq!(grid.sample(0, Vec2::new(1.5, 1.5)), 4.0);
        assert_eq!(grid.sample(0, Vec2::new(-10.0, 10.0)), 3.0);
    }
}
