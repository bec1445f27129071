//! Global execution arguments resolved once per evaluation.
//!
//! [`ExecutionArgs`] is the read-only bag every node can query through the
//! execution context, either typed via the struct fields or by key via
//! [`ExecutionArgs::get`].
use glam::Vec2;

use crate::error::{Error, Result};

pub const RESOLUTION: &str = "RESOLUTION";
pub const WORLD_BOUNDS: &str = "WORLD_BOUNDS";
pub const SEED: &str = "SEED";
pub const TERRAIN_HEIGHT: &str = "TERRAIN_HEIGHT";
pub const OUTPUT_TEMP_HEIGHT: &str = "OUTPUT_TEMP_HEIGHT";

/// World-space rectangle covered by the generated fields, on the XZ plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldBounds {
    pub origin_x: f32,
    pub origin_z: f32,
    pub size_x: f32,
    pub size_z: f32,
}

impl WorldBounds {
    pub fn new(origin_x: f32, origin_z: f32, size_x: f32, size_z: f32) -> Self {
        Self {
            origin_x,
            origin_z,
            size_x,
            size_z,
        }
    }

    /// Square bounds anchored at the origin.
    pub fn square(size: f32) -> Self {
        Self::new(0.0, 0.0, size, size)
    }

    pub fn origin(&self) -> Vec2 {
        Vec2::new(self.origin_x, self.origin_z)
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.size_x, self.size_z)
    }

    /// Largest side length, used to derive simulation resolutions.
    pub fn max_extent(&self) -> f32 {
        self.size_x.max(self.size_z)
    }

    /// Maps a world position into normalized `[0, 1]` coordinates.
    pub fn world_to_uv(&self, p: Vec2) -> Vec2 {
        (p - self.origin()) / self.size()
    }

    /// Maps normalized coordinates back to world space.
    pub fn uv_to_world(&self, uv: Vec2) -> Vec2 {
        self.origin() + uv * self.size()
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self::square(256.0)
    }
}

/// Value returned by a keyed argument lookup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Float(f32),
    Bool(bool),
    Bounds(WorldBounds),
}

/// Arguments shared by every node of one evaluation.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct ExecutionArgs {
    /// Base 2D resolution of produced fields.
    pub resolution: u32,
    /// World-space area covered by the fields.
    pub world_bounds: WorldBounds,
    /// Seed for every stochastic node.
    pub seed: i64,
    /// World height represented by a field value of `1.0`.
    pub terrain_height: f32,
    /// Publish simulation-space previews while progressive tasks run.
    pub output_temp_height: bool,
}

impl Default for ExecutionArgs {
    fn default() -> Self {
        Self {
            resolution: 256,
            world_bounds: WorldBounds::default(),
            seed: 0,
            terrain_height: 100.0,
            output_temp_height: false,
        }
    }
}

impl ExecutionArgs {
    /// Creates arguments with the given base resolution.
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }

    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_world_bounds(mut self, world_bounds: WorldBounds) -> Self {
        self.world_bounds = world_bounds;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_terrain_height(mut self, terrain_height: f32) -> Self {
        self.terrain_height = terrain_height;
        self
    }

    pub fn with_output_temp_height(mut self, enabled: bool) -> Self {
        self.output_temp_height = enabled;
        self
    }

    /// Validates the arguments, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.resolution == 0 {
            return Err(Error::InvalidConfig("resolution must be > 0".into()));
        }
        let b = &self.world_bounds;
        if !(b.size_x > 0.0 && b.size_z > 0.0) {
            return Err(Error::InvalidConfig(
                "world bounds size must be > 0 in both components".into(),
            ));
        }
        if !(self.terrain_height > 0.0) {
            return Err(Error::InvalidConfig("terrain_height must be > 0".into()));
        }
        Ok(())
    }

    /// Keyed lookup of a recognized argument.
    pub fn get(&self, name: &str) -> Option<ArgValue> {
        match name {
            RESOLUTION => Some(ArgValue::Int(self.resolution as i64)),
            WORLD_BOUNDS => Some(ArgValue::Bounds(self.world_bounds)),
            SEED => Some(ArgValue::Int(self.seed)),
            TERRAIN_HEIGHT => Some(ArgValue::Float(self.terrain_height)),
            OUTPUT_TEMP_HEIGHT => Some(ArgValue::Bool(self.output_temp_height)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_lookup_matches_fields() {
        let args = ExecutionArgs::new(128)
            .with_seed(7)
            .with_terrain_height(50.0)
            .with_output_temp_height(true);
        assert_eq!(args.get(RESOLUTION), Some(ArgValue::Int(128)));
        assert_eq!(args.get(SEED), Some(ArgValue::Int(7)));
        assert_eq!(args.get(TERRAIN_HEIGHT), Some(ArgValue::Float(50.0)));
        assert_eq!(args.get(OUTPUT_TEMP_HEIGHT), Some(ArgValue::Bool(true)));
        assert_eq!(args.get("UNKNOWN"), None);
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        assert!(ExecutionArgs::new(0).validate().is_err());
        let flat = ExecutionArgs::new(64).with_world_bounds(WorldBounds::new(0.0, 0.0, 0.0, 10.0));
        assert!(flat.validate().is_err());
        assert!(ExecutionArgs::default().validate().is_ok());
    }

    #[test]
    fn world_uv_roundtrip() {
        let bounds = WorldBounds::new(-10.0, 20.0, 40.0, 80.0);
        let p = Vec2::new(0.0, 40.0);
        let uv = bounds.world_to_uv(p);
        assert_eq!(uv, Vec2::new(0.25, 0.25));
        assert_eq!(bounds.uv_to_world(uv), p);
    }
}
