//! Fixed-stride records stored in structured buffers.
//!
//! Every node reading or writing instance data agrees on [`PositionSample`];
//! buffers are viewed as records with `bytemuck`, so a buffer whose length is not
//! a whole number of records is rejected instead of misread.
use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use tracing::error;

use crate::resource::Buffer;

/// One point instance: where it is, how it is oriented, and its simulation state.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PositionSample {
    /// World position; `y` holds the terrain height at the sample.
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Yaw in radians.
    pub rotation: f32,
    pub scale: f32,
    /// Planar velocity on the XZ plane.
    pub velocity: [f32; 2],
    /// Remaining energy; a sample with no energy no longer moves.
    pub energy: f32,
    /// Normalized age in `[0, 1]`.
    pub age: f32,
}

impl PositionSample {
    /// Record size in `f32` elements.
    pub const SIZE: usize = 12;
    pub const STRIDE_BYTES: usize = Self::SIZE * std::mem::size_of::<f32>();

    pub fn at(x: f32, z: f32) -> Self {
        Self {
            position: [x, 0.0, z],
            normal: [0.0, 1.0, 0.0],
            scale: 1.0,
            energy: 1.0,
            ..Default::default()
        }
    }

    pub fn planar(&self) -> Vec2 {
        Vec2::new(self.position[0], self.position[2])
    }

    /// Reads every record from `buffer`, or `None` when the buffer is malformed.
    pub fn read_all(buffer: &Buffer) -> Option<Vec<PositionSample>> {
        let words = buffer.read();
        match bytemuck::try_cast_slice::<f32, PositionSample>(&words) {
            Ok(samples) => Some(samples.to_vec()),
            Err(err) => {
                error!(
                    "Buffer {} holds {} bytes, not a multiple of the {}-byte position record ({err}).",
                    buffer.handle(),
                    buffer.byte_len(),
                    Self::STRIDE_BYTES
                );
                None
            }
        }
    }

    /// Replaces the contents of `buffer` with `samples`.
    pub fn write_all(buffer: &Buffer, samples: &[PositionSample]) {
        buffer.replace(bytemuck::cast_slice::<PositionSample, f32>(samples).to_vec());
    }
}

/// A quad expanded from one instance, ready to be composited.
///
/// Corners are stored as `[x, z, u, v]` in world space, counter-clockwise
/// starting at uv `(0, 0)`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InstanceQuad {
    pub corners: [[f32; 4]; 4],
    /// Normalized terrain height carried by the instance.
    pub height: f32,
    pub opacity: f32,
    pub _pad: [f32; 2],
}

impl InstanceQuad {
    pub const SIZE: usize = 20;
}
