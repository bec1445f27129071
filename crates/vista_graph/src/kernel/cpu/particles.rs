//! Position-buffer kernels: projecting samples onto the terrain and moving them
//! downhill while drawing their trails.
use glam::{Vec2, Vec3};

use crate::args::WorldBounds;
use crate::error::{Error, Result};
use crate::kernel::cpu::{cell_size, rasterize_parallelogram};
use crate::kernel::Bindings;
use crate::resource::{Buffer, FieldView, PositionSample};

/// Height, normal and world-space slope of the terrain under a sample.
struct Surface {
    height: f32,
    normal: Vec3,
    slope: Vec2,
}

fn surface_at(view: Option<&FieldView<'_>>, bounds: &WorldBounds, terrain_height: f32, p: Vec2) -> Surface {
    let Some(view) = view else {
        return Surface {
            height: 0.0,
            normal: Vec3::Y,
            slope: Vec2::ZERO,
        };
    };
    let uv = bounds.world_to_uv(p);
    let cell = cell_size(bounds, view.width, view.height).max(Vec2::splat(1e-6));
    let (gx, gz) = view.gradient(uv.x, uv.y);
    let slope = Vec2::new(gx / cell.x, gz / cell.y) * terrain_height;
    Surface {
        height: view.bilinear(uv.x, uv.y, 0) * terrain_height,
        normal: Vec3::new(-slope.x, 1.0, -slope.y).normalize_or(Vec3::Y),
        slope,
    }
}

fn read_samples(buffer: &Buffer) -> Result<Vec<PositionSample>> {
    PositionSample::read_all(buffer)
        .ok_or_else(|| Error::MalformedBuffer {
            buffer: buffer.handle(),
            reason: "length is not a whole number of position records".into(),
        })
}

/// Sets every sample's height and normal from `height` (flat ground when unbound).
pub(crate) fn project(b: &Bindings) -> Result<()> {
    let positions = b.get_buffer("positions")?;
    let bounds = b.get_bounds();
    let terrain_height = b.float_or("terrain_height", 1.0);
    let height = b.try_field("height").map(|f| (f, f.to_vec()));
    let view = height.as_ref().map(|(f, data)| FieldView::new(f, data));

    let mut samples = read_samples(positions)?;
    for sample in &mut samples {
        let s = surface_at(view.as_ref(), &bounds, terrain_height, sample.planar());
        sample.position[1] = s.height;
        sample.normal = s.normal.to_array();
    }
    PositionSample::write_all(positions, &samples);
    Ok(())
}

/// Advances every sample with energy left by one step down the slope.
///
/// Velocity is damped by `friction` and accelerated along the negative
/// gradient, capped at `step_size` world units per step. Each move draws a
/// ribbon `trail_width` wide into `trail` (max-blended with `trail_weight`).
/// With `mode == 1` the ribbon is also carved into `height` by `carve_depth`,
/// deepest along its center line. Samples leaving the world bounds stop.
pub(crate) fn step(b: &Bindings) -> Result<()> {
    let height_field = b.get_field("height")?;
    let positions = b.get_buffer("positions")?;
    let trail = b.try_field("trail");
    let bounds = b.get_bounds();
    let terrain_height = b.float_or("terrain_height", 1.0);
    let (w, h) = (height_field.width(), height_field.height());
    let cell = cell_size(&bounds, w, h);
    let step_size = b.float_or("step_size", cell.max_element()).max(1e-6);
    let friction = b.float_or("friction", 0.1).clamp(0.0, 1.0);
    let age_step = b.float_or("age_step", 0.01).max(0.0);
    let trail_width = b.float_or("trail_width", cell.max_element()).max(0.0);
    let trail_weight = b.float_or("trail_weight", 1.0);
    let carving = b.int_or("mode", 0) == 1;
    let carve_depth = b.float_or("carve_depth", 0.0).max(0.0);

    let height = height_field.to_vec();
    let view = FieldView::new(height_field, &height);
    let mut samples = read_samples(positions)?;
    let mut trail_values = vec![0.0f32; w * h];
    let mut carve = vec![0.0f32; w * h];

    for sample in &mut samples {
        if sample.energy <= 0.0 {
            continue;
        }
        let from = sample.planar();
        let here = surface_at(Some(&view), &bounds, terrain_height, from);
        let mut velocity = Vec2::from_array(sample.velocity) * (1.0 - friction) - here.slope * step_size;
        if velocity.length() > step_size {
            velocity = velocity.normalize() * step_size;
        }
        let to = from + velocity;

        let uv = bounds.world_to_uv(to);
        if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
            sample.energy = 0.0;
            sample.velocity = [0.0; 2];
            continue;
        }

        let travel = to - from;
        if travel.length_squared() > 1e-12 && trail_width > 0.0 {
            let side = travel.perp().normalize() * trail_width;
            let weight = trail_weight * sample.energy.min(1.0);
            rasterize_parallelogram(w, h, &bounds, from - side * 0.5, travel, side, |i, _, across| {
                trail_values[i] = trail_values[i].max(weight);
                if carving {
                    let profile = 1.0 - (2.0 * across - 1.0).abs();
                    carve[i] = carve[i].max(carve_depth * weight * profile);
                }
            });
        }

        let there = surface_at(Some(&view), &bounds, terrain_height, to);
        sample.position = [to.x, there.height, to.y];
        sample.normal = there.normal.to_array();
        sample.velocity = velocity.to_array();
        sample.age = (sample.age + age_step).min(1.0);
        sample.energy *= 1.0 - friction;
        if sample.age >= 1.0 || velocity.length() < step_size * 1e-3 {
            sample.energy = 0.0;
        }
    }

    PositionSample::write_all(positions, &samples);
    if let Some(trail) = trail {
        for (v, t) in trail.write().iter_mut().zip(&trail_values) {
            *v = v.max(*t);
        }
    }
    if carving {
        for (v, c) in height_field.write().iter_mut().zip(&carve) {
            *v -= c;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{BufferDescriptor, Field2D, RtDescriptor};

    /// Heights rising along +x.
    fn ramp(res: u32) -> Field2D {
        let n = res as usize;
        let data = (0..n * n).map(|i| (i % n) as f32 / n as f32).collect();
        Field2D::detached(RtDescriptor::mask(res), data)
    }

    fn buffer_with(samples: &[PositionSample]) -> Buffer {
        let buffer = Buffer::detached(BufferDescriptor::of::<PositionSample>(samples.len() as u32), Vec::new());
        PositionSample::write_all(&buffer, samples);
        buffer
    }

    #[test]
    fn project_reads_height_and_tilts_normal() {
        let height = ramp(8);
        let positions = buffer_with(&[PositionSample::at(4.0, 4.0)]);
        project(
            &Bindings::new()
                .field("height", &height)
                .buffer("positions", &positions)
                .bounds(&WorldBounds::square(8.0))
                .float("terrain_height", 10.0),
        )
        .unwrap();
        let s = PositionSample::read_all(&positions).unwrap()[0];
        assert!(s.position[1] > 0.0);
        assert!(s.normal[0] < 0.0);
        assert!(s.normal[1] > 0.0);
    }

    #[test]
    fn project_without_height_is_flat() {
        let positions = buffer_with(&[PositionSample::at(1.0, 1.0)]);
        project(&Bindings::new().buffer("positions", &positions)).unwrap();
        let s = PositionSample::read_all(&positions).unwrap()[0];
        assert_eq!(s.position[1], 0.0);
        assert_eq!(s.normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn samples_slide_downhill_and_leave_a_trail() {
        let height = ramp(8);
        let trail = Field2D::detached(RtDescriptor::mask(8), Vec::new());
        let positions = buffer_with(&[PositionSample::at(5.0, 4.0)]);
        let b = Bindings::new()
            .field("height", &height)
            .field("trail", &trail)
            .buffer("positions", &positions)
            .bounds(&WorldBounds::square(8.0))
            .float("terrain_height", 8.0)
            .float("step_size", 1.0)
            .float("friction", 0.0)
            .float("trail_width", 1.0);
        for _ in 0..2 {
            step(&b).unwrap();
        }
        let s = PositionSample::read_all(&positions).unwrap()[0];
        assert!(s.position[0] < 5.0);
        assert!((s.position[2] - 4.0).abs() < 1e-4);
        assert!(trail.read().iter().any(|v| *v > 0.0));
        assert_eq!(height.to_vec(), ramp(8).to_vec());
    }

    #[test]
    fn crack_mode_carves_the_height() {
        let height = ramp(8);
        let positions = buffer_with(&[PositionSample::at(5.0, 4.0)]);
        step(
            &Bindings::new()
                .field("height", &height)
                .buffer("positions", &positions)
                .bounds(&WorldBounds::square(8.0))
                .float("terrain_height", 8.0)
                .float("step_size", 2.0)
                .float("trail_width", 2.0)
                .int("mode", 1)
                .float("carve_depth", 0.1),
        )
        .unwrap();
        let before: f32 = ramp(8).read().iter().sum();
        let after: f32 = height.read().iter().sum();
        assert!(after < before);
    }

    #[test]
    fn exhausted_samples_stay_put() {
        let height = ramp(8);
        let mut still = PositionSample::at(5.0, 4.0);
        still.energy = 0.0;
        let positions = buffer_with(&[still]);
        step(
            &Bindings::new()
                .field("height", &height)
                .buffer("positions", &positions)
                .bounds(&WorldBounds::square(8.0)),
        )
        .unwrap();
        assert_eq!(PositionSample::read_all(&positions).unwrap()[0], still);
    }

    #[test]
    fn ragged_position_buffer_is_an_error() {
        let height = ramp(2);
        let positions = Buffer::detached(BufferDescriptor::new(4, 5), vec![0.0; 5]);
        let b = Bindings::new().field("height", &height).buffer("positions", &positions);
        assert!(step(&b).is_err());
    }
}
