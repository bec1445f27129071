//! Instance expansion into quads and compositing of stamped quads onto a field.
//!
//! Expansion handles one chunk of instances per dispatch (`base_index`,
//! `count`) and writes each quad at the instance's own index, so the quad buffer
//! is the same however the instances were chunked. Compositing then runs once
//! over every quad.
use glam::Vec2;

use crate::error::{Error, Result};
use crate::kernel::cpu::{rasterize_parallelogram, resample_or};
use crate::kernel::Bindings;
use crate::resource::{FieldView, InstanceQuad, PositionSample};

/// Maps a field sample into `[min, max]` and blends it over the instance's own
/// value by `mult`.
fn transformed(own: f32, field: Option<&FieldView<'_>>, uv: Vec2, min: f32, max: f32, mult: f32) -> f32 {
    match field {
        Some(view) => {
            let mapped = min + (max - min) * view.bilinear(uv.x, uv.y, 0);
            (own + (mapped - own) * mult).clamp(min.min(max), min.max(max))
        }
        None => own,
    }
}

/// Expands instances `[base_index, base_index + count)` of `positions` into `quads`.
pub(crate) fn expand(b: &Bindings) -> Result<()> {
    let positions = b.get_buffer("positions")?;
    let quads = b.get_buffer("quads")?;
    let base = b.int_or("base_index", 0).max(0) as usize;
    let count = b.int_or("count", 0).max(0) as usize;
    let bounds = b.get_bounds();
    let terrain_height = b.float_or("terrain_height", 1.0).max(1e-6);
    let size = b.float_or("size", 1.0).max(0.0);

    let rotation = b.try_field("rotation").map(|f| (f, f.to_vec()));
    let rotation_view = rotation.as_ref().map(|(f, d)| FieldView::new(f, d));
    let scale = b.try_field("scale").map(|f| (f, f.to_vec()));
    let scale_view = scale.as_ref().map(|(f, d)| FieldView::new(f, d));
    let rotation_range = (
        b.float_or("rotation_min", 0.0),
        b.float_or("rotation_max", std::f32::consts::TAU),
        b.float_or("rotation_mult", 1.0),
    );
    let scale_range = (
        b.float_or("scale_min", 0.0),
        b.float_or("scale_max", 1.0),
        b.float_or("scale_mult", 1.0),
    );

    let records = positions.read();
    let samples: &[PositionSample] = bytemuck::try_cast_slice(records.as_slice())
        .map_err(|err| Error::MalformedBuffer {
            buffer: positions.handle(),
            reason: err.to_string(),
        })?;
    let mut words = quads.write();
    let out: &mut [InstanceQuad] = bytemuck::try_cast_slice_mut(words.as_mut_slice())
        .map_err(|err| Error::MalformedBuffer {
            buffer: quads.handle(),
            reason: err.to_string(),
        })?;

    let end = (base + count).min(samples.len()).min(out.len());
    if base >= end {
        return Ok(());
    }
    for (offset, sample) in samples[base..end].iter().enumerate() {
        let index = base + offset;
        let p = sample.planar();
        let uv = bounds.world_to_uv(p);
        let (rmin, rmax, rmult) = rotation_range;
        let (smin, smax, smult) = scale_range;
        let angle = transformed(sample.rotation, rotation_view.as_ref(), uv, rmin, rmax, rmult);
        let scale = transformed(sample.scale, scale_view.as_ref(), uv, smin, smax, smult);

        let half = size * scale * 0.5;
        let axis_x = Vec2::from_angle(angle) * half;
        let axis_z = axis_x.perp();
        let corner = |c: Vec2, u: f32, v: f32| [c.x, c.y, u, v];
        out[index] = InstanceQuad {
            corners: [
                corner(p - axis_x - axis_z, 0.0, 0.0),
                corner(p + axis_x - axis_z, 1.0, 0.0),
                corner(p + axis_x + axis_z, 1.0, 1.0),
                corner(p - axis_x + axis_z, 0.0, 1.0),
            ],
            height: sample.position[1] / terrain_height,
            opacity: if half > 0.0 { 1.0 } else { 0.0 },
            _pad: [0.0; 2],
        };
    }
    Ok(())
}

/// Composites the first `count` quads onto `dst`, starting from `base`.
///
/// Modes: 0 add, 1 max, 2 replace, 3 flatten (pull towards the quad's height).
/// The stamp is sampled in quad uv space and defaults to white.
pub(crate) fn composite(b: &Bindings) -> Result<()> {
    let dst = b.get_field("dst")?;
    let quads = b.get_buffer("quads")?;
    let (w, h, c) = (dst.width(), dst.height(), dst.channels());
    let count = b.int_or("count", 0).max(0) as usize;
    let mode = b.int_or("mode", 0);
    let intensity = b.float_or("intensity", 1.0).max(0.0);
    let bounds = b.get_bounds();

    let stamp = b.try_field("stamp").map(|f| (f, f.to_vec()));
    let stamp_view = stamp.as_ref().map(|(f, d)| FieldView::new(f, d));
    let mut values = resample_or(b.try_field("base"), w, h, c, 0.0);

    let words = quads.to_vec();
    let all: &[InstanceQuad] = bytemuck::try_cast_slice(&words)
        .map_err(|err| Error::MalformedBuffer {
            buffer: quads.handle(),
            reason: err.to_string(),
        })?;

    for quad in all.iter().take(count) {
        if quad.opacity <= 0.0 {
            continue;
        }
        let at = |k: usize| Vec2::new(quad.corners[k][0], quad.corners[k][1]);
        let origin = at(0);
        rasterize_parallelogram(w, h, &bounds, origin, at(1) - origin, at(3) - origin, |i, u, v| {
            let s = stamp_view.as_ref().map_or(1.0, |view| view.bilinear(u, v, 0));
            let weight = s * quad.opacity * intensity;
            for ch in 0..c {
                let value = &mut values[i * c + ch];
                *value = match mode {
                    1 => value.max(weight),
                    2 if s > 0.0 => weight,
                    2 => *value,
                    3 => *value + (quad.height - *value) * weight.clamp(0.0, 1.0),
                    _ => *value + weight,
                };
            }
        });
    }

    dst.write().copy_from_slice(&values);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::WorldBounds;
    use crate::resource::{Buffer, BufferDescriptor, Field2D, RtDescriptor};

    fn positions(points: &[(f32, f32)]) -> Buffer {
        let samples: Vec<PositionSample> = points.iter().map(|(x, z)| PositionSample::at(*x, *z)).collect();
        let buffer = Buffer::detached(BufferDescriptor::of::<PositionSample>(samples.len() as u32), Vec::new());
        PositionSample::write_all(&buffer, &samples);
        buffer
    }

    fn quads(count: usize) -> Buffer {
        Buffer::detached(
            BufferDescriptor::of::<InstanceQuad>(count as u32),
            vec![0.0; count * InstanceQuad::SIZE],
        )
    }

    fn expand_all(pos: &Buffer, out: &Buffer, count: usize, chunk: usize) {
        let mut base = 0;
        while base < count {
            let n = chunk.min(count - base);
            expand(
                &Bindings::new()
                    .buffer("positions", pos)
                    .buffer("quads", out)
                    .bounds(&WorldBounds::square(8.0))
                    .float("size", 2.0)
                    .int("base_index", base as i64)
                    .int("count", n as i64),
            )
            .unwrap();
            base += n;
        }
    }

    #[test]
    fn expansion_does_not_depend_on_chunking() {
        let points: Vec<(f32, f32)> = (0..7).map(|i| (i as f32 + 0.5, 4.0)).collect();
        let pos = positions(&points);
        let whole = quads(points.len());
        expand_all(&pos, &whole, points.len(), 64);
        for chunk in [1, 3, 6, 7, 8] {
            let chunked = quads(points.len());
            expand_all(&pos, &chunked, points.len(), chunk);
            assert_eq!(chunked.to_vec(), whole.to_vec());
        }
    }

    #[test]
    fn a_chunk_only_writes_its_own_quads() {
        let points: Vec<(f32, f32)> = (0..6).map(|i| (i as f32 + 0.5, 2.0)).collect();
        let pos = positions(&points);
        let out = quads(points.len());
        expand(
            &Bindings::new()
                .buffer("positions", &pos)
                .buffer("quads", &out)
                .bounds(&WorldBounds::square(8.0))
                .float("size", 2.0)
                .int("base_index", 2)
                .int("count", 2),
        )
        .unwrap();
        let words = out.to_vec();
        let written: &[InstanceQuad] = bytemuck::cast_slice(&words);
        for (index, quad) in written.iter().enumerate() {
            assert_eq!(quad.opacity > 0.0, (2..4).contains(&index), "quad {index}");
        }
        assert_eq!(written[3].corners[0], [2.5, 1.0, 0.0, 0.0]);

        // a chunk starting past the last record is a no-op
        expand(
            &Bindings::new()
                .buffer("positions", &pos)
                .buffer("quads", &out)
                .int("base_index", 9)
                .int("count", 4),
        )
        .unwrap();
        assert_eq!(out.to_vec(), words);
    }

    #[test]
    fn misaligned_positions_are_rejected() {
        let pos = Buffer::detached(BufferDescriptor::of::<PositionSample>(1), vec![0.0; PositionSample::SIZE + 1]);
        let out = quads(1);
        let err = expand(&Bindings::new().buffer("positions", &pos).buffer("quads", &out).int("count", 1));
        assert!(matches!(err, Err(Error::MalformedBuffer { .. })));
    }

    #[test]
    fn unrotated_quad_is_axis_aligned() {
        let pos = positions(&[(4.0, 4.0)]);
        let out = quads(1);
        expand_all(&pos, &out, 1, 1);
        let words = out.to_vec();
        let quad: &[InstanceQuad] = bytemuck::cast_slice(&words);
        assert_eq!(quad[0].corners[0], [3.0, 3.0, 0.0, 0.0]);
        assert_eq!(quad[0].corners[2], [5.0, 5.0, 1.0, 1.0]);
    }

    #[test]
    fn composite_modes_write_expected_values() {
        let pos = positions(&[(4.0, 4.0)]);
        let out = quads(1);
        expand_all(&pos, &out, 1, 1);
        let base = Field2D::detached(RtDescriptor::mask(8), vec![0.25; 64]);
        let dst = Field2D::detached(RtDescriptor::mask(8), Vec::new());
        let run = |mode: i64| {
            composite(
                &Bindings::new()
                    .buffer("quads", &out)
                    .field("base", &base)
                    .field("dst", &dst)
                    .bounds(&WorldBounds::square(8.0))
                    .int("count", 1)
                    .int("mode", mode)
                    .float("intensity", 0.5),
            )
            .unwrap();
            dst.to_vec()
        };
        // texel (4, 4) is covered, texel (0, 0) is not
        let covered = 4 * 8 + 4;
        assert_eq!(run(0)[covered], 0.75);
        assert_eq!(run(1)[covered], 0.5);
        assert_eq!(run(2)[covered], 0.5);
        assert_eq!(run(3)[covered], 0.125);
        assert_eq!(run(0)[0], 0.25);
    }

    #[test]
    fn zero_count_keeps_the_base() {
        let out = quads(0);
        let base = Field2D::detached(RtDescriptor::mask(4), vec![0.5; 16]);
        let dst = Field2D::detached(RtDescriptor::mask(4), Vec::new());
        composite(&Bindings::new().buffer("quads", &out).field("base", &base).field("dst", &dst)).unwrap();
        assert_eq!(dst.to_vec(), base.to_vec());
    }
}
