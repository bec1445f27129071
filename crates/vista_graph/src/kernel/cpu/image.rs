//! Field kernels: fills, resampling, filters and noise.
use crate::error::Result;
use crate::kernel::cpu::{resample_data, resample_or, texel_world};
use crate::kernel::Bindings;
use crate::random::lattice01;
use crate::resource::Field2D;

/// `dst` = `(r, g, b, a)` per texel; masks only use `r`.
pub(crate) fn fill(b: &Bindings) -> Result<()> {
    let dst = b.get_field("dst")?;
    let r = b.float_or("r", 0.0);
    let color = [r, b.float_or("g", r), b.float_or("b", r), b.float_or("a", 1.0)];
    let channels = dst.channels();
    for (i, v) in dst.write().iter_mut().enumerate() {
        *v = color[i % channels];
    }
    Ok(())
}

/// `dst` = bilinear resample of `src`, or `default` when `src` is unbound.
pub(crate) fn resample(b: &Bindings) -> Result<()> {
    let dst = b.get_field("dst")?;
    let data = resample_or(
        b.try_field("src"),
        dst.width(),
        dst.height(),
        dst.channels(),
        b.float_or("default", 0.0),
    );
    dst.write().copy_from_slice(&data);
    Ok(())
}

/// Box blur of `src` into `dst`, mixed with the unblurred value by `intensity`.
pub(crate) fn blur(b: &Bindings) -> Result<()> {
    let dst = b.get_field("dst")?;
    let (w, h, c) = (dst.width(), dst.height(), dst.channels());
    let src = resample_or(b.try_field("src"), w, h, c, 0.0);
    let radius = b.int_or("radius", 1).max(0) as isize;
    let intensity = b.float_or("intensity", 1.0).clamp(0.0, 1.0);

    let horizontal = box_pass(&src, w, h, c, radius, true);
    let blurred = box_pass(&horizontal, w, h, c, radius, false);

    let mut out = dst.write();
    for (i, v) in out.iter_mut().enumerate() {
        *v = src[i] + (blurred[i] - src[i]) * intensity;
    }
    Ok(())
}

fn box_pass(src: &[f32], w: usize, h: usize, c: usize, radius: isize, horizontal: bool) -> Vec<f32> {
    let mut out = vec![0.0; src.len()];
    let taps = (2 * radius + 1) as f32;
    for y in 0..h as isize {
        for x in 0..w as isize {
            for ch in 0..c {
                let mut sum = 0.0;
                for k in -radius..=radius {
                    let (sx, sy) = if horizontal {
                        ((x + k).clamp(0, w as isize - 1), y)
                    } else {
                        (x, (y + k).clamp(0, h as isize - 1))
                    };
                    sum += src[(sy as usize * w + sx as usize) * c + ch];
                }
                out[(y as usize * w + x as usize) * c + ch] = sum / taps;
            }
        }
    }
    out
}

/// Per-texel combination of `a` and `b` into `dst`.
///
/// Modes: 0 add, 1 subtract, 2 multiply, 3 max, 4 min, 5 lerp. `factor` scales
/// `b` for add/subtract/multiply and is the blend weight for lerp.
pub(crate) fn combine(b: &Bindings) -> Result<()> {
    let dst = b.get_field("dst")?;
    let (w, h, c) = (dst.width(), dst.height(), dst.channels());
    let lhs = resample_or(b.try_field("a"), w, h, c, b.float_or("default_a", 0.0));
    let rhs = resample_or(b.try_field("b"), w, h, c, b.float_or("default_b", 0.0));
    let mode = b.int_or("mode", 0);
    let factor = b.float_or("factor", 1.0);

    let mut out = dst.write();
    for (i, v) in out.iter_mut().enumerate() {
        let (x, y) = (lhs[i], rhs[i]);
        *v = match mode {
            1 => x - y * factor,
            2 => x * (1.0 + (y - 1.0) * factor),
            3 => x.max(y),
            4 => x.min(y),
            5 => x + (y - x) * factor,
            _ => x + y * factor,
        };
    }
    Ok(())
}

/// Fractal value noise in world space, normalized to `[0, 1]`.
pub(crate) fn noise(b: &Bindings) -> Result<()> {
    let dst = b.get_field("dst")?;
    let (w, h, c) = (dst.width(), dst.height(), dst.channels());
    let bounds = b.get_bounds();
    let seed = b.int_or("seed", 0) as u64;
    let scale = b.float_or("scale", 64.0).max(1e-3);
    let octaves = b.int_or("octaves", 4).clamp(1, 12) as u32;
    let persistence = b.float_or("persistence", 0.5);
    let amplitude = b.float_or("amplitude", 1.0);

    let mut out = dst.write();
    for y in 0..h {
        for x in 0..w {
            let p = texel_world(&bounds, x, y, w, h) / scale;
            let mut sum = 0.0;
            let mut norm = 0.0;
            let mut amp = 1.0;
            let mut freq = 1.0;
            for o in 0..octaves {
                sum += amp * value_noise(seed.wrapping_add(o as u64), p.x * freq, p.y * freq);
                norm += amp;
                amp *= persistence;
                freq *= 2.0;
            }
            let v = amplitude * if norm > 0.0 { sum / norm } else { 0.0 };
            for ch in 0..c {
                out[(y * w + x) * c + ch] = v;
            }
        }
    }
    Ok(())
}

fn value_noise(seed: u64, x: f32, y: f32) -> f32 {
    let (x0, y0) = (x.floor(), y.floor());
    let (tx, ty) = (smooth(x - x0), smooth(y - y0));
    let (ix, iy) = (x0 as i32, y0 as i32);
    let a = lattice01(seed, ix, iy);
    let b = lattice01(seed, ix + 1, iy);
    let c = lattice01(seed, ix, iy + 1);
    let d = lattice01(seed, ix + 1, iy + 1);
    let top = a + (b - a) * tx;
    let bottom = c + (d - c) * tx;
    top + (bottom - top) * ty
}

#[inline]
fn smooth(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

/// Writes a simulation result back at output resolution.
///
/// `dst = base + scale * resample(src - subtract)`, with `base` and `subtract`
/// treated as zero when unbound. Equal dimensions skip interpolation, so a zero
/// difference reproduces `base` exactly.
pub(crate) fn resolve(b: &Bindings) -> Result<()> {
    let dst = b.get_field("dst")?;
    let src = b.get_field("src")?;
    let (w, h, c) = (dst.width(), dst.height(), dst.channels());
    let scale = b.float_or("scale", 1.0);

    let mut diff = src.to_vec();
    if let Some(sub) = b.try_field("subtract") {
        let sub = resample_data(sub, src.width(), src.height(), src.channels());
        for (d, s) in diff.iter_mut().zip(sub.iter()) {
            *d -= s;
        }
    }
    let diff_field = Field2D::detached(src.descriptor(), diff);
    let delta = resample_data(&diff_field, w, h, c);
    let base = resample_or(b.try_field("base"), w, h, c, 0.0);

    let mut out = dst.write();
    for (i, v) in out.iter_mut().enumerate() {
        *v = base[i] + delta[i] * scale;
    }
    Ok(())
}
