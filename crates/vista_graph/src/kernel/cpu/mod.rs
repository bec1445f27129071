//! Reference CPU implementation of the built-in kernels.
//!
//! Kernels copy their inputs out of the bound resources before writing any
//! output, so a kernel never holds a read and a write borrow on one resource.
use glam::Vec2;

use crate::args::WorldBounds;
use crate::kernel::{names, Bindings, KernelRegistry};
use crate::resource::{Field2D, FieldView};

mod flow;
mod image;
mod particles;
mod raster;
mod thermal;

/// Neighbour offsets. Opposite directions are adjacent pairs, so `d ^ 1` is the
/// direction back; the first four are the axis-aligned neighbours.
pub(crate) const DIRS8: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (-1, -1),
    (1, -1),
    (-1, 1),
];

/// Flux channels stored per cell.
pub(crate) const FLUX_CHANNELS: usize = 8;

pub(crate) fn register_all(registry: &mut KernelRegistry) {
    registry.register(names::FILL, image::fill);
    registry.register(names::RESAMPLE, image::resample);
    registry.register(names::BLUR, image::blur);
    registry.register(names::COMBINE, image::combine);
    registry.register(names::NOISE, image::noise);

    registry.register(names::FLOW_ADD_WATER, flow::add_water);
    registry.register(names::FLOW_OUTFLOW, flow::outflow);
    registry.register(names::FLOW_APPLY, flow::apply);
    registry.register(names::HYDRAULIC_ERODE, flow::erode);
    registry.register(names::THERMAL_OUTFLOW, thermal::outflow);
    registry.register(names::THERMAL_APPLY, thermal::apply);
    registry.register(names::SNOW_FALL, thermal::snow_fall);

    registry.register(names::PARTICLES_PROJECT, particles::project);
    registry.register(names::PARTICLES_STEP, particles::step);
    registry.register(names::INSTANCES_EXPAND, raster::expand);
    registry.register(names::INSTANCES_COMPOSITE, raster::composite);

    for name in [
        names::RESOLVE_HEIGHT,
        names::RESOLVE_WATER,
        names::RESOLVE_EROSION,
        names::RESOLVE_DEPOSITION,
        names::RESOLVE_SNOW,
        names::RESOLVE_SOIL,
        names::RESOLVE_TRAIL,
    ] {
        registry.register(name, image::resolve);
    }
}

/// Number of neighbours to visit: 8 when `neighbors >= 8`, 4 otherwise.
pub(crate) fn neighbor_count(bindings: &Bindings) -> usize {
    if bindings.int_or("neighbors", 4) >= 8 {
        8
    } else {
        4
    }
}

/// Samples of `src` at the texel centers of a `width x height` grid.
///
/// Equal dimensions copy the data unchanged.
pub(crate) fn resample_data(src: &Field2D, width: usize, height: usize, channels: usize) -> Vec<f32> {
    let data = src.to_vec();
    if src.width() == width && src.height() == height && src.channels() == channels {
        return data;
    }
    let view = FieldView::new(src, &data);
    let mut out = vec![0.0; width * height * channels];
    for y in 0..height {
        let v = (y as f32 + 0.5) / height as f32;
        for x in 0..width {
            let u = (x as f32 + 0.5) / width as f32;
            for c in 0..channels {
                out[(y * width + x) * channels + c] = view.bilinear(u, v, c);
            }
        }
    }
    out
}

/// Like [`resample_data`], filling with `default` when `src` is absent.
pub(crate) fn resample_or(
    src: Option<&Field2D>,
    width: usize,
    height: usize,
    channels: usize,
    default: f32,
) -> Vec<f32> {
    match src {
        Some(src) => resample_data(src, width, height, channels),
        None => vec![default; width * height * channels],
    }
}

/// World position of the center of texel `(x, y)` in a `width x height` grid.
#[inline]
pub(crate) fn texel_world(bounds: &WorldBounds, x: usize, y: usize, width: usize, height: usize) -> Vec2 {
    let uv = Vec2::new(
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    );
    bounds.uv_to_world(uv)
}

/// World size of one texel along x and z.
#[inline]
pub(crate) fn cell_size(bounds: &WorldBounds, width: usize, height: usize) -> Vec2 {
    Vec2::new(
        bounds.size_x / width.max(1) as f32,
        bounds.size_z / height.max(1) as f32,
    )
}

/// Visits every texel whose center lies inside the parallelogram
/// `origin + a * edge_a + b * edge_b`, `a, b` in `[0, 1]`.
///
/// The callback receives the texel index and the `(a, b)` coordinates.
pub(crate) fn rasterize_parallelogram(
    width: usize,
    height: usize,
    bounds: &WorldBounds,
    origin: Vec2,
    edge_a: Vec2,
    edge_b: Vec2,
    mut visit: impl FnMut(usize, f32, f32),
) {
    if width == 0 || height == 0 {
        return;
    }
    let det = edge_a.perp_dot(edge_b);
    if det.abs() <= f32::EPSILON {
        return;
    }
    let corners = [origin, origin + edge_a, origin + edge_b, origin + edge_a + edge_b];
    let (min, max) = corners
        .iter()
        .fold((Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)), |(lo, hi), c| {
            (lo.min(*c), hi.max(*c))
        });
    let uv_min = bounds.world_to_uv(min);
    let uv_max = bounds.world_to_uv(max);
    let x0 = ((uv_min.x * width as f32 - 0.5).floor() as isize).max(0);
    let y0 = ((uv_min.y * height as f32 - 0.5).floor() as isize).max(0);
    let x1 = ((uv_max.x * width as f32 - 0.5).ceil() as isize).min(width as isize - 1);
    let y1 = ((uv_max.y * height as f32 - 0.5).ceil() as isize).min(height as isize - 1);
    if x0 > x1 || y0 > y1 {
        return;
    }
    for y in y0 as usize..=y1 as usize {
        for x in x0 as usize..=x1 as usize {
            let d = texel_world(bounds, x, y, width, height) - origin;
            let a = d.perp_dot(edge_b) / det;
            let b = edge_a.perp_dot(d) / det;
            if (0.0..=1.0).contains(&a) && (0.0..=1.0).contains(&b) {
                visit(y * width + x, a, b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::RtDescriptor;

    #[test]
    fn opposite_directions_pair_up() {
        for (d, (dx, dy)) in DIRS8.iter().enumerate() {
            let (ox, oy) = DIRS8[d ^ 1];
            assert_eq!((dx + ox, dy + oy), (0, 0));
        }
    }

    #[test]
    fn resample_keeps_equal_dimensions_exact() {
        let src = Field2D::detached(RtDescriptor::mask(2), vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(resample_data(&src, 2, 2, 1), vec![0.1, 0.2, 0.3, 0.4]);
        let up = resample_data(&src, 4, 4, 1);
        assert_eq!(up.len(), 16);
        assert!(up.iter().all(|v| (0.1..=0.4).contains(v)));
    }

    #[test]
    fn axis_aligned_square_covers_expected_texels() {
        let bounds = WorldBounds::square(4.0);
        let mut hits = Vec::new();
        rasterize_parallelogram(
            4,
            4,
            &bounds,
            Vec2::new(1.0, 1.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(0.0, 2.0),
            |i, _, _| hits.push(i),
        );
        hits.sort_unstable();
        assert_eq!(hits, vec![5, 6, 9, 10]);
    }

    #[test]
    fn degenerate_parallelogram_visits_nothing() {
        let bounds = WorldBounds::square(4.0);
        let mut count = 0;
        rasterize_parallelogram(
            4,
            4,
            &bounds,
            Vec2::ZERO,
            Vec2::new(1.0, 1.0),
            Vec2::new(2.0, 2.0),
            |_, _, _| count += 1,
        );
        assert_eq!(count, 0);
    }
}
