//! Talus-angle material transport: thermal erosion, landslides and snow.
//!
//! Material above the resting angle slides towards lower neighbours. With a
//! `layer` bound, only the layer moves and a cell cannot lose more than it has.
//! `stacked` selects whether the layer sits on top of `height` (snow) or is
//! already part of it (loose soil).
use crate::error::Result;
use crate::kernel::cpu::flow::{accumulate, check_flux, idx, neighbor};
use crate::kernel::cpu::{cell_size, neighbor_count, DIRS8, FLUX_CHANNELS};
use crate::kernel::Bindings;
use crate::resource::Field2D;

/// Computes the material each cell sheds towards each neighbour steeper than `talus`.
pub(crate) fn outflow(b: &Bindings) -> Result<()> {
    let height_field = b.get_field("height")?;
    let (w, h) = (height_field.width(), height_field.height());
    let height = height_field.to_vec();
    let layer = b.try_field("layer").map(Field2D::to_vec);
    let mask = b.try_field("mask").map(Field2D::to_vec);
    let flux = b.get_buffer("flux")?;
    check_flux(flux, w * h)?;
    let talus = b.float_or("talus", 1.0).max(0.0);
    let rate = b.float_or("rate", 0.5).clamp(0.0, 1.0);
    let stacked = b.flag_or("stacked", false);
    let terrain_height = b.float_or("terrain_height", 1.0).max(1e-6);
    let cell = cell_size(&b.get_bounds(), w, h).max_element().max(1e-6);
    let neighbors = neighbor_count(b);

    let surface: Vec<f32> = match (&layer, stacked) {
        (Some(layer), true) => height.iter().zip(layer).map(|(h, l)| h + l).collect(),
        _ => height.clone(),
    };

    let mut out = flux.write();
    out.iter_mut().for_each(|v| *v = 0.0);
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let available = layer
                .as_ref()
                .and_then(|l| l.get(i).copied())
                .map_or(f32::MAX, |l| l.max(0.0));
            if available <= 0.0 {
                continue;
            }
            let mut excess = [0.0f32; FLUX_CHANNELS];
            let mut total = 0.0;
            let mut max_excess = 0.0f32;
            for (d, (dx, dy)) in DIRS8.iter().take(neighbors).enumerate() {
                let Some(j) = neighbor(x, y, *dx, *dy, w, h) else {
                    continue;
                };
                let distance = if *dx != 0 && *dy != 0 {
                    cell * std::f32::consts::SQRT_2
                } else {
                    cell
                };
                let rise = (surface[i] - surface[j]) * terrain_height;
                let over = rise - talus * distance;
                if over > 0.0 {
                    let normalized = over / terrain_height;
                    excess[d] = normalized;
                    total += normalized;
                    max_excess = max_excess.max(normalized);
                }
            }
            if total <= 0.0 {
                continue;
            }
            let strength = mask
                .as_ref()
                .and_then(|m| m.get(i).copied())
                .map_or(1.0, |m| m.clamp(0.0, 1.0));
            let moving = (rate * max_excess * 0.5 * strength).min(available);
            for d in 0..neighbors {
                out[i * FLUX_CHANNELS + d] = moving * excess[d] / total;
            }
        }
    }
    Ok(())
}

/// Moves material along the outflow buffer.
///
/// Bound `erosion`/`deposition` accumulate net loss/gain per cell; a bound
/// `trail` accumulates `trail_weight` times the material leaving each cell.
pub(crate) fn apply(b: &Bindings) -> Result<()> {
    let height_field = b.get_field("height")?;
    let (w, h) = (height_field.width(), height_field.height());
    let flux = b.get_buffer("flux")?;
    check_flux(flux, w * h)?;
    let flux = flux.to_vec();
    let stacked = b.flag_or("stacked", false);
    let trail_weight = b.float_or("trail_weight", 1.0);

    let mut net = vec![0.0f32; w * h];
    let mut leaving = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            for (d, (dx, dy)) in DIRS8.iter().enumerate() {
                let amount = flux[i * FLUX_CHANNELS + d];
                if amount == 0.0 {
                    continue;
                }
                if let Some(j) = neighbor(x, y, *dx, *dy, w, h) {
                    net[i] -= amount;
                    net[j] += amount;
                    leaving[i] += amount;
                }
            }
        }
    }

    if let Some(layer) = b.try_field("layer") {
        for (v, n) in layer.write().iter_mut().zip(&net) {
            *v = (*v + n).max(0.0);
        }
    }
    if !stacked {
        for (v, n) in height_field.write().iter_mut().zip(&net) {
            *v += n;
        }
    }
    let lost: Vec<f32> = net.iter().map(|n| (-n).max(0.0)).collect();
    let gained: Vec<f32> = net.iter().map(|n| n.max(0.0)).collect();
    accumulate(b.try_field("erosion"), &lost);
    accumulate(b.try_field("deposition"), &gained);
    if b.try_field("trail").is_some() {
        let weighted: Vec<f32> = leaving.iter().map(|l| l * trail_weight).collect();
        accumulate(b.try_field("trail"), &weighted);
    }
    Ok(())
}

/// Adds `amount * mask` of snow, reduced on slopes steeper than `talus`.
pub(crate) fn snow_fall(b: &Bindings) -> Result<()> {
    let snow = b.get_field("snow")?;
    let (w, h) = (snow.width(), snow.height());
    let height = b.get_field("height")?.to_vec();
    let mask = b.try_field("mask").map(Field2D::to_vec);
    let amount = b.float_or("amount", 0.0).max(0.0);
    let talus = b.float_or("talus", 1.0).max(1e-6);
    let terrain_height = b.float_or("terrain_height", 1.0);
    let cell = cell_size(&b.get_bounds(), w, h).max_element().max(1e-6);

    let mut out = snow.write();
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let (xi, yi) = (x as isize, y as isize);
            let gx = height[idx(xi + 1, yi, w, h)] - height[idx(xi - 1, yi, w, h)];
            let gy = height[idx(xi, yi + 1, w, h)] - height[idx(xi, yi - 1, w, h)];
            let slope = (gx * gx + gy * gy).sqrt() * 0.5 * terrain_height / cell;
            let sticking = (1.0 - slope / talus).clamp(0.0, 1.0);
            let m = mask.as_ref().and_then(|m| m.get(i).copied()).unwrap_or(1.0);
            out[i] += amount * m * sticking;
        }
    }
    Ok(())
}
