//! Shallow-water transport and hydraulic erosion on a square simulation grid.
//!
//! Water moves through an outflow buffer holding [`FLUX_CHANNELS`] values per
//! cell, one per neighbour direction of [`DIRS8`]. A step is split into
//! `outflow` (how much leaves each cell, towards where) and `apply` (move it).
//! Cells outside the grid are closed: nothing flows across the border.
use crate::error::{Error, Result};
use crate::kernel::cpu::{cell_size, neighbor_count, DIRS8, FLUX_CHANNELS};
use crate::kernel::Bindings;
use crate::resource::{Buffer, Field2D};

/// `water += amount * mask`, mask defaulting to white.
pub(crate) fn add_water(b: &Bindings) -> Result<()> {
    let water = b.get_field("water")?;
    let amount = b.float_or("amount", 0.0);
    let mask = b.try_field("mask").map(Field2D::to_vec);
    let mut w = water.write();
    for (i, v) in w.iter_mut().enumerate() {
        let m = mask.as_ref().and_then(|m| m.get(i).copied()).unwrap_or(1.0);
        *v += amount * m;
    }
    Ok(())
}

/// Computes how much water leaves each cell towards each lower neighbour.
///
/// At most `flow_rate * max_drop / 2` leaves a cell per step, never more than
/// it holds, split between neighbours in proportion to the surface drop.
pub(crate) fn outflow(b: &Bindings) -> Result<()> {
    let height = b.get_field("height")?.to_vec();
    let water_field = b.get_field("water")?;
    let water = water_field.to_vec();
    let flux = b.get_buffer("flux")?;
    let flow_rate = b.float_or("flow_rate", 1.0).max(0.0);
    let (w, h) = (water_field.width(), water_field.height());
    let neighbors = neighbor_count(b);
    check_flux(flux, w * h)?;

    let mut out = flux.write();
    out.iter_mut().for_each(|v| *v = 0.0);
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let amount = water[i];
            if amount <= 0.0 {
                continue;
            }
            let surface = height[i] + amount;
            let mut drops = [0.0f32; FLUX_CHANNELS];
            let mut total = 0.0;
            let mut max_drop = 0.0f32;
            for (d, (dx, dy)) in DIRS8.iter().take(neighbors).enumerate() {
                let Some(j) = neighbor(x, y, *dx, *dy, w, h) else {
                    continue;
                };
                let distance = if *dx != 0 && *dy != 0 { std::f32::consts::SQRT_2 } else { 1.0 };
                let drop = (surface - (height[j] + water[j])) / distance;
                if drop > 0.0 {
                    drops[d] = drop;
                    total += drop;
                    max_drop = max_drop.max(drop);
                }
            }
            if total <= 0.0 {
                continue;
            }
            let leaving = amount.min(flow_rate * max_drop * 0.5);
            for d in 0..neighbors {
                out[i * FLUX_CHANNELS + d] = leaving * drops[d] / total;
            }
        }
    }
    Ok(())
}

/// Moves water (and dissolved sediment, if bound) along the outflow buffer,
/// then evaporates `evaporation` of what remains.
pub(crate) fn apply(b: &Bindings) -> Result<()> {
    let water_field = b.get_field("water")?;
    let flux = b.get_buffer("flux")?;
    let evaporation = b.float_or("evaporation", 0.0).clamp(0.0, 1.0);
    let (w, h) = (water_field.width(), water_field.height());
    check_flux(flux, w * h)?;
    let flux = flux.to_vec();
    let water = water_field.to_vec();

    if let Some(sediment_field) = b.try_field("sediment") {
        let sediment = sediment_field.to_vec();
        let moved = transport(&sediment, &water, &flux, w, h, true);
        sediment_field.write().copy_from_slice(&moved);
    }

    let moved = transport(&water, &water, &flux, w, h, false);
    let mut out = water_field.write();
    for (v, m) in out.iter_mut().zip(moved) {
        *v = (m * (1.0 - evaporation)).max(0.0);
    }
    Ok(())
}

/// Applies the outflow buffer to `values`. When `proportional`, each cell sends
/// the same fraction of `values` as of its water.
fn transport(values: &[f32], water: &[f32], flux: &[f32], w: usize, h: usize, proportional: bool) -> Vec<f32> {
    let share = |i: usize, d: usize| {
        let f = flux[i * FLUX_CHANNELS + d];
        if !proportional {
            f
        } else if water[i] > 0.0 {
            values[i] * f / water[i]
        } else {
            0.0
        }
    };
    let mut out = values.to_vec();
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            for (d, (dx, dy)) in DIRS8.iter().enumerate() {
                let leaving = share(i, d);
                if leaving == 0.0 {
                    continue;
                }
                if let Some(j) = neighbor(x, y, *dx, *dy, w, h) {
                    out[i] -= leaving;
                    out[j] += leaving;
                }
            }
        }
    }
    out
}

/// Erodes or deposits sediment depending on the carrying capacity of the flow.
///
/// Capacity grows with the water leaving a cell and the local slope. Below
/// capacity the bed is eroded at `erosion_rate`, above it sediment settles at
/// `deposition_rate`. Amounts are accumulated into `erosion`/`deposition` when bound.
pub(crate) fn erode(b: &Bindings) -> Result<()> {
    let height_field = b.get_field("height")?;
    let sediment_field = b.get_field("sediment")?;
    let water = b.get_field("water")?.to_vec();
    let flux = b.get_buffer("flux")?;
    let (w, h) = (height_field.width(), height_field.height());
    check_flux(flux, w * h)?;
    let flux = flux.to_vec();
    let erosion_rate = b.float_or("erosion_rate", 0.1).max(0.0);
    let deposition_rate = b.float_or("deposition_rate", 0.1).max(0.0);
    let capacity_k = b.float_or("capacity", 1.0).max(0.0);
    let terrain_height = b.float_or("terrain_height", 1.0);
    let cell = cell_size(&b.get_bounds(), w, h).max_element().max(1e-6);

    let height = height_field.to_vec();
    let mut new_height = height.clone();
    let mut sediment = sediment_field.to_vec();
    let mut eroded = vec![0.0; w * h];
    let mut deposited = vec![0.0; w * h];

    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            if water[i] <= 0.0 {
                continue;
            }
            let speed: f32 = flux[i * FLUX_CHANNELS..(i + 1) * FLUX_CHANNELS].iter().sum();
            let gx = height[idx(x as isize + 1, y as isize, w, h)] - height[idx(x as isize - 1, y as isize, w, h)];
            let gy = height[idx(x as isize, y as isize + 1, w, h)] - height[idx(x as isize, y as isize - 1, w, h)];
            let slope = (gx * gx + gy * gy).sqrt() * 0.5 * terrain_height / cell;
            let capacity = capacity_k * speed * slope.max(0.01);
            if sediment[i] < capacity {
                let amount = (erosion_rate * (capacity - sediment[i])).min(water[i]);
                new_height[i] -= amount;
                sediment[i] += amount;
                eroded[i] = amount;
            } else {
                let amount = deposition_rate * (sediment[i] - capacity);
                new_height[i] += amount;
                sediment[i] -= amount;
                deposited[i] = amount;
            }
        }
    }

    height_field.write().copy_from_slice(&new_height);
    sediment_field.write().copy_from_slice(&sediment);
    accumulate(b.try_field("erosion"), &eroded);
    accumulate(b.try_field("deposition"), &deposited);
    Ok(())
}

pub(crate) fn accumulate(target: Option<&Field2D>, amounts: &[f32]) {
    if let Some(target) = target {
        for (v, a) in target.write().iter_mut().zip(amounts) {
            *v += a;
        }
    }
}

pub(crate) fn check_flux(flux: &Buffer, cells: usize) -> Result<()> {
    let len = flux.read().len();
    if len != cells * FLUX_CHANNELS {
        return Err(Error::Runtime(format!(
            "outflow buffer {} holds {} values, expected {}",
            flux.handle(),
            len,
            cells * FLUX_CHANNELS
        )));
    }
    Ok(())
}

#[inline]
pub(crate) fn neighbor(x: usize, y: usize, dx: i32, dy: i32, w: usize, h: usize) -> Option<usize> {
    let nx = x as isize + dx as isize;
    let ny = y as isize + dy as isize;
    if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
        None
    } else {
        Some(ny as usize * w + nx as usize)
    }
}

#[inline]
pub(crate) fn idx(x: isize, y: isize, w: usize, h: usize) -> usize {
    let x = x.clamp(0, w as isize - 1) as usize;
    let y = y.clamp(0, h as isize - 1) as usize;
    y * w + x
}
