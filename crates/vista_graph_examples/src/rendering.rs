//! PNG output for evaluated fields and point sets.
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{ensure, Context};
use glam::Vec2;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};
use vista_graph::prelude::{Field2D, PositionSample, WorldBounds};

/// Routes engine events to stderr. Honors `RUST_LOG`, defaults to `info`.
pub fn init_tracing() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .try_init();
}

/// Color ramp used to map normalized values to RGB.
#[derive(Clone, Copy, Debug, Default)]
pub enum Ramp {
    #[default]
    Gray,
    /// Deep blue through green and rock to snow.
    Terrain,
    /// Off-white to saturated blue.
    Water,
}

impl Ramp {
    fn color(self, t: f32) -> [u8; 3] {
        let t = t.clamp(0.0, 1.0);
        let lerp = |a: [f32; 3], b: [f32; 3], s: f32| {
            [
                (a[0] + (b[0] - a[0]) * s) as u8,
                (a[1] + (b[1] - a[1]) * s) as u8,
                (a[2] + (b[2] - a[2]) * s) as u8,
            ]
        };
        match self {
            Ramp::Gray => {
                let v = (t * 255.0) as u8;
                [v, v, v]
            }
            Ramp::Terrain => {
                const STOPS: [[f32; 3]; 4] = [
                    [28.0, 64.0, 120.0],
                    [70.0, 130.0, 60.0],
                    [140.0, 120.0, 90.0],
                    [250.0, 250.0, 250.0],
                ];
                let s = t * (STOPS.len() - 1) as f32;
                let i = (s as usize).min(STOPS.len() - 2);
                lerp(STOPS[i], STOPS[i + 1], s - i as f32)
            }
            Ramp::Water => lerp([245.0, 245.0, 240.0], [20.0, 70.0, 200.0], t.sqrt()),
        }
    }
}

/// Writes channel 0 of `field` as an RGB PNG, normalized to its own min/max.
pub fn write_field_png(field: &Field2D, ramp: Ramp, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let (width, height, channels) = (field.width(), field.height(), field.channels());
    ensure!(width > 0 && height > 0, "cannot render an empty field");

    let data = field.read();
    let (lo, hi) = data
        .iter()
        .step_by(channels)
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let span = if hi > lo { hi - lo } else { 1.0 };

    let mut rgb = Vec::with_capacity(width * height * 3);
    // Row 0 is the world's minimum z; flip so it ends up at the bottom.
    for y in (0..height).rev() {
        for x in 0..width {
            let v = data[(y * width + x) * channels];
            rgb.extend_from_slice(&ramp.color((v - lo) / span));
        }
    }
    encode(path.as_ref(), &rgb, width as u32, height as u32)
}

/// Writes `points` as dots over a blank canvas covering `bounds`.
pub fn write_points_png(
    points: &[PositionSample],
    bounds: &WorldBounds,
    size: u32,
    path: impl AsRef<Path>,
) -> anyhow::Result<()> {
    ensure!(size > 0, "image size must be > 0");
    let side = size as i64;
    let mut rgb = vec![240u8; (side * side * 3) as usize];
    for p in points {
        let uv = bounds.world_to_uv(Vec2::new(p.position[0], p.position[2]));
        if !(0.0..1.0).contains(&uv.x) || !(0.0..1.0).contains(&uv.y) {
            continue;
        }
        let cx = (uv.x * side as f32) as i64;
        let cy = ((1.0 - uv.y) * side as f32) as i64;
        for (x, y) in (-1..=1).flat_map(|dy| (-1..=1).map(move |dx| (cx + dx, cy + dy))) {
            if (0..side).contains(&x) && (0..side).contains(&y) {
                let i = ((y * side + x) * 3) as usize;
                rgb[i..i + 3].copy_from_slice(&[30, 110, 60]);
            }
        }
    }
    encode(path.as_ref(), &rgb, size, size)
}

fn encode(path: &Path, rgb: &[u8], width: u32, height: u32) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let encoder = PngEncoder::new_with_quality(
        BufWriter::new(file),
        CompressionType::Fast,
        FilterType::NoFilter,
    );
    encoder
        .write_image(rgb, width, height, ExtendedColorType::Rgb8)
        .with_context(|| format!("encoding {}", path.display()))?;
    log::info!("wrote {}", path.display());
    Ok(())
}
