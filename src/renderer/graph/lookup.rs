//! Lookup Textures
//!
//! Small constant textures sampled by post-processing and shadow filtering:
//! constant colors, rotation noise for SSAO and poisson-disc offsets for PCF.
//! Generators use fixed seeds so frames and sessions see identical patterns.

use glam::{UVec2, Vec2, Vec4};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use super::format::BufferFormat;
use super::texture::{SamplerSettings, StageTexture};

const NOISE_SEED: u64 = 12345;
const POISSON_SEED: u64 = 42;

/// Rejection attempts per requested poisson sample.
const POISSON_ATTEMPTS: usize = 30;

fn nearest_repeat() -> SamplerSettings {
    SamplerSettings {
        filter: wgpu::FilterMode::Nearest,
        address_mode: wgpu::AddressMode::Repeat,
        border_color: None,
    }
}

/// A 1×1 `RGBA8` texture of `color` (components clamped to `[0, 1]`).
#[must_use]
pub fn constant_texture(label: impl Into<String>, color: Vec4) -> StageTexture {
    let texel = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    StageTexture::new(label, BufferFormat::RgbaInt8, UVec2::ONE)
        .with_sampler(nearest_repeat())
        .with_data(texel.to_array().map(|c| c as u8).to_vec())
}

/// Random 2D rotation vectors in XY, remapped to `[0, 1]`, Z = 0, A = 1.
#[must_use]
pub fn noise_texture(label: impl Into<String>, cols: u32, rows: u32) -> StageTexture {
    let size = UVec2::new(cols.max(1), rows.max(1));
    let mut rng = StdRng::seed_from_u64(NOISE_SEED);
    let mut data = Vec::with_capacity((size.x * size.y * 4) as usize);
    for _ in 0..size.x * size.y {
        let xy = Vec2::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)).normalize_or(Vec2::X);
        data.extend_from_slice(&[
            ((xy.x * 0.5 + 0.5) * 255.0) as u8,
            ((xy.y * 0.5 + 0.5) * 255.0) as u8,
            0,
            255,
        ]);
    }
    StageTexture::new(label, BufferFormat::RgbaInt8, size)
        .with_sampler(nearest_repeat())
        .with_data(data)
}

/// `count` points of a poisson-disc distribution inside the unit disc.
///
/// The minimum distance starts at the ideal packing radius and shrinks
/// whenever a sample cannot be placed, so exactly `count` points are returned.
#[must_use]
pub fn poisson_disc_samples(count: usize, seed: u64) -> Vec<Vec2> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points: Vec<Vec2> = Vec::with_capacity(count);
    let mut min_distance = 1.5 / (count.max(1) as f32).sqrt();

    while points.len() < count {
        let mut placed = false;
        for _ in 0..POISSON_ATTEMPTS {
            let candidate = Vec2::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0));
            if candidate.length_squared() > 1.0 {
                continue;
            }
            if points.iter().all(|p| p.distance(candidate) >= min_distance) {
                points.push(candidate);
                placed = true;
                break;
            }
        }
        if !placed {
            min_distance *= 0.9;
        }
    }
    points
}

/// Poisson-disc offsets stored in an `RG32F` texture of `cols × rows` texels.
#[must_use]
pub fn poisson_texture(label: impl Into<String>, cols: u32, rows: u32) -> StageTexture {
    let size = UVec2::new(cols.max(1), rows.max(1));
    let samples = poisson_disc_samples((size.x * size.y) as usize, POISSON_SEED);
    let values: Vec<f32> = samples.iter().flat_map(|p| p.to_array()).collect();
    StageTexture::new(label, BufferFormat::RgFloat32, size)
        .with_sampler(nearest_repeat())
        .with_data(bytemuck::cast_slice(&values).to_vec())
}
