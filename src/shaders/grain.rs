use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wgpu::FilterMode;

use super::{EffectState, Lut, ShaderBuilder, LUMA, PCG_HASH};
use crate::error::BenchError;
use crate::gpu::SourceImage;

const AV1_GRAIN_WIDTH: usize = 82;
const AV1_GRAIN_HEIGHT: usize = 73;
const AV1_SCALING_SIZE: usize = 256;
const AV1_TABLE_SEED: u64 = 0x0a71_9a17;
const H274_BLOCK: usize = 64;
const H274_PATTERNS: usize = 4;
const H274_DATABASE_SEED: u64 = 0x0274_da7a;

/// AV1 luma grain parameters, as carried by the bitstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Av1GrainData {
    /// Piecewise-linear intensity to scaling function.
    pub points_y: &'static [(u8, u8)],
    pub scaling_shift: u8,
    pub ar_coeff_lag: u8,
    pub ar_coeffs_y: [i8; 24],
    pub ar_coeff_shift: u8,
    pub grain_scale_shift: u8,
    /// Blend grain across 32x32 block edges.
    pub overlap: bool,
}

pub const AV1_GRAIN_DATA: Av1GrainData = Av1GrainData {
    points_y: &[(0, 20), (64, 60), (128, 80), (192, 60), (255, 40)],
    scaling_shift: 11,
    ar_coeff_lag: 3,
    ar_coeffs_y: [
        4, 1, 3, 0, 1, -3, 8, -3, 7, -23, 1, -25, 0, -10, 6, -17, -4, 53, 36, 5, -5, -17, 8, 66,
    ],
    ar_coeff_shift: 7,
    grain_scale_shift: 0,
    overlap: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H274Interval {
    pub lower: u8,
    pub upper: u8,
    pub scale: i16,
    /// Database pattern used for this interval.
    pub pattern: u8,
}

/// H.274 frequency-filtering grain with additive blending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H274GrainData {
    pub log2_scale_factor: u8,
    pub intervals: &'static [H274Interval],
}

pub const H274_GRAIN_DATA: H274GrainData = H274GrainData {
    log2_scale_factor: 6,
    intervals: &[
        H274Interval {
            lower: 0,
            upper: 127,
            scale: 64,
            pattern: 1,
        },
        H274Interval {
            lower: 128,
            upper: 255,
            scale: 96,
            pattern: 2,
        },
    ],
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilmGrainData {
    Av1(Av1GrainData),
    H274(H274GrainData),
}

pub struct FilmGrainParams<'a> {
    pub data: FilmGrainData,
    /// Per-frame seed selecting grain block offsets.
    pub seed: u16,
    pub tex: &'a SourceImage,
}

fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn round2(x: i32, shift: u32) -> i32 {
    if shift == 0 {
        x
    } else {
        (x + (1 << (shift - 1))) >> shift
    }
}

/// 82x73 luma grain template, auto-regressively filtered.
pub(crate) fn av1_grain_table(data: &Av1GrainData) -> Vec<i32> {
    let mut rng = StdRng::seed_from_u64(AV1_TABLE_SEED);
    let shift = 4 + data.grain_scale_shift as u32;
    let mut grain: Vec<i32> = (0..AV1_GRAIN_WIDTH * AV1_GRAIN_HEIGHT)
        .map(|_| round2((gaussian(&mut rng) * 512.0) as i32, shift))
        .collect();

    let lag = data.ar_coeff_lag as i32;
    for y in 3..AV1_GRAIN_HEIGHT {
        for x in 3..AV1_GRAIN_WIDTH - 3 {
            let mut coeffs = data.ar_coeffs_y.iter();
            let mut sum = 0;
            'taps: for dy in -lag..=0 {
                for dx in -lag..=lag {
                    if dy == 0 && dx == 0 {
                        break 'taps;
                    }
                    let Some(&c) = coeffs.next() else {
                        break 'taps;
                    };
                    let ny = (y as i32 + dy) as usize;
                    let nx = (x as i32 + dx) as usize;
                    sum += c as i32 * grain[ny * AV1_GRAIN_WIDTH + nx];
                }
            }
            let i = y * AV1_GRAIN_WIDTH + x;
            grain[i] = (grain[i] + round2(sum, data.ar_coeff_shift as u32)).clamp(-128, 127);
        }
    }
    grain
}

/// Scaling function sampled at every 8-bit intensity.
pub(crate) fn av1_scaling_lut(points: &[(u8, u8)]) -> Vec<f32> {
    let (Some(&(first_x, first_y)), Some(&(last_x, last_y))) = (points.first(), points.last())
    else {
        return vec![0.0; AV1_SCALING_SIZE];
    };
    (0..AV1_SCALING_SIZE)
        .map(|i| {
            if i <= first_x as usize {
                return first_y as f32;
            }
            if i >= last_x as usize {
                return last_y as f32;
            }
            points
                .windows(2)
                .find(|w| i < w[1].0 as usize)
                .map_or(last_y as f32, |w| {
                    let (x0, y0) = (w[0].0 as f32, w[0].1 as f32);
                    let (x1, y1) = (w[1].0 as f32, w[1].1 as f32);
                    y0 + (y1 - y0) * (i as f32 - x0) / (x1 - x0)
                })
        })
        .collect()
}

/// Four 64x64 noise patterns side by side, low-passed with growing box
/// radii and normalised to unit variance.
pub(crate) fn h274_database() -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(H274_DATABASE_SEED);
    let n = H274_BLOCK;
    let width = n * H274_PATTERNS;
    let mut out = vec![0.0; width * n];
    for pattern in 0..H274_PATTERNS {
        let noise: Vec<f32> = (0..n * n).map(|_| gaussian(&mut rng)).collect();
        let radius = pattern as i32;
        let mut filtered = vec![0.0; n * n];
        for y in 0..n {
            for x in 0..n {
                let mut sum = 0.0;
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let sy = (y as i32 + dy).rem_euclid(n as i32) as usize;
                        let sx = (x as i32 + dx).rem_euclid(n as i32) as usize;
                        sum += noise[sy * n + sx];
                    }
                }
                filtered[y * n + x] = sum;
            }
        }
        let mean = filtered.iter().sum::<f32>() / filtered.len() as f32;
        let var = filtered.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>()
            / filtered.len() as f32;
        let norm = var.sqrt().max(f32::EPSILON);
        for y in 0..n {
            for x in 0..n {
                out[y * width + pattern * n + x] = (filtered[y * n + x] - mean) / norm;
            }
        }
    }
    out
}

const GRAIN_HASH: &str = "\
fn grain_hash(seed: u32, block: vec2<i32>) -> u32 {
    return pcg(seed ^ pcg(u32(block.x) ^ pcg(u32(block.y))));
}
";

const AV1_GRAIN: &str = "\
fn av1_grain(grain: texture_2d<f32>, seed: u32, block: vec2<i32>, local: vec2<i32>) -> f32 {
    let h = grain_hash(seed, block);
    let offset = vec2<i32>(9 + i32((h >> 4u) & 15u) * 2, 9 + i32(h & 15u) * 2);
    return textureLoad(grain, offset + local, 0).r;
}

fn av1_noise(grain: texture_2d<f32>, seed: u32, pos: vec2<i32>, overlap: bool) -> f32 {
    let block = pos / 32;
    let local = pos % 32;
    var g = av1_grain(grain, seed, block, local);
    if (overlap) {
        if (local.x < 2 && block.x > 0) {
            let w = select(vec2<f32>(17.0, 27.0), vec2<f32>(27.0, 17.0), local.x == 0);
            let prev = av1_grain(grain, seed, block - vec2<i32>(1, 0), local + vec2<i32>(32, 0));
            g = clamp((w.x * prev + w.y * g) / 32.0, -128.0 / 255.0, 127.0 / 255.0);
        }
        if (local.y < 2 && block.y > 0) {
            let w = select(vec2<f32>(17.0, 27.0), vec2<f32>(27.0, 17.0), local.y == 0);
            let prev = av1_grain(grain, seed, block - vec2<i32>(0, 1), local + vec2<i32>(0, 32));
            g = clamp((w.x * prev + w.y * g) / 32.0, -128.0 / 255.0, 127.0 / 255.0);
        }
    }
    return g;
}
";

const H274_GRAIN: &str = "\
fn h274_noise(db: texture_2d<f32>, seed: u32, pos: vec2<i32>, pattern: i32) -> f32 {
    let h = grain_hash(seed, pos / 8);
    let p = vec2<i32>(i32(h & 7u) * 8, i32((h >> 3u) & 7u) * 8) + pos % 8;
    return textureLoad(db, vec2<i32>(pattern * 64 + p.x, p.y), 0).r;
}
";

/// Samples `params.tex` and adds synthesised film grain scaled by the
/// pixel's luma.
pub fn film_grain<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    params: &FilmGrainParams<'a>,
) -> Result<(), BenchError> {
    let tex = sh.bind_texture(params.tex.view());
    let smp = sh.bind_sampler(FilterMode::Nearest);
    sh.push(format!(
        "color = textureSampleLevel({tex}, {smp}, pos / OUT_SIZE, 0.0);"
    ));
    sh.set_input();
    sh.global(PCG_HASH);
    sh.global(LUMA);
    sh.global(GRAIN_HASH);
    let seed = sh.param([params.seed as f32, 0.0, 0.0, 0.0]);

    match params.data {
        FilmGrainData::Av1(data) => av1_grain(sh, state, &data, &seed),
        FilmGrainData::H274(data) => h274_grain(sh, state, &data, &seed),
    }
}

fn av1_grain<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    data: &Av1GrainData,
    seed: &str,
) -> Result<(), BenchError> {
    if !matches!(state, EffectState::Av1Grain { .. }) {
        let grain: Vec<f32> = av1_grain_table(data)
            .into_iter()
            .map(|g| g as f32 / 255.0)
            .collect();
        let divisor = (1u32 << data.scaling_shift) as f32;
        let scaling: Vec<f32> = av1_scaling_lut(data.points_y)
            .into_iter()
            .map(|s| s / divisor)
            .collect();
        let ctx = sh.context();
        *state = EffectState::Av1Grain {
            grain: Lut::new(
                ctx,
                "AV1 Grain",
                AV1_GRAIN_WIDTH as u32,
                AV1_GRAIN_HEIGHT as u32,
                &grain,
            ),
            scaling: Lut::new(ctx, "AV1 Scaling", AV1_SCALING_SIZE as u32, 1, &scaling),
        };
    }
    let EffectState::Av1Grain { grain, scaling } = state else {
        return Err(BenchError::Record("AV1 grain state was not created".into()));
    };

    let grain = sh.bind_texture(grain.view());
    let scaling = sh.bind_texture(scaling.view());
    sh.global(AV1_GRAIN);
    sh.push(format!(
        "{{\n    let noise = av1_noise({grain}, u32({seed}.x), vec2<i32>(pos), {overlap});\n    \
         let idx = i32(clamp(luma(color), 0.0, 1.0) * 255.0 + 0.5);\n    \
         let scale = textureLoad({scaling}, vec2<i32>(idx, 0), 0).r;\n    \
         color = vec4<f32>(color.rgb + vec3<f32>(scale * noise), color.a);\n}}",
        overlap = data.overlap,
    ));
    Ok(())
}

fn h274_grain<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    data: &H274GrainData,
    seed: &str,
) -> Result<(), BenchError> {
    if !matches!(state, EffectState::H274Grain { .. }) {
        let database = h274_database();
        *state = EffectState::H274Grain {
            database: Lut::new(
                sh.context(),
                "H.274 Grain Database",
                (H274_BLOCK * H274_PATTERNS) as u32,
                H274_BLOCK as u32,
                &database,
            ),
        };
    }
    let EffectState::H274Grain { database } = state else {
        return Err(BenchError::Record("H.274 grain state was not created".into()));
    };

    let db = sh.bind_texture(database.view());
    sh.global(H274_GRAIN);
    let divisor = (1u32 << data.log2_scale_factor) as f32 * 255.0;
    let mut body = String::from("{\n    let l = luma(color) * 255.0;\n    var noise = 0.0;\n");
    for interval in data.intervals {
        if interval.pattern as usize >= H274_PATTERNS {
            return Err(BenchError::Record(format!(
                "no H.274 database pattern {}",
                interval.pattern
            )));
        }
        let p = sh.param([
            interval.lower as f32,
            interval.upper as f32 + 1.0,
            interval.scale as f32 / divisor,
            interval.pattern as f32,
        ]);
        body.push_str(&format!(
            "    if (l >= {p}.x && l < {p}.y) {{\n        \
             noise = {p}.z * h274_noise({db}, u32({seed}.x), vec2<i32>(pos), i32({p}.w));\n    }}\n"
        ));
    }
    body.push_str("    color = vec4<f32>(color.rgb + vec3<f32>(noise), color.a);\n}");
    sh.push(body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn av1_table_is_bounded_and_noisy() {
        let table = av1_grain_table(&AV1_GRAIN_DATA);
        assert_eq!(table.len(), AV1_GRAIN_WIDTH * AV1_GRAIN_HEIGHT);
        assert!(table.iter().all(|g| (-128..=127).contains(g)));
        let distinct: std::collections::HashSet<_> = table.iter().collect();
        assert!(distinct.len() > 32);
    }

    #[test]
    fn av1_table_is_deterministic() {
        assert_eq!(
            av1_grain_table(&AV1_GRAIN_DATA),
            av1_grain_table(&AV1_GRAIN_DATA)
        );
    }

    #[test]
    fn scaling_lut_interpolates_between_points() {
        let lut = av1_scaling_lut(AV1_GRAIN_DATA.points_y);
        assert_eq!(lut.len(), 256);
        assert_eq!(lut[0], 20.0);
        assert_eq!(lut[64], 60.0);
        assert_eq!(lut[96], 70.0);
        assert_eq!(lut[128], 80.0);
        assert_eq!(lut[255], 40.0);
    }

    #[test]
    fn scaling_lut_without_points_is_flat() {
        assert!(av1_scaling_lut(&[]).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn round2_rounds_half_up() {
        assert_eq!(round2(5, 0), 5);
        assert_eq!(round2(24, 4), 2);
        assert_eq!(round2(-24, 4), -1);
    }

    #[test]
    fn h274_patterns_have_unit_variance() {
        let db = h274_database();
        let width = H274_BLOCK * H274_PATTERNS;
        assert_eq!(db.len(), width * H274_BLOCK);
        for pattern in 0..H274_PATTERNS {
            let values: Vec<f32> = (0..H274_BLOCK)
                .flat_map(|y| {
                    let start = y * width + pattern * H274_BLOCK;
                    db[start..start + H274_BLOCK].to_vec()
                })
                .collect();
            let n = values.len() as f32;
            let mean = values.iter().sum::<f32>() / n;
            let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
            assert!(mean.abs() < 1e-4, "pattern {pattern} mean {mean}");
            assert!((var - 1.0).abs() < 1e-3, "pattern {pattern} var {var}");
        }
    }
}
