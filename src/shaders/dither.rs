use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{float, EffectState, Lut, ShaderBuilder, PCG_HASH};
use crate::error::BenchError;

const BLUE_NOISE_SIZE: usize = 64;
const BLUE_NOISE_SEED: u64 = 0x5eed_b10e;
const VOID_CLUSTER_SIGMA: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DitherMethod {
    /// Void-and-cluster threshold matrix, generated once per run.
    BlueNoise,
    /// Independent per-pixel noise.
    WhiteNoise,
    /// 16x16 Bayer matrix computed in the shader.
    OrderedFixed,
}

const BAYER: &str = "\
fn bayer16(p: vec2<u32>) -> f32 {
    let x = p.x & 15u;
    let y = p.y & 15u;
    var v = 0u;
    for (var bit = 0u; bit < 4u; bit++) {
        let xb = (x >> bit) & 1u;
        let yb = (y >> bit) & 1u;
        v |= (((xb ^ yb) << 1u) | yb) << (2u * (3u - bit));
    }
    return (f32(v) + 0.5) / 256.0;
}
";

/// Quantises `color` to `depth` bits per channel, adding a dither bias below
/// one quantisation step.
pub fn dither<'a>(
    sh: &mut ShaderBuilder<'a>,
    depth: u32,
    state: &'a mut EffectState,
    method: DitherMethod,
) -> Result<(), BenchError> {
    sh.require_input("dither")?;
    if depth == 0 || depth > 16 {
        return Err(BenchError::Record(format!("cannot dither to {depth} bits")));
    }
    let scale = float(((1u32 << depth) - 1) as f32);

    let bias = match method {
        DitherMethod::BlueNoise => {
            if !matches!(state, EffectState::Dither { method: DitherMethod::BlueNoise, .. }) {
                let matrix = blue_noise_matrix(BLUE_NOISE_SIZE, BLUE_NOISE_SEED);
                let size = BLUE_NOISE_SIZE as u32;
                *state = EffectState::Dither {
                    method,
                    matrix: Lut::new(sh.context(), "Blue Noise Matrix", size, size, &matrix),
                };
            }
            let EffectState::Dither { matrix, .. } = state else {
                return Err(BenchError::Record("dither matrix state was not created".into()));
            };
            let tex = sh.bind_texture(matrix.view());
            format!("textureLoad({tex}, vec2<u32>(pos) % textureDimensions({tex}), 0).r")
        }
        DitherMethod::WhiteNoise => {
            sh.global(PCG_HASH);
            "pcg_unorm(pcg(u32(pos.x)) ^ u32(pos.y))".to_owned()
        }
        DitherMethod::OrderedFixed => {
            sh.global(BAYER);
            "bayer16(vec2<u32>(pos))".to_owned()
        }
    };
    sh.push(format!(
        "color = vec4<f32>(floor(color.rgb * {scale} + {bias}) / {scale}, color.a);"
    ));
    Ok(())
}

/// Gaussian weight of every toroidal offset in a `size` x `size` tile.
fn torus_kernel(size: usize) -> Vec<f32> {
    let mut kernel = vec![0.0; size * size];
    for dy in 0..size {
        for dx in 0..size {
            let wx = dx.min(size - dx) as f32;
            let wy = dy.min(size - dy) as f32;
            let d2 = wx * wx + wy * wy;
            kernel[dy * size + dx] = (-d2 / (2.0 * VOID_CLUSTER_SIGMA * VOID_CLUSTER_SIGMA)).exp();
        }
    }
    kernel
}

struct Pattern {
    size: usize,
    kernel: Vec<f32>,
    on: Vec<bool>,
    energy: Vec<f32>,
}

impl Pattern {
    fn toggle(&mut self, index: usize, on: bool) {
        let size = self.size;
        let (ix, iy) = (index % size, index / size);
        let sign = if on { 1.0 } else { -1.0 };
        self.on[index] = on;
        for y in 0..size {
            let dy = (y + size - iy) % size;
            for x in 0..size {
                let dx = (x + size - ix) % size;
                self.energy[y * size + x] += sign * self.kernel[dy * size + dx];
            }
        }
    }

    fn tightest_cluster(&self) -> usize {
        self.extreme(true, |a, b| a > b)
    }

    fn largest_void(&self) -> usize {
        self.extreme(false, |a, b| a < b)
    }

    fn extreme(&self, on: bool, better: impl Fn(f32, f32) -> bool) -> usize {
        let mut best: Option<usize> = None;
        for (i, &e) in self.energy.iter().enumerate() {
            if self.on[i] != on {
                continue;
            }
            if best.map_or(true, |b| better(e, self.energy[b])) {
                best = Some(i);
            }
        }
        best.unwrap_or(0)
    }
}

/// Threshold matrix from the void-and-cluster algorithm. Every value
/// `(rank + 0.5) / size²` appears exactly once.
pub(crate) fn blue_noise_matrix(size: usize, seed: u64) -> Vec<f32> {
    let n = size * size;
    let mut pattern = Pattern {
        size,
        kernel: torus_kernel(size),
        on: vec![false; n],
        energy: vec![0.0; n],
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let initial = (n / 10).max(1);
    let mut ones = 0;
    while ones < initial {
        let i = rng.gen_range(0..n);
        if !pattern.on[i] {
            pattern.toggle(i, true);
            ones += 1;
        }
    }

    // move points from clusters into voids until the pattern is stable
    for _ in 0..n {
        let cluster = pattern.tightest_cluster();
        pattern.toggle(cluster, false);
        let void = pattern.largest_void();
        pattern.toggle(void, true);
        if void == cluster {
            break;
        }
    }

    let mut ranks = vec![0usize; n];
    let prototype = (pattern.on.clone(), pattern.energy.clone());
    for rank in (0..ones).rev() {
        let cluster = pattern.tightest_cluster();
        pattern.toggle(cluster, false);
        ranks[cluster] = rank;
    }

    (pattern.on, pattern.energy) = prototype;
    for rank in ones..n {
        let void = pattern.largest_void();
        pattern.toggle(void, true);
        ranks[void] = rank;
    }

    ranks
        .into_iter()
        .map(|rank| (rank as f32 + 0.5) / n as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blue_noise_ranks_form_a_permutation() {
        let size = 16;
        let n = size * size;
        let mut matrix = blue_noise_matrix(size, 7);
        assert_eq!(matrix.len(), n);
        matrix.sort_by(f32::total_cmp);
        for (rank, value) in matrix.iter().enumerate() {
            assert_eq!(*value, (rank as f32 + 0.5) / n as f32);
        }
    }

    #[test]
    fn blue_noise_is_deterministic_per_seed() {
        assert_eq!(blue_noise_matrix(8, 1), blue_noise_matrix(8, 1));
    }

    #[test]
    fn blue_noise_spreads_low_ranks() {
        // the lowest quarter of thresholds covers every quadrant evenly
        let size = 16;
        let matrix = blue_noise_matrix(size, 3);
        let mut quadrants = [0usize; 4];
        for (i, &v) in matrix.iter().enumerate() {
            if v < 0.25 {
                let q = (i % size >= size / 2) as usize + 2 * (i / size >= size / 2) as usize;
                quadrants[q] += 1;
            }
        }
        assert!(quadrants.iter().all(|&count| (8..=24).contains(&count)), "{quadrants:?}");
    }

    #[test]
    fn torus_kernel_wraps() {
        let kernel = torus_kernel(8);
        assert_eq!(kernel[0], 1.0);
        assert_eq!(kernel[1], kernel[7]);
        assert_eq!(kernel[8], kernel[7 * 8]);
    }
}
