use std::f64::consts::PI;

use wgpu::FilterMode;

use super::{float, EffectState, Lut, ShaderBuilder};
use crate::error::BenchError;
use crate::gpu::SourceImage;

/// Third zero of the jinc function, the radius of EWA Lanczos.
pub(crate) const EWA_LANCZOS_RADIUS: f64 = 3.238_315_484_166_236_2;
/// First zero of the jinc function.
pub(crate) const JINC_ZERO: f64 = 1.219_669_891_266_504_5;
const POLAR_LUT_SIZE: usize = 256;

pub fn sample_direct<'a>(sh: &mut ShaderBuilder<'a>, src: &'a SourceImage) -> Result<(), BenchError> {
    let tex = sh.bind_texture(src.view());
    let smp = sh.bind_sampler(FilterMode::Nearest);
    sh.push(format!(
        "color = textureSampleLevel({tex}, {smp}, pos / OUT_SIZE, 0.0);"
    ));
    sh.set_input();
    Ok(())
}

pub fn sample_bilinear<'a>(sh: &mut ShaderBuilder<'a>, src: &'a SourceImage) -> Result<(), BenchError> {
    let tex = sh.bind_texture(src.view());
    let smp = sh.bind_sampler(FilterMode::Linear);
    sh.push(format!(
        "color = textureSampleLevel({tex}, {smp}, pos / OUT_SIZE, 0.0);"
    ));
    sh.set_input();
    Ok(())
}

/// Four-tap separable filter built from four bilinear fetches. `WEIGHTS`
/// defines `w0..w3` for the taps at offsets -1, 0, 1 and 2 from `fe`.
const FOUR_TAP: &str = "\
fn sample_NAME(tex: texture_2d<f32>, smp: sampler, uv: vec2<f32>) -> vec4<f32> {
    let in_size = vec2<f32>(textureDimensions(tex));
    let pt = uv * in_size - 0.5;
    let fe = fract(pt);
    let base = pt - fe;
WEIGHTS
    let g0 = w0 + w1;
    let g1 = w2 + w3;
    let h0 = (base - 0.5 + w1 / g0) / in_size;
    let h1 = (base + 1.5 + w3 / g1) / in_size;
    let t00 = textureSampleLevel(tex, smp, h0, 0.0);
    let t10 = textureSampleLevel(tex, smp, vec2<f32>(h1.x, h0.y), 0.0);
    let t01 = textureSampleLevel(tex, smp, vec2<f32>(h0.x, h1.y), 0.0);
    let t11 = textureSampleLevel(tex, smp, h1, 0.0);
    let sum = g0.y * (g0.x * t00 + g1.x * t10) + g1.y * (g0.x * t01 + g1.x * t11);
    return sum / ((g0.x + g1.x) * (g0.y + g1.y));
}
";

const BICUBIC_WEIGHTS: &str = "\
    let w0 = (1.0 - fe) * (1.0 - fe) * (1.0 - fe) / 6.0;
    let w1 = (3.0 * fe * fe * fe - 6.0 * fe * fe + 4.0) / 6.0;
    let w2 = (-3.0 * fe * fe * fe + 3.0 * fe * fe + 3.0 * fe + 1.0) / 6.0;
    let w3 = fe * fe * fe / 6.0;";

// sigma = 0.5
const GAUSSIAN_WEIGHTS: &str = "\
    let w0 = exp(-2.0 * (1.0 + fe) * (1.0 + fe));
    let w1 = exp(-2.0 * fe * fe);
    let w2 = exp(-2.0 * (1.0 - fe) * (1.0 - fe));
    let w3 = exp(-2.0 * (2.0 - fe) * (2.0 - fe));";

fn four_tap<'a>(
    sh: &mut ShaderBuilder<'a>,
    src: &'a SourceImage,
    name: &str,
    weights: &str,
) -> Result<(), BenchError> {
    let tex = sh.bind_texture(src.view());
    let smp = sh.bind_sampler(FilterMode::Linear);
    sh.global(
        &FOUR_TAP
            .replace("NAME", name)
            .replace("WEIGHTS", weights),
    );
    sh.push(format!(
        "color = sample_{name}({tex}, {smp}, pos / OUT_SIZE);"
    ));
    sh.set_input();
    Ok(())
}

/// Cubic B-spline.
pub fn sample_bicubic<'a>(sh: &mut ShaderBuilder<'a>, src: &'a SourceImage) -> Result<(), BenchError> {
    four_tap(sh, src, "bicubic", BICUBIC_WEIGHTS)
}

pub fn sample_gaussian<'a>(sh: &mut ShaderBuilder<'a>, src: &'a SourceImage) -> Result<(), BenchError> {
    four_tap(sh, src, "gaussian", GAUSSIAN_WEIGHTS)
}

/// Smoothstep-shaped interpolation through a single bilinear fetch.
pub fn sample_hermite<'a>(sh: &mut ShaderBuilder<'a>, src: &'a SourceImage) -> Result<(), BenchError> {
    let tex = sh.bind_texture(src.view());
    let smp = sh.bind_sampler(FilterMode::Linear);
    sh.global(
        "\
fn sample_hermite(tex: texture_2d<f32>, smp: sampler, uv: vec2<f32>) -> vec4<f32> {
    let in_size = vec2<f32>(textureDimensions(tex));
    let pt = uv * in_size - 0.5;
    let fe = fract(pt);
    let w = fe * fe * (3.0 - 2.0 * fe);
    return textureSampleLevel(tex, smp, (pt - fe + w + 0.5) / in_size, 0.0);
}
",
    );
    sh.push(format!(
        "color = sample_hermite({tex}, {smp}, pos / OUT_SIZE);"
    ));
    sh.set_input();
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolarParams {
    /// Forces a fragment shader even on compute-capable devices.
    pub no_compute: bool,
}

/// Elliptical weighted average with a jinc-windowed jinc (EWA Lanczos).
pub fn sample_polar<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
    params: PolarParams,
) -> Result<(), BenchError> {
    if !matches!(state, EffectState::Polar { .. }) {
        let weights = ewa_lanczos_weights(POLAR_LUT_SIZE);
        *state = EffectState::Polar {
            lut: Lut::new(sh.context(), "EWA Lanczos LUT", POLAR_LUT_SIZE as u32, 1, &weights),
        };
    }
    let EffectState::Polar { lut } = state else {
        return Err(BenchError::Record("polar LUT state was not created".into()));
    };

    let tex = sh.bind_texture(src.view());
    let lut_tex = sh.bind_texture(lut.view());
    let lut_smp = sh.bind_sampler(FilterMode::Linear);
    sh.global(&format!(
        "\
const POLAR_RADIUS: f32 = {radius};
const POLAR_TAPS: i32 = {taps};
const POLAR_LUT_SIZE: f32 = {size};

fn sample_polar(tex: texture_2d<f32>, lut: texture_2d<f32>, lut_smp: sampler, uv: vec2<f32>) -> vec4<f32> {{
    let dims = vec2<i32>(textureDimensions(tex));
    let pt = uv * vec2<f32>(dims) - 0.5;
    let base = floor(pt);
    let fe = pt - base;
    var acc = vec4<f32>(0.0);
    var wsum = 0.0;
    for (var y = 1 - POLAR_TAPS; y <= POLAR_TAPS; y++) {{
        for (var x = 1 - POLAR_TAPS; x <= POLAR_TAPS; x++) {{
            let d = length(vec2<f32>(f32(x), f32(y)) - fe);
            if (d < POLAR_RADIUS) {{
                let c = (d / POLAR_RADIUS * (POLAR_LUT_SIZE - 1.0) + 0.5) / POLAR_LUT_SIZE;
                let w = textureSampleLevel(lut, lut_smp, vec2<f32>(c, 0.5), 0.0).r;
                let p = clamp(vec2<i32>(base) + vec2<i32>(x, y), vec2<i32>(0), dims - 1);
                acc += w * textureLoad(tex, p, 0);
                wsum += w;
            }}
        }}
    }}
    return acc / wsum;
}}
",
        radius = float(EWA_LANCZOS_RADIUS as f32),
        taps = EWA_LANCZOS_RADIUS.ceil() as i32,
        size = float(POLAR_LUT_SIZE as f32),
    ));
    sh.push(format!(
        "color = sample_polar({tex}, {lut_tex}, {lut_smp}, pos / OUT_SIZE);"
    ));
    if !params.no_compute {
        sh.prefer_compute();
    }
    sh.set_input();
    Ok(())
}

/// Bessel function of the first kind, order one (rational approximation).
pub(crate) fn bessel_j1(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 8.0 {
        let y = x * x;
        let num = x
            * (72362614232.0
                + y * (-7895059235.0
                    + y * (242396853.1
                        + y * (-2972611.439 + y * (15704.48260 + y * -30.16036606)))));
        let den = 144725228442.0
            + y * (2300535178.0
                + y * (18583304.74 + y * (99447.43394 + y * (376.9991397 + y))));
        num / den
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 2.356194491;
        let p = 1.0
            + y * (0.183105e-2
                + y * (-0.3516396496e-4 + y * (0.2457520174e-5 + y * -0.240337019e-6)));
        let q = 0.04687499995
            + y * (-0.2002690873e-3
                + y * (0.8449199096e-5 + y * (-0.88228987e-6 + y * 0.105787412e-6)));
        let ans = (0.636619772 / ax).sqrt() * (xx.cos() * p - z * xx.sin() * q);
        if x < 0.0 {
            -ans
        } else {
            ans
        }
    }
}

/// jinc(x) = 2 J1(pi x) / (pi x), normalised to 1 at the origin.
pub(crate) fn jinc(x: f64) -> f64 {
    if x.abs() < 1e-8 {
        return 1.0;
    }
    let px = PI * x;
    2.0 * bessel_j1(px) / px
}

/// Filter weights sampled uniformly over `[0, EWA_LANCZOS_RADIUS]`.
pub(crate) fn ewa_lanczos_weights(size: usize) -> Vec<f32> {
    let window = JINC_ZERO / EWA_LANCZOS_RADIUS;
    (0..size)
        .map(|i| {
            let r = i as f64 / (size - 1) as f64 * EWA_LANCZOS_RADIUS;
            (jinc(r) * jinc(r * window)) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jinc_zeros() {
        assert_eq!(jinc(0.0), 1.0);
        assert!(jinc(JINC_ZERO).abs() < 1e-6);
        assert!(jinc(EWA_LANCZOS_RADIUS).abs() < 1e-6);
        // the first side lobe is negative
        assert!(jinc(1.6) < 0.0);
    }

    #[test]
    fn bessel_j1_is_odd_and_continuous() {
        for x in [0.5, 2.0, 7.9, 8.1, 12.0] {
            assert_eq!(bessel_j1(-x), -bessel_j1(x));
        }
        assert!((bessel_j1(7.999_999) - bessel_j1(8.000_001)).abs() < 1e-5);
        assert!((bessel_j1(1.0) - 0.440_050_585_7).abs() < 1e-6);
    }

    #[test]
    fn ewa_weights_taper_to_zero() {
        let weights = ewa_lanczos_weights(POLAR_LUT_SIZE);
        assert_eq!(weights.len(), POLAR_LUT_SIZE);
        assert_eq!(weights[0], 1.0);
        assert!(weights[POLAR_LUT_SIZE - 1].abs() < 1e-6);
        assert!(weights.iter().any(|&w| w < 0.0));
        assert!(weights.iter().all(|&w| w <= 1.0));
    }
}
