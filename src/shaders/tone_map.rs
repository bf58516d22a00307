use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{BufferUsages, FilterMode};

use super::{float, EffectState, Lut, ShaderBuilder};
use crate::error::BenchError;

const PQ_M1: f64 = 0.159_301_757_812_5;
const PQ_M2: f64 = 78.843_75;
const PQ_C1: f64 = 0.835_937_5;
const PQ_C2: f64 = 18.851_562_5;
const PQ_C3: f64 = 18.6875;
const PQ_PEAK: f64 = 10_000.0;
const TONE_MAP_LUT_SIZE: usize = 256;
const PEAK_HISTOGRAM_BINS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primaries {
    Bt709,
    Bt2020,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// SMPTE ST 2084.
    Pq,
    /// Pure power 2.2.
    Gamma22,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorSpace {
    pub primaries: Primaries,
    pub transfer: Transfer,
    /// Nominal peak brightness in cd/m².
    pub peak: f32,
}

impl ColorSpace {
    pub const HDR10: Self = Self {
        primaries: Primaries::Bt2020,
        transfer: Transfer::Pq,
        peak: PQ_PEAK as f32,
    };

    /// Typical SDR display.
    pub const MONITOR: Self = Self {
        primaries: Primaries::Bt709,
        transfer: Transfer::Gamma22,
        peak: 203.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToneMapFunction {
    /// ITU-R BT.2390 EETF.
    Bt2390,
    /// Hard clip at the target peak.
    Clip,
}

/// Tone curves are applied to each RGB channel independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMapParams {
    pub tone_mapping_function: ToneMapFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakDetectParams {
    /// Also accumulates a brightness histogram.
    pub high_quality: bool,
}

impl PeakDetectParams {
    pub const DEFAULT: Self = Self {
        high_quality: false,
    };
    pub const HIGH_QUALITY: Self = Self { high_quality: true };
}

pub(crate) fn pq_oetf(nits: f64) -> f64 {
    let y = (nits / PQ_PEAK).clamp(0.0, 1.0).powf(PQ_M1);
    ((PQ_C1 + PQ_C2 * y) / (1.0 + PQ_C3 * y)).powf(PQ_M2)
}

/// BT.2390 knee roll-off in the PQ domain, for a source reaching `src_max`
/// and a target reaching `dst_max` (both PQ encoded).
fn bt2390(e: f64, src_max: f64, dst_max: f64) -> f64 {
    let e1 = (e / src_max).min(1.0);
    let max_lum = dst_max / src_max;
    let ks = 1.5 * max_lum - 0.5;
    let e2 = if e1 < ks {
        e1
    } else {
        let t = (e1 - ks) / (1.0 - ks);
        let (t2, t3) = (t * t, t * t * t);
        (2.0 * t3 - 3.0 * t2 + 1.0) * ks
            + (t3 - 2.0 * t2 + t) * (1.0 - ks)
            + (-2.0 * t3 + 3.0 * t2) * max_lum
    };
    e2 * src_max
}

/// PQ-in, PQ-out tone curve sampled uniformly over `[0, 1]`.
pub(crate) fn tone_map_lut(
    function: ToneMapFunction,
    src_peak: f32,
    dst_peak: f32,
    size: usize,
) -> Vec<f32> {
    let src_max = pq_oetf(src_peak as f64);
    let dst_max = pq_oetf(dst_peak as f64);
    (0..size)
        .map(|i| {
            let e = i as f64 / (size - 1) as f64;
            let out = match function {
                ToneMapFunction::Clip => e.min(dst_max),
                ToneMapFunction::Bt2390 => bt2390(e, src_max, dst_max),
            };
            out as f32
        })
        .collect()
}

const PQ: &str = "\
const PQ_M1: f32 = 0.1593017578125;
const PQ_M2: f32 = 78.84375;
const PQ_C1: f32 = 0.8359375;
const PQ_C2: f32 = 18.8515625;
const PQ_C3: f32 = 18.6875;

fn pq_eotf(e: vec3<f32>) -> vec3<f32> {
    let ep = pow(clamp(e, vec3<f32>(0.0), vec3<f32>(1.0)), vec3<f32>(1.0 / PQ_M2));
    return 10000.0 * pow(max(ep - PQ_C1, vec3<f32>(0.0)) / (PQ_C2 - PQ_C3 * ep), vec3<f32>(1.0 / PQ_M1));
}

fn pq_oetf(nits: vec3<f32>) -> vec3<f32> {
    let y = pow(clamp(nits / 10000.0, vec3<f32>(0.0), vec3<f32>(1.0)), vec3<f32>(PQ_M1));
    return pow((PQ_C1 + PQ_C2 * y) / (1.0 + PQ_C3 * y), vec3<f32>(PQ_M2));
}
";

const TONE_MAP: &str = "\
fn tone_map(lut: texture_2d<f32>, smp: sampler, e: vec3<f32>) -> vec3<f32> {
    let n = f32(textureDimensions(lut).x);
    let c = (clamp(e, vec3<f32>(0.0), vec3<f32>(1.0)) * (n - 1.0) + 0.5) / n;
    return vec3<f32>(
        textureSampleLevel(lut, smp, vec2<f32>(c.r, 0.5), 0.0).r,
        textureSampleLevel(lut, smp, vec2<f32>(c.g, 0.5), 0.0).r,
        textureSampleLevel(lut, smp, vec2<f32>(c.b, 0.5), 0.0).r,
    );
}
";

// linear BT.2020 to linear BT.709, column major
const BT2020_TO_BT709: &str = "\
const BT2020_TO_BT709 = mat3x3<f32>(
    vec3<f32>(1.6605, -0.1246, -0.0182),
    vec3<f32>(-0.5876, 1.1329, -0.1006),
    vec3<f32>(-0.0728, -0.0083, 1.1187),
);
";

/// Converts `color` from `src` to `dst`, tone mapping through a cached LUT
/// when the source is brighter than the target.
pub fn color_map<'a>(
    sh: &mut ShaderBuilder<'a>,
    params: &ColorMapParams,
    src: ColorSpace,
    dst: ColorSpace,
    state: &'a mut EffectState,
) -> Result<(), BenchError> {
    sh.require_input("color mapping")?;
    sh.global(PQ);

    // linear light in cd/m²
    sh.push(match src.transfer {
        Transfer::Pq => "var rgb = pq_eotf(color.rgb);".to_owned(),
        Transfer::Gamma22 => format!(
            "var rgb = pow(max(color.rgb, vec3<f32>(0.0)), vec3<f32>(2.2)) * {};",
            float(src.peak)
        ),
    });

    if src.peak > dst.peak {
        let function = params.tone_mapping_function;
        let current = matches!(state, EffectState::ToneMap { function: f, .. } if *f == function);
        if !current {
            let curve = tone_map_lut(function, src.peak, dst.peak, TONE_MAP_LUT_SIZE);
            *state = EffectState::ToneMap {
                function,
                lut: Lut::new(sh.context(), "Tone Map LUT", TONE_MAP_LUT_SIZE as u32, 1, &curve),
            };
        }
        let EffectState::ToneMap { lut, .. } = state else {
            return Err(BenchError::Record("tone mapping state was not created".into()));
        };
        let tex = sh.bind_texture(lut.view());
        let smp = sh.bind_sampler(FilterMode::Linear);
        sh.global(TONE_MAP);
        sh.push(format!(
            "rgb = pq_eotf(tone_map({tex}, {smp}, pq_oetf(rgb)));"
        ));
    }

    if src.primaries != dst.primaries {
        match (src.primaries, dst.primaries) {
            (Primaries::Bt2020, Primaries::Bt709) => {
                sh.global(BT2020_TO_BT709);
                sh.push("rgb = BT2020_TO_BT709 * rgb;");
            }
            (from, to) => {
                return Err(BenchError::Record(format!(
                    "no gamut conversion from {from:?} to {to:?}"
                )))
            }
        }
    }

    sh.push(match dst.transfer {
        Transfer::Pq => "color = vec4<f32>(pq_oetf(rgb), color.a);".to_owned(),
        Transfer::Gamma22 => format!(
            "color = vec4<f32>(pow(clamp(rgb / {}, vec3<f32>(0.0), vec3<f32>(1.0)), vec3<f32>(1.0 / 2.2)), color.a);",
            float(dst.peak)
        ),
    });
    Ok(())
}

/// Accumulates the frame's brightness peak (and with `high_quality` a
/// histogram) into a persistent storage buffer. Needs compute shaders.
pub fn detect_peak<'a>(
    sh: &mut ShaderBuilder<'a>,
    csp: ColorSpace,
    state: &'a mut EffectState,
    params: &PeakDetectParams,
) -> Result<(), BenchError> {
    sh.require_input("peak detection")?;
    sh.require_compute("peak detection")?;

    let high_quality = params.high_quality;
    let current = matches!(state, EffectState::PeakDetect { high_quality: hq, .. } if *hq == high_quality);
    if !current {
        // max, sum and pixel count, one pad word, then the histogram
        let words = 4 + if high_quality { PEAK_HISTOGRAM_BINS } else { 0 };
        let buffer = sh.context().device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Peak Detection State"),
            contents: bytemuck::cast_slice(&vec![0u32; words]),
            usage: BufferUsages::STORAGE,
        });
        *state = EffectState::PeakDetect {
            buffer,
            high_quality,
        };
    }
    let EffectState::PeakDetect { buffer, .. } = state else {
        return Err(BenchError::Record("peak detection state was not created".into()));
    };

    let histogram = if high_quality {
        format!("    hist: array<atomic<u32>, {PEAK_HISTOGRAM_BINS}>,\n")
    } else {
        String::new()
    };
    sh.global(&format!(
        "struct PeakState {{\n    max_pq: atomic<u32>,\n    sum_pq: atomic<u32>,\n    \
         pixels: atomic<u32>,\n    pad: u32,\n{histogram}}}\n"
    ));
    let peak = sh.bind_storage(buffer, "PeakState");

    // the counters wrap; readers take differences between frames
    let signal = match csp.transfer {
        Transfer::Pq => "max(max(color.r, color.g), color.b)".to_owned(),
        Transfer::Gamma22 => format!(
            "pq_oetf(vec3<f32>(pow(max(max(max(color.r, color.g), color.b), 0.0), 2.2) * {})).r",
            float(csp.peak)
        ),
    };
    if csp.transfer != Transfer::Pq {
        sh.global(PQ);
    }
    let mut body = format!(
        "{{\n    let sig = clamp({signal}, 0.0, 1.0);\n    \
         atomicMax(&{peak}.max_pq, u32(sig * 65535.0));\n    \
         atomicAdd(&{peak}.sum_pq, u32(sig * 255.0));\n    \
         atomicAdd(&{peak}.pixels, 1u);\n"
    );
    if high_quality {
        body.push_str(&format!(
            "    atomicAdd(&{peak}.hist[min(u32(sig * {bins}.0), {last}u)], 1u);\n",
            bins = PEAK_HISTOGRAM_BINS,
            last = PEAK_HISTOGRAM_BINS - 1
        ));
    }
    body.push('}');
    sh.push(body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pq_eotf(e: f64) -> f64 {
        let ep = e.clamp(0.0, 1.0).powf(1.0 / PQ_M2);
        PQ_PEAK * ((ep - PQ_C1).max(0.0) / (PQ_C2 - PQ_C3 * ep)).powf(1.0 / PQ_M1)
    }

    #[test]
    fn pq_round_trips_reference_levels() {
        assert!(pq_oetf(0.0) < 1e-5);
        assert!((pq_oetf(10_000.0) - 1.0).abs() < 1e-12);
        // 100 cd/m² encodes to about 0.508
        assert!((pq_oetf(100.0) - 0.508).abs() < 1e-3);
        for nits in [0.5, 50.0, 203.0, 1000.0, 4000.0] {
            assert!((pq_eotf(pq_oetf(nits)) - nits).abs() / nits < 1e-6);
        }
    }

    #[test]
    fn clip_lut_saturates_at_target_peak() {
        let lut = tone_map_lut(ToneMapFunction::Clip, 10_000.0, 203.0, 256);
        let dst = pq_oetf(203.0) as f32;
        assert_eq!(lut[0], 0.0);
        assert_eq!(lut[255], dst);
        assert!((lut[10] - 10.0 / 255.0).abs() < 1e-7);
    }

    #[test]
    fn bt2390_lut_is_monotonic_with_linear_toe() {
        let lut = tone_map_lut(ToneMapFunction::Bt2390, 10_000.0, 203.0, 256);
        let dst = pq_oetf(203.0) as f32;
        assert!(lut.windows(2).all(|w| w[1] >= w[0]));
        assert!((lut[255] - dst).abs() < 1e-6);
        // below the knee the curve is the identity
        assert!((lut[20] - 20.0 / 255.0).abs() < 1e-7);
    }

    #[test]
    fn presets() {
        assert_eq!(ColorSpace::HDR10.transfer, Transfer::Pq);
        assert_eq!(ColorSpace::MONITOR.primaries, Primaries::Bt709);
        assert!(PeakDetectParams::HIGH_QUALITY.high_quality);
        assert!(!PeakDetectParams::DEFAULT.high_quality);
    }
}
