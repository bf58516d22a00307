use wgpu::FilterMode;

use super::{ShaderBuilder, PCG_HASH};
use crate::error::BenchError;
use crate::gpu::SourceImage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebandParams {
    /// Number of sampling rounds, each at a growing radius.
    pub iterations: u32,
    /// Difference below which a pixel is replaced by its neighbourhood
    /// average, in units of 1/1000.
    pub threshold: f32,
    /// Sampling radius in source texels.
    pub radius: f32,
    /// Strength of the noise added afterwards, in units of 1/8192.
    pub grain: f32,
}

impl Default for DebandParams {
    fn default() -> Self {
        Self {
            iterations: 1,
            threshold: 3.0,
            radius: 16.0,
            grain: 4.0,
        }
    }
}

impl DebandParams {
    pub const HEAVY: Self = Self {
        iterations: 4,
        threshold: 4.0,
        radius: 4.0,
        grain: 16.0,
    };
}

const DEBAND: &str = "\
fn deband(tex: texture_2d<f32>, smp: sampler, pos: vec2<f32>, cfg: vec4<f32>) -> vec4<f32> {
    let uv = pos / OUT_SIZE;
    let texel = 1.0 / vec2<f32>(textureDimensions(tex));
    var res = textureSampleLevel(tex, smp, uv, 0.0);
    var h = pcg(pcg(u32(pos.x)) ^ u32(pos.y));
    let iterations = i32(cfg.x);
    for (var i = 1; i <= iterations; i++) {
        h = pcg(h);
        let dist = pcg_unorm(h) * f32(i) * cfg.z;
        h = pcg(h);
        let dir = pcg_unorm(h) * 6.2831853;
        let o = dist * vec2<f32>(cos(dir), sin(dir)) * texel;
        let avg = 0.25 * (textureSampleLevel(tex, smp, uv + o, 0.0)
            + textureSampleLevel(tex, smp, uv - o, 0.0)
            + textureSampleLevel(tex, smp, uv + vec2<f32>(-o.y, o.x), 0.0)
            + textureSampleLevel(tex, smp, uv + vec2<f32>(o.y, -o.x), 0.0));
        let diff = abs(res - avg);
        res = select(res, avg, diff < vec4<f32>(cfg.y / (1000.0 * f32(i))));
    }
    if (cfg.w > 0.0) {
        h = pcg(h);
        let noise = pcg_unorm(h) - 0.5;
        res = vec4<f32>(res.rgb + vec3<f32>(noise * cfg.w / 8192.0), res.a);
    }
    return res;
}
";

/// Smooths banding in flat areas of the source, then adds a little grain.
pub fn deband<'a>(
    sh: &mut ShaderBuilder<'a>,
    src: &'a SourceImage,
    params: Option<&DebandParams>,
) -> Result<(), BenchError> {
    let params = params.copied().unwrap_or_default();
    let tex = sh.bind_texture(src.view());
    let smp = sh.bind_sampler(FilterMode::Linear);
    let cfg = sh.param([
        params.iterations as f32,
        params.threshold,
        params.radius,
        params.grain,
    ]);
    sh.global(PCG_HASH);
    sh.global(DEBAND);
    sh.push(format!("color = deband({tex}, {smp}, pos, {cfg});"));
    sh.set_input();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let d = DebandParams::default();
        assert_eq!((d.iterations, d.threshold, d.radius, d.grain), (1, 3.0, 16.0, 4.0));
        let h = DebandParams::HEAVY;
        assert_eq!((h.iterations, h.threshold, h.radius, h.grain), (4, 4.0, 4.0, 16.0));
    }
}
