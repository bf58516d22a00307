//! WGSL effect library.
//!
//! Every effect appends to a [`ShaderBuilder`]: bindings, uniform parameters,
//! helper functions and statements operating on a running `color` value.
//! [`Dispatch`] turns the finished builder into a render or compute pipeline
//! and records it against a target.

mod deband;
mod deinterlace;
mod dispatch;
mod dither;
mod grain;
mod reshape;
mod sampling;
mod state;
mod tone_map;

use wgpu::{Buffer, FilterMode, TextureView};

use crate::error::BenchError;
use crate::gpu::GpuContext;

pub use deband::{deband, DebandParams};
pub use deinterlace::{deinterlace, DeinterlaceAlgorithm, DeinterlaceSource, Field};
pub use dispatch::Dispatch;
pub use dither::{dither, DitherMethod};
pub use grain::{
    film_grain, Av1GrainData, FilmGrainData, FilmGrainParams, H274GrainData, H274Interval,
    AV1_GRAIN_DATA, H274_GRAIN_DATA,
};
pub use reshape::{dovi_reshape, DoviMetadata, DoviReshapeComponent, ReshapeMethod};
pub use sampling::{
    sample_bicubic, sample_bilinear, sample_direct, sample_gaussian, sample_hermite,
    sample_polar, PolarParams,
};
pub use state::{EffectState, Lut};
pub use tone_map::{
    color_map, detect_peak, ColorMapParams, ColorSpace, PeakDetectParams, Primaries,
    ToneMapFunction, Transfer,
};

/// Integer hash used wherever an effect needs per-pixel noise.
pub(crate) const PCG_HASH: &str = "\
fn pcg(v: u32) -> u32 {
    let state = v * 747796405u + 2891336453u;
    let word = ((state >> ((state >> 28u) + 4u)) ^ state) * 277803737u;
    return (word >> 22u) ^ word;
}

fn pcg_unorm(v: u32) -> f32 {
    return f32(pcg(v)) / 4294967295.0;
}
";

pub(crate) const LUMA: &str = "\
fn luma(c: vec4<f32>) -> f32 {
    return dot(c.rgb, vec3<f32>(0.2126, 0.7152, 0.0722));
}
";

/// Formats `v` as a WGSL float literal.
pub(crate) fn float(v: f32) -> String {
    format!("{v:?}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ComputeMode {
    Never,
    Preferred,
    Required,
}

pub(crate) enum Resource<'a> {
    Texture(&'a TextureView),
    Sampler(FilterMode),
    Storage(&'a Buffer),
}

/// Device-independent half of a shader: everything needed to emit WGSL.
#[derive(Debug, Default)]
pub(crate) struct ShaderCode {
    bindings: Vec<String>,
    globals: Vec<String>,
    body: Vec<String>,
    params: Vec<[f32; 4]>,
    has_input: bool,
}

impl ShaderCode {
    fn declare(&mut self, prefix: &str, decl: impl FnOnce(usize, &str) -> String) -> String {
        let binding = self.bindings.len();
        let name = format!("{prefix}{binding}");
        self.bindings.push(decl(binding, &name));
        name
    }

    pub(crate) fn texture(&mut self) -> String {
        self.declare("tex", |b, name| {
            format!("@group(0) @binding({b}) var {name}: texture_2d<f32>;")
        })
    }

    pub(crate) fn sampler(&mut self) -> String {
        self.declare("smp", |b, name| format!("@group(0) @binding({b}) var {name}: sampler;"))
    }

    pub(crate) fn storage(&mut self, ty: &str) -> String {
        self.declare("buf", |b, name| {
            format!("@group(0) @binding({b}) var<storage, read_write> {name}: {ty};")
        })
    }

    /// Appends a uniform vector and returns the expression reading it.
    pub(crate) fn param(&mut self, value: [f32; 4]) -> String {
        let index = self.params.len();
        self.params.push(value);
        format!("params.data[{index}]")
    }

    /// Adds a module-scope item once, however often it is requested.
    pub(crate) fn global(&mut self, code: &str) {
        if !self.globals.iter().any(|g| g == code) {
            self.globals.push(code.to_owned());
        }
    }

    pub(crate) fn push(&mut self, statement: impl Into<String>) {
        self.body.push(statement.into());
    }

    pub(crate) fn params(&self) -> &[[f32; 4]] {
        &self.params
    }

    /// Parameter values as uploaded to the uniform buffer.
    pub(crate) fn uniform_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.params)
    }

    pub(crate) fn binding_count(&self) -> u32 {
        self.bindings.len() as u32
    }

    pub(crate) fn uniform_binding(&self) -> Option<u32> {
        (!self.params.is_empty()).then(|| self.binding_count())
    }

    pub(crate) fn output_binding(&self) -> u32 {
        self.binding_count() + self.uniform_binding().is_some() as u32
    }

    pub(crate) fn source(&self, width: u32, height: u32, compute: bool) -> String {
        let mut src = String::new();
        for decl in &self.bindings {
            src.push_str(decl);
            src.push('\n');
        }
        if let Some(binding) = self.uniform_binding() {
            src.push_str(&format!(
                "struct Params {{\n    data: array<vec4<f32>, {}>,\n}}\n\
                 @group(0) @binding({binding}) var<uniform> params: Params;\n",
                self.params.len()
            ));
        }
        if compute {
            src.push_str(&format!(
                "@group(0) @binding({}) var out_img: texture_storage_2d<rgba16float, write>;\n",
                self.output_binding()
            ));
        }
        src.push_str(&format!(
            "const OUT_SIZE = vec2<f32>({}, {});\n\n",
            float(width as f32),
            float(height as f32)
        ));
        for global in &self.globals {
            src.push_str(global);
            src.push('\n');
        }

        src.push_str("fn effect(pos: vec2<f32>) -> vec4<f32> {\n");
        src.push_str("    var color = vec4<f32>(0.0, 0.0, 0.0, 1.0);\n");
        for statement in &self.body {
            for line in statement.lines() {
                src.push_str("    ");
                src.push_str(line);
                src.push('\n');
            }
        }
        src.push_str("    return color;\n}\n\n");
        src.push_str(if compute { COMPUTE_ENTRY } else { RENDER_ENTRY });
        src
    }
}

const RENDER_ENTRY: &str = "\
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    return effect(frag.xy);
}
";

const COMPUTE_ENTRY: &str = "\
@compute @workgroup_size(8, 8)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (any(id.xy >= vec2<u32>(OUT_SIZE))) {
        return;
    }
    textureStore(out_img, id.xy, effect(vec2<f32>(id.xy) + 0.5));
}
";

/// Accumulates one shader for a single dispatch.
pub struct ShaderBuilder<'a> {
    ctx: &'a GpuContext,
    code: ShaderCode,
    resources: Vec<Resource<'a>>,
    mode: ComputeMode,
}

impl<'a> ShaderBuilder<'a> {
    pub fn new(ctx: &'a GpuContext) -> Self {
        Self {
            ctx,
            code: ShaderCode::default(),
            resources: Vec::new(),
            mode: ComputeMode::Never,
        }
    }

    pub fn context(&self) -> &'a GpuContext {
        self.ctx
    }

    pub fn bind_texture(&mut self, view: &'a TextureView) -> String {
        self.resources.push(Resource::Texture(view));
        self.code.texture()
    }

    pub fn bind_sampler(&mut self, filter: FilterMode) -> String {
        self.resources.push(Resource::Sampler(filter));
        self.code.sampler()
    }

    /// Binds a read-write storage buffer of WGSL type `ty`.
    pub fn bind_storage(&mut self, buffer: &'a Buffer, ty: &str) -> String {
        self.resources.push(Resource::Storage(buffer));
        self.code.storage(ty)
    }

    pub fn param(&mut self, value: [f32; 4]) -> String {
        self.code.param(value)
    }

    pub fn global(&mut self, code: &str) {
        self.code.global(code);
    }

    pub fn push(&mut self, statement: impl Into<String>) {
        self.code.push(statement);
    }

    /// Records that `color` now holds a sampled value.
    pub fn set_input(&mut self) {
        self.code.has_input = true;
    }

    /// Fails for stages that transform `color` when nothing produced it.
    pub fn require_input(&self, stage: &str) -> Result<(), BenchError> {
        if self.code.has_input {
            Ok(())
        } else {
            Err(BenchError::Record(format!("{stage} needs a sampled input")))
        }
    }

    /// Runs the shader as a compute pass when the device and target allow it.
    pub fn prefer_compute(&mut self) {
        if self.mode == ComputeMode::Never {
            self.mode = ComputeMode::Preferred;
        }
    }

    pub fn require_compute(&mut self, stage: &'static str) -> Result<(), BenchError> {
        if !self.ctx.supports_compute() {
            return Err(BenchError::ComputeUnsupported(stage));
        }
        self.mode = ComputeMode::Required;
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (&'a GpuContext, ShaderCode, Vec<Resource<'a>>, ComputeMode) {
        (self.ctx, self.code, self.resources, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_are_numbered_in_order() {
        let mut code = ShaderCode::default();
        assert_eq!(code.texture(), "tex0");
        assert_eq!(code.sampler(), "smp1");
        assert_eq!(code.storage("Peak"), "buf2");
        assert_eq!(code.uniform_binding(), None);
        assert_eq!(code.output_binding(), 3);

        assert_eq!(code.param([1.0, 2.0, 3.0, 4.0]), "params.data[0]");
        assert_eq!(code.param([0.0; 4]), "params.data[1]");
        assert_eq!(code.uniform_binding(), Some(3));
        assert_eq!(code.output_binding(), 4);
        assert_eq!(code.params().len(), 2);
    }

    #[test]
    fn parameter_values_do_not_change_source_or_uniform_size() {
        let build = |scale: f32| {
            let mut code = ShaderCode::default();
            let tex = code.texture();
            let smp = code.sampler();
            let p = code.param([scale, 1.0 - scale, 0.0, 1.0]);
            let q = code.param([scale * 2.0; 4]);
            code.push(format!(
                "color = textureSampleLevel({tex}, {smp}, pos / OUT_SIZE, 0.0) * {p}.x + {q};"
            ));
            code
        };
        let first = build(0.25);
        let second = build(0.75);
        assert_eq!(first.source(64, 64, false), second.source(64, 64, false));
        assert_eq!(first.uniform_bytes().len(), 32);
        assert_eq!(second.uniform_bytes().len(), first.uniform_bytes().len());
        assert_ne!(first.uniform_bytes(), second.uniform_bytes());
        assert_eq!(&second.uniform_bytes()[..4], &0.75f32.to_ne_bytes());
    }

    #[test]
    fn globals_are_deduplicated() {
        let mut code = ShaderCode::default();
        code.global(PCG_HASH);
        code.global(LUMA);
        code.global(PCG_HASH);
        let src = code.source(4, 4, false);
        assert_eq!(src.matches("fn pcg(").count(), 1);
        assert_eq!(src.matches("fn luma(").count(), 1);
    }

    #[test]
    fn render_source_layout() {
        let mut code = ShaderCode::default();
        let tex = code.texture();
        let smp = code.sampler();
        let p = code.param([0.5; 4]);
        code.push(format!(
            "color = textureSampleLevel({tex}, {smp}, pos / OUT_SIZE, 0.0) * {p}.x;"
        ));
        let src = code.source(1920, 1080, false);

        assert!(src.contains("@group(0) @binding(0) var tex0: texture_2d<f32>;"));
        assert!(src.contains("@group(0) @binding(1) var smp1: sampler;"));
        assert!(src.contains("data: array<vec4<f32>, 1>,"));
        assert!(src.contains("@group(0) @binding(2) var<uniform> params: Params;"));
        assert!(src.contains("const OUT_SIZE = vec2<f32>(1920.0, 1080.0);"));
        assert!(src.contains("    color = textureSampleLevel(tex0, smp1, pos / OUT_SIZE, 0.0) * params.data[0].x;"));
        assert!(src.contains("fn fs_main("));
        assert!(!src.contains("out_img"));
        // the body runs before the entry points
        assert!(src.find("fn effect(").unwrap() < src.find("fn vs_main(").unwrap());
    }

    #[test]
    fn compute_source_writes_storage_output() {
        let mut code = ShaderCode::default();
        code.texture();
        let src = code.source(64, 32, true);
        assert!(src.contains(
            "@group(0) @binding(1) var out_img: texture_storage_2d<rgba16float, write>;"
        ));
        assert!(src.contains("@compute @workgroup_size(8, 8)"));
        assert!(!src.contains("fn fs_main("));
    }

    #[test]
    fn multi_line_statements_are_indented() {
        let mut code = ShaderCode::default();
        code.push("{\n    color.r = 1.0;\n}");
        let src = code.source(1, 1, false);
        assert!(src.contains("    {\n        color.r = 1.0;\n    }\n"));
    }

    #[test]
    fn float_literals_are_valid_wgsl() {
        assert_eq!(float(1920.0), "1920.0");
        assert_eq!(float(0.25), "0.25");
        assert_eq!(float(-3.0), "-3.0");
    }
}
