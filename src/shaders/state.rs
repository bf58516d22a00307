use half::f16;
use wgpu::util::{DeviceExt, TextureDataOrder};
use wgpu::*;

use super::dither::DitherMethod;
use super::tone_map::ToneMapFunction;
use crate::gpu::GpuContext;

/// Single-channel lookup table stored as an `R16Float` texture.
pub struct Lut {
    view: TextureView,
}

impl Lut {
    pub fn new(ctx: &GpuContext, label: &str, width: u32, height: u32, data: &[f32]) -> Self {
        let half: Vec<f16> = data.iter().map(|&v| f16::from_f32(v)).collect();
        let texture = ctx.device.create_texture_with_data(
            &ctx.queue,
            &TextureDescriptor {
                label: Some(label),
                size: Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TextureFormat::R16Float,
                usage: TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            bytemuck::cast_slice(&half),
        );
        Self {
            view: texture.create_view(&TextureViewDescriptor::default()),
        }
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }
}

/// Persistent per-run state an effect creates on first use.
///
/// A run owns exactly one of these and drops it when the run ends. An
/// effect that finds state of another kind, or built with different
/// parameters, replaces it.
#[derive(Default)]
pub enum EffectState {
    #[default]
    Empty,
    Dither {
        method: DitherMethod,
        matrix: Lut,
    },
    Polar {
        lut: Lut,
    },
    PeakDetect {
        buffer: Buffer,
        high_quality: bool,
    },
    ToneMap {
        function: ToneMapFunction,
        lut: Lut,
    },
    Av1Grain {
        grain: Lut,
        scaling: Lut,
    },
    H274Grain {
        database: Lut,
    },
}
