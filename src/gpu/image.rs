use std::f32::consts::PI;

use half::f16;
use wgpu::util::{DeviceExt, TextureDataOrder};
use wgpu::*;

use super::{GpuContext, TARGET_FORMAT};

const COMPS: usize = 4;
const INV_PHI: f32 = 0.618_033_988_749_89;

/// Concentric sine rings with a different frequency per channel, as
/// interleaved RGBA half floats.
pub fn test_pattern(width: u32, height: u32) -> Vec<f16> {
    let xc = (width as f32 - 1.0) / 2.0;
    let yc = (height as f32 - 1.0) / 2.0;
    let kf = 0.5 / (xc * xc + yc * yc).sqrt();
    let freq_r = kf * PI * 0.2;
    let freq_g = freq_r * INV_PHI;
    let freq_b = freq_g * INV_PHI;
    let freqs = [freq_r, freq_g, freq_b];

    let mut data = vec![f16::ZERO; width as usize * height as usize * COMPS];
    for (i, color) in data.chunks_exact_mut(COMPS).enumerate() {
        let x = (i % width as usize) as f32;
        let y = (i / width as usize) as f32;
        let (xx, yy) = (x - xc, y - yc);
        let r2 = xx * xx + yy * yy;
        for (c, value) in color.iter_mut().enumerate() {
            *value = match freqs.get(c) {
                Some(freq) => f16::from_f32(0.5 * (freq * r2).sin() + 0.5),
                None => f16::ONE,
            };
        }
    }
    data
}

/// Immutable source texture shared by every iteration of a run.
pub struct SourceImage {
    texture: Texture,
    view: TextureView,
}

impl SourceImage {
    pub fn new(ctx: &GpuContext, width: u32, height: u32) -> Self {
        let pixels = test_pattern(width, height);
        let texture = ctx.device.create_texture_with_data(
            &ctx.queue,
            &TextureDescriptor {
                label: Some("Test Image"),
                size: Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            bytemuck::cast_slice(&pixels),
        );
        let view = texture.create_view(&TextureViewDescriptor::default());
        Self { texture, view }
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }

    pub fn size(&self) -> Extent3d {
        self.texture.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_is_centred_and_opaque() {
        let (w, h) = (65, 33);
        let data = test_pattern(w, h);
        assert_eq!(data.len(), (w * h) as usize * COMPS);

        // sin(0) at the exact centre
        let centre = ((h / 2) * w + w / 2) as usize * COMPS;
        for c in 0..3 {
            assert_eq!(data[centre + c].to_f32(), 0.5);
        }
        assert!(data.chunks(COMPS).all(|px| px[3] == f16::ONE));
        assert!(data
            .iter()
            .all(|v| (0.0..=1.0).contains(&v.to_f32())));
    }

    #[test]
    fn pattern_is_radially_symmetric() {
        let (w, h) = (41, 21);
        let data = test_pattern(w, h);
        let at = |x: u32, y: u32, c: usize| data[(y * w + x) as usize * COMPS + c];
        for c in 0..3 {
            assert_eq!(at(3, 4, c), at(w - 4, h - 5, c));
            assert_eq!(at(0, 0, c), at(w - 1, 0, c));
        }
    }
}
