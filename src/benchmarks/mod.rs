//! The fixed benchmark catalogue.

mod direct;
mod effects;
mod runner;

use crate::error::BenchError;
use crate::gpu::transfer::TransferBuffers;
use crate::gpu::{GpuContext, SourceImage, Target};
use crate::shaders::{EffectState, ShaderBuilder};

pub use runner::run_benchmark;

/// Records one shader pass sampling from the source image.
pub type ShaderEffect = for<'a> fn(
    &mut ShaderBuilder<'a>,
    &'a mut EffectState,
    &'a SourceImage,
) -> Result<(), BenchError>;

/// Operates on a render target directly, without a shader.
pub type DirectEffect =
    fn(&GpuContext, &Target, &mut TransferBuffers) -> Result<(), BenchError>;

#[derive(Clone, Copy)]
pub enum WorkloadKind {
    Shader(ShaderEffect),
    Direct(DirectEffect),
}

#[derive(Clone, Copy)]
pub struct WorkloadDescriptor {
    name: &'static str,
    kind: WorkloadKind,
    requires_compute: bool,
}

impl WorkloadDescriptor {
    const fn shader(name: &'static str, effect: ShaderEffect) -> Self {
        Self {
            name,
            kind: WorkloadKind::Shader(effect),
            requires_compute: false,
        }
    }

    const fn direct(name: &'static str, effect: DirectEffect) -> Self {
        Self {
            name,
            kind: WorkloadKind::Direct(effect),
            requires_compute: false,
        }
    }

    /// Only registered on devices with compute shaders.
    const fn compute_only(self) -> Self {
        Self {
            requires_compute: true,
            ..self
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> WorkloadKind {
        self.kind
    }

    pub fn requires_compute(&self) -> bool {
        self.requires_compute
    }
}

/// Every benchmark, in reporting order.
pub fn catalogue() -> Vec<WorkloadDescriptor> {
    use WorkloadDescriptor as W;
    vec![
        W::direct("tex_download ptr", direct::download),
        W::direct("tex_download ptr async", direct::download_async),
        W::direct("tex_upload ptr", direct::upload),
        W::direct("tex_upload ptr async", direct::upload_async),
        W::shader("bilinear", effects::bilinear),
        W::shader("bicubic", effects::bicubic),
        W::shader("hermite", effects::hermite),
        W::shader("gaussian", effects::gaussian),
        W::shader("deband", effects::deband),
        W::shader("deband_heavy", effects::deband_heavy),
        W::shader("weave", effects::weave),
        W::shader("bob", effects::bob),
        W::shader("yadif", effects::yadif),
        W::shader("polar", effects::polar),
        W::shader("polar_nocompute", effects::polar_nocompute).compute_only(),
        W::shader("dither_blue", effects::dither_blue),
        W::shader("dither_white", effects::dither_white),
        W::shader("dither_ordered_fixed", effects::dither_ordered_fixed),
        W::shader("hdr_peakdetect", effects::hdr_peakdetect).compute_only(),
        W::shader("hdr_peakdetect_hq", effects::hdr_peakdetect_hq).compute_only(),
        W::shader("hdr_lut", effects::hdr_lut),
        W::shader("hdr_clip", effects::hdr_clip),
        W::shader("av1_grain", effects::av1_grain),
        W::shader("av1_grain_lap", effects::av1_grain_lap),
        W::shader("h274_grain", effects::h274_grain),
        W::shader("reshape_poly", effects::reshape_poly),
        W::shader("reshape_mmr", effects::reshape_mmr),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let all = catalogue();
        let names: HashSet<_> = all.iter().map(WorkloadDescriptor::name).collect();
        assert_eq!(names.len(), all.len());
        assert_eq!(all.len(), 27);
    }

    #[test]
    fn transfers_run_first() {
        let all = catalogue();
        assert!(all[..4]
            .iter()
            .all(|w| matches!(w.kind(), WorkloadKind::Direct(_))));
        assert!(all[4..]
            .iter()
            .all(|w| matches!(w.kind(), WorkloadKind::Shader(_))));
        assert_eq!(all[0].name(), "tex_download ptr");
        assert_eq!(all[26].name(), "reshape_mmr");
    }

    #[test]
    fn compute_only_workloads() {
        let compute: Vec<_> = catalogue()
            .into_iter()
            .filter(WorkloadDescriptor::requires_compute)
            .map(|w| w.name())
            .collect();
        assert_eq!(
            compute,
            ["polar_nocompute", "hdr_peakdetect", "hdr_peakdetect_hq"]
        );
    }
}
