use crate::error::BenchError;
use crate::gpu::SourceImage;
use crate::shaders::{
    self, color_map, deinterlace, detect_peak, dither, dovi_reshape, film_grain, sample_bicubic,
    sample_bilinear, sample_direct, sample_gaussian, sample_hermite, sample_polar,
    Av1GrainData, ColorMapParams, ColorSpace, DebandParams, DeinterlaceAlgorithm,
    DeinterlaceSource, DitherMethod, DoviMetadata, EffectState, Field, FilmGrainData,
    FilmGrainParams, PeakDetectParams, PolarParams, ShaderBuilder, ToneMapFunction,
    AV1_GRAIN_DATA, H274_GRAIN_DATA,
};

const DITHER_DEPTH: u32 = 8;

pub(super) fn bilinear<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    sample_bilinear(sh, src)
}

pub(super) fn bicubic<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    sample_bicubic(sh, src)
}

pub(super) fn hermite<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    sample_hermite(sh, src)
}

pub(super) fn gaussian<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    sample_gaussian(sh, src)
}

pub(super) fn deband<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    shaders::deband(sh, src, None)
}

pub(super) fn deband_heavy<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    shaders::deband(sh, src, Some(&DebandParams::HEAVY))
}

fn single_field<'a>(
    sh: &mut ShaderBuilder<'a>,
    src: &'a SourceImage,
    algorithm: DeinterlaceAlgorithm,
) -> Result<(), BenchError> {
    let source = DeinterlaceSource {
        prev: None,
        cur: src,
        next: None,
        field: Field::Top,
    };
    deinterlace(sh, &source, algorithm)
}

pub(super) fn weave<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    single_field(sh, src, DeinterlaceAlgorithm::Weave)
}

pub(super) fn bob<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    single_field(sh, src, DeinterlaceAlgorithm::Bob)
}

/// The source stands in for both temporal neighbours.
pub(super) fn yadif<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    let source = DeinterlaceSource {
        prev: Some(src),
        cur: src,
        next: Some(src),
        field: Field::Top,
    };
    deinterlace(sh, &source, DeinterlaceAlgorithm::Yadif)
}

pub(super) fn polar<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    sample_polar(sh, state, src, PolarParams::default())
}

pub(super) fn polar_nocompute<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    sample_polar(sh, state, src, PolarParams { no_compute: true })
}

fn dithered<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
    method: DitherMethod,
) -> Result<(), BenchError> {
    sample_direct(sh, src)?;
    dither(sh, DITHER_DEPTH, state, method)
}

pub(super) fn dither_blue<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    dithered(sh, state, src, DitherMethod::BlueNoise)
}

pub(super) fn dither_white<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    dithered(sh, state, src, DitherMethod::WhiteNoise)
}

pub(super) fn dither_ordered_fixed<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    dithered(sh, state, src, DitherMethod::OrderedFixed)
}

pub(super) fn hdr_peakdetect<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    sample_direct(sh, src)?;
    detect_peak(sh, ColorSpace::HDR10, state, &PeakDetectParams::DEFAULT)
}

pub(super) fn hdr_peakdetect_hq<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    sample_direct(sh, src)?;
    detect_peak(sh, ColorSpace::HDR10, state, &PeakDetectParams::HIGH_QUALITY)
}

fn tone_mapped<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
    function: ToneMapFunction,
) -> Result<(), BenchError> {
    sample_direct(sh, src)?;
    let params = ColorMapParams {
        tone_mapping_function: function,
    };
    color_map(sh, &params, ColorSpace::HDR10, ColorSpace::MONITOR, state)
}

pub(super) fn hdr_lut<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    tone_mapped(sh, state, src, ToneMapFunction::Bt2390)
}

pub(super) fn hdr_clip<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    tone_mapped(sh, state, src, ToneMapFunction::Clip)
}

/// Grain with a fresh seed on every frame.
fn grained<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
    data: FilmGrainData,
) -> Result<(), BenchError> {
    let params = FilmGrainParams {
        data,
        seed: rand::random(),
        tex: src,
    };
    film_grain(sh, state, &params)
}

pub(super) fn av1_grain<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    grained(sh, state, src, FilmGrainData::Av1(AV1_GRAIN_DATA))
}

pub(super) fn av1_grain_lap<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    let data = Av1GrainData {
        overlap: true,
        ..AV1_GRAIN_DATA
    };
    grained(sh, state, src, FilmGrainData::Av1(data))
}

pub(super) fn h274_grain<'a>(
    sh: &mut ShaderBuilder<'a>,
    state: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    grained(sh, state, src, FilmGrainData::H274(H274_GRAIN_DATA))
}

pub(super) fn reshape_poly<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    sample_direct(sh, src)?;
    dovi_reshape(sh, &DoviMetadata::POLY)
}

pub(super) fn reshape_mmr<'a>(
    sh: &mut ShaderBuilder<'a>,
    _: &'a mut EffectState,
    src: &'a SourceImage,
) -> Result<(), BenchError> {
    sample_direct(sh, src)?;
    dovi_reshape(sh, &DoviMetadata::MMR)
}
