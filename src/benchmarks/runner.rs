use log::{debug, info};

use super::{WorkloadDescriptor, WorkloadKind};
use crate::config::BenchConfig;
use crate::error::BenchError;
use crate::gpu::transfer::TransferBuffers;
use crate::gpu::{GpuContext, SourceImage, Target};
use crate::measure::{measure, FrameRing, Gpu, LoopConfig, RunStatistics, SystemClock};
use crate::shaders::{Dispatch, EffectState};

/// Runs a single workload against a fresh ring of render targets.
///
/// Everything the workload allocates (source image, pipelines, effect state,
/// transfer buffers) lives exactly as long as this call.
pub fn run_benchmark(
    ctx: &GpuContext,
    config: &BenchConfig,
    workload: &WorkloadDescriptor,
) -> Result<RunStatistics, BenchError> {
    if workload.requires_compute() && !ctx.supports_compute() {
        return Err(BenchError::ComputeUnsupported(workload.name()));
    }

    let targets = (0..config.num_tex)
        .map(|_| {
            let target = Target::new(ctx, config.width, config.height);
            ctx.clear(&target);
            target
        })
        .collect();
    let ring = FrameRing::new(targets)?;
    let loop_config = LoopConfig {
        warmup: config.warmup,
        test: config.test,
    };
    debug!(
        "Running '{}' on {} targets of {}x{}",
        workload.name(),
        ring.capacity(),
        config.width,
        config.height
    );

    let stats = match workload.kind() {
        WorkloadKind::Shader(effect) => {
            let source = SourceImage::new(ctx, config.width, config.height);
            ctx.finish()?;
            let mut dispatch = Dispatch::new();
            let mut state = EffectState::default();
            measure(ctx, &SystemClock, &ring, &loop_config, |ctx, target, timer| {
                let mut sh = dispatch.begin(ctx);
                effect(&mut sh, &mut state, &source)?;
                dispatch.finish(sh, target, timer)
            })?
        }
        WorkloadKind::Direct(operation) => {
            let mut buffers = TransferBuffers::new(config.width, config.height);
            ctx.finish()?;
            measure(ctx, &SystemClock, &ring, &loop_config, |ctx, target, _| {
                operation(ctx, target, &mut buffers)
            })?
        }
    };
    info!("'{}' finished with {} frames", workload.name(), stats.frames);
    Ok(stats)
}
