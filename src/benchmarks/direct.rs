use log::trace;

use crate::error::BenchError;
use crate::gpu::transfer::{self, Completion, TransferBuffers};
use crate::gpu::{GpuContext, Target};

fn transfer_done() -> Completion {
    Box::new(|| trace!("Asynchronous transfer retired"))
}

pub(super) fn download(
    ctx: &GpuContext,
    target: &Target,
    buffers: &mut TransferBuffers,
) -> Result<(), BenchError> {
    transfer::download(ctx, target, buffers, None)
}

pub(super) fn download_async(
    ctx: &GpuContext,
    target: &Target,
    buffers: &mut TransferBuffers,
) -> Result<(), BenchError> {
    transfer::download(ctx, target, buffers, Some(transfer_done()))
}

pub(super) fn upload(
    ctx: &GpuContext,
    target: &Target,
    buffers: &mut TransferBuffers,
) -> Result<(), BenchError> {
    transfer::upload(ctx, target, buffers, None)
}

pub(super) fn upload_async(
    ctx: &GpuContext,
    target: &Target,
    buffers: &mut TransferBuffers,
) -> Result<(), BenchError> {
    transfer::upload(ctx, target, buffers, Some(transfer_done()))
}
