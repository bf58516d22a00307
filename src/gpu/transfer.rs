//! Texture uploads and downloads through a run-scoped host buffer.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use log::{trace, warn};
use wgpu::*;

use super::{GpuContext, Target, BYTES_PER_PIXEL};
use crate::error::BenchError;
use crate::measure::Gpu;

pub const PAGE_SIZE: usize = 4096;

/// Notification fired once an asynchronous transfer has completed.
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

#[repr(C, align(4096))]
#[derive(Clone, Copy)]
struct Page([u8; PAGE_SIZE]);

// SAFETY: a page is a plain byte array whose size equals its alignment, so
// it has no padding and every bit pattern is valid.
unsafe impl Zeroable for Page {}
unsafe impl Pod for Page {}

/// Page-aligned host memory of a fixed length.
pub struct HostBuffer {
    pages: Vec<Page>,
    len: usize,
}

impl HostBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            pages: vec![Page([0; PAGE_SIZE]); len.div_ceil(PAGE_SIZE)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.pages)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.pages)[..self.len]
    }
}

const IDLE: u8 = 0;
const PENDING: u8 = 1;
const MAPPED: u8 = 2;
const FAILED: u8 = 3;

struct Staging {
    buffer: Arc<Buffer>,
    state: Arc<AtomicU8>,
}

/// Host buffer plus the staging buffers downloads land in.
pub struct TransferBuffers {
    host: HostBuffer,
    layout: RowLayout,
    staging: Vec<Staging>,
}

/// Row pitch of a tightly packed host image versus a GPU copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowLayout {
    pub row_bytes: u32,
    pub padded_row_bytes: u32,
    pub rows: u32,
}

impl RowLayout {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        let row_bytes = width * BYTES_PER_PIXEL;
        let align = COPY_BYTES_PER_ROW_ALIGNMENT;
        Self {
            row_bytes,
            padded_row_bytes: row_bytes.div_ceil(align) * align,
            rows: height,
        }
    }

    pub(crate) fn host_size(&self) -> usize {
        self.row_bytes as usize * self.rows as usize
    }

    pub(crate) fn padded_size(&self) -> BufferAddress {
        self.padded_row_bytes as BufferAddress * self.rows as BufferAddress
    }

    /// Copies padded GPU rows into a tightly packed host image.
    pub(crate) fn unpad(&self, src: &[u8], dst: &mut [u8]) {
        let row = self.row_bytes as usize;
        for (src_row, dst_row) in src
            .chunks(self.padded_row_bytes as usize)
            .zip(dst.chunks_mut(row))
            .take(self.rows as usize)
        {
            dst_row.copy_from_slice(&src_row[..row]);
        }
    }
}

impl TransferBuffers {
    pub fn new(width: u32, height: u32) -> Self {
        let layout = RowLayout::new(width, height);
        Self {
            host: HostBuffer::new(layout.host_size()),
            layout,
            staging: Vec::new(),
        }
    }

    /// Finishes downloads whose mapping completed and returns an idle
    /// staging buffer, creating one when all are still in flight.
    fn claim(&mut self, device: &Device) -> Result<usize, BenchError> {
        let mut idle = None;
        for (index, staging) in self.staging.iter().enumerate() {
            match staging.state.load(Ordering::Acquire) {
                MAPPED => {
                    {
                        let data = staging.buffer.slice(..).get_mapped_range();
                        self.layout.unpad(&data, self.host.as_bytes_mut());
                    }
                    staging.buffer.unmap();
                    staging.state.store(IDLE, Ordering::Release);
                }
                FAILED => {
                    return Err(BenchError::Transfer("staging buffer failed to map".into()));
                }
                PENDING => continue,
                _ => {}
            }
            idle.get_or_insert(index);
        }
        if let Some(index) = idle {
            return Ok(index);
        }

        trace!("Allocating staging buffer {}", self.staging.len());
        self.staging.push(Staging {
            buffer: Arc::new(device.create_buffer(&BufferDescriptor {
                label: Some("Download Staging"),
                size: self.layout.padded_size(),
                usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })),
            state: Arc::new(AtomicU8::new(IDLE)),
        });
        Ok(self.staging.len() - 1)
    }
}

fn check_size(target: &Target, buffers: &TransferBuffers) -> Result<(), BenchError> {
    let size = target.size();
    if RowLayout::new(size.width, size.height) != buffers.layout {
        return Err(BenchError::Transfer(format!(
            "host buffer does not match a {}x{} target",
            size.width, size.height
        )));
    }
    Ok(())
}

/// Writes the host buffer into `target`. With `done`, the notification
/// fires once the queue has retired the write.
pub fn upload(
    ctx: &GpuContext,
    target: &Target,
    buffers: &mut TransferBuffers,
    done: Option<Completion>,
) -> Result<(), BenchError> {
    check_size(target, buffers)?;
    let layout = buffers.layout;
    ctx.queue.write_texture(
        TexelCopyTextureInfo {
            texture: target.texture(),
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        },
        buffers.host.as_bytes(),
        TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(layout.row_bytes),
            rows_per_image: Some(layout.rows),
        },
        target.size(),
    );
    ctx.touch(target);

    // write_texture copies the data before returning
    if let Some(done) = done {
        ctx.after_submit(Box::new(move |queue: &Queue| queue.on_submitted_work_done(done)));
    }
    Ok(())
}

/// Reads `target` back into the host buffer.
///
/// Without `done` the call blocks until the data has landed. With `done`
/// the copy is left in flight and its data is moved into the host buffer
/// when the staging buffer is next recycled.
pub fn download(
    ctx: &GpuContext,
    target: &Target,
    buffers: &mut TransferBuffers,
    done: Option<Completion>,
) -> Result<(), BenchError> {
    check_size(target, buffers)?;
    let index = buffers.claim(&ctx.device)?;
    let layout = buffers.layout;
    let staging = &buffers.staging[index];

    let mut encoder = ctx.device.create_command_encoder(&CommandEncoderDescriptor {
        label: Some("Download Encoder"),
    });
    encoder.copy_texture_to_buffer(
        TexelCopyTextureInfo {
            texture: target.texture(),
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        },
        TexelCopyBufferInfo {
            buffer: &staging.buffer,
            layout: TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(layout.padded_row_bytes),
                rows_per_image: Some(layout.rows),
            },
        },
        target.size(),
    );
    ctx.enqueue(encoder.finish(), target);

    if let Some(done) = done {
        staging.state.store(PENDING, Ordering::Release);
        let buffer = Arc::clone(&staging.buffer);
        let state = Arc::clone(&staging.state);
        ctx.after_submit(Box::new(move |_: &Queue| {
            buffer.slice(..).map_async(MapMode::Read, move |result| {
                match result {
                    Ok(()) => state.store(MAPPED, Ordering::Release),
                    Err(err) => {
                        warn!("Asynchronous download failed: {err}");
                        state.store(FAILED, Ordering::Release);
                    }
                }
                done();
            });
        }));
        return Ok(());
    }

    ctx.flush();
    let slice = staging.buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    slice.map_async(MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    let _ = ctx.device.poll(Maintain::Wait);
    match pollster::block_on(receiver.receive()) {
        Some(Ok(())) => {
            {
                let data = slice.get_mapped_range();
                layout.unpad(&data, buffers.host.as_bytes_mut());
            }
            staging.buffer.unmap();
            ctx.check_errors()
        }
        Some(Err(err)) => Err(BenchError::Transfer(err.to_string())),
        None => Err(BenchError::Transfer("download mapping was dropped".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_buffer_is_page_aligned() {
        let mut host = HostBuffer::new(3 * PAGE_SIZE + 17);
        assert_eq!(host.len(), 3 * PAGE_SIZE + 17);
        assert_eq!(host.as_bytes().as_ptr() as usize % PAGE_SIZE, 0);
        assert!(host.as_bytes().iter().all(|&b| b == 0));
        host.as_bytes_mut()[PAGE_SIZE] = 7;
        assert_eq!(host.as_bytes()[PAGE_SIZE], 7);
        assert!(HostBuffer::new(0).is_empty());
    }

    #[test]
    fn row_layout_pads_to_copy_alignment() {
        let layout = RowLayout::new(1920, 1080);
        assert_eq!(layout.row_bytes, 15360);
        assert_eq!(layout.padded_row_bytes, 15360);
        assert_eq!(layout.host_size(), 1920 * 1080 * 8);

        let odd = RowLayout::new(33, 2);
        assert_eq!(odd.row_bytes, 264);
        assert_eq!(odd.padded_row_bytes, 512);
        assert_eq!(odd.padded_size(), 1024);
    }

    #[test]
    fn unpad_drops_row_padding() {
        let layout = RowLayout::new(33, 3);
        let mut src = vec![0xffu8; layout.padded_size() as usize];
        for (row, chunk) in src.chunks_mut(512).enumerate() {
            chunk[..264].fill(row as u8);
        }
        let mut dst = vec![0u8; layout.host_size()];
        layout.unpad(&src, &mut dst);
        for (row, chunk) in dst.chunks(264).enumerate() {
            assert!(chunk.iter().all(|&b| b == row as u8));
        }
    }
}
