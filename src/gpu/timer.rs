use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::{trace, warn};
use wgpu::*;

use super::SubmitHook;

const TIMER_SLOTS: usize = 32;
const SLOT_STRIDE: BufferAddress = QUERY_RESOLVE_BUFFER_ALIGNMENT;
const READBACK_SIZE: BufferAddress = 2 * std::mem::size_of::<u64>() as BufferAddress;

const FREE: u8 = 0;
const RECORDED: u8 = 1;
const READY: u8 = 2;
const FAILED: u8 = 3;

struct TimerSlot {
    readback: Arc<Buffer>,
    state: Arc<AtomicU8>,
}

/// Timestamp queries around a pass, resolved into a ring of readback
/// buffers. Results come back in submission order.
pub struct GpuTimer {
    query_set: QuerySet,
    resolve: Buffer,
    slots: Vec<TimerSlot>,
    next: usize,
    order: VecDeque<usize>,
    period: f32,
}

impl GpuTimer {
    pub(super) fn new(device: &Device, queue: &Queue) -> Self {
        let query_set = device.create_query_set(&QuerySetDescriptor {
            label: Some("Frame Timer Queries"),
            ty: QueryType::Timestamp,
            count: 2 * TIMER_SLOTS as u32,
        });
        let resolve = device.create_buffer(&BufferDescriptor {
            label: Some("Frame Timer Resolve"),
            size: SLOT_STRIDE * TIMER_SLOTS as BufferAddress,
            usage: BufferUsages::QUERY_RESOLVE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let slots = (0..TIMER_SLOTS)
            .map(|_| TimerSlot {
                readback: Arc::new(device.create_buffer(&BufferDescriptor {
                    label: Some("Frame Timer Readback"),
                    size: READBACK_SIZE,
                    usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })),
                state: Arc::new(AtomicU8::new(FREE)),
            })
            .collect();
        Self {
            query_set,
            resolve,
            slots,
            next: 0,
            order: VecDeque::with_capacity(TIMER_SLOTS),
            period: queue.get_timestamp_period(),
        }
    }

    /// Claims the query pair for the next pass. Returns `None` while every
    /// pair still waits on its readback; that pass then goes untimed.
    pub(crate) fn begin(&mut self) -> Option<u32> {
        let index = self.next;
        if self.slots[index].state.load(Ordering::Acquire) != FREE {
            return None;
        }
        self.slots[index].state.store(RECORDED, Ordering::Release);
        self.next = (index + 1) % self.slots.len();
        self.order.push_back(index);
        Some(index as u32)
    }

    pub(crate) fn render_writes(&self, slot: u32) -> RenderPassTimestampWrites<'_> {
        RenderPassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(2 * slot),
            end_of_pass_write_index: Some(2 * slot + 1),
        }
    }

    pub(crate) fn compute_writes(&self, slot: u32) -> ComputePassTimestampWrites<'_> {
        ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(2 * slot),
            end_of_pass_write_index: Some(2 * slot + 1),
        }
    }

    /// Records the resolve of `slot` into its readback buffer.
    pub(crate) fn resolve(&self, encoder: &mut CommandEncoder, slot: u32) {
        let offset = SLOT_STRIDE * slot as BufferAddress;
        encoder.resolve_query_set(&self.query_set, 2 * slot..2 * slot + 2, &self.resolve, offset);
        encoder.copy_buffer_to_buffer(
            &self.resolve,
            offset,
            &self.slots[slot as usize].readback,
            0,
            READBACK_SIZE,
        );
    }

    /// Hook mapping the readback of `slot` once its copy has been submitted.
    pub(crate) fn map_after_submit(&self, slot: u32) -> SubmitHook {
        let entry = &self.slots[slot as usize];
        let readback = Arc::clone(&entry.readback);
        let state = Arc::clone(&entry.state);
        Box::new(move |_: &Queue| {
            readback.slice(..).map_async(MapMode::Read, move |result| {
                let next = if result.is_ok() { READY } else { FAILED };
                state.store(next, Ordering::Release);
            });
        })
    }

    /// Elapsed nanoseconds of the oldest timed pass, or 0 if it has not
    /// resolved yet.
    pub(crate) fn next_result(&mut self) -> u64 {
        while let Some(&index) = self.order.front() {
            let slot = &self.slots[index];
            match slot.state.load(Ordering::Acquire) {
                READY => {
                    let ns = {
                        let data = slot.readback.slice(..).get_mapped_range();
                        let start: u64 = bytemuck::pod_read_unaligned(&data[0..8]);
                        let end: u64 = bytemuck::pod_read_unaligned(&data[8..16]);
                        elapsed_ns(start, end, self.period)
                    };
                    slot.readback.unmap();
                    slot.state.store(FREE, Ordering::Release);
                    self.order.pop_front();
                    if ns > 0 {
                        return ns;
                    }
                    trace!("Timer slot {index} resolved to 0 ns, dropping sample");
                }
                FAILED => {
                    warn!("Timer readback {index} failed to map, dropping sample");
                    slot.state.store(FREE, Ordering::Release);
                    self.order.pop_front();
                }
                _ => return 0,
            }
        }
        0
    }
}

/// Nanoseconds between two raw timestamps. A counter that went backwards,
/// or a pass too short for the timestamp period, yields 0.
fn elapsed_ns(start: u64, end: u64, period: f32) -> u64 {
    (end.saturating_sub(start) as f64 * period as f64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_scale_by_timestamp_period() {
        assert_eq!(elapsed_ns(1_000, 3_500, 1.0), 2_500);
        assert_eq!(elapsed_ns(0, 1_000, 83.333), 83_333);
    }

    #[test]
    fn degenerate_timestamps_yield_no_sample() {
        assert_eq!(elapsed_ns(5_000, 5_000, 1.0), 0);
        assert_eq!(elapsed_ns(9_000, 4_000, 1.0), 0);
        assert_eq!(elapsed_ns(0, 1, 0.5), 0);
    }
}
