use log::trace;

use super::{Gpu, NO_WAIT};
use crate::error::BenchError;

/// Render targets used round-robin, bounding the frames in flight.
pub struct FrameRing<T> {
    slots: Vec<T>,
}

impl<T> FrameRing<T> {
    pub fn new(slots: Vec<T>) -> Result<Self, BenchError> {
        if slots.is_empty() {
            return Err(BenchError::Config("frame ring needs at least one slot".into()));
        }
        Ok(Self { slots })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the slot for `iteration` once the device is done with it.
    ///
    /// Spins on a non-blocking poll instead of sleeping so scheduler latency
    /// never leaks into the measurement.
    pub fn acquire<G>(&self, gpu: &G, iteration: u64) -> Result<&T, BenchError>
    where
        G: Gpu<Target = T>,
    {
        let index = (iteration % self.slots.len() as u64) as usize;
        let slot = &self.slots[index];
        let mut spins = 0u64;
        while gpu.poll(slot, NO_WAIT)? {
            spins += 1;
            std::hint::spin_loop();
        }
        if spins > 0 {
            trace!("Slot {index} became available after {spins} polls");
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::super::sim::{SimClock, SimGpu};
    use super::*;

    #[test]
    fn empty_ring_is_rejected() {
        assert!(FrameRing::<u32>::new(Vec::new()).is_err());
    }

    #[test]
    fn slots_wrap_around() {
        let clock = SimClock::default();
        let gpu = SimGpu::new(&clock, 0, false);
        let ring = FrameRing::new((0..3).map(|_| gpu.target()).collect()).unwrap();
        assert_eq!(ring.capacity(), 3);
        let first = ring.acquire(&gpu, 0).unwrap() as *const _;
        let again = ring.acquire(&gpu, 3).unwrap() as *const _;
        let second = ring.acquire(&gpu, 1).unwrap() as *const _;
        assert_eq!(first, again);
        assert_ne!(first, second);
    }

    #[test]
    fn acquire_waits_for_busy_slot() {
        let clock = SimClock::default();
        let gpu = SimGpu::new(&clock, 4_000_000, false);
        let ring = FrameRing::new(vec![gpu.target()]).unwrap();
        let slot = ring.acquire(&gpu, 0).unwrap();
        gpu.submit(slot, None, 0);
        assert_eq!(gpu.in_flight(), 1);

        ring.acquire(&gpu, 1).unwrap();
        assert_eq!(gpu.in_flight(), 0);
        assert!(clock.now_ns() >= 4_000_000);
    }
}
