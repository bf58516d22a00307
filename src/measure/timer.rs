/// Running total of device-reported elapsed times.
///
/// The sum stays an exact integer; `RunStatistics` derives the mean from it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerAggregator {
    total_ns: u64,
    count: u64,
}

impl TimerAggregator {
    /// Consumes every result `next` has ready; `next` returns 0 once nothing
    /// is left. Returns the number of samples taken.
    pub fn drain(&mut self, mut next: impl FnMut() -> u64) -> u64 {
        let mut taken = 0;
        loop {
            let elapsed = next();
            if elapsed == 0 {
                break;
            }
            self.total_ns = self.total_ns.saturating_add(elapsed);
            self.count += 1;
            taken += 1;
        }
        taken
    }

    pub fn total_ns(&self) -> u64 {
        self.total_ns
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_drain_changes_nothing() {
        let mut agg = TimerAggregator::default();
        let mut calls = 0;
        assert_eq!(
            agg.drain(|| {
                calls += 1;
                0
            }),
            0
        );
        assert_eq!(calls, 1);
        assert_eq!(agg, TimerAggregator::default());
    }

    #[test]
    fn drains_all_ready_results_once() {
        let mut agg = TimerAggregator::default();
        let mut ready = vec![300u64, 100, 200];
        assert_eq!(agg.drain(|| ready.pop().unwrap_or(0)), 3);
        assert_eq!(agg.drain(|| ready.pop().unwrap_or(0)), 0);
        assert_eq!(agg.total_ns(), 600);
        assert_eq!(agg.count(), 3);
    }

    #[test]
    fn total_is_exact_over_many_samples() {
        let mut agg = TimerAggregator::default();
        let mut left = 10_000u32;
        agg.drain(|| {
            if left == 0 {
                return 0;
            }
            left -= 1;
            if left % 2 == 0 { 1_000_001 } else { 999_999 }
        });
        assert_eq!(agg.count(), 10_000);
        assert_eq!(agg.total_ns(), 10_000_000_000);
    }
}
