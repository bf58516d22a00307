//! Steady-state measurement loop.
//!
//! A run is split into three phases. A single priming iteration is followed
//! by a full device barrier so pipeline compilation and first allocations
//! happen outside the measured window. Warm-up iterations are then submitted
//! back to back through the [`FrameRing`] until the warm-up threshold has
//! passed, and finally the measurement phase repeats the same pattern with a
//! device timer attached to every iteration. Timer results are drained
//! opportunistically and never waited on.

mod ring;
mod timer;

#[cfg(test)]
pub(crate) mod sim;

use std::time::Duration;

use log::{debug, trace};

use crate::error::BenchError;

pub use ring::FrameRing;
pub use timer::TimerAggregator;

/// Poll timeout meaning "report the current state, never block".
pub const NO_WAIT: u64 = 0;

/// The device operations the measurement loop relies on.
pub trait Gpu {
    type Target;
    type Timer;

    /// Returns `true` while work previously submitted against `target` is
    /// still in flight after waiting at most `timeout` nanoseconds.
    fn poll(&self, target: &Self::Target, timeout: u64) -> Result<bool, BenchError>;
    /// Submits all recorded work without waiting for it.
    fn flush(&self);
    /// Submits all recorded work and blocks until the device is idle.
    fn finish(&self) -> Result<(), BenchError>;
    /// `None` when the device has no timer queries.
    fn create_timer(&self) -> Option<Self::Timer>;
    /// Next ready elapsed time in nanoseconds, or 0 when nothing is ready.
    fn query_timer(&self, timer: &mut Self::Timer) -> u64;
}

/// Monotonic clock used to delimit the phases.
pub trait Clock {
    type Instant: Copy;

    fn now(&self) -> Self::Instant;
    fn seconds_between(&self, earlier: Self::Instant, later: Self::Instant) -> f64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    type Instant = instant::Instant;

    fn now(&self) -> instant::Instant {
        instant::Instant::now()
    }

    fn seconds_between(&self, earlier: instant::Instant, later: instant::Instant) -> f64 {
        later.saturating_duration_since(earlier).as_secs_f64()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub warmup: Duration,
    pub test: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_millis(crate::config::WARMUP_MS),
            test: Duration::from_millis(crate::config::TEST_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub frames: u64,
    pub wall_seconds: f64,
    pub device_time_total: u64,
    pub device_samples: u64,
}

impl RunStatistics {
    pub fn frames_per_second(&self) -> f64 {
        self.frames as f64 / self.wall_seconds
    }

    pub fn ms_per_frame(&self) -> f64 {
        1000.0 * self.wall_seconds / self.frames as f64
    }

    /// Mean device time per timed frame in milliseconds.
    pub fn mean_device_ms(&self) -> Option<f64> {
        if self.device_samples == 0 {
            return None;
        }
        Some(1e-6 * self.device_time_total as f64 / self.device_samples as f64)
    }
}

enum Phase<I> {
    Warmup { start: I },
    Measure { start: I, baseline: u64 },
}

/// Runs one benchmark through priming, warm-up and measurement.
///
/// `iteration` records and submits one unit of work against the given ring
/// slot; it receives a timer only during the measurement phase. Any error
/// aborts the run and no statistics are produced.
pub fn measure<G, C, F>(
    gpu: &G,
    clock: &C,
    ring: &FrameRing<G::Target>,
    config: &LoopConfig,
    mut iteration: F,
) -> Result<RunStatistics, BenchError>
where
    G: Gpu,
    C: Clock,
    F: FnMut(&G, &G::Target, Option<&mut G::Timer>) -> Result<(), BenchError>,
{
    iteration(gpu, ring.acquire(gpu, 0)?, None)?;
    gpu.finish()?;

    let mut timer = gpu.create_timer();
    if timer.is_none() {
        debug!("No timer queries available, device time will be omitted");
    }
    let mut aggregator = TimerAggregator::default();
    let warmup = config.warmup.as_secs_f64();
    let test = config.test.as_secs_f64();

    let mut frames: u64 = 0;
    let mut phase = Phase::Warmup { start: clock.now() };
    let (start_test, baseline) = loop {
        let target = ring.acquire(gpu, frames)?;
        let timed = match phase {
            Phase::Measure { .. } => timer.as_mut(),
            Phase::Warmup { .. } => None,
        };
        iteration(gpu, target, timed)?;
        gpu.flush();
        frames += 1;

        let now = clock.now();
        match phase {
            Phase::Measure { start, baseline } => {
                if let Some(timer) = timer.as_mut() {
                    let drained = aggregator.drain(|| gpu.query_timer(timer));
                    trace!("Drained {drained} timer results after frame {frames}");
                }
                if clock.seconds_between(start, now) > test {
                    break (start, baseline);
                }
            }
            Phase::Warmup { start } => {
                if clock.seconds_between(start, now) > warmup {
                    debug!("Warm-up finished after {frames} frames");
                    phase = Phase::Measure {
                        start: now,
                        baseline: frames,
                    };
                }
            }
        }
    };

    // Queries submitted near the end only resolve once the device is idle.
    gpu.finish()?;
    let stop = clock.now();
    if let Some(timer) = timer.as_mut() {
        aggregator.drain(|| gpu.query_timer(timer));
    }

    let stats = RunStatistics {
        frames: frames - baseline,
        wall_seconds: clock.seconds_between(start_test, stop),
        device_time_total: aggregator.total_ns(),
        device_samples: aggregator.count(),
    };
    debug!(
        "Measured {} frames ({} warm-up) with {} device samples",
        stats.frames, baseline, stats.device_samples
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::sim::{SimClock, SimGpu, SimTarget};
    use super::*;

    fn config(warmup_ms: u64, test_ms: u64) -> LoopConfig {
        LoopConfig {
            warmup: Duration::from_millis(warmup_ms),
            test: Duration::from_millis(test_ms),
        }
    }

    fn ring(gpu: &SimGpu, capacity: usize) -> FrameRing<SimTarget> {
        FrameRing::new((0..capacity).map(|_| gpu.target()).collect()).unwrap()
    }

    #[test]
    fn warmup_frames_are_excluded() {
        let clock = SimClock::default();
        let gpu = SimGpu::new(&clock, 0, true);
        let ring = ring(&gpu, 16);
        let mut warmup_seen = 0u64;

        let stats = measure(&gpu, &clock, &ring, &config(500, 1000), |gpu, target, timer| {
            if timer.is_none() {
                warmup_seen += 1;
            }
            gpu.submit(target, timer, 0);
            clock.advance_ms(10);
            Ok(())
        })
        .unwrap();

        assert!((99..=101).contains(&stats.frames), "frames = {}", stats.frames);
        // the priming iteration is untimed as well
        let baseline = warmup_seen - 1;
        assert!((49..=52).contains(&baseline), "baseline = {baseline}");
        assert!((stats.wall_seconds - 1.0).abs() < 0.02);
    }

    #[test]
    fn direct_workload_is_bound_by_device_cost() {
        let clock = SimClock::default();
        let gpu = SimGpu::new(&clock, 5_000_000, true);
        let ring = ring(&gpu, 16);

        let stats = measure(&gpu, &clock, &ring, &config(500, 1000), |gpu, target, _timer| {
            // direct transfers carry no timer
            gpu.submit(target, None, 0);
            Ok(())
        })
        .unwrap();

        assert!((195..=205).contains(&stats.frames), "frames = {}", stats.frames);
        // the final barrier also waits for the frames still queued in the ring
        assert!((1.0..=1.1).contains(&stats.wall_seconds));
        let fps = stats.frames_per_second();
        assert!((180.0..=205.0).contains(&fps), "fps = {fps}");
        assert_eq!(stats.mean_device_ms(), None);
    }

    #[test]
    fn device_time_is_averaged_over_samples() {
        let clock = SimClock::default();
        let gpu = SimGpu::new(&clock, 2_000_000, true);
        let ring = ring(&gpu, 4);

        let stats = measure(&gpu, &clock, &ring, &config(50, 100), |gpu, target, timer| {
            gpu.submit(target, timer, 2_000_000);
            Ok(())
        })
        .unwrap();

        // every timed frame resolves by the final drain
        assert_eq!(stats.device_samples, stats.frames);
        let mean = stats.mean_device_ms().unwrap();
        assert!((mean - 2.0).abs() < 1e-9, "mean = {mean}");
    }

    #[test]
    fn missing_timer_support_still_reports_frames() {
        let clock = SimClock::default();
        let gpu = SimGpu::new(&clock, 1_000_000, false);
        let ring = ring(&gpu, 16);

        let stats = measure(&gpu, &clock, &ring, &config(20, 50), |gpu, target, timer| {
            assert!(timer.is_none());
            gpu.submit(target, timer, 1_000_000);
            clock.advance_ms(1);
            Ok(())
        })
        .unwrap();

        assert!(stats.frames > 0);
        assert!(stats.wall_seconds > 0.05);
        assert_eq!(stats.device_samples, 0);
        assert_eq!(stats.mean_device_ms(), None);
    }

    #[test]
    fn in_flight_frames_never_exceed_capacity() {
        for capacity in [1usize, 2, 3, 16] {
            let clock = SimClock::default();
            let gpu = SimGpu::new(&clock, 3_000_000, true);
            let ring = ring(&gpu, capacity);
            let mut submitted = 0u64;

            measure(&gpu, &clock, &ring, &config(20, 40), |gpu, target, timer| {
                let in_flight = gpu.in_flight();
                assert!(
                    in_flight < capacity,
                    "{in_flight} frames in flight with capacity {capacity}"
                );
                if submitted >= capacity as u64 {
                    assert!(gpu.is_complete(submitted - capacity as u64));
                }
                gpu.submit(target, timer, 0);
                submitted += 1;
                Ok(())
            })
            .unwrap();
        }
    }

    #[test]
    fn record_failure_aborts_without_statistics() {
        let clock = SimClock::default();
        let gpu = SimGpu::new(&clock, 0, true);
        let ring = ring(&gpu, 4);
        let mut calls = 0;

        let result = measure(&gpu, &clock, &ring, &config(10, 10), |gpu, target, timer| {
            calls += 1;
            if calls == 20 {
                return Err(BenchError::Record("bad shader".into()));
            }
            gpu.submit(target, timer, 0);
            clock.advance_ms(1);
            Ok(())
        });

        assert!(matches!(result, Err(BenchError::Record(_))));
        assert_eq!(calls, 20);
    }

    #[test]
    fn priming_failure_aborts_immediately() {
        let clock = SimClock::default();
        let gpu = SimGpu::new(&clock, 0, true);
        let ring = ring(&gpu, 4);

        let result = measure(&gpu, &clock, &ring, &config(10, 10), |_, _, _| {
            Err(BenchError::Record("unsupported".into()))
        });

        assert!(result.is_err());
        assert_eq!(gpu.submissions(), 0);
    }

    #[test]
    fn device_error_during_poll_is_fatal() {
        let clock = SimClock::default();
        let gpu = SimGpu::new(&clock, 1_000_000, true);
        let ring = ring(&gpu, 2);
        let mut frames = 0;

        let result = measure(&gpu, &clock, &ring, &config(100, 100), |gpu, target, timer| {
            frames += 1;
            if frames == 10 {
                gpu.fail("device lost");
            }
            gpu.submit(target, timer, 0);
            Ok(())
        });

        assert!(matches!(result, Err(BenchError::Device(_))));
        assert!(frames <= 11);
    }

    #[test]
    fn device_lost_while_measuring_yields_no_statistics() {
        let clock = SimClock::default();
        let gpu = SimGpu::new(&clock, 2_000_000, true);
        let ring = ring(&gpu, 8);
        let mut timed = 0;

        let result = measure(&gpu, &clock, &ring, &config(20, 1000), |gpu, target, timer| {
            if timer.is_some() {
                timed += 1;
                if timed == 5 {
                    gpu.lose("driver reset");
                }
            }
            gpu.submit(target, timer, 2_000_000);
            Ok(())
        });

        match result {
            Err(BenchError::Device(message)) => assert!(message.contains("driver reset")),
            other => panic!("unexpected {other:?}"),
        }
        // the ring would spin forever on work that never retires
        assert!(timed <= ring.capacity() as u64 + 5);
        assert!(gpu.finish().is_err());
    }

    #[test]
    fn statistics_derivations() {
        let stats = RunStatistics {
            frames: 200,
            wall_seconds: 1.0,
            device_time_total: 600_000_000,
            device_samples: 200,
        };
        assert_eq!(stats.frames_per_second(), 200.0);
        assert_eq!(stats.ms_per_frame(), 5.0);
        assert_eq!(stats.mean_device_ms(), Some(3.0));
    }
}
