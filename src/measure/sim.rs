//! Simulated device and clock for exercising the measurement loop.
//!
//! The device executes submissions serially, each taking a fixed cost, and
//! busy polls advance the shared clock by [`POLL_STEP_NS`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::{Clock, Gpu};
use crate::error::BenchError;

const POLL_STEP_NS: u64 = 50_000;

#[derive(Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<u64>>,
}

impl SimClock {
    pub fn now_ns(&self) -> u64 {
        self.now.get()
    }

    pub fn advance_ns(&self, ns: u64) {
        self.now.set(self.now.get() + ns);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_ns(ms * 1_000_000);
    }

    fn advance_to(&self, ns: u64) {
        if ns > self.now.get() {
            self.now.set(ns);
        }
    }
}

impl Clock for SimClock {
    type Instant = u64;

    fn now(&self) -> u64 {
        self.now_ns()
    }

    fn seconds_between(&self, earlier: u64, later: u64) -> f64 {
        later.saturating_sub(earlier) as f64 / 1e9
    }
}

#[derive(Default)]
pub struct SimTarget {
    last_submission: Cell<Option<usize>>,
}

pub struct SimTimer;

#[derive(Default)]
struct SimState {
    completions: Vec<u64>,
    busy_until: u64,
    samples: VecDeque<(u64, u64)>,
    error: Option<String>,
}

pub struct SimGpu {
    clock: SimClock,
    cost_ns: u64,
    timers: bool,
    state: RefCell<SimState>,
}

impl SimGpu {
    pub fn new(clock: &SimClock, cost_ns: u64, timers: bool) -> Self {
        Self {
            clock: clock.clone(),
            cost_ns,
            timers,
            state: RefCell::new(SimState::default()),
        }
    }

    pub fn target(&self) -> SimTarget {
        SimTarget::default()
    }

    /// Queues one unit of device work against `target`. A non-zero
    /// `sample_ns` is reported through the timer once the work completes.
    pub fn submit(&self, target: &SimTarget, timer: Option<&mut SimTimer>, sample_ns: u64) {
        let mut state = self.state.borrow_mut();
        let done = state
            .busy_until
            .max(self.clock.now_ns())
            .saturating_add(self.cost_ns);
        state.busy_until = done;
        state.completions.push(done);
        target
            .last_submission
            .set(Some(state.completions.len() - 1));
        if timer.is_some() && sample_ns > 0 {
            state.samples.push_back((done, sample_ns));
        }
    }

    pub fn fail(&self, message: &str) {
        self.state.borrow_mut().error = Some(message.to_owned());
    }

    /// Queued work never completes and every later poll or finish fails.
    pub fn lose(&self, message: &str) {
        let now = self.clock.now_ns();
        let mut state = self.state.borrow_mut();
        for done in state.completions.iter_mut().filter(|done| **done > now) {
            *done = u64::MAX;
        }
        state.busy_until = u64::MAX;
        state.samples.clear();
        state.error = Some(format!("device lost: {message}"));
    }

    pub fn submissions(&self) -> usize {
        self.state.borrow().completions.len()
    }

    pub fn in_flight(&self) -> usize {
        let now = self.clock.now_ns();
        self.state
            .borrow()
            .completions
            .iter()
            .filter(|&&done| done > now)
            .count()
    }

    pub fn is_complete(&self, submission: u64) -> bool {
        self.state.borrow().completions[submission as usize] <= self.clock.now_ns()
    }

    fn check(&self) -> Result<(), BenchError> {
        match &self.state.borrow().error {
            Some(message) => Err(BenchError::Device(message.clone())),
            None => Ok(()),
        }
    }
}

impl Gpu for SimGpu {
    type Target = SimTarget;
    type Timer = SimTimer;

    fn poll(&self, target: &SimTarget, _timeout: u64) -> Result<bool, BenchError> {
        self.check()?;
        let busy = match target.last_submission.get() {
            Some(index) => self.state.borrow().completions[index] > self.clock.now_ns(),
            None => false,
        };
        if busy {
            self.clock.advance_ns(POLL_STEP_NS);
        }
        Ok(busy)
    }

    fn flush(&self) {}

    fn finish(&self) -> Result<(), BenchError> {
        self.check()?;
        self.clock.advance_to(self.state.borrow().busy_until);
        Ok(())
    }

    fn create_timer(&self) -> Option<SimTimer> {
        self.timers.then_some(SimTimer)
    }

    fn query_timer(&self, _timer: &mut SimTimer) -> u64 {
        let now = self.clock.now_ns();
        let mut state = self.state.borrow_mut();
        match state.samples.front() {
            Some(&(ready_at, ns)) if ready_at <= now => {
                state.samples.pop_front();
                ns
            }
            _ => 0,
        }
    }
}
