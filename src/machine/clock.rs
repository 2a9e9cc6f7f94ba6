//! The machine clock.
//!
//! Virtual time in microseconds. Reading the clock costs a small CPU quantum,
//! which is what makes CPU accounting and the time slice measurable. Device
//! completions and the periodic clock tick sit in one pending-event queue
//! ordered by (time, sequence).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use lazy_static::lazy_static;
use spin::Mutex;

use super::interrupts::CLOCK_DEV;

/// Interval between clock interrupts.
pub const CLOCK_INTERVAL_US: i64 = 20_000;

/// Virtual cost of one clock read.
const CPU_QUANTUM_US: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    time: i64,
    seq: u64,
    dev: usize,
    unit: usize,
    status: i32,
}

// BinaryHeap is a max-heap; invert so the earliest event pops first.
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.time, other.seq).cmp(&(self.time, self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub(crate) struct ClockState {
    now: i64,
    seq: u64,
    events: BinaryHeap<Pending>,
}

impl ClockState {
    fn new() -> Self {
        let mut state = ClockState { now: 0, seq: 0, events: BinaryHeap::new() };
        state.push(CLOCK_INTERVAL_US, CLOCK_DEV, 0, 0);
        state
    }

    fn push(&mut self, time: i64, dev: usize, unit: usize, status: i32) {
        let seq = self.seq;
        self.seq += 1;
        self.events.push(Pending { time, seq, dev, unit, status });
    }

    fn pop_due(&mut self) -> Option<(usize, usize, i32)> {
        let head = *self.events.peek()?;
        if head.time > self.now {
            return None;
        }
        self.events.pop();
        if head.dev == CLOCK_DEV {
            // The clock ticks forever; keep the cadence anchored to the
            // tick that just fired.
            let next = head.time + CLOCK_INTERVAL_US;
            self.push(next, CLOCK_DEV, 0, next as i32);
        }
        Some((head.dev, head.unit, head.status))
    }

    fn next_event_time(&self) -> i64 {
        self.events.peek().map(|e| e.time).expect("clock has no pending tick")
    }

    fn has_device_event(&self) -> bool {
        self.events.iter().any(|e| e.dev != CLOCK_DEV)
    }
}

lazy_static! {
    static ref CLOCK: Mutex<ClockState> = Mutex::new(ClockState::new());
}

/// Current time of day in microseconds. Advances the clock by one CPU
/// quantum and then lets any due interrupt in.
pub fn sys_clock() -> i64 {
    let now = {
        let mut clock = CLOCK.lock();
        clock.now += CPU_QUANTUM_US;
        clock.now
    };
    super::interrupts::poll();
    now
}

/// Schedule a device completion interrupt `delay` microseconds from now.
pub(crate) fn schedule_event(dev: usize, unit: usize, status: i32, delay: i64) {
    let mut clock = CLOCK.lock();
    let time = clock.now + delay;
    clock.push(time, dev, unit, status);
}

/// Pop the next event whose time has come, if any.
pub(crate) fn due_event() -> Option<(usize, usize, i32)> {
    CLOCK.lock().pop_due()
}

/// Jump the clock forward to the next pending event.
pub(crate) fn advance_to_next_event() {
    let mut clock = CLOCK.lock();
    let next = clock.next_event_time();
    if next > clock.now {
        clock.now = next;
    }
}

/// Whether a non-tick completion is pending. The dispatcher's idle window
/// uses this to keep draining device activity after the drivers are gone.
pub(crate) fn has_pending_device_event() -> bool {
    CLOCK.lock().has_device_event()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_pop_in_time_then_insertion_order() {
        let mut state = ClockState { now: 0, seq: 0, events: BinaryHeap::new() };
        state.push(500, 2, 0, 7);
        state.push(300, 2, 1, 8);
        state.push(300, 3, 0, 9);
        state.now = 600;
        assert_eq!(state.pop_due(), Some((2, 1, 8)));
        assert_eq!(state.pop_due(), Some((3, 0, 9)));
        assert_eq!(state.pop_due(), Some((2, 0, 7)));
        assert_eq!(state.pop_due(), None);
    }

    #[test]
    fn ticks_reschedule_themselves() {
        let mut state = ClockState::new();
        state.now = CLOCK_INTERVAL_US;
        assert_eq!(state.pop_due(), Some((CLOCK_DEV, 0, 0)));
        assert_eq!(state.next_event_time(), 2 * CLOCK_INTERVAL_US);
    }

    #[test]
    fn events_before_now_are_due() {
        let mut state = ClockState::new();
        state.push(10, 2, 0, 1);
        state.now = 15;
        assert_eq!(state.pop_due(), Some((2, 0, 1)));
        assert!(!state.has_device_event());
    }
}
