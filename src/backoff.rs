//! Adaptive spin/yield/sleep backoff for contended lock-free operations.
//!
//! Every wait in the queue (a reserved slot not yet published, a successor
//! segment not yet linked, a tail that has not moved yet) goes through
//! [`SpinBackoff`]. Early steps burn a few cycles with `spin_loop` hints,
//! later steps hand the processor back to the OS, and every twentieth step
//! past the threshold sleeps for a millisecond so a descheduled producer is
//! guaranteed to run.

use crate::topology::Topology;
use std::thread;
use std::time::Duration;

/// Steps at or below this count spin in place on multiprocessor hosts.
pub const YIELD_THRESHOLD: u32 = 10;

/// Every this-many steps past the threshold sleeps instead of yielding.
pub const SLEEP_EVERY: u32 = 20;

/// What a single [`SpinBackoff::spin_once`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Hardware spin of the given number of `spin_loop` hints.
    Spin(u32),
    /// `thread::yield_now`.
    Yield,
    /// 1 ms sleep.
    Sleep,
}

/// Counter-based backoff state. Cheap to create; `reset` to reuse.
#[derive(Debug, Clone)]
pub struct SpinBackoff {
    count: u32,
    multiprocessor: bool,
}

impl SpinBackoff {
    /// Creates a backoff for the current host.
    #[inline]
    pub fn new() -> Self {
        SpinBackoff {
            count: 0,
            multiprocessor: Topology::current().is_multiprocessor(),
        }
    }

    /// Creates a backoff that behaves as if the host had `processors`
    /// logical CPUs. A value of 1 forces the yielding branch.
    #[inline]
    pub fn with_processors(processors: usize) -> Self {
        let topology = Topology {
            logical_processors: processors,
        };
        SpinBackoff {
            count: 0,
            multiprocessor: topology.is_multiprocessor(),
        }
    }

    /// Performs one backoff step and reports which one it was.
    #[inline]
    pub fn spin_once(&mut self) -> BackoffStep {
        let step = self.plan_next();
        self.count = self.count.saturating_add(1);

        match step {
            BackoffStep::Spin(iterations) => {
                for _ in 0..iterations {
                    std::hint::spin_loop();
                }
            }
            BackoffStep::Yield => thread::yield_now(),
            BackoffStep::Sleep => thread::sleep(Duration::from_millis(1)),
        }
        step
    }

    /// Whether the next `spin_once` leaves the hardware spin phase.
    #[inline]
    pub fn next_spin_yields(&self) -> bool {
        !matches!(self.plan_next(), BackoffStep::Spin(_))
    }

    /// Zeroes the counter.
    #[inline]
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Steps taken since creation or the last reset.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    fn plan_next(&self) -> BackoffStep {
        let count = self.count.saturating_add(1);
        if count <= YIELD_THRESHOLD && self.multiprocessor {
            BackoffStep::Spin(4u32 << count)
        } else if count > YIELD_THRESHOLD && (count - YIELD_THRESHOLD) % SLEEP_EVERY == 0 {
            BackoffStep::Sleep
        } else {
            BackoffStep::Yield
        }
    }
}

impl Default for SpinBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spins_until_threshold_then_yields() {
        let mut backoff = SpinBackoff::with_processors(4);

        for step in 1..=YIELD_THRESHOLD {
            assert_eq!(backoff.spin_once(), BackoffStep::Spin(4 << step));
        }
        assert!(backoff.next_spin_yields());
        assert_eq!(backoff.spin_once(), BackoffStep::Yield);
        assert_eq!(backoff.count(), YIELD_THRESHOLD + 1);
    }

    #[test]
    fn test_sleeps_every_twentieth_step_past_threshold() {
        let mut backoff = SpinBackoff::with_processors(2);
        let mut sleeps = Vec::new();

        for _ in 0..(YIELD_THRESHOLD + 2 * SLEEP_EVERY) {
            if backoff.spin_once() == BackoffStep::Sleep {
                sleeps.push(backoff.count());
            }
        }
        assert_eq!(
            sleeps,
            vec![YIELD_THRESHOLD + SLEEP_EVERY, YIELD_THRESHOLD + 2 * SLEEP_EVERY]
        );
    }

    #[test]
    fn test_single_processor_never_spins() {
        let mut backoff = SpinBackoff::with_processors(1);
        assert!(backoff.next_spin_yields());

        for _ in 0..YIELD_THRESHOLD {
            assert_eq!(backoff.spin_once(), BackoffStep::Yield);
        }
    }

    #[test]
    fn test_new_follows_host_topology() {
        let backoff = SpinBackoff::new();
        assert_eq!(
            backoff.next_spin_yields(),
            !Topology::current().is_multiprocessor()
        );
    }

    #[test]
    fn test_reset_restarts_spin_phase() {
        let mut backoff = SpinBackoff::with_processors(8);
        for _ in 0..=YIELD_THRESHOLD {
            backoff.spin_once();
        }
        assert!(backoff.next_spin_yields());

        backoff.reset();
        assert_eq!(backoff.count(), 0);
        assert!(!backoff.next_spin_yields());
        assert_eq!(backoff.spin_once(), BackoffStep::Spin(8));
    }
}
