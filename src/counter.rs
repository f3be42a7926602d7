//! Countdown latch used as the fork-join barrier.
//!
//! The pool arms one `Counter` with its worker count before each call, every
//! worker decrements it once after finishing its partition, and the
//! coordinator waits for zero. The counter is reset and reused for the next
//! call, so the barrier itself never allocates.

use crate::backoff::SpinBackoff;
use crossbeam::sync::{Parker, Unparker};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct InnerCounter {
    value: AtomicUsize,
    waker: Unparker,
}

/// A thread-safe countdown for tracking partition completion.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<InnerCounter>,
}

impl Counter {
    /// Creates a counter that unparks `waker` each time it reaches zero.
    pub fn with_waker(initial: usize, waker: Unparker) -> Self {
        Counter {
            inner: Arc::new(InnerCounter {
                value: AtomicUsize::new(initial),
                waker,
            }),
        }
    }

    /// Decrements the counter by one and wakes the waiter if it hit zero.
    ///
    /// Returns true if the counter reached zero.
    pub fn decrement(&self) -> bool {
        // Release so the finished partition's writes are visible to the waiter.
        let old = self.inner.value.fetch_sub(1, Ordering::Release);
        debug_assert!(old > 0, "counter decremented below zero");
        if old == 1 {
            self.inner.waker.unpark();
            true
        } else {
            false
        }
    }

    /// Returns the current value of the counter.
    pub fn value(&self) -> usize {
        self.inner.value.load(Ordering::Acquire)
    }

    /// Checks if the counter has reached zero.
    pub fn is_complete(&self) -> bool {
        self.value() == 0
    }

    /// Re-arms the counter for the next round.
    pub fn reset(&self, value: usize) {
        self.inner.value.store(value, Ordering::SeqCst);
    }

    /// Blocks until zero, spinning briefly and then parking on `parker`.
    ///
    /// `parker` must be the one whose unparker was given to
    /// [`Counter::with_waker`].
    pub fn wait_parked(&self, parker: &Parker) {
        let mut backoff = SpinBackoff::new();
        while !self.is_complete() {
            if backoff.next_spin_yields() {
                // Bounded so a parker not paired with this counter still
                // observes completion.
                parker.park_timeout(Duration::from_millis(1));
            } else {
                backoff.spin_once();
            }
        }
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter").field("value", &self.value()).finish()
    }
}
