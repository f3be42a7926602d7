//! Fixed-capacity array chunk of the segmented queue.

use crate::backoff::SpinBackoff;
use crossbeam::epoch::{Atomic, Guard, Owned, Shared};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Slots per segment.
pub const SEGMENT_CAPACITY: usize = 32;

// Slot state bits. Peekers count in units of PEEKER above the flag bits.
const PUBLISHED: usize = 1;
const TAKEN: usize = 2;
const PEEKER: usize = 4;

struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    state: AtomicUsize,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Slot {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            state: AtomicUsize::new(0),
        }
    }

    fn wait_published(&self) -> usize {
        let mut backoff = SpinBackoff::new();
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state & PUBLISHED != 0 {
                return state;
            }
            backoff.spin_once();
        }
    }
}

pub(crate) struct Segment<T> {
    slots: [Slot<T>; SEGMENT_CAPACITY],
    /// Claim cursor. Keeps counting past capacity while the segment is full,
    /// so readers clamp it with `bound`.
    reserved: AtomicUsize,
    /// Next index to consume.
    pub(crate) low: AtomicUsize,
    pub(crate) next: Atomic<Segment<T>>,
    pub(crate) sequence: u64,
}

impl<T> Segment<T> {
    pub(crate) fn new(sequence: u64) -> Self {
        Segment {
            slots: std::array::from_fn(|_| Slot::new()),
            reserved: AtomicUsize::new(0),
            low: AtomicUsize::new(0),
            next: Atomic::null(),
            sequence,
        }
    }

    /// One past the last claimed index, clamped to capacity.
    #[inline]
    pub(crate) fn bound(&self) -> usize {
        self.reserved.load(Ordering::Acquire).min(SEGMENT_CAPACITY)
    }

    #[inline]
    pub(crate) fn low(&self) -> usize {
        self.low.load(Ordering::Acquire)
    }

    /// Claims a slot and publishes `value` into it. Hands the value back if
    /// the segment was already full.
    pub(crate) fn try_append(&self, value: T) -> Result<usize, T> {
        let index = self.reserved.fetch_add(1, Ordering::AcqRel);
        if index >= SEGMENT_CAPACITY {
            return Err(value);
        }

        let slot = &self.slots[index];
        // SAFETY: the fetch_add above gave this thread exclusive ownership of
        // the slot until PUBLISHED is set.
        unsafe { (*slot.value.get()).write(value) };
        slot.state.store(PUBLISHED, Ordering::Release);
        Ok(index)
    }

    /// Appends without contention handling. Only valid while the segment is
    /// not shared with other threads.
    pub(crate) fn push_unshared(&self, value: T) -> usize {
        let index = self.reserved.load(Ordering::Relaxed);
        debug_assert!(index < SEGMENT_CAPACITY);

        let slot = &self.slots[index];
        unsafe { (*slot.value.get()).write(value) };
        slot.state.store(PUBLISHED, Ordering::Relaxed);
        self.reserved.store(index + 1, Ordering::Relaxed);
        index
    }

    /// Moves the value out of a claimed slot, waiting for its producer to
    /// publish and for in-flight peeks to finish.
    ///
    /// # Safety
    /// The caller must have claimed `index` by advancing `low` past it.
    pub(crate) unsafe fn take(&self, index: usize) -> T {
        let slot = &self.slots[index];
        let mut backoff = SpinBackoff::new();
        loop {
            // Only an unpeeked, published slot can be taken.
            match slot.state.compare_exchange_weak(
                PUBLISHED,
                PUBLISHED | TAKEN,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(_) => {
                    backoff.spin_once();
                }
            }
        }
        unsafe { (*slot.value.get()).assume_init_read() }
    }

    /// Clones the value at `index` without consuming it. Returns `None` if a
    /// consumer took it first.
    pub(crate) fn peek(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        let slot = &self.slots[index];
        if slot.wait_published() & TAKEN != 0 {
            return None;
        }

        let state = slot.state.fetch_add(PEEKER, Ordering::Acquire);
        let result = if state & TAKEN != 0 {
            None
        } else {
            // SAFETY: the PEEKER count keeps `take` from moving the value out
            // until it is released below.
            Some(unsafe { (*slot.value.get()).assume_init_ref().clone() })
        };
        slot.state.fetch_sub(PEEKER, Ordering::Release);
        result
    }

    /// Links a fresh successor. Called once, by the producer that claimed the
    /// last slot.
    pub(crate) fn grow<'g>(&self, guard: &'g Guard) -> Shared<'g, Segment<T>> {
        let next = Owned::new(Segment::new(self.sequence + 1)).into_shared(guard);
        self.next.store(next, Ordering::Release);
        next
    }

    /// Spins until the successor has been linked.
    pub(crate) fn wait_next<'g>(&self, guard: &'g Guard) -> Shared<'g, Segment<T>> {
        let mut backoff = SpinBackoff::new();
        loop {
            let next = self.next.load(Ordering::Acquire, guard);
            if !next.is_null() {
                return next;
            }
            backoff.spin_once();
        }
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        let low = *self.low.get_mut();
        let bound = (*self.reserved.get_mut()).min(SEGMENT_CAPACITY);
        for slot in &mut self.slots[low.min(bound)..bound] {
            let state = *slot.state.get_mut();
            if state & PUBLISHED != 0 && state & TAKEN == 0 {
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
        }
    }
}
