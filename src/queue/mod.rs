//! Unbounded lock-free MPMC FIFO built from linked fixed-size segments.
//!
//! Producers claim slots in the tail segment with a single `fetch_add`; the
//! producer that claims the last slot links the next segment and moves the
//! tail before returning. Consumers claim slots in the head segment by CAS on
//! its `low` cursor and the consumer that takes the last slot moves the head.
//! Retired segments are reclaimed through `crossbeam::epoch`, so a thread
//! still reading an old head never touches freed memory.
//!
//! The growing producer links `next` before it moves the tail, so a consumer
//! can retire the old tail and move the head onto the new segment first. For
//! that short window the head is one segment past the tail; snapshots
//! (`len`, `to_vec`) detect it and retry.
//!
//! FIFO order is slot-claim order. With several producers this is not call
//! order, only the order in which their `fetch_add`s landed.
//!
//! # Example
//!
//! ```
//! use frameweave::SegmentedQueue;
//!
//! let queue = SegmentedQueue::new();
//! queue.enqueue("unit spotted");
//! queue.enqueue("unit lost");
//!
//! assert_eq!(queue.try_peek(), Some("unit spotted"));
//! assert_eq!(queue.try_dequeue(), Some("unit spotted"));
//! assert_eq!(queue.len(), 1);
//! ```

mod segment;

pub use segment::SEGMENT_CAPACITY;

use crate::backoff::SpinBackoff;
use crate::error::{Error, Result};
use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use crossbeam::utils::CachePadded;
use log::trace;
use segment::Segment;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;

/// A consistent view of both ends of the queue.
struct Positions<'g, T> {
    head: Shared<'g, Segment<T>>,
    tail: Shared<'g, Segment<T>>,
    head_low: usize,
    tail_bound: usize,
}

impl<T> Positions<'_, T> {
    fn count(&self) -> usize {
        let head = unsafe { self.head.deref() };
        let tail = unsafe { self.tail.deref() };
        if self.head == self.tail {
            return self.tail_bound.saturating_sub(self.head_low);
        }
        let interior = (tail.sequence - head.sequence - 1) as usize;
        (SEGMENT_CAPACITY - self.head_low) + interior * SEGMENT_CAPACITY + self.tail_bound
    }
}

/// Lock-free segmented FIFO queue.
pub struct SegmentedQueue<T> {
    head: CachePadded<Atomic<Segment<T>>>,
    tail: CachePadded<Atomic<Segment<T>>>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for SegmentedQueue<T> {}
unsafe impl<T: Send> Sync for SegmentedQueue<T> {}

impl<T> SegmentedQueue<T> {
    /// Creates an empty queue holding a single segment.
    pub fn new() -> Self {
        let first = Atomic::new(Segment::new(0));
        let guard = unsafe { epoch::unprotected() };
        let shared = first.load(Ordering::Relaxed, guard);
        SegmentedQueue {
            head: CachePadded::new(first),
            tail: CachePadded::new(Atomic::from(shared)),
            _marker: PhantomData,
        }
    }

    /// Builds a queue from an existing sequence, front first.
    pub fn from_vec(items: Vec<T>) -> Self {
        items.into_iter().collect()
    }

    /// Appends `item` at the tail. Never blocks; retries with backoff only
    /// while another producer is linking a new tail segment.
    pub fn enqueue(&self, item: T) {
        let guard = &epoch::pin();
        let mut backoff = SpinBackoff::new();
        let mut item = item;
        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            let segment = unsafe { tail.deref() };
            match segment.try_append(item) {
                Ok(index) => {
                    if index == SEGMENT_CAPACITY - 1 {
                        let next = segment.grow(guard);
                        self.tail.store(next, Ordering::Release);
                        trace!("queue grew to segment {}", segment.sequence + 1);
                    }
                    return;
                }
                Err(rejected) => {
                    item = rejected;
                    backoff.spin_once();
                }
            }
        }
    }

    /// Removes the front item, or returns `None` if the queue is observably
    /// empty.
    pub fn try_dequeue(&self) -> Option<T> {
        let guard = &epoch::pin();
        let mut backoff = SpinBackoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            let segment = unsafe { head.deref() };

            let low = segment.low();
            if low < segment.bound() {
                if segment
                    .low
                    .compare_exchange_weak(low, low + 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    // SAFETY: the CAS above claimed `low` for this thread.
                    let value = unsafe { segment.take(low) };
                    if low == SEGMENT_CAPACITY - 1 {
                        self.advance_head(head, segment, guard);
                    }
                    return Some(value);
                }
                backoff.spin_once();
                continue;
            }

            if segment.next.load(Ordering::Acquire, guard).is_null() {
                return None;
            }
            // Drained segment whose consumer has not moved the head yet.
            backoff.spin_once();
        }
    }

    /// Returns a clone of the front item without removing it.
    pub fn try_peek(&self) -> Option<T>
    where
        T: Clone + Sync,
    {
        let guard = &epoch::pin();
        let mut backoff = SpinBackoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            let segment = unsafe { head.deref() };

            let low = segment.low();
            if low < segment.bound() {
                match segment.peek(low) {
                    Some(value) => return Some(value),
                    // Taken between the cursor read and the peek.
                    None => continue,
                }
            }

            if segment.next.load(Ordering::Acquire, guard).is_null() {
                return None;
            }
            backoff.spin_once();
        }
    }

    /// Whether the queue holds no claimed items.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let mut backoff = SpinBackoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            let segment = unsafe { head.deref() };
            if segment.low() < segment.bound() {
                return false;
            }
            if segment.next.load(Ordering::Acquire, guard).is_null() {
                return true;
            }
            backoff.spin_once();
        }
    }

    /// Number of items currently in the queue, counting slots reserved by
    /// producers that have not finished publishing.
    ///
    /// Walks live segments, so this is O(segments) and meant for use off the
    /// hot path. Under sustained write contention the snapshot can be torn
    /// indefinitely and this call keeps retrying; use [`try_len`] to bound it.
    ///
    /// [`try_len`]: SegmentedQueue::try_len
    pub fn len(&self) -> usize {
        let guard = &epoch::pin();
        let mut backoff = SpinBackoff::new();
        loop {
            if let Some(positions) = self.positions(guard) {
                return positions.count();
            }
            backoff.spin_once();
        }
    }

    /// Like [`len`](SegmentedQueue::len), but gives up after `max_attempts`
    /// torn snapshots.
    pub fn try_len(&self, max_attempts: usize) -> Result<usize> {
        let guard = &epoch::pin();
        let mut backoff = SpinBackoff::new();
        for _ in 0..max_attempts {
            if let Some(positions) = self.positions(guard) {
                return Ok(positions.count());
            }
            backoff.spin_once();
        }
        Err(Error::SnapshotContended {
            attempts: max_attempts,
        })
    }

    /// Copies the current contents, front first. Items consumed while the
    /// copy is being taken are left out.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone + Sync,
    {
        let guard = &epoch::pin();
        let mut backoff = SpinBackoff::new();
        let positions = loop {
            if let Some(positions) = self.positions(guard) {
                break positions;
            }
            backoff.spin_once();
        };

        let mut items = Vec::with_capacity(positions.count());
        let mut current = positions.head;
        let mut start = positions.head_low;
        loop {
            let segment = unsafe { current.deref() };
            let end = if current == positions.tail {
                positions.tail_bound
            } else {
                SEGMENT_CAPACITY
            };
            items.extend((start..end).filter_map(|index| segment.peek(index)));

            if current == positions.tail {
                return items;
            }
            current = segment.wait_next(guard);
            start = 0;
        }
    }

    /// Iterator that dequeues until the queue is observably empty.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.try_dequeue())
    }

    /// Segments linked since construction.
    pub fn segments_allocated(&self) -> u64 {
        let guard = &epoch::pin();
        let tail = self.tail.load(Ordering::Acquire, guard);
        unsafe { tail.deref() }.sequence
    }

    fn advance_head<'g>(
        &self,
        retired: Shared<'g, Segment<T>>,
        segment: &Segment<T>,
        guard: &'g Guard,
    ) {
        let next = segment.wait_next(guard);
        self.head.store(next, Ordering::Release);
        // SAFETY: nothing links to `retired` any more. The tail may still
        // point at it if the growing producer has linked `next` but not yet
        // stored the new tail; that producer and any thread that loaded the
        // old tail are pinned, and `retired` is full, so they only bounce off
        // it. Destruction waits for every current pin to drop.
        unsafe { guard.defer_destroy(retired) };
    }

    /// One attempt at reading both ends consistently.
    fn positions<'g>(&self, guard: &'g Guard) -> Option<Positions<'g, T>> {
        let head = self.head.load(Ordering::Acquire, guard);
        let tail = self.tail.load(Ordering::Acquire, guard);
        let head_segment = unsafe { head.deref() };
        let tail_segment = unsafe { tail.deref() };
        let head_low = head_segment.low();
        let tail_bound = tail_segment.bound();

        let stable = head == self.head.load(Ordering::Acquire, guard)
            && tail == self.tail.load(Ordering::Acquire, guard)
            && head_low == head_segment.low()
            && tail_bound == tail_segment.bound()
            // Head one past tail: a grow is between linking and the tail store.
            && head_segment.sequence <= tail_segment.sequence;

        stable.then_some(Positions {
            head,
            tail,
            head_low,
            tail_bound,
        })
    }
}

impl<T> Default for SegmentedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for SegmentedQueue<T> {
    /// Single-threaded bulk load: slots are written directly, segments linked
    /// as they fill.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let guard = unsafe { epoch::unprotected() };
        let head = Owned::new(Segment::new(0)).into_shared(guard);
        let mut tail = head;

        for item in iter {
            let segment = unsafe { tail.deref() };
            if segment.push_unshared(item) == SEGMENT_CAPACITY - 1 {
                tail = segment.grow(guard);
            }
        }

        SegmentedQueue {
            head: CachePadded::new(Atomic::from(head)),
            tail: CachePadded::new(Atomic::from(tail)),
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for SegmentedQueue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread holds a reference; every
        // segment still reachable from the head is owned by this queue.
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.head.load(Ordering::Relaxed, guard);
            while !current.is_null() {
                let next = current.deref().next.load(Ordering::Relaxed, guard);
                drop(current.into_owned());
                current = next;
            }
        }
    }
}

impl<T> std::fmt::Debug for SegmentedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedQueue")
            .field("len", &self.try_len(16).ok())
            .field("segments_allocated", &self.segments_allocated())
            .finish()
    }
}
