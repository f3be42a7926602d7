//! Partitions: one worker's contiguous slice of a parallel-for range.
//!
//! A partition carries the index range and a borrowed, type-erased callback.
//! The borrow is only sound because the pool blocks the caller until every
//! partition has finished; partitions never outlive the call that made them.

use crate::error::panic_message;
use log::warn;
use std::ops::Range;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Erased `&dyn Fn(usize) + Sync` with its lifetime removed.
#[derive(Clone, Copy)]
pub(crate) struct TaskRef(*const (dyn Fn(usize) + Sync + 'static));

unsafe impl Send for TaskRef {}

impl TaskRef {
    /// # Safety
    /// `task` must stay alive until every partition holding the returned
    /// reference has finished executing.
    pub(crate) unsafe fn erase<'a>(task: &'a (dyn Fn(usize) + Sync + 'a)) -> Self {
        let ptr: *const (dyn Fn(usize) + Sync + 'a) = task;
        TaskRef(unsafe {
            std::mem::transmute::<
                *const (dyn Fn(usize) + Sync + 'a),
                *const (dyn Fn(usize) + Sync + 'static),
            >(ptr)
        })
    }
}

/// A contiguous index range handed to one worker.
pub struct Partition {
    range: Range<usize>,
    task: TaskRef,
}

impl Partition {
    pub(crate) fn new(range: Range<usize>, task: TaskRef) -> Self {
        Partition { range, task }
    }

    /// The indices this partition covers.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Runs the callback for every index. Panicking indices are logged and
    /// skipped; returns how many were skipped.
    pub(crate) fn execute(self, worker_id: usize) -> usize {
        // SAFETY: the coordinator is blocked on the barrier until this returns.
        let task = unsafe { &*self.task.0 };
        let mut skipped = 0;
        for index in self.range {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task(index))) {
                skipped += 1;
                warn!(
                    "worker {}: index {} skipped: {}",
                    worker_id,
                    index,
                    panic_message(payload.as_ref())
                );
            }
        }
        skipped
    }
}

/// Splits `range` into `parts` contiguous chunks: the first `parts - 1`
/// receive `len / parts` indices each, the last takes the remainder.
pub fn split_range(range: Range<usize>, parts: usize) -> impl Iterator<Item = Range<usize>> {
    let parts = parts.max(1);
    let len = range.end.saturating_sub(range.start);
    let chunk = len / parts;
    let lo = range.start;
    let hi = range.end.max(lo);

    (0..parts).map(move |i| {
        let start = lo + i * chunk;
        let end = if i == parts - 1 { hi } else { start + chunk };
        start..end
    })
}
