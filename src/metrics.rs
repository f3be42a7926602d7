use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by a pool's workers or by a queue worker.
#[derive(Debug)]
pub struct Metrics {
    /// Parallel-for calls dispatched.
    pub parallel_calls: AtomicU64,
    /// Partitions run to completion.
    pub partitions_executed: AtomicU64,
    /// Indices handed to callbacks, including skipped ones.
    pub indices_executed: AtomicU64,
    /// Indices whose callback panicked and was skipped.
    pub indices_skipped: AtomicU64,
    /// Items drained by a queue worker.
    pub items_processed: AtomicU64,
    /// Items whose action failed or panicked.
    pub items_failed: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl Metrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            parallel_calls: AtomicU64::new(0),
            partitions_executed: AtomicU64::new(0),
            indices_executed: AtomicU64::new(0),
            indices_skipped: AtomicU64::new(0),
            items_processed: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub(crate) fn record_call(&self) {
        self.parallel_calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_partition(&self, len: usize, skipped: usize) {
        self.partitions_executed.fetch_add(1, Ordering::Relaxed);
        self.indices_executed.fetch_add(len as u64, Ordering::Relaxed);
        if skipped > 0 {
            self.indices_skipped
                .fetch_add(skipped as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_item(&self, ok: bool) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.items_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            parallel_calls: self.parallel_calls.load(Ordering::Relaxed),
            partitions_executed: self.partitions_executed.load(Ordering::Relaxed),
            indices_executed: self.indices_executed.load(Ordering::Relaxed),
            indices_skipped: self.indices_skipped.load(Ordering::Relaxed),
            items_processed: self.items_processed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub parallel_calls: u64,
    pub partitions_executed: u64,
    pub indices_executed: u64,
    pub indices_skipped: u64,
    pub items_processed: u64,
    pub items_failed: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Indices processed per second since creation.
    pub fn indices_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.indices_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Average partition length.
    pub fn mean_partition_len(&self) -> f64 {
        if self.partitions_executed > 0 {
            self.indices_executed as f64 / self.partitions_executed as f64
        } else {
            0.0
        }
    }
}
