//! Fork-join parallel-for over a fixed pool of persistent workers.
//!
//! The simulation thread calls [`ForkJoinPool::run_parallel`] once per frame
//! per subsystem. The range is cut into one contiguous partition per worker,
//! every worker is started, and the caller blocks on a countdown latch until
//! all of them report completion. Nothing is allocated per call: partitions
//! travel through pre-sized channels and the latch is reset and reused.
//!
//! Calls take `&mut self`, so two overlapping calls on one pool cannot be
//! written. Independent subsystems that need to run concurrently each own a
//! pool.

use crate::PinningStrategy;
use crate::error::{Error, Result};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::partition::TaskRef;
use crate::worker::{WorkerPool, WorkerState};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use std::thread;

/// Configuration for a fork-join pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on worker threads; the pool never starts more than the
    /// host's available parallelism. Default: 4.
    pub workers: usize,
    /// How workers are pinned to cores. Default: no pinning.
    pub pinning: PinningStrategy,
    /// Prefix for worker thread names. Default: `frameweave-worker`.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            pinning: PinningStrategy::None,
            thread_name: String::from("frameweave-worker"),
        }
    }
}

impl PoolConfig {
    /// `min(available_parallelism, workers)`.
    pub fn effective_workers(&self) -> Result<usize> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig(String::from(
                "worker count must be at least 1",
            )));
        }
        let available = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Ok(self.workers.min(available))
    }
}

/// The parallel-for engine.
///
/// # Example
///
/// ```
/// use frameweave::ForkJoinPool;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let mut pool = ForkJoinPool::new(4).unwrap();
/// let visited: Vec<AtomicUsize> = (0..100).map(|_| AtomicUsize::new(0)).collect();
///
/// pool.run_parallel(&visited, 0..100, |visited, i| {
///     visited[i].fetch_add(1, Ordering::Relaxed);
/// })
/// .unwrap();
///
/// assert!(visited.iter().all(|v| v.load(Ordering::Relaxed) == 1));
/// ```
pub struct ForkJoinPool {
    workers: WorkerPool,
    metrics: Arc<Metrics>,
}

impl ForkJoinPool {
    /// Creates a pool with up to `workers` threads.
    pub fn new(workers: usize) -> Result<Self> {
        Self::with_config(PoolConfig {
            workers,
            ..PoolConfig::default()
        })
    }

    /// Creates a pool from an explicit configuration.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let workers = WorkerPool::new(&config, Arc::clone(&metrics))?;
        Ok(ForkJoinPool { workers, metrics })
    }

    /// Runs `callback(collection, i)` for every `i` in `range`, split across
    /// the workers, and returns once all of them are done.
    ///
    /// The collection is shared read-only between workers for the duration
    /// of the call. A callback that panics (for example, indexing past the
    /// end of a collection that shrank during teardown) is logged and that
    /// index is skipped; the rest of the range still runs.
    pub fn run_parallel<C, F>(
        &mut self,
        collection: &C,
        range: Range<usize>,
        callback: F,
    ) -> Result<()>
    where
        C: Sync + ?Sized,
        F: Fn(&C, usize) + Sync,
    {
        if range.is_empty() {
            return Ok(());
        }
        self.metrics.record_call();

        let body = |index: usize| callback(collection, index);
        // SAFETY: `dispatch` blocks until every partition has finished, so
        // `body` and the borrows it captures outlive every use.
        let task = unsafe { TaskRef::erase(&body) };
        self.workers.dispatch(range, task)
    }

    /// Runs `callback(&mut items[i], i)` for every element, each index on
    /// exactly one worker.
    pub fn for_each_mut<T, F>(&mut self, items: &mut [T], callback: F) -> Result<()>
    where
        T: Send,
        F: Fn(&mut T, usize) + Sync,
    {
        use crate::iter::ParallelSliceMut;
        items.par_iter_mut(self).for_each_indexed(callback)
    }

    /// Returns the number of worker threads in the pool.
    pub fn num_workers(&self) -> usize {
        self.workers.size()
    }

    /// State of worker `id`, if it exists.
    pub fn worker_state(&self, id: usize) -> Option<WorkerState> {
        self.workers.state(id)
    }

    /// Counters accumulated since the pool started.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stops and joins every worker.
    ///
    /// Returns Err if any worker thread panicked.
    pub fn shutdown(self) -> Result<()> {
        self.workers.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_pool_creation() {
        let pool = ForkJoinPool::new(4).unwrap();
        assert!(pool.num_workers() >= 1 && pool.num_workers() <= 4);
        pool.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            ForkJoinPool::new(0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_run_parallel_sums_range() {
        let mut pool = ForkJoinPool::new(4).unwrap();
        let sum = AtomicUsize::new(0);

        pool.run_parallel(&sum, 10..110, |sum, i| {
            sum.fetch_add(i, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(sum.load(Ordering::SeqCst), (10..110).sum::<usize>());
        pool.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_empty_range_is_a_no_op() {
        let mut pool = ForkJoinPool::new(2).unwrap();
        let calls = AtomicUsize::new(0);
        pool.run_parallel(&calls, 5..5, |calls, _| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pool.metrics().parallel_calls, 0);
    }

    #[test]
    fn test_out_of_range_index_is_skipped() {
        let mut pool = ForkJoinPool::new(2).unwrap();
        let entities = vec![1usize; 8];
        let total = AtomicUsize::new(0);

        // Range overruns the collection, as during level teardown.
        pool.run_parallel(entities.as_slice(), 0..10, |entities, i| {
            total.fetch_add(entities[i], Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(total.load(Ordering::SeqCst), 8);
        assert_eq!(pool.metrics().indices_skipped, 2);
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: PoolConfig = serde_json::from_str(r#"{"workers": 2}"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.pinning, PinningStrategy::None);
        assert_eq!(config.thread_name, "frameweave-worker");
    }
}
