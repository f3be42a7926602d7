//! Persistent partition workers.
//!
//! Each worker owns the receiving end of a capacity-one start channel and
//! loops `Idle -> Running -> Idle`: block for a partition, run it, count the
//! shared barrier down. Dropping the sender is the stop signal; the worker
//! sees it at its next wait and exits, so a partition that has started always
//! runs to completion.

use crate::counter::Counter;
use crate::error::{Error, Result};
use crate::fork_join::PoolConfig;
use crate::metrics::Metrics;
use crate::partition::{Partition, TaskRef, split_range};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::sync::Parker;
use log::{debug, error, warn};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

/// Lifecycle of a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for a start signal.
    Idle = 0,
    /// Executing a partition.
    Running = 1,
    /// Observed the stop signal and exited.
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }
}

/// A worker thread that executes partitions.
pub struct Worker {
    id: usize,
    start: Sender<Partition>,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(id: usize, config: &PoolConfig, done: Counter, metrics: Arc<Metrics>) -> Result<Self> {
        let (start, partitions) = channel::bounded(1);
        let state = Arc::new(AtomicU8::new(WorkerState::Idle as u8));
        let thread_state = Arc::clone(&state);
        let pinning = config.pinning;

        let handle = thread::Builder::new()
            .name(format!("{}-{}", config.thread_name, id))
            .spawn(move || {
                if let Some(core_ids) = core_affinity::get_core_ids() {
                    if let Some(slot) = pinning.core_for(id, core_ids.len()) {
                        if !core_affinity::set_for_current(core_ids[slot]) {
                            warn!("worker {}: failed to pin to core slot {}", id, slot);
                        }
                    }
                }

                Worker::run_loop(id, partitions, done, &thread_state, &metrics);
                thread_state.store(WorkerState::Stopped as u8, Ordering::Release);
                debug!("worker {} stopped", id);
            })?;

        Ok(Worker {
            id,
            start,
            state,
            handle: Some(handle),
        })
    }

    fn run_loop(
        id: usize,
        partitions: Receiver<Partition>,
        done: Counter,
        state: &AtomicU8,
        metrics: &Metrics,
    ) {
        // A closed channel is the stop signal.
        while let Ok(partition) = partitions.recv() {
            state.store(WorkerState::Running as u8, Ordering::Release);

            let len = partition.range().len();
            let skipped = partition.execute(id);

            metrics.record_partition(len, skipped);
            if skipped > 0 {
                warn!("worker {}: {} index(es) skipped this pass", id, skipped);
            }

            state.store(WorkerState::Idle as u8, Ordering::Release);
            done.decrement();
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Closes the start channel and waits for the thread to exit.
    pub fn join(mut self) -> thread::Result<()> {
        drop(self.start);
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// Fixed set of workers sharing one reusable completion barrier.
pub struct WorkerPool {
    workers: Vec<Worker>,
    done: Counter,
    parker: Parker,
}

impl WorkerPool {
    /// Spawns `config.effective_workers()` workers.
    pub fn new(config: &PoolConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let count = config.effective_workers()?;
        let parker = Parker::new();
        let done = Counter::with_waker(0, parker.unparker().clone());

        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            workers.push(Worker::spawn(id, config, done.clone(), Arc::clone(&metrics))?);
        }
        debug!("started {} partition workers", count);

        Ok(WorkerPool {
            workers,
            done,
            parker,
        })
    }

    /// Fans `range` out across all workers and blocks until every partition
    /// has finished.
    ///
    /// `task` must stay valid for the duration of this call; it does, since
    /// this call does not return before the barrier opens.
    pub(crate) fn dispatch(&mut self, range: Range<usize>, task: TaskRef) -> Result<()> {
        let count = self.workers.len();
        self.done.reset(count);

        let mut lost = 0;
        for (worker, chunk) in self.workers.iter().zip(split_range(range, count)) {
            if worker.start.send(Partition::new(chunk, task)).is_err() {
                // The thread is gone; count down on its behalf.
                lost += 1;
                self.done.decrement();
            }
        }

        self.done.wait_parked(&self.parker);

        if lost > 0 {
            error!("{} worker(s) exited before dispatch", lost);
            return Err(Error::PoolStopped);
        }
        Ok(())
    }

    /// Returns the number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// State of worker `id`, if it exists.
    pub fn state(&self, id: usize) -> Option<WorkerState> {
        self.workers.get(id).map(Worker::state)
    }

    /// Stops every worker and joins it.
    ///
    /// Returns Ok if all workers shut down successfully, or Err with the
    /// number of workers that panicked.
    pub fn shutdown(mut self) -> Result<()> {
        match self.stop_all() {
            0 => Ok(()),
            failed => Err(Error::WorkersPanicked(failed)),
        }
    }

    fn stop_all(&mut self) -> usize {
        let mut failed = 0;
        for worker in self.workers.drain(..) {
            let id = worker.id();
            if worker.join().is_err() {
                failed += 1;
                error!("worker {} panicked during execution", id);
            }
        }
        failed
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn pool(workers: usize) -> WorkerPool {
        let config = PoolConfig {
            workers,
            ..PoolConfig::default()
        };
        WorkerPool::new(&config, Arc::new(Metrics::new())).expect("pool should start")
    }

    #[test]
    fn test_worker_pool_creation() {
        let pool = pool(2);
        assert!(pool.size() >= 1 && pool.size() <= 2);
        assert_eq!(pool.state(0), Some(WorkerState::Idle));
        assert_eq!(pool.state(99), None);
        pool.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_dispatch_visits_every_index() {
        let mut pool = pool(4);
        let hits: Vec<AtomicUsize> = (0..50).map(|_| AtomicUsize::new(0)).collect();
        let task = |index: usize| {
            hits[index].fetch_add(1, Ordering::SeqCst);
        };

        let task_ref = unsafe { TaskRef::erase(&task) };
        pool.dispatch(0..50, task_ref).unwrap();

        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
        pool.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_workers_idle_between_dispatches() {
        let mut pool = pool(3);
        let task = |_: usize| {};
        for _ in 0..20 {
            let task_ref = unsafe { TaskRef::erase(&task) };
            pool.dispatch(0..9, task_ref).unwrap();
        }
        // Workers flip to Idle just before counting down.
        for id in 0..pool.size() {
            assert_eq!(pool.state(id), Some(WorkerState::Idle));
        }
    }
}
