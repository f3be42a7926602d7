//! Background thread that drains a [`SegmentedQueue`] on its own cadence.
//!
//! Used for work that must not stall the simulation frame: visibility
//! recomputation, camera-bound notifications and the like. Producers push
//! into the shared queue from any thread; the worker wakes every poll
//! interval, drains what it finds and goes back to sleep.
//!
//! A failing or panicking action costs one item, never the thread. Items
//! still queued when the worker stops stay in the queue.

use crate::error::{Error, Result, panic_message};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::queue::SegmentedQueue;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Configuration for a queue worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueWorkerConfig {
    /// Thread name. Default: `frameweave-queue`.
    pub name: String,
    /// Sleep between drain cycles. Default: 10 ms.
    pub poll_interval_ms: u64,
    /// Pause after each item; 0 only checks for stop. Default: 0.
    pub item_pause_us: u64,
    /// Items handled per cycle before sleeping; 0 drains fully. Default: 0.
    pub batch_limit: usize,
    /// Join timeout used when the worker is dropped. Default: 1000 ms.
    pub shutdown_timeout_ms: u64,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            name: String::from("frameweave-queue"),
            poll_interval_ms: 10,
            item_pause_us: 0,
            batch_limit: 0,
            shutdown_timeout_ms: 1000,
        }
    }
}

impl QueueWorkerConfig {
    pub fn with_poll_interval_ms(poll_interval_ms: u64) -> Self {
        Self {
            poll_interval_ms,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn item_pause(&self) -> Duration {
        Duration::from_micros(self.item_pause_us)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Handle to a running queue worker.
pub struct QueueWorker<T> {
    queue: Arc<SegmentedQueue<T>>,
    stop: Option<Sender<()>>,
    exited: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    metrics: Arc<Metrics>,
    config: QueueWorkerConfig,
}

impl<T: Send + 'static> QueueWorker<T> {
    /// Spawns the worker thread. `action` runs once per dequeued item.
    pub fn start<A, E>(
        queue: Arc<SegmentedQueue<T>>,
        config: QueueWorkerConfig,
        action: A,
    ) -> Result<Self>
    where
        A: FnMut(T) -> std::result::Result<(), E> + Send + 'static,
        E: Display,
    {
        if config.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(String::from(
                "poll interval must be at least 1 ms",
            )));
        }

        let (stop, stop_signal) = channel::bounded::<()>(1);
        let (exit_guard, exited) = channel::bounded::<()>(1);
        let metrics = Arc::new(Metrics::new());

        let thread_queue = Arc::clone(&queue);
        let thread_metrics = Arc::clone(&metrics);
        let thread_config = config.clone();
        let handle = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                // Dropped on exit, including unwinding, which tells `stop`
                // the thread is done.
                let _exit_guard = exit_guard;
                run_loop(
                    &thread_queue,
                    &thread_config,
                    &stop_signal,
                    &thread_metrics,
                    action,
                );
                debug!("{} stopped", thread_config.name);
            })?;

        debug!(
            "{} started, polling every {} ms",
            config.name, config.poll_interval_ms
        );
        Ok(QueueWorker {
            queue,
            stop: Some(stop),
            exited,
            handle: Some(handle),
            metrics,
            config,
        })
    }

    /// Pushes an item for the worker.
    pub fn enqueue(&self, item: T) {
        self.queue.enqueue(item);
    }

    /// The queue this worker drains.
    pub fn queue(&self) -> &Arc<SegmentedQueue<T>> {
        &self.queue
    }

    /// Items processed and failed so far.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether the thread is still running.
    pub fn is_running(&self) -> bool {
        matches!(self.exited.try_recv(), Err(TryRecvError::Empty))
    }

    /// Signals stop and joins the thread, waiting at most `timeout`.
    ///
    /// A thread stuck inside an action past the timeout is detached; Rust
    /// offers no way to kill it.
    pub fn stop(mut self, timeout: Duration) -> Result<()> {
        self.stop_inner(timeout)
    }
}

impl<T> QueueWorker<T> {
    fn stop_inner(&mut self, timeout: Duration) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        drop(self.stop.take());

        match self.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "{} did not stop within {:?}, detaching",
                    self.config.name, timeout
                );
                drop(handle);
                Err(Error::ShutdownTimeout(timeout))
            }
            _ => {
                if handle.join().is_err() {
                    error!("{} panicked outside of an action", self.config.name);
                }
                Ok(())
            }
        }
    }
}

impl<T> Drop for QueueWorker<T> {
    fn drop(&mut self) {
        let timeout = self.config.shutdown_timeout();
        let _ = self.stop_inner(timeout);
    }
}

fn run_loop<T, A, E>(
    queue: &SegmentedQueue<T>,
    config: &QueueWorkerConfig,
    stop: &Receiver<()>,
    metrics: &Metrics,
    mut action: A,
) where
    A: FnMut(T) -> std::result::Result<(), E>,
    E: Display,
{
    let poll_interval = config.poll_interval();
    let item_pause = config.item_pause();

    loop {
        let mut handled = 0;
        while let Some(item) = queue.try_dequeue() {
            match catch_unwind(AssertUnwindSafe(|| action(item))) {
                Ok(Ok(())) => metrics.record_item(true),
                Ok(Err(e)) => {
                    metrics.record_item(false);
                    warn!("{}: item failed: {}", config.name, e);
                }
                Err(payload) => {
                    metrics.record_item(false);
                    error!(
                        "{}: item panicked: {}",
                        config.name,
                        panic_message(payload.as_ref())
                    );
                }
            }
            handled += 1;

            if item_pause.is_zero() {
                if stop_requested(stop) {
                    return;
                }
            } else if wait_for_stop(stop, item_pause) {
                return;
            }
            if config.batch_limit > 0 && handled >= config.batch_limit {
                break;
            }
        }

        if wait_for_stop(stop, poll_interval) {
            return;
        }
    }
}

fn stop_requested(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

/// Sleeps up to `timeout`, returning early with true on stop.
fn wait_for_stop(stop: &Receiver<()>, timeout: Duration) -> bool {
    !matches!(stop.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}
