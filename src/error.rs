//! Error type shared by the queue, the fork-join pool and queue workers.
//!
//! Nothing in this crate treats an error as fatal: transient race artifacts
//! and per-item failures are logged and skipped where they happen. The
//! variants below only surface at lifecycle boundaries (spawning, stopping)
//! and from the bounded queue snapshot.

use std::time::Duration;
use thiserror::Error;

/// Main error type for frameweave operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An OS thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A bounded `len` snapshot kept observing concurrent writes.
    #[error("queue snapshot still torn after {attempts} attempts")]
    SnapshotContended { attempts: usize },

    /// One or more pool workers panicked outside of a guarded callback.
    #[error("{0} worker thread(s) panicked")]
    WorkersPanicked(usize),

    /// A parallel call was issued after the workers exited.
    #[error("worker pool has stopped")]
    PoolStopped,

    /// A queue worker did not acknowledge stop in time and was detached.
    #[error("worker did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    /// Configuration rejected before any thread was started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Renders a panic payload the way worker loops log it.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
