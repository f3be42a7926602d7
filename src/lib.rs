//! # frameweave - Concurrency Substrate for Per-Frame Game Simulation
//!
//! The pieces a real-time strategy simulation needs to spread its per-entity
//! work (steering, pathfinding, turret logic) over a handful of cores every
//! frame, and to pass notifications between threads without locks.
//!
//! ## Architecture
//!
//! - **SpinBackoff**: adaptive spin/yield/sleep wait used by every lock-free
//!   retry loop
//! - **SegmentedQueue**: unbounded lock-free MPMC FIFO made of linked
//!   32-slot segments
//! - **ForkJoinPool**: persistent worker threads that split an index range
//!   into contiguous partitions and block the caller on a reusable latch
//! - **LoopDispatcher**: adapts an entity collection and a per-entity body
//!   to the pool, skipping dormant entities
//! - **QueueWorker**: background thread draining a queue at its own cadence
//!
//! ## Example
//!
//! ```no_run
//! use frameweave::{ForkJoinPool, LoopDispatcher, Residency, Resident};
//!
//! struct Unit {
//!     residency: Residency,
//!     heading: f32,
//! }
//!
//! impl Resident for Unit {
//!     fn residency(&self) -> Residency {
//!         self.residency
//!     }
//! }
//!
//! let mut pool = ForkJoinPool::new(4).unwrap();
//! let mut steering = LoopDispatcher::new(|unit: &mut Unit| unit.heading += 0.1);
//! steering.add(Unit { residency: Residency::Active, heading: 0.0 });
//!
//! // Once per simulation frame:
//! steering.run_one_frame(&mut pool).unwrap();
//! ```

pub mod backoff;
pub mod counter;
pub mod dispatcher;
pub mod error;
pub mod fork_join;
pub mod iter;
pub mod metrics;
pub mod partition;
pub mod queue;
pub mod queue_worker;
pub mod topology;
pub mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to even-numbered logical processors only, one per physical core
    /// on typical SMT layouts.
    AvoidSMT,
}

impl PinningStrategy {
    /// Index into the host's core list for worker `worker_id`, or `None` if
    /// the worker should not be pinned.
    pub fn core_for(self, worker_id: usize, available: usize) -> Option<usize> {
        if available == 0 {
            return None;
        }
        match self {
            PinningStrategy::None => None,
            PinningStrategy::Linear => Some(worker_id % available),
            PinningStrategy::AvoidSMT => {
                let slot = worker_id * 2;
                if slot < available {
                    Some(slot)
                } else {
                    Some(worker_id % available)
                }
            }
        }
    }
}

pub use backoff::{BackoffStep, SpinBackoff};
pub use counter::Counter;
pub use dispatcher::{LoopDispatcher, Residency, Resident};
pub use error::{Error, Result};
pub use fork_join::{ForkJoinPool, PoolConfig};
pub use queue::{SEGMENT_CAPACITY, SegmentedQueue};
pub use queue_worker::{QueueWorker, QueueWorkerConfig};
pub use worker::WorkerState;
