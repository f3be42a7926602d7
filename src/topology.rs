//! Processor topology used to size the worker pool and pick backoff paths.

use lazy_static::lazy_static;
use sysinfo::{CpuRefreshKind, System};

lazy_static! {
    static ref TOPOLOGY: Topology = Topology::detect();
}

#[derive(Debug, Clone)]
pub struct Topology {
    /// Logical processors visible to this process.
    pub logical_processors: usize,
}

impl Topology {
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_cpu_specifics(CpuRefreshKind::everything());

        // sysinfo reports an empty list on some sandboxed hosts.
        let reported = system.cpus().len();
        let logical_processors = if reported > 0 {
            reported
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };

        Topology { logical_processors }
    }

    /// Cached topology of the host, detected once per process.
    pub fn current() -> &'static Topology {
        &TOPOLOGY
    }

    /// Whether spinning can make progress, i.e. another processor exists to
    /// run the thread being waited on.
    pub fn is_multiprocessor(&self) -> bool {
        self.logical_processors > 1
    }
}

/// Logical processor count of the host.
pub fn logical_processors() -> usize {
    Topology::current().logical_processors
}
