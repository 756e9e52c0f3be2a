//! # Execution Contexts
//!
//! Where a participant callback runs.
//!
//! | Strategy | Context | Ordering |
//! |----------|---------|----------|
//! | `Immediate` | caller thread | call order |
//! | `ThreadPool` | shared rayon pool | none |
//! | `AnyWorker` | bus-wide dedicated worker set, round-robin | none across workers |
//! | `DedicatedWorker` | one thread owned by the registration | FIFO |
//! | `DedicatedThreads(n)` | n threads owned by the registration, round-robin | none across threads |
//! | `Thread(id)` | an existing dedicated worker | FIFO |

mod dedicated;
mod pool;

pub use pool::{
    ManagedThreadReport, ManagedThreadToken, ThreadReport, WorkerPool, WorkerReport,
};

pub(crate) use pool::{ExecutionTarget, WorkerGroup};

use serde::Serialize;
use std::fmt;

/// A unit of work queued onto an execution context.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Stable id of a dedicated worker, unique per [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(pub(crate) u32);

impl WorkerId {
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a registration's callback is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Run synchronously on the publishing thread.
    #[default]
    Immediate,
    /// Run on the shared pool.
    ThreadPool,
    /// Run on any of the bus's shared dedicated workers.
    AnyWorker,
    /// Run on a new dedicated thread owned by this registration.
    DedicatedWorker,
    /// Run on `n` new dedicated threads owned by this registration.
    DedicatedThreads(usize),
    /// Run on an existing dedicated worker.
    Thread(WorkerId),
}
