//! Isolated execution contexts for factoring primitives.
//!
//! A [`FactoringPrimitive`] launches one [`Worker`] per task. The harness
//! polls the worker in short slices and tears it down with
//! [`Worker::terminate`] whatever the outcome, so no worker outlives the
//! task that created it.

use std::time::Duration;

use num_bigint::BigUint;

use crate::error::HarnessError;

pub mod process;
pub mod thread;

pub use process::{CommandPrimitive, ProcessWorker};
pub use thread::{CancelToken, ThreadPrimitive, ThreadWorker};

/// How a worker ended, as seen by the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Ran to completion. Carries whatever the worker reported (stdout for
    /// processes), which may or may not contain a duration.
    Finished(Option<String>),
    /// Died abnormally: non-zero exit, signal, or panic.
    Crashed(String),
}

/// A running unit of work.
pub trait Worker {
    /// Wait up to `slice` for the worker to finish.
    ///
    /// Returns `None` while the worker is still running. Once `Some` has
    /// been returned the worker is done and further polls are unspecified.
    fn poll(&mut self, slice: Duration) -> Option<WorkerExit>;

    /// Stop the worker and release everything it holds.
    ///
    /// Safe to call more than once and after the worker finished.
    fn terminate(&mut self);
}

/// Something that can factor a number inside a fresh worker.
pub trait FactoringPrimitive {
    type Worker: Worker;

    /// Start factoring `n` in a new worker.
    fn launch(&self, n: &BigUint) -> Result<Self::Worker, HarnessError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}
