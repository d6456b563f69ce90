//! Adaptive-timeout timing harness for semiprime factoring primitives.
//!
//! Feeds `(semiprime, hamming_distance, p, q)` tuples one at a time to a
//! factoring primitive running in an isolated worker, bounds each run by
//! `previous_duration * multiplier`, and writes one `(duration_or_NA, n,
//! hd, p, q)` line per tuple.

pub mod budget;
pub mod builtin;
pub mod config;
pub mod error;
pub mod harness;
pub mod interrupt;
pub mod record;
pub mod task;
pub mod worker;

pub use budget::AdaptiveTimeout;
pub use config::{HarnessConfig, TimingSource};
pub use error::HarnessError;
pub use harness::{BatchSummary, Harness, TaskState};
pub use record::{TimingOutcome, TimingRecord};
pub use task::{read_tasks, TaskInput};
pub use worker::{CommandPrimitive, FactoringPrimitive, ThreadPrimitive, Worker, WorkerExit};
