//! In-process factoring routines run on a dedicated thread.
//!
//! Threads cannot be killed, so cancellation is cooperative: the routine
//! receives a [`CancelToken`] and must return soon after it is raised.
//! Termination raises the token and joins the thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use num_bigint::BigUint;

use super::{FactoringPrimitive, Worker, WorkerExit};
use crate::error::HarnessError;

/// Shared stop flag handed to a thread routine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// The underlying flag, for routines that poll an `AtomicBool` directly.
    pub fn as_flag(&self) -> &AtomicBool {
        &self.0
    }

    /// Sleep for `duration` unless cancelled first. Returns `true` if the
    /// full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }
}

/// How long a cancelled routine may run on before it is reported.
const SLOW_CANCEL_WARNING: Duration = Duration::from_secs(1);

type Routine = dyn Fn(&BigUint, &CancelToken) -> Option<String> + Send + Sync;

/// A factoring primitive that runs a Rust closure on a fresh thread.
///
/// The closure returns its own textual report (normally a duration in
/// seconds) or `None` when it has nothing to report. It must check its
/// [`CancelToken`] regularly: a routine that ignores it keeps the harness
/// waiting past the budget, since termination joins the thread.
#[derive(Clone)]
pub struct ThreadPrimitive {
    name: String,
    routine: Arc<Routine>,
}

impl ThreadPrimitive {
    pub fn new<F>(name: impl Into<String>, routine: F) -> Self
    where
        F: Fn(&BigUint, &CancelToken) -> Option<String> + Send + Sync + 'static,
    {
        ThreadPrimitive {
            name: name.into(),
            routine: Arc::new(routine),
        }
    }
}

impl FactoringPrimitive for ThreadPrimitive {
    type Worker = ThreadWorker;

    fn launch(&self, n: &BigUint) -> Result<ThreadWorker, HarnessError> {
        // One-shot channel: the routine's report is sent at most once.
        let (tx, rx) = mpsc::channel();
        let token = CancelToken::new();

        let routine = Arc::clone(&self.routine);
        let worker_token = token.clone();
        let n = n.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || {
                let report = routine(&n, &worker_token);
                let _ = tx.send(report);
            })
            .map_err(HarnessError::Spawn)?;

        Ok(ThreadWorker {
            handle: Some(handle),
            rx,
            token,
        })
    }

    fn describe(&self) -> String {
        format!("in-process {}", self.name)
    }
}

/// A routine running on its own thread.
pub struct ThreadWorker {
    handle: Option<JoinHandle<()>>,
    rx: Receiver<Option<String>>,
    token: CancelToken,
}

impl ThreadWorker {
    /// Whether the worker thread has been joined.
    pub fn is_joined(&self) -> bool {
        self.handle.is_none()
    }

    /// Wait for a cancelled routine to return, warning once if it is slow
    /// to notice the token.
    fn wait_for_exit(&self) {
        let Some(handle) = &self.handle else {
            return;
        };
        let started = Instant::now();
        let mut warned = false;
        while !handle.is_finished() {
            if !warned && started.elapsed() >= SLOW_CANCEL_WARNING {
                log::warn!(
                    "Worker thread {:?} ignored cancellation for {:?}; still waiting",
                    handle.thread().name().unwrap_or("unnamed"),
                    SLOW_CANCEL_WARNING
                );
                warned = true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Join the thread; returns `true` if it panicked.
    fn join(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => handle.join().is_err(),
            None => false,
        }
    }
}

impl Worker for ThreadWorker {
    fn poll(&mut self, slice: Duration) -> Option<WorkerExit> {
        match self.rx.recv_timeout(slice) {
            Ok(report) => {
                self.join();
                Some(WorkerExit::Finished(report))
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                let reason = if self.join() {
                    "worker thread panicked"
                } else {
                    "worker thread exited without reporting"
                };
                Some(WorkerExit::Crashed(reason.to_string()))
            }
        }
    }

    fn terminate(&mut self) {
        self.token.cancel();
        self.wait_for_exit();
        self.join();
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}
