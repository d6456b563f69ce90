//! External factoring commands run as child processes.
//!
//! Each task spawns the configured command in its own process group, so a
//! primitive that forks helpers can be stopped as a unit: SIGTERM to the
//! group, a grace period, then SIGKILL. The child is always reaped before
//! the worker is released.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use num_bigint::BigUint;

use super::{FactoringPrimitive, Worker, WorkerExit};
use crate::error::HarnessError;

/// Argument placeholder replaced by the semiprime.
pub const N_PLACEHOLDER: &str = "{n}";

const POLL_STEP: Duration = Duration::from_millis(5);

/// A factoring primitive backed by an external command line.
///
/// Every `{n}` in the arguments is replaced by the number to factor. If no
/// argument mentions `{n}`, the number is appended as the last argument.
#[derive(Debug, Clone)]
pub struct CommandPrimitive {
    program: String,
    args: Vec<String>,
    kill_grace: Duration,
}

impl CommandPrimitive {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandPrimitive {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            kill_grace: Duration::from_millis(200),
        }
    }

    /// Build from `[program, arg, ...]`.
    pub fn from_command_line(words: &[String]) -> Result<Self, HarnessError> {
        let (program, args) = words.split_first().ok_or_else(|| {
            HarnessError::InvalidConfig("factoring command must not be empty".to_string())
        })?;
        Ok(CommandPrimitive::new(program.clone(), args.iter().cloned()))
    }

    /// Time between SIGTERM and SIGKILL on teardown.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Arguments for factoring `n`.
    pub fn render_args(&self, n: &BigUint) -> Vec<String> {
        let n_str = n.to_string();
        if self.args.iter().any(|a| a.contains(N_PLACEHOLDER)) {
            self.args
                .iter()
                .map(|a| a.replace(N_PLACEHOLDER, &n_str))
                .collect()
        } else {
            let mut args = self.args.clone();
            args.push(n_str);
            args
        }
    }
}

impl FactoringPrimitive for CommandPrimitive {
    type Worker = ProcessWorker;

    fn launch(&self, n: &BigUint) -> Result<ProcessWorker, HarnessError> {
        let args = self.render_args(n);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // New process group so helpers forked by the primitive die with it.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(HarnessError::Spawn)?;
        log::debug!("Spawned {} {:?} as pid {}", self.program, args, child.id());

        // Drain both pipes on their own threads so a chatty primitive can
        // never block on a full pipe while the harness is waiting on it.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        Ok(ProcessWorker {
            child,
            stdout,
            stderr,
            kill_grace: self.kill_grace,
            reaped: false,
            released: false,
        })
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// A running factoring command.
pub struct ProcessWorker {
    child: Child,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
    kill_grace: Duration,
    /// Exit status collected; the pid may now be reused.
    reaped: bool,
    /// Group stopped and pipes joined; nothing left to clean up.
    released: bool,
}

impl ProcessWorker {
    /// OS process id of the command (also its process group id on Unix).
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> bool {
        let pgid = self.child.id() as libc::pid_t;
        unsafe { libc::kill(-pgid, signal) == 0 }
    }

    /// SIGTERM the group, wait up to the grace period, then SIGKILL.
    fn stop_group(&mut self) {
        #[cfg(unix)]
        {
            if !self.signal_group(0) {
                return;
            }
            self.signal_group(libc::SIGTERM);
            let deadline = Instant::now() + self.kill_grace;
            while Instant::now() < deadline {
                if !self.reaped {
                    if let Ok(Some(_)) = self.child.try_wait() {
                        self.reaped = true;
                    }
                }
                if self.reaped && !self.signal_group(0) {
                    return;
                }
                std::thread::sleep(POLL_STEP);
            }
            log::debug!("Process group {} ignored SIGTERM, sending SIGKILL", self.child.id());
            self.signal_group(libc::SIGKILL);
        }
    }

    fn reap(&mut self) {
        if !self.reaped {
            // Covers a leader that left our process group on its own.
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.reaped = true;
        }
    }

    fn collect_output(&mut self) -> (String, String) {
        let join = |handle: Option<JoinHandle<String>>| {
            handle.and_then(|h| h.join().ok()).unwrap_or_default()
        };
        (join(self.stdout.take()), join(self.stderr.take()))
    }

    fn release(&mut self) -> (String, String) {
        self.stop_group();
        self.reap();
        let output = self.collect_output();
        self.released = true;
        output
    }
}

impl Worker for ProcessWorker {
    fn poll(&mut self, slice: Duration) -> Option<WorkerExit> {
        if self.released {
            return Some(WorkerExit::Crashed("worker already released".to_string()));
        }
        let deadline = Instant::now() + slice;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.reaped = true;
                    let (stdout, stderr) = self.release();
                    if !stderr.trim().is_empty() {
                        log::debug!("Worker stderr: {}", stderr.trim());
                    }
                    return Some(if status.success() {
                        WorkerExit::Finished(Some(stdout))
                    } else {
                        WorkerExit::Crashed(format!("factoring command exited with {}", status))
                    });
                }
                Ok(None) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    std::thread::sleep(POLL_STEP.min(deadline - now));
                }
                Err(e) => {
                    return Some(WorkerExit::Crashed(format!("failed to wait on worker: {}", e)));
                }
            }
        }
    }

    fn terminate(&mut self) {
        if self.released {
            return;
        }
        log::debug!("Terminating worker pid {}", self.child.id());
        let _ = self.release();
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}
