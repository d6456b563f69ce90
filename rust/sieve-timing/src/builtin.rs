//! Built-in factoring primitive.
//!
//! Splits a semiprime with `factoring_core::split` and reports the CPU time
//! it spent, the same contract an external sieve tool follows. It runs
//! either as the `factor` subcommand (process worker) or on a thread
//! (in-process worker).

use std::time::{Duration, Instant};

use num_bigint::BigUint;

use crate::worker::{CancelToken, ThreadPrimitive};

/// Which CPU clock a [`CpuStopwatch`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuClock {
    /// CPU time of the whole process.
    Process,
    /// CPU time of the calling thread only.
    Thread,
}

/// Measures CPU time, falling back to wall-clock time where the OS clock is
/// unavailable.
#[derive(Debug, Clone, Copy)]
pub struct CpuStopwatch {
    clock: CpuClock,
    cpu_start: Option<Duration>,
    wall_start: Instant,
}

impl CpuStopwatch {
    pub fn start(clock: CpuClock) -> Self {
        CpuStopwatch {
            clock,
            cpu_start: read_cpu_clock(clock),
            wall_start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        match (self.cpu_start, read_cpu_clock(self.clock)) {
            (Some(start), Some(now)) => now.saturating_sub(start),
            _ => self.wall_start.elapsed(),
        }
    }
}

#[cfg(unix)]
fn read_cpu_clock(clock: CpuClock) -> Option<Duration> {
    let id = match clock {
        CpuClock::Process => libc::CLOCK_PROCESS_CPUTIME_ID,
        CpuClock::Thread => libc::CLOCK_THREAD_CPUTIME_ID,
    };
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(id, &mut ts) };
    if rc != 0 {
        return None;
    }
    Some(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

#[cfg(not(unix))]
fn read_cpu_clock(_clock: CpuClock) -> Option<Duration> {
    None
}

/// Factor `n` on the current thread.
///
/// Returns the two factors and the CPU time spent, or `None` if `n` could
/// not be split (prime, too small) or `token` was raised.
pub fn factor_timed(
    n: &BigUint,
    token: &CancelToken,
    clock: CpuClock,
) -> Option<(BigUint, BigUint, Duration)> {
    let stopwatch = CpuStopwatch::start(clock);
    let (p, q) = factoring_core::split(n, token.as_flag())?;
    Some((p, q, stopwatch.elapsed()))
}

/// Thread routine: factor `n` and report thread CPU seconds as text.
pub fn factor_and_report(n: &BigUint, token: &CancelToken) -> Option<String> {
    let (p, q, cpu) = factor_timed(n, token, CpuClock::Thread)?;
    log::debug!("{} = {} * {} in {:?} CPU", n, p, q, cpu);
    Some(cpu.as_secs_f64().to_string())
}

/// The built-in routine as an in-process primitive.
pub fn thread_primitive() -> ThreadPrimitive {
    ThreadPrimitive::new("builtin-rho", factor_and_report)
}
