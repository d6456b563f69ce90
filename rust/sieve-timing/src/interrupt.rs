//! Operator interrupts (SIGINT / SIGTERM).
//!
//! The handler only raises a flag. The batch loop notices it between poll
//! slices, also while waiting for input, then stops the running worker and
//! flushes the sink.

use std::sync::atomic::{AtomicBool, Ordering};

/// Raised by the signal handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// The process-wide interrupt flag, suitable for `Harness::run_batch`.
pub fn flag() -> &'static AtomicBool {
    &INTERRUPTED
}

/// Route SIGINT and SIGTERM to the interrupt flag.
#[cfg(unix)]
pub fn install_handlers() {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = on_signal as *const () as usize;
            sa.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut sa.sa_mask);
            if libc::sigaction(signal, &sa, std::ptr::null_mut()) != 0 {
                log::warn!("Could not install handler for signal {}", signal);
            }
        }
    }
}

#[cfg(unix)]
extern "C" fn on_signal(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// No-op on non-Unix.
#[cfg(not(unix))]
pub fn install_handlers() {}
