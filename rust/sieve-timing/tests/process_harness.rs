//! Integration tests for the harness driving real child processes.
//!
//! Tests cover:
//! - Completed, timed-out and crashed process workers
//! - No process survives `measure` on the completed or the timed-out path
//! - Helpers forked by the primitive are cleaned up with it
//! - Interrupts mid-batch keep already-written records

#![cfg(unix)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use num_bigint::BigUint;

use sieve_timing::{
    CommandPrimitive, Harness, HarnessConfig, TaskInput, TimingOutcome, TimingRecord,
};

fn config() -> HarnessConfig {
    HarnessConfig {
        min_budget_secs: 0.0,
        poll_interval_ms: 5,
        kill_grace_ms: 100,
        ..Default::default()
    }
}

fn shell(script: &str) -> CommandPrimitive {
    CommandPrimitive::new("sh", ["-c", script]).with_kill_grace(Duration::from_millis(100))
}

fn task_91() -> TaskInput {
    TaskInput::from_factors(BigUint::from(7u32), BigUint::from(13u32))
}

fn read_pid(path: &Path) -> libc::pid_t {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        assert!(Instant::now() < deadline, "pid file {} never written", path.display());
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Whether `pid` is a live (non-zombie) process.
fn is_alive(pid: libc::pid_t) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // Format: "pid (comm) S ..."; the state follows the last ')'.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .map_or(false, |state| state != 'Z' && state != 'X'),
        Err(_) if Path::new("/proc/self/stat").exists() => false,
        Err(_) => unsafe { libc::kill(pid, 0) == 0 },
    }
}

/// Whether `pid` is still alive after a short settling period. Orphaned
/// helpers are reparented, so they may linger as zombies we cannot reap.
fn still_exists(pid: libc::pid_t) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if !is_alive(pid) {
            return false;
        }
        if Instant::now() >= deadline {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_process_reports_duration() {
    let harness = Harness::new(shell("echo sieving $0 >&2; echo 0.42"), config()).unwrap();
    assert_eq!(harness.measure(&task_91(), None), TimingOutcome::Completed(0.42));
}

#[test]
fn test_process_without_report_is_failed() {
    let harness = Harness::new(shell("echo 7 13"), config()).unwrap();
    assert!(matches!(harness.measure(&task_91(), None), TimingOutcome::Failed(_)));
}

#[test]
fn test_crashing_process_is_failed() {
    let harness = Harness::new(shell("echo 0.1; kill -9 $$"), config()).unwrap();
    assert!(matches!(harness.measure(&task_91(), None), TimingOutcome::Failed(_)));
}

#[test]
fn test_missing_program_is_failed() {
    let primitive = CommandPrimitive::new("/nonexistent/qsieve", ["{n}"]);
    let harness = Harness::new(primitive, config()).unwrap();
    assert!(matches!(harness.measure(&task_91(), None), TimingOutcome::Failed(_)));
}

#[test]
fn test_timed_out_process_is_reaped() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("worker.pid");
    let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());

    // 0.02s * 10 = 200ms budget.
    let harness = Harness::new(shell(&script), config()).unwrap();
    let started = Instant::now();
    assert_eq!(harness.measure(&task_91(), Some(0.02)), TimingOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));

    let pid = read_pid(&pid_file);
    assert!(!still_exists(pid), "worker {} outlived measure", pid);
}

#[test]
fn test_timeout_kills_forked_helpers() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

    let harness = Harness::new(shell(&script), config()).unwrap();
    assert_eq!(harness.measure(&task_91(), Some(0.02)), TimingOutcome::TimedOut);

    let helper = read_pid(&pid_file);
    assert!(!still_exists(helper), "helper {} outlived measure", helper);
}

#[test]
fn test_completed_process_leaves_no_helpers() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("helper.pid");
    // Exits straight away but leaves a background helper in its group.
    let script = format!("sleep 30 & echo $! > {}; echo 0.3", pid_file.display());

    let harness = Harness::new(shell(&script), config()).unwrap();
    assert_eq!(harness.measure(&task_91(), None), TimingOutcome::Completed(0.3));

    let helper = read_pid(&pid_file);
    assert!(!still_exists(helper), "helper {} outlived measure", helper);
}

#[test]
fn test_default_config_enforces_previous_times_multiplier() {
    // 0.01s * 10 = 100ms; a 0.5s run must be cut off.
    let harness = Harness::new(shell("sleep 0.5; echo 0.5"), HarnessConfig::default()).unwrap();
    assert_eq!(harness.measure(&task_91(), Some(0.01)), TimingOutcome::TimedOut);
}

#[test]
fn test_slow_process_completes_without_previous() {
    let harness = Harness::new(shell("sleep 0.5; echo 0.5"), config()).unwrap();
    assert_eq!(harness.measure(&task_91(), None), TimingOutcome::Completed(0.5));
}

#[test]
fn test_interrupt_mid_batch_keeps_written_records() {
    // 15 finishes at once; 91 hangs until the interrupt arrives.
    let primitive = shell(r#"if [ "$0" = 91 ]; then exec sleep 30; fi; echo 0.01"#);
    let harness = Harness::new(
        primitive,
        HarnessConfig {
            min_budget_secs: 60.0,
            ..config()
        },
    )
    .unwrap();

    let inputs = vec![
        Ok(TaskInput::from_factors(BigUint::from(3u32), BigUint::from(5u32))),
        Ok(task_91()),
        Ok(TaskInput::from_factors(BigUint::from(13u32), BigUint::from(17u32))),
    ];

    let stop = Arc::new(AtomicBool::new(false));
    let raiser = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            stop.store(true, Ordering::Relaxed);
        })
    };

    let mut sink = Vec::new();
    let summary = harness.run_batch(inputs, &mut sink, &stop).unwrap();
    raiser.join().unwrap();

    assert!(summary.interrupted);
    let text = String::from_utf8(sink).unwrap();
    let records: Vec<TimingRecord> = text.lines().map(|l| l.parse().unwrap()).collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].seconds, Some(0.01));
    assert_eq!(records[0].input.semiprime, BigUint::from(15u32));
}
