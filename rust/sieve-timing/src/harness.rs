//! The timed execution harness.
//!
//! `measure` runs one task under a budget. `run_batch` runs a sequence of
//! tasks strictly in order, feeding each outcome into the next task's
//! budget and writing one record per task to the sink before the next
//! task starts.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::budget::AdaptiveTimeout;
use crate::config::{HarnessConfig, TimingSource};
use crate::error::HarnessError;
use crate::record::{parse_reported_seconds, TimingOutcome, TimingRecord};
use crate::task::TaskInput;
use crate::worker::{FactoringPrimitive, Worker, WorkerExit};

/// Lifecycle of a single task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    Running,
    Done(TimingOutcome),
}

impl TaskState {
    /// Cancellation is only meaningful while a worker is running.
    pub fn can_cancel(&self) -> bool {
        matches!(self, TaskState::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Done(outcome) => write!(f, "{}", outcome),
        }
    }
}

/// Counts for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub completed: usize,
    pub timed_out: usize,
    pub failed: usize,
    /// Input lines that could not be parsed.
    pub skipped: usize,
    /// The batch stopped early on an interrupt.
    pub interrupted: bool,
}

impl BatchSummary {
    /// Records written to the sink.
    pub fn written(&self) -> usize {
        self.completed + self.timed_out + self.failed
    }

    fn count(&mut self, outcome: &TimingOutcome) {
        match outcome {
            TimingOutcome::Completed(_) => self.completed += 1,
            TimingOutcome::TimedOut => self.timed_out += 1,
            TimingOutcome::Failed(_) => self.failed += 1,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} timed out, {} failed, {} skipped{}",
            self.completed,
            self.timed_out,
            self.failed,
            self.skipped,
            if self.interrupted { " (interrupted)" } else { "" }
        )
    }
}

/// Runs a factoring primitive under adaptive timeouts.
pub struct Harness<P> {
    primitive: P,
    config: HarnessConfig,
}

impl<P: FactoringPrimitive> Harness<P> {
    pub fn new(primitive: P, config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        Ok(Harness { primitive, config })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Measure one task.
    ///
    /// `previous` is the duration of the preceding task in seconds, or
    /// `None` if there was none (or it was `NA`). Never fails: worker
    /// problems come back as `TimedOut` or `Failed`.
    pub fn measure(&self, input: &TaskInput, previous: Option<f64>) -> TimingOutcome {
        let budget = AdaptiveTimeout::new(&self.config).budget_after(previous);
        let never = AtomicBool::new(false);
        self.run_task(input, budget, &never)
            .unwrap_or(TimingOutcome::TimedOut)
    }

    /// Measure every task from `inputs` in order, writing one record per task.
    ///
    /// Inputs are pulled on a reader thread, so a raised `stop` is noticed
    /// even while the next line has not arrived yet. Unparseable input lines
    /// are logged and skipped. When `stop` is raised the running worker is
    /// torn down, nothing is written for that task, and the batch returns
    /// with `interrupted` set. The sink is flushed after every record and
    /// before returning, on every path.
    pub fn run_batch<I, W>(
        &self,
        inputs: I,
        sink: &mut W,
        stop: &AtomicBool,
    ) -> Result<BatchSummary, HarnessError>
    where
        I: IntoIterator<Item = Result<TaskInput, HarnessError>>,
        I::IntoIter: Send + 'static,
        W: Write,
    {
        let feed = spawn_feed(inputs)?;
        let mut timeout = AdaptiveTimeout::new(&self.config);
        let mut summary = BatchSummary::default();

        log::info!(
            "Timing {} (multiplier {}, ceiling {:?})",
            self.primitive.describe(),
            self.config.multiplier,
            self.config.ceiling()
        );

        while let Some(item) = self.next_input(&feed, stop) {
            let input = match item {
                Ok(input) => input,
                Err(HarnessError::InvalidInput { line, reason }) => {
                    log::warn!("Skipping input line {}: {}", line, reason);
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    sink.flush()?;
                    return Err(e);
                }
            };

            for problem in input.metadata_mismatches() {
                log::warn!("Task {}: {}", input.semiprime, problem);
            }

            let budget = timeout.budget();
            log::info!(
                "Task {} (hamming distance {}): budget {}",
                input.semiprime,
                input.hamming_distance,
                describe_budget(budget)
            );

            let Some(outcome) = self.run_task(&input, budget, stop) else {
                break;
            };

            log::info!("Task {}: {}", input.semiprime, outcome);
            timeout.observe(&outcome);
            summary.count(&outcome);

            let record = TimingRecord::new(&outcome, input);
            writeln!(sink, "{}", record)?;
            sink.flush()?;
        }

        sink.flush()?;
        summary.interrupted = stop.load(Ordering::Relaxed);
        if summary.interrupted {
            log::warn!("Batch interrupted after {} records", summary.written());
        }
        Ok(summary)
    }

    /// Wait for the next input, giving up as soon as `stop` is raised.
    /// `None` means the input ended or the batch was stopped.
    fn next_input(
        &self,
        feed: &Receiver<Result<TaskInput, HarnessError>>,
        stop: &AtomicBool,
    ) -> Option<Result<TaskInput, HarnessError>> {
        loop {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            match feed.recv_timeout(self.config.poll_interval()) {
                Ok(item) => return Some(item),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Launch, wait and tear down one worker. `None` means `stop` was raised.
    fn run_task(
        &self,
        input: &TaskInput,
        budget: Option<Duration>,
        stop: &AtomicBool,
    ) -> Option<TimingOutcome> {
        let mut state = TaskState::Pending;
        let start = Instant::now();
        // An unrepresentable deadline is as good as no deadline.
        let deadline = budget.and_then(|b| start.checked_add(b));

        let mut worker = match self.primitive.launch(&input.semiprime) {
            Ok(worker) => worker,
            Err(e) => {
                log::warn!("Task {}: {}", input.semiprime, e);
                return Some(TimingOutcome::Failed(e.to_string()));
            }
        };
        state = advance(state, TaskState::Running);

        let poll_interval = self.config.poll_interval();
        let exit = loop {
            if stop.load(Ordering::Relaxed) && state.can_cancel() {
                log::debug!("Task {}: interrupted while {}", input.semiprime, state);
                worker.terminate();
                return None;
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break None;
                    }
                    (deadline - now).min(poll_interval)
                }
                None => poll_interval,
            };

            if let Some(exit) = worker.poll(slice) {
                break Some(exit);
            }
        };
        let elapsed = start.elapsed();

        // Runs on every path, so no worker outlives this call.
        worker.terminate();

        let outcome = match exit {
            None => TimingOutcome::TimedOut,
            Some(WorkerExit::Crashed(reason)) => {
                log::warn!("Task {}: worker crashed: {}", input.semiprime, reason);
                TimingOutcome::Failed(reason)
            }
            Some(WorkerExit::Finished(report)) => self.resolve(report.as_deref(), elapsed),
        };

        if let TimingOutcome::Failed(reason) = &outcome {
            log::debug!("Task {}: not available ({})", input.semiprime, reason);
        }
        let state = advance(state, TaskState::Done(outcome));
        match state {
            TaskState::Done(outcome) => Some(outcome),
            _ => unreachable!("task must end in a terminal state"),
        }
    }

    fn resolve(&self, report: Option<&str>, elapsed: Duration) -> TimingOutcome {
        match self.config.timing_source {
            TimingSource::WallClock => TimingOutcome::Completed(elapsed.as_secs_f64()),
            TimingSource::Reported => match report.and_then(parse_reported_seconds) {
                Some(secs) => TimingOutcome::Completed(secs),
                None => {
                    log::warn!("Worker finished without a parseable duration");
                    TimingOutcome::Failed("no parseable duration in worker output".to_string())
                }
            },
        }
    }
}

fn advance(from: TaskState, to: TaskState) -> TaskState {
    debug_assert!(
        matches!(
            (&from, &to),
            (TaskState::Pending, TaskState::Running) | (TaskState::Running, TaskState::Done(_))
        ),
        "illegal task transition {} -> {}",
        from,
        to
    );
    to
}

/// Inputs buffered ahead of the running task.
const FEED_DEPTH: usize = 16;

/// Pull `inputs` on a reader thread. The thread ends when the inputs run
/// out or the receiver is dropped; a reader blocked on a quiet stream is
/// left behind and dies with the process.
fn spawn_feed<I>(inputs: I) -> Result<Receiver<Result<TaskInput, HarnessError>>, HarnessError>
where
    I: IntoIterator<Item = Result<TaskInput, HarnessError>>,
    I::IntoIter: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(FEED_DEPTH);
    let items = inputs.into_iter();
    std::thread::Builder::new()
        .name("task-feed".to_string())
        .spawn(move || {
            for item in items {
                if tx.send(item).is_err() {
                    break;
                }
            }
        })
        .map_err(HarnessError::Spawn)?;
    Ok(rx)
}

fn describe_budget(budget: Option<Duration>) -> String {
    match budget {
        Some(b) => format!("{:.3}s", b.as_secs_f64()),
        None => "unbounded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{CancelToken, ThreadPrimitive};
    use num_bigint::BigUint;

    fn config() -> HarnessConfig {
        HarnessConfig {
            min_budget_secs: 0.0,
            poll_interval_ms: 5,
            ..Default::default()
        }
    }

    fn task(p: u32, q: u32) -> TaskInput {
        TaskInput::from_factors(BigUint::from(p), BigUint::from(q))
    }

    /// Sleeps `millis`, then reports `secs`.
    fn sleeper(millis: u64, secs: &'static str) -> ThreadPrimitive {
        ThreadPrimitive::new("sleeper", move |_: &BigUint, token: &CancelToken| {
            if token.sleep(Duration::from_millis(millis)) {
                Some(secs.to_string())
            } else {
                None
            }
        })
    }

    #[test]
    fn test_unbounded_first_task_completes() {
        let harness = Harness::new(sleeper(300, "0.3"), config()).unwrap();
        assert_eq!(harness.measure(&task(7, 13), None), TimingOutcome::Completed(0.3));
    }

    #[test]
    fn test_within_budget_returns_duration() {
        // previous 1.0s * 10 = 10s budget; worker takes 50ms.
        let harness = Harness::new(sleeper(50, "0.05"), config()).unwrap();
        assert_eq!(harness.measure(&task(7, 13), Some(1.0)), TimingOutcome::Completed(0.05));
    }

    #[test]
    fn test_over_budget_times_out_quickly() {
        // previous 0.01s * 10 = 100ms budget; worker would take 30s.
        let harness = Harness::new(sleeper(30_000, "30"), config()).unwrap();
        let started = Instant::now();
        assert_eq!(harness.measure(&task(7, 13), Some(0.01)), TimingOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_outcome_class_is_repeatable() {
        let fast = Harness::new(sleeper(10, "0.01"), config()).unwrap();
        let slow = Harness::new(sleeper(10_000, "10"), config()).unwrap();
        for _ in 0..3 {
            assert!(fast.measure(&task(3, 5), Some(1.0)).is_available());
            assert!(!slow.measure(&task(3, 5), Some(0.005)).is_available());
        }
    }

    #[test]
    fn test_missing_or_garbled_report_is_failed() {
        let silent = ThreadPrimitive::new("silent", |_: &BigUint, _: &CancelToken| None);
        let garbled = ThreadPrimitive::new("garbled", |_: &BigUint, _: &CancelToken| {
            Some("Factors: 7 13".to_string())
        });
        let input = task(7, 13);
        assert!(matches!(
            Harness::new(silent, config()).unwrap().measure(&input, None),
            TimingOutcome::Failed(_)
        ));
        assert!(matches!(
            Harness::new(garbled, config()).unwrap().measure(&input, None),
            TimingOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_panicking_worker_is_failed() {
        let primitive = ThreadPrimitive::new("panics", |_: &BigUint, _: &CancelToken| -> Option<String> {
            panic!("sieve exploded")
        });
        let harness = Harness::new(primitive, config()).unwrap();
        assert!(matches!(harness.measure(&task(7, 13), None), TimingOutcome::Failed(_)));
    }

    #[test]
    fn test_wall_clock_source_ignores_report() {
        let primitive = ThreadPrimitive::new("silent", |_: &BigUint, token: &CancelToken| {
            token.sleep(Duration::from_millis(20));
            None
        });
        let harness = Harness::new(
            primitive,
            HarnessConfig {
                timing_source: TimingSource::WallClock,
                ..config()
            },
        )
        .unwrap();
        match harness.measure(&task(7, 13), None) {
            TimingOutcome::Completed(secs) => assert!(secs >= 0.02, "{}", secs),
            other => panic!("expected a duration, got {:?}", other),
        }
    }

    #[test]
    fn test_ceiling_bounds_first_task() {
        let harness = Harness::new(
            sleeper(30_000, "30"),
            HarnessConfig {
                ceiling_secs: Some(0.1),
                ..config()
            },
        )
        .unwrap();
        assert_eq!(harness.measure(&task(7, 13), None), TimingOutcome::TimedOut);
    }

    #[test]
    fn test_batch_writes_in_order_and_feeds_back() {
        let harness = Harness::new(sleeper(0, "0.5"), config()).unwrap();
        let inputs = vec![Ok(task(7, 13)), Ok(task(3, 5)), Ok(task(13, 17))];
        let mut sink = Vec::new();
        let summary = harness
            .run_batch(inputs, &mut sink, &AtomicBool::new(false))
            .unwrap();

        let text = String::from_utf8(sink).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            "('0.5', 91, 2, 7, 13)",
            "('0.5', 15, 2, 3, 5)",
            "('0.5', 221, 3, 13, 17)",
        ]);
        assert_eq!(summary.completed, 3);
        assert!(!summary.interrupted);
    }

    #[test]
    fn test_batch_budget_follows_previous_task() {
        // 15 reports 0.01s, so 91 gets 0.1s and is cut off at a full second.
        // 221 then follows an NA and runs unbounded.
        let primitive = ThreadPrimitive::new("feedback", |n: &BigUint, token: &CancelToken| {
            let (millis, report) = match n.to_string().as_str() {
                "15" => (0, "0.01"),
                "91" => (1_000, "1.0"),
                _ => (300, "0.3"),
            };
            token
                .sleep(Duration::from_millis(millis))
                .then(|| report.to_string())
        });
        let harness = Harness::new(primitive, config()).unwrap();

        let inputs = vec![Ok(task(3, 5)), Ok(task(7, 13)), Ok(task(13, 17))];
        let mut sink = Vec::new();
        let started = Instant::now();
        let summary = harness
            .run_batch(inputs, &mut sink, &AtomicBool::new(false))
            .unwrap();

        let text = String::from_utf8(sink).unwrap();
        assert_eq!(
            text,
            "('0.01', 15, 2, 3, 5)\n('NA', 91, 2, 7, 13)\n('0.3', 221, 3, 13, 17)\n"
        );
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.timed_out, 1);
        assert!(started.elapsed() < Duration::from_millis(1_000));
    }

    #[test]
    fn test_stop_while_waiting_for_input() {
        // An input stream that never yields, like an idle stdin pipe.
        let (_tx, rx) = mpsc::channel::<Result<TaskInput, HarnessError>>();
        let inputs = std::iter::from_fn(move || rx.recv().ok());

        let harness = Harness::new(sleeper(0, "0.1"), config()).unwrap();
        let stop = std::sync::Arc::new(AtomicBool::new(false));
        let raiser = {
            let stop = std::sync::Arc::clone(&stop);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                stop.store(true, Ordering::Relaxed);
            })
        };

        let mut sink = Vec::new();
        let summary = harness.run_batch(inputs, &mut sink, &stop).unwrap();
        raiser.join().unwrap();

        assert!(summary.interrupted);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_batch_survives_failures_and_bad_lines() {
        // 91 hangs past its budget, 15 works, garbage line is skipped.
        let primitive = ThreadPrimitive::new("mixed", |n: &BigUint, token: &CancelToken| {
            if *n == BigUint::from(91u32) {
                token.sleep(Duration::from_secs(30));
                None
            } else {
                Some("0.01".to_string())
            }
        });
        let harness = Harness::new(
            primitive,
            HarnessConfig {
                ceiling_secs: Some(0.1),
                ..config()
            },
        )
        .unwrap();

        let inputs = vec![
            Ok(task(7, 13)),
            Err(HarnessError::InvalidInput {
                line: 2,
                reason: "bad".to_string(),
            }),
            Ok(task(3, 5)),
        ];
        let mut sink = Vec::new();
        let summary = harness
            .run_batch(inputs, &mut sink, &AtomicBool::new(false))
            .unwrap();

        let text = String::from_utf8(sink).unwrap();
        assert_eq!(text, "('NA', 91, 2, 7, 13)\n('0.01', 15, 2, 3, 5)\n");
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_raised_stop_writes_nothing() {
        let harness = Harness::new(sleeper(0, "0.1"), config()).unwrap();
        let mut sink = Vec::new();
        let summary = harness
            .run_batch(vec![Ok(task(7, 13))], &mut sink, &AtomicBool::new(true))
            .unwrap();
        assert!(sink.is_empty());
        assert!(summary.interrupted);
        assert_eq!(summary.written(), 0);
    }

    #[test]
    fn test_task_state_transitions() {
        assert!(!TaskState::Pending.can_cancel());
        assert!(TaskState::Running.can_cancel());
        assert!(!TaskState::Done(TimingOutcome::TimedOut).can_cancel());
        assert_eq!(
            advance(TaskState::Running, TaskState::Done(TimingOutcome::TimedOut)),
            TaskState::Done(TimingOutcome::TimedOut)
        );
    }

    #[test]
    fn test_summary_display() {
        let summary = BatchSummary {
            completed: 2,
            timed_out: 1,
            failed: 0,
            skipped: 3,
            interrupted: true,
        };
        assert_eq!(summary.written(), 3);
        assert_eq!(
            summary.to_string(),
            "2 completed, 1 timed out, 0 failed, 3 skipped (interrupted)"
        );
    }
}
