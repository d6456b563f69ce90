//! Timing outcomes and the output line format.
//!
//! Each processed task produces exactly one line:
//!
//! ```text
//! ('0.0123', 91, 2, 7, 13)
//! ('NA', 221, 3, 13, 17)
//! ```
//!
//! The first field is the measured duration in seconds, or `NA` when the
//! task timed out or failed. The rest is the task input, unchanged.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;

use crate::error::HarnessError;
use crate::task::{split_tuple, TaskInput};

/// Sentinel written in place of a duration.
pub const NOT_AVAILABLE: &str = "NA";

/// Terminal result of measuring one task.
#[derive(Debug, Clone, PartialEq)]
pub enum TimingOutcome {
    /// Finished within budget; seconds as reported (or measured).
    Completed(f64),
    /// Budget elapsed; the worker was stopped.
    TimedOut,
    /// Finished or died without a usable duration.
    Failed(String),
}

impl TimingOutcome {
    /// The duration, if one is available.
    pub fn seconds(&self) -> Option<f64> {
        match self {
            TimingOutcome::Completed(secs) => Some(*secs),
            TimingOutcome::TimedOut | TimingOutcome::Failed(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.seconds().is_some()
    }
}

impl fmt::Display for TimingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingOutcome::Completed(secs) => write!(f, "completed in {}s", secs),
            TimingOutcome::TimedOut => write!(f, "timed out"),
            TimingOutcome::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Parse a duration a factoring primitive printed about itself.
///
/// Takes the last non-empty line of `report`. A trailing `s` unit is allowed.
/// Negative, infinite and NaN values are rejected.
pub fn parse_reported_seconds(report: &str) -> Option<f64> {
    let last = report.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    let number = last.strip_suffix('s').unwrap_or(last).trim();
    let secs = number.parse::<f64>().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(secs)
    } else {
        None
    }
}

/// One output line: duration (or `NA`) followed by the task input.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingRecord {
    pub seconds: Option<f64>,
    pub input: TaskInput,
}

impl TimingRecord {
    pub fn new(outcome: &TimingOutcome, input: TaskInput) -> Self {
        TimingRecord {
            seconds: outcome.seconds(),
            input,
        }
    }
}

impl fmt::Display for TimingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.seconds {
            Some(secs) => write!(f, "('{}', ", secs)?,
            None => write!(f, "('{}', ", NOT_AVAILABLE)?,
        }
        write!(
            f,
            "{}, {}, {}, {})",
            self.input.semiprime, self.input.hamming_distance, self.input.p, self.input.q
        )
    }
}

impl FromStr for TimingRecord {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| HarnessError::InvalidRecord(format!("{}: {}", reason, s));

        let fields = split_tuple(s);
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let seconds = if fields[0] == NOT_AVAILABLE {
            None
        } else {
            let secs = fields[0]
                .parse::<f64>()
                .map_err(|e| invalid(format!("duration '{}': {}", fields[0], e)))?;
            Some(secs)
        };

        let big = |field: &str| {
            field
                .parse::<BigUint>()
                .map_err(|e| invalid(format!("'{}': {}", field, e)))
        };
        let hamming_distance = fields[2]
            .parse::<u64>()
            .map_err(|e| invalid(format!("hamming distance '{}': {}", fields[2], e)))?;

        Ok(TimingRecord {
            seconds,
            input: TaskInput::new(big(fields[1])?, hamming_distance, big(fields[3])?, big(fields[4])?),
        })
    }
}
