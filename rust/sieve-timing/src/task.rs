//! Task inputs: `(semiprime, hamming_distance, p, q)` tuples.

use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

use num_bigint::BigUint;

use crate::error::HarnessError;

/// One unit of work for the harness.
///
/// Only `semiprime` is handed to the factoring primitive. The rest is
/// metadata copied verbatim into the output record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    pub semiprime: BigUint,
    pub hamming_distance: u64,
    pub p: BigUint,
    pub q: BigUint,
}

impl TaskInput {
    pub fn new(semiprime: BigUint, hamming_distance: u64, p: BigUint, q: BigUint) -> Self {
        TaskInput {
            semiprime,
            hamming_distance,
            p,
            q,
        }
    }

    /// Build a task from the two factors, computing n and the Hamming distance.
    pub fn from_factors(p: BigUint, q: BigUint) -> Self {
        let semiprime = &p * &q;
        let hamming_distance = factoring_core::hamming_distance(&p, &q);
        TaskInput::new(semiprime, hamming_distance, p, q)
    }

    /// Parse one input line; `line` is only used in the error message.
    pub fn parse_line(text: &str, line: usize) -> Result<Self, HarnessError> {
        let invalid = |reason: String| HarnessError::InvalidInput { line, reason };

        let fields = split_tuple(text);
        if fields.len() != 4 {
            return Err(invalid(format!("expected 4 fields, found {}", fields.len())));
        }

        let semiprime = parse_big(fields[0]).map_err(&invalid)?;
        let hamming_distance = fields[1]
            .parse::<u64>()
            .map_err(|e| invalid(format!("hamming distance '{}': {}", fields[1], e)))?;
        let p = parse_big(fields[2]).map_err(&invalid)?;
        let q = parse_big(fields[3]).map_err(&invalid)?;

        Ok(TaskInput::new(semiprime, hamming_distance, p, q))
    }

    /// Describe any disagreement between the metadata and the semiprime.
    ///
    /// An empty list means `p * q == n` and the Hamming distance matches.
    pub fn metadata_mismatches(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if &self.p * &self.q != self.semiprime {
            problems.push(format!("{} * {} != {}", self.p, self.q, self.semiprime));
        }
        let actual = factoring_core::hamming_distance(&self.p, &self.q);
        if actual != self.hamming_distance {
            problems.push(format!(
                "hamming distance of p and q is {}, input says {}",
                actual, self.hamming_distance
            ));
        }
        problems
    }
}

impl FromStr for TaskInput {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskInput::parse_line(s, 0)
    }
}

impl fmt::Display for TaskInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.semiprime, self.hamming_distance, self.p, self.q
        )
    }
}

/// Lazily read tasks from `reader`, one per line.
///
/// Blank lines and lines starting with `#` are skipped. Line numbers in
/// errors are 1-based.
pub fn read_tasks<R: BufRead>(reader: R) -> impl Iterator<Item = Result<TaskInput, HarnessError>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| match line {
            Err(e) => Some(Err(HarnessError::Io(e))),
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    None
                } else {
                    Some(TaskInput::parse_line(trimmed, idx + 1))
                }
            }
        })
}

/// Split a tuple-literal-like line into its fields.
///
/// Accepts `(a, b, c)`, `a, b, c` and `a b c`; surrounding quotes on a field
/// are removed.
pub(crate) fn split_tuple(text: &str) -> Vec<&str> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(trimmed);

    inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|field| !field.is_empty())
        .map(|field| field.trim_matches(|c| c == '\'' || c == '"'))
        .collect()
}

fn parse_big(field: &str) -> Result<BigUint, String> {
    field
        .parse::<BigUint>()
        .map_err(|e| format!("'{}' is not a non-negative integer: {}", field, e))
}
