//! Harness configuration.
//!
//! Loaded from an optional JSON file and then overridden by CLI flags. All
//! durations are stored as plain numbers so the file stays hand-editable.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Where a task's duration comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TimingSource {
    /// The duration the factoring primitive prints as its last stdout line.
    #[default]
    Reported,
    /// Elapsed wall-clock time measured by the harness around the worker.
    WallClock,
}

/// Tunables for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Budget for task i is `previous_seconds * multiplier`.
    pub multiplier: f64,
    /// Lower bound applied to derived budgets. Zero (the default) keeps
    /// the plain `previous * multiplier` rule.
    pub min_budget_secs: f64,
    /// Upper bound applied to every budget, including the first task's.
    /// `None` leaves the first task (and any task after an `NA`) unbounded.
    pub ceiling_secs: Option<f64>,
    /// How often the harness wakes up to check the deadline and interrupts.
    pub poll_interval_ms: u64,
    /// Time between SIGTERM and SIGKILL when tearing down a process worker.
    pub kill_grace_ms: u64,
    pub timing_source: TimingSource,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            multiplier: 10.0,
            min_budget_secs: 0.0,
            ceiling_secs: None,
            poll_interval_ms: 20,
            kill_grace_ms: 200,
            timing_source: TimingSource::Reported,
        }
    }
}

impl HarnessConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: HarnessConfig =
            serde_json::from_str(&text).map_err(|source| HarnessError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make budgets meaningless.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(HarnessError::InvalidConfig(format!(
                "multiplier must be a positive number, got {}",
                self.multiplier
            )));
        }
        if !self.min_budget_secs.is_finite() || self.min_budget_secs < 0.0 {
            return Err(HarnessError::InvalidConfig(format!(
                "min_budget_secs must be zero or positive, got {}",
                self.min_budget_secs
            )));
        }
        if let Some(ceiling) = self.ceiling_secs {
            if !ceiling.is_finite() || ceiling <= 0.0 {
                return Err(HarnessError::InvalidConfig(format!(
                    "ceiling_secs must be a positive number, got {}",
                    ceiling
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(HarnessError::InvalidConfig(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn min_budget(&self) -> Duration {
        secs_to_duration(self.min_budget_secs)
    }

    pub fn ceiling(&self) -> Option<Duration> {
        self.ceiling_secs.map(secs_to_duration)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Seconds to `Duration`, saturating instead of panicking on overflow.
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    if secs <= 0.0 || secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
