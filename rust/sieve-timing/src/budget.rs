//! Adaptive timeout: one step of feedback from the previous task.

use std::time::Duration;

use crate::config::{secs_to_duration, HarnessConfig};
use crate::record::TimingOutcome;

/// Derives each task's wait budget from the previous task's duration.
///
/// Only the most recent outcome is kept. With no previous duration (first
/// task, or the previous task was `NA`) the budget is the configured
/// ceiling, which defaults to unbounded.
#[derive(Debug, Clone)]
pub struct AdaptiveTimeout {
    multiplier: f64,
    min_budget: Duration,
    ceiling: Option<Duration>,
    previous: Option<f64>,
}

impl AdaptiveTimeout {
    pub fn new(config: &HarnessConfig) -> Self {
        AdaptiveTimeout {
            multiplier: config.multiplier,
            min_budget: config.min_budget(),
            ceiling: config.ceiling(),
            previous: None,
        }
    }

    /// Budget for the next task. `None` means wait indefinitely.
    pub fn budget(&self) -> Option<Duration> {
        self.budget_after(self.previous)
    }

    /// Budget for a task whose predecessor took `previous` seconds.
    pub fn budget_after(&self, previous: Option<f64>) -> Option<Duration> {
        let derived = previous
            .map(|secs| secs_to_duration(secs * self.multiplier).max(self.min_budget));
        match (derived, self.ceiling) {
            (Some(budget), Some(ceiling)) => Some(budget.min(ceiling)),
            (Some(budget), None) => Some(budget),
            (None, ceiling) => ceiling,
        }
    }

    /// Replace the feedback state with the latest outcome.
    pub fn observe(&mut self, outcome: &TimingOutcome) {
        self.previous = outcome.seconds();
    }

    pub fn previous(&self) -> Option<f64> {
        self.previous
    }
}
