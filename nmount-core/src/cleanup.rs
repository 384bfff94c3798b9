//! Outcome of best-effort teardown paths.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    /// Short name of the step, e.g. `loop-delete`.
    pub step: String,
    pub target: String,
    pub message: String,
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.step, self.target, self.message)
    }
}

/// Cleanup always "succeeds"; sub-failures are collected here for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: &str, target: &str, err: impl fmt::Display) {
        let failure = CleanupFailure {
            step: step.to_string(),
            target: target.to_string(),
            message: err.to_string(),
        };
        log::warn!("cleanup step failed: {}", failure);
        self.failures.push(failure);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: CleanupReport) {
        self.failures.extend(other.failures);
    }
}
