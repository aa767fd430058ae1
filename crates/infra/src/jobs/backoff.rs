//! Retry schedule for retryable delivery failures.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do after the n-th failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Re-enqueue after this delay.
    RetryAfter(Duration),
    /// Schedule used up; the recipient fails for good.
    Exhausted,
}

/// Fixed, ordered list of delays, one per retry.
///
/// Attempt `n` (1-based) that fails retryably waits `delays[n - 1]`; once
/// `n > delays.len()` the schedule is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

/// Schedule string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleParseError {
    #[error("backoff schedule is empty")]
    Empty,
    #[error("invalid backoff entry: {0:?}")]
    InvalidEntry(String),
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Number of retries before giving up.
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    pub fn decide(&self, attempts: u32) -> BackoffDecision {
        let index = attempts.max(1) as usize - 1;
        match self.delays.get(index) {
            Some(delay) => BackoffDecision::RetryAfter(*delay),
            None => BackoffDecision::Exhausted,
        }
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_secs(&[30, 60, 120])
    }
}

/// Parses a comma-separated list of whole seconds, e.g. `"30,60,120"`.
impl FromStr for BackoffSchedule {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut delays = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let secs: u64 = part
                .parse()
                .map_err(|_| ScheduleParseError::InvalidEntry(part.to_string()))?;
            delays.push(Duration::from_secs(secs));
        }
        if delays.is_empty() {
            return Err(ScheduleParseError::Empty);
        }
        Ok(Self::new(delays))
    }
}
