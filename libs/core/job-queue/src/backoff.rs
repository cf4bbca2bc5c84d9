//! Retry backoff policy
//!
//! Maps the attempt that just failed to the time the job becomes eligible
//! again. Delays come from a fixed table (no jitter), so the schedule is
//! deterministic.

use crate::error::QueueError;
use chrono::{DateTime, TimeDelta, Utc};
use std::str::FromStr;
use std::time::Duration;

/// Default delays after the 1st, 2nd and 3rd failed attempt: 1m, 5m, 15m.
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [60, 300, 900];

/// Table-driven backoff policy.
///
/// The table is never empty. Lookups past its end clamp to the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    delays: Vec<Duration>,
}

impl BackoffPolicy {
    /// Create a policy from an ordered delay table.
    pub fn new(delays: Vec<Duration>) -> Result<Self, QueueError> {
        if delays.is_empty() {
            return Err(QueueError::InvalidBackoff(
                "delay table must have at least one entry".to_string(),
            ));
        }
        Ok(Self { delays })
    }

    /// Create a policy from delays given in whole seconds.
    pub fn from_secs(secs: &[u64]) -> Result<Self, QueueError> {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// The delay table.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Delay after the given failed attempt (1-indexed).
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    /// Eligibility time after the given failed attempt.
    pub fn next_not_before(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = TimeDelta::from_std(self.delay_for(attempt)).unwrap_or(TimeDelta::MAX);
        now.checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether every attempt up to `max_attempts` has its own table entry.
    pub fn covers(&self, max_attempts: u32) -> bool {
        self.delays.len() >= max_attempts as usize
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF_SECS
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

/// Parses a comma separated list of seconds, e.g. `"60,300,900"`.
impl FromStr for BackoffPolicy {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u64>().map_err(|e| {
                    QueueError::InvalidBackoff(format!("'{}' is not a number of seconds: {}", part, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_secs(&secs)
    }
}
