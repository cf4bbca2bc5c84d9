//! The job record and its wire format
//!
//! A job is serialized as a flat JSON document:
//!
//! ```json
//! {
//!   "job_id": "3b0c...", "idea_id": "idea-42", "dedupe_key": "idea-42_1718000000",
//!   "payload": {"topic": "IUL basics"},
//!   "attempt": 0, "max_attempts": 3,
//!   "created_at": 1718000000.123456, "not_before": 1718000000.123456,
//!   "error_history": []
//! }
//! ```
//!
//! Timestamps are floating point Unix seconds. In memory they are kept at
//! microsecond precision so encoding and decoding is lossless.

use crate::backoff::BackoffPolicy;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;
use uuid::Uuid;

/// Default ceiling on processing attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Current time truncated to the wire precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Convert a timestamp to floating point Unix seconds.
pub fn to_unix_seconds(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

/// Convert floating point Unix seconds back to a timestamp (microsecond precision).
pub fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

mod unix_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(super::to_unix_seconds(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        super::from_unix_seconds(secs)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", secs)))
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// One entry in a job's error history.
///
/// The two shapes are told apart structurally on the wire: attempt failures
/// carry `attempt`/`error`, the dead letter note carries `final_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorRecord {
    /// A failed processing attempt.
    Attempt {
        attempt: u32,
        error: String,
        #[serde(with = "unix_seconds")]
        timestamp: DateTime<Utc>,
    },
    /// The note written when the job is moved to the dead letter queue.
    Final {
        final_error: String,
        #[serde(with = "unix_seconds")]
        timestamp: DateTime<Utc>,
        /// Live queue the job was dead-lettered from, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_queue: Option<String>,
    },
}

impl ErrorRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ErrorRecord::Attempt { timestamp, .. } | ErrorRecord::Final { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

/// Lifecycle state of a job, derived from its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// `not_before` is still in the future.
    Pending,
    /// Eligible for processing with attempts left.
    Ready,
    /// Out of attempts but not yet dead-lettered.
    Exhausted,
    /// Carries a dead letter note; terminal.
    Dead,
}

/// A unit of work with its retry state and error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub idea_id: String,
    /// Advisory only; the queue never enforces uniqueness.
    pub dedupe_key: String,
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(with = "unix_seconds", default = "now")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "unix_seconds", default = "now")]
    pub not_before: DateTime<Utc>,
    #[serde(default)]
    pub error_history: Vec<ErrorRecord>,
}

impl Job {
    /// Create a job that is eligible immediately.
    ///
    /// The dedupe key defaults to `"{idea_id}_{unix_seconds}"`.
    pub fn new(idea_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        let idea_id = idea_id.into();
        let created_at = now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            dedupe_key: format!("{}_{}", idea_id, created_at.timestamp()),
            idea_id,
            payload,
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at,
            not_before: created_at,
            error_history: Vec::new(),
        }
    }

    pub fn with_dedupe_key(mut self, dedupe_key: impl Into<String>) -> Self {
        self.dedupe_key = dedupe_key.into();
        self
    }

    /// Set the attempt ceiling. A job always gets at least one attempt.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether the job may be processed at `now`.
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_before
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// The dead letter note, if the job has been dead-lettered.
    pub fn final_error(&self) -> Option<&str> {
        self.error_history.iter().rev().find_map(|record| match record {
            ErrorRecord::Final { final_error, .. } => Some(final_error.as_str()),
            ErrorRecord::Attempt { .. } => None,
        })
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> JobState {
        if self.final_error().is_some() {
            JobState::Dead
        } else if self.is_exhausted() {
            JobState::Exhausted
        } else if !self.is_ready_at(now) {
            JobState::Pending
        } else {
            JobState::Ready
        }
    }

    /// Count a failed attempt and push `not_before` out per the policy.
    ///
    /// An empty error string advances the attempt without a history entry.
    /// `not_before` never moves backwards.
    pub fn record_failure(&mut self, error: &str, policy: &BackoffPolicy, now: DateTime<Utc>) {
        self.attempt = self.attempt.saturating_add(1);

        if !error.is_empty() {
            self.error_history.push(ErrorRecord::Attempt {
                attempt: self.attempt,
                error: error.to_string(),
                timestamp: now,
            });
        }

        let next = policy.next_not_before(self.attempt, now);
        if next > self.not_before {
            self.not_before = next;
        }
    }

    /// Append the dead letter note.
    pub fn record_final_error(
        &mut self,
        reason: &str,
        origin_queue: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.error_history.push(ErrorRecord::Final {
            final_error: reason.to_string(),
            timestamp: now,
            origin_queue: origin_queue.map(str::to_string),
        });
    }
}

/// Build a new job for `idea_id`.
///
/// Generates a random `job_id` and, when `dedupe_key` is `None`, derives one
/// from the idea id and the current Unix second.
pub fn create_job(
    idea_id: impl Into<String>,
    payload: Map<String, Value>,
    dedupe_key: Option<String>,
) -> Job {
    let job = Job::new(idea_id, payload);
    match dedupe_key {
        Some(key) => job.with_dedupe_key(key),
        None => job,
    }
}
