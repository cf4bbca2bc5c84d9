//! Queue and processing error types
//!
//! Broker failures never panic or crash the caller. Each one is logged where
//! it happens and handed back as a [`QueueError`], so callers can tell an
//! empty queue (`Ok(Dequeued::Empty)`) apart from an unreachable broker or a
//! malformed entry.

use thiserror::Error;

/// Job queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// The broker could not be reached at construction time
    #[error("Failed to connect to Redis at {url} after {attempts} attempts: {source}")]
    Connect {
        url: String,
        attempts: u32,
        source: redis::RedisError,
    },

    /// Redis command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A job could not be serialized for the wire
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An entry popped from a queue was not a valid job document
    #[error("Malformed job in queue '{queue}': {source}")]
    Malformed {
        queue: String,
        source: serde_json::Error,
    },

    /// A job with no attempts left was offered to a live queue
    #[error("Job {job_id} has no attempts left ({attempt}/{max_attempts})")]
    Exhausted {
        job_id: String,
        attempt: u32,
        max_attempts: u32,
    },

    /// A not-ready job was popped but could not be pushed back. `entry` holds
    /// the raw document, which is no longer in Redis.
    #[error("Failed to push back job into queue '{queue}': {source}")]
    PushBack {
        queue: String,
        entry: String,
        source: redis::RedisError,
    },

    /// Backoff table rejected at construction
    #[error("Invalid backoff policy: {0}")]
    InvalidBackoff(String),
}

impl QueueError {
    /// Whether the error means the broker connection itself is unhealthy.
    pub fn is_connection_error(&self) -> bool {
        match self {
            QueueError::Connect { .. } => true,
            QueueError::Redis(e) | QueueError::PushBack { source: e, .. } => {
                e.is_io_error() || e.is_connection_dropped() || e.is_timeout()
            }
            _ => false,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::Connect { .. } => "connect",
            QueueError::Redis(_) => "redis",
            QueueError::Serialization(_) => "serialization",
            QueueError::Malformed { .. } => "malformed",
            QueueError::Exhausted { .. } => "exhausted",
            QueueError::PushBack { .. } => "push_back",
            QueueError::InvalidBackoff(_) => "invalid_backoff",
        }
    }
}

/// Failure reported by a [`JobProcessor`](crate::JobProcessor).
///
/// Only its display text matters to the queue: it is what lands in the job's
/// `error_history`.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{0}")]
    Failed(String),

    #[error("{0:#}")]
    Other(eyre::Report),
}

impl ProcessError {
    pub fn failed(message: impl Into<String>) -> Self {
        ProcessError::Failed(message.into())
    }
}

impl From<eyre::Report> for ProcessError {
    fn from(report: eyre::Report) -> Self {
        ProcessError::Other(report)
    }
}
