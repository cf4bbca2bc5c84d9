//! Redis list queue client
//!
//! Every queue is a Redis list under `"{namespace}:{queue}"`. Producers
//! `LPUSH` onto the head, consumers `RPOP`/`BRPOP` from the tail, so each
//! queue is FIFO except for not-ready jobs, which are pushed back onto the
//! head when popped early.
//!
//! # Example
//!
//! ```rust,ignore
//! use job_queue::{Dequeued, JobQueue, QueueConfig};
//!
//! let queue = JobQueue::connect(&QueueConfig::from_env()?).await?;
//!
//! let job = queue.create_job("idea-42", payload, None);
//! queue.enqueue("ideas:ready", &job).await?;
//!
//! if let Dequeued::Ready(mut job) = queue.dequeue("ideas:ready", Duration::from_secs(5)).await? {
//!     if let Err(e) = write_script(&job).await {
//!         queue.requeue_with_backoff("ideas:ready", &mut job, &e.to_string()).await?;
//!     }
//! }
//! ```

use crate::backoff::BackoffPolicy;
use crate::config::QueueConfig;
use crate::connect::{connect, with_retry, ConnectRetry};
use crate::error::QueueError;
use crate::job::{self, Job, DEFAULT_MAX_ATTEMPTS};
use crate::metrics::QueueMetrics;
use crate::registry::{KnownQueue, DEAD_LETTER_QUEUE};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of a [`JobQueue::dequeue`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Dequeued {
    /// An eligible job, now owned by the caller.
    Ready(Job),
    /// A job was popped but its `not_before` is in the future; it has been
    /// pushed back onto the head of the queue.
    NotReady {
        job_id: String,
        not_before: DateTime<Utc>,
    },
    /// Nothing arrived before the timeout.
    Empty,
}

impl Dequeued {
    pub fn into_job(self) -> Option<Job> {
        match self {
            Dequeued::Ready(job) => Some(job),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Dequeued::Empty)
    }
}

/// Result of [`JobQueue::requeue_with_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Back in the live queue, eligible again at `not_before`.
    Requeued {
        attempt: u32,
        not_before: DateTime<Utc>,
    },
    /// Attempts exhausted; the job is now in the dead letter queue.
    DeadLettered { attempt: u32 },
}

/// Job queue client.
///
/// Cheap to clone: clones share one multiplexed `ConnectionManager`, so a
/// single client can be handed to every producer and consumer task.
#[derive(Clone)]
pub struct JobQueue {
    redis: ConnectionManager,
    namespace: String,
    backoff: BackoffPolicy,
    max_attempts: u32,
    metrics: QueueMetrics,
}

impl JobQueue {
    /// Connect with the default startup schedule (3 attempts, 1s/2s/4s).
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        Self::connect_with_retry(config, &ConnectRetry::default()).await
    }

    /// Connect with an explicit startup schedule.
    pub async fn connect_with_retry(
        config: &QueueConfig,
        retry: &ConnectRetry,
    ) -> Result<Self, QueueError> {
        let url = config.redis.url.as_str();
        let mut attempts: u32 = 0;
        let result = with_retry(retry, || {
            attempts += 1;
            connect(url)
        })
        .await;
        let redis = result.map_err(|source| QueueError::Connect {
            url: url.to_string(),
            attempts,
            source,
        })?;

        if !config.backoff.covers(config.max_attempts) {
            warn!(
                table_len = config.backoff.delays().len(),
                max_attempts = config.max_attempts,
                "Backoff table shorter than max attempts, later retries reuse the last delay"
            );
        }

        info!(namespace = %config.namespace, "Job queue ready");

        Ok(Self::new(redis, config.namespace.clone())
            .with_backoff(config.backoff.clone())
            .with_max_attempts(config.max_attempts))
    }

    /// Wrap an existing connection.
    pub fn new(redis: ConnectionManager, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            redis,
            metrics: QueueMetrics::new(namespace.clone()),
            namespace,
            backoff: BackoffPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Attempt ceiling for [`create_job`](Self::create_job), at least 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Namespaced Redis key for a queue.
    pub fn key(&self, queue: &str) -> String {
        namespaced_key(&self.namespace, queue)
    }

    /// Redis key of the shared dead letter queue.
    pub fn dead_letter_key(&self) -> String {
        self.key(DEAD_LETTER_QUEUE)
    }

    /// Build a job using this client's attempt ceiling.
    pub fn create_job(
        &self,
        idea_id: impl Into<String>,
        payload: Map<String, Value>,
        dedupe_key: Option<String>,
    ) -> Job {
        job::create_job(idea_id, payload, dedupe_key).with_max_attempts(self.max_attempts)
    }

    /// Push a job onto the head of `queue`.
    ///
    /// A job with no attempts left is refused for every queue but the dead
    /// letter queue.
    pub async fn enqueue(&self, queue: &str, job: &Job) -> Result<(), QueueError> {
        if job.is_exhausted() && queue != DEAD_LETTER_QUEUE {
            return Err(self.failed(
                "enqueue",
                queue,
                Some(&job.job_id),
                QueueError::Exhausted {
                    job_id: job.job_id.clone(),
                    attempt: job.attempt,
                    max_attempts: job.max_attempts,
                },
            ));
        }

        self.push(queue, job)
            .await
            .map_err(|e| self.failed("enqueue", queue, Some(&job.job_id), e))?;

        self.metrics.job_enqueued(queue);
        debug!(job_id = %job.job_id, queue = %queue, "Enqueued job");
        Ok(())
    }

    /// Pop the oldest job from `queue`.
    ///
    /// A zero `timeout` never blocks. Otherwise waits up to `timeout` for an
    /// entry. A job whose `not_before` is still in the future is pushed back
    /// onto the head untouched and reported as [`Dequeued::NotReady`].
    pub async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Dequeued, QueueError> {
        let key = self.key(queue);
        let mut conn = self.redis.clone();

        let popped: redis::RedisResult<Option<String>> = if timeout.is_zero() {
            conn.rpop(&key, None).await
        } else {
            conn.brpop::<_, Option<(String, String)>>(&key, timeout.as_secs_f64())
                .await
                .map(|reply| reply.map(|(_, raw)| raw))
        };

        let raw = match popped.map_err(|e| self.failed("dequeue", queue, None, e.into()))? {
            Some(raw) => raw,
            None => return Ok(Dequeued::Empty),
        };

        let job: Job = serde_json::from_str(&raw).map_err(|source| {
            warn!(queue = %queue, entry = %preview(&raw), "Dropping malformed queue entry");
            self.failed(
                "dequeue",
                queue,
                None,
                QueueError::Malformed {
                    queue: queue.to_string(),
                    source,
                },
            )
        })?;

        if !job.is_ready_at(Utc::now()) {
            if let Err(source) = conn.lpush::<_, _, ()>(&key, &raw).await {
                // The entry is out of Redis now; the log line and the error are
                // the only copies left.
                error!(
                    job_id = %job.job_id,
                    queue = %queue,
                    entry = %raw,
                    error = %source,
                    "Failed to push back not-ready job, entry removed from queue"
                );
                return Err(self.failed(
                    "dequeue",
                    queue,
                    Some(&job.job_id),
                    QueueError::PushBack {
                        queue: queue.to_string(),
                        entry: raw,
                        source,
                    },
                ));
            }

            self.metrics.job_not_ready(queue);
            debug!(
                job_id = %job.job_id,
                queue = %queue,
                not_before = %job.not_before,
                "Job not ready yet, pushed back"
            );
            return Ok(Dequeued::NotReady {
                job_id: job.job_id,
                not_before: job.not_before,
            });
        }

        self.metrics.job_dequeued(queue);
        debug!(job_id = %job.job_id, queue = %queue, attempt = job.attempt, "Dequeued job");
        Ok(Dequeued::Ready(job))
    }

    /// Read the `count` most recently enqueued jobs without removing them,
    /// newest first. Entries that fail to parse are skipped.
    pub async fn peek(&self, queue: &str, count: usize) -> Result<Vec<Job>, QueueError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let stop = isize::try_from(count).unwrap_or(isize::MAX) - 1;
        let entries: Vec<String> = conn
            .lrange(self.key(queue), 0, stop)
            .await
            .map_err(|e| self.failed("peek", queue, None, e.into()))?;

        let jobs = entries
            .iter()
            .filter_map(|raw| match serde_json::from_str::<Job>(raw) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(queue = %queue, error = %e, entry = %preview(raw), "Skipping malformed entry in peek");
                    None
                }
            })
            .collect();

        Ok(jobs)
    }

    /// Number of entries in `queue`.
    pub async fn length(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();
        conn.llen(self.key(queue))
            .await
            .map_err(|e| self.failed("length", queue, None, e.into()))
    }


    /// Count a failed attempt, then either re-enqueue the job on `queue` with
    /// its new `not_before`, or dead-letter it once attempts are exhausted.
    pub async fn requeue_with_backoff(
        &self,
        queue: &str,
        job: &mut Job,
        error: &str,
    ) -> Result<RequeueOutcome, QueueError> {
        job.record_failure(error, &self.backoff, job::now());

        if job.is_exhausted() {
            let reason = format!("Max attempts ({}) exceeded", job.max_attempts);
            self.move_to_dlq(job, Some(&reason), Some(queue)).await?;
            return Ok(RequeueOutcome::DeadLettered {
                attempt: job.attempt,
            });
        }

        self.push(queue, job)
            .await
            .map_err(|e| self.failed("requeue", queue, Some(&job.job_id), e))?;

        self.metrics.job_requeued(queue);
        info!(
            job_id = %job.job_id,
            queue = %queue,
            attempt = job.attempt,
            max_attempts = job.max_attempts,
            not_before = %job.not_before,
            "Requeued job with backoff"
        );

        Ok(RequeueOutcome::Requeued {
            attempt: job.attempt,
            not_before: job.not_before,
        })
    }

    /// Delete `queue` and return how many entries it held.
    pub async fn clear_queue(&self, queue: &str) -> Result<u64, QueueError> {
        let key = self.key(queue);
        let mut conn = self.redis.clone();

        let (count, _deleted): (u64, u64) = redis::pipe()
            .atomic()
            .llen(&key)
            .del(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.failed("clear", queue, None, e.into()))?;

        warn!(queue = %queue, count = count, "Cleared queue");
        Ok(count)
    }

    /// Lengths of every [`KnownQueue`], keyed by queue name.
    pub async fn get_stats(&self) -> Result<BTreeMap<String, u64>, QueueError> {
        let mut stats = BTreeMap::new();

        for queue in KnownQueue::all() {
            let depth = self.length(queue.name()).await?;
            self.metrics.queue_depth(queue.name(), depth);
            stats.insert(queue.name().to_string(), depth);
        }

        Ok(stats)
    }

    /// `PING` the broker.
    pub async fn healthcheck(&self) -> bool {
        let mut conn = self.redis.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(reply) if reply == "PONG" => true,
            Ok(reply) => {
                error!(reply = %reply, "Unexpected PING reply");
                false
            }
            Err(e) => {
                error!(error = %e, "Redis healthcheck failed");
                self.metrics.operation_failed("healthcheck", "redis");
                false
            }
        }
    }

    /// Move a job to the dead letter queue.
    ///
    /// With a `reason`, a final note is appended first, recording
    /// `origin_queue` when given.
    pub async fn move_to_dlq(
        &self,
        job: &mut Job,
        reason: Option<&str>,
        origin_queue: Option<&str>,
    ) -> Result<(), QueueError> {
        if let Some(reason) = reason {
            job.record_final_error(reason, origin_queue, job::now());
        }

        self.push(DEAD_LETTER_QUEUE, job)
            .await
            .map_err(|e| self.failed("move_to_dlq", DEAD_LETTER_QUEUE, Some(&job.job_id), e))?;

        self.metrics
            .job_dead_lettered(origin_queue.unwrap_or(DEAD_LETTER_QUEUE));
        warn!(
            job_id = %job.job_id,
            origin_queue = origin_queue.unwrap_or("unknown"),
            attempt = job.attempt,
            reason = reason.unwrap_or(""),
            "Moved job to DLQ"
        );
        Ok(())
    }

    async fn push(&self, queue: &str, job: &Job) -> Result<(), QueueError> {
        let data = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(self.key(queue), data).await?;
        Ok(())
    }

    /// Log and count a failed operation, handing the error back.
    fn failed(
        &self,
        operation: &'static str,
        queue: &str,
        job_id: Option<&str>,
        err: QueueError,
    ) -> QueueError {
        error!(
            operation = operation,
            queue = %queue,
            job_id = job_id.unwrap_or(""),
            error = %err,
            "Queue operation failed"
        );
        self.metrics.operation_failed(operation, err.kind());
        err
    }
}

fn namespaced_key(namespace: &str, queue: &str) -> String {
    format!("{}:{}", namespace, queue)
}

/// First bytes of a raw entry, for logs.
fn preview(raw: &str) -> &str {
    const MAX: usize = 120;
    if raw.len() <= MAX {
        return raw;
    }
    let mut end = MAX;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}
