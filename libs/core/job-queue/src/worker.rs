//! Generic queue worker
//!
//! `JobWorker` owns the dequeue → process → retry loop every pipeline stage
//! runs. Stages only implement [`JobProcessor`]; failures are fed back through
//! [`JobQueue::requeue_with_backoff`], which either schedules the next attempt
//! or dead-letters the job.

use crate::client::{Dequeued, JobQueue, RequeueOutcome};
use crate::error::{ProcessError, QueueError};
use crate::job::Job;
use crate::metrics::QueueMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Work done for one queue.
///
/// # Example
///
/// ```rust,ignore
/// use job_queue::{Job, JobProcessor, ProcessError};
///
/// struct ScriptWriter {
///     llm: LlmClient,
/// }
///
/// #[async_trait]
/// impl JobProcessor for ScriptWriter {
///     async fn process(&self, job: &Job) -> Result<(), ProcessError> {
///         self.llm.write_script(&job.idea_id, &job.payload).await?;
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "ScriptWriter"
///     }
/// }
/// ```
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Handle one job. An `Err` counts as a failed attempt.
    async fn process(&self, job: &Job) -> Result<(), ProcessError>;

    /// Processor name for logs and metrics.
    fn name(&self) -> &'static str;
}

/// Worker loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Queue to consume, relative to the client namespace
    pub queue: String,

    /// How long each dequeue may block. Zero polls without blocking.
    pub dequeue_timeout: Duration,

    /// Pause after popping a job that is not ready yet, or after an empty
    /// non-blocking poll
    pub poll_interval: Duration,

    /// Ceiling for the pause after consecutive broker errors
    pub max_error_backoff: Duration,
}

impl WorkerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            dequeue_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            max_error_backoff: Duration::from_secs(30),
        }
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_error_backoff(mut self, max: Duration) -> Self {
        self.max_error_backoff = max;
        self
    }
}

/// What a single [`JobWorker::run_once`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    Processed {
        job_id: String,
    },
    Retried {
        job_id: String,
        attempt: u32,
        not_before: DateTime<Utc>,
    },
    DeadLettered {
        job_id: String,
        attempt: u32,
    },
    /// The popped job was pushed back; it is not due yet.
    NotReady {
        job_id: String,
    },
    /// The queue was empty.
    Idle,
}

/// Consumes one queue with a [`JobProcessor`].
pub struct JobWorker<P: JobProcessor> {
    queue: JobQueue,
    processor: Arc<P>,
    config: WorkerConfig,
    metrics: QueueMetrics,
}

impl<P: JobProcessor> JobWorker<P> {
    pub fn new(queue: JobQueue, processor: P, config: WorkerConfig) -> Self {
        Self::with_arc_processor(queue, Arc::new(processor), config)
    }

    /// Share one processor between several workers.
    pub fn with_arc_processor(queue: JobQueue, processor: Arc<P>, config: WorkerConfig) -> Self {
        let metrics = QueueMetrics::new(queue.namespace());
        Self {
            queue,
            processor,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Dequeue at most one job and handle it.
    pub async fn run_once(&self) -> Result<Tick, QueueError> {
        let queue = self.config.queue.as_str();

        match self.queue.dequeue(queue, self.config.dequeue_timeout).await? {
            Dequeued::Empty => Ok(Tick::Idle),
            Dequeued::NotReady { job_id, .. } => Ok(Tick::NotReady { job_id }),
            Dequeued::Ready(job) => self.handle(job).await,
        }
    }

    async fn handle(&self, mut job: Job) -> Result<Tick, QueueError> {
        let queue = self.config.queue.as_str();
        let processor = self.processor.name();
        let start = Instant::now();

        let result = self.processor.process(&job).await;
        self.metrics
            .job_processed(queue, processor, start.elapsed(), result.is_ok());

        let err = match result {
            Ok(()) => {
                debug!(job_id = %job.job_id, queue = %queue, processor = processor, "Job processed");
                return Ok(Tick::Processed { job_id: job.job_id });
            }
            Err(e) => e.to_string(),
        };

        warn!(
            job_id = %job.job_id,
            queue = %queue,
            processor = processor,
            attempt = job.attempt + 1,
            error = %err,
            "Job failed"
        );

        let outcome = self
            .queue
            .requeue_with_backoff(queue, &mut job, &err)
            .await
            .inspect_err(|e| {
                error!(job_id = %job.job_id, queue = %queue, error = %e, "Failed job could not be requeued");
            })?;

        Ok(match outcome {
            RequeueOutcome::Requeued {
                attempt,
                not_before,
            } => Tick::Retried {
                job_id: job.job_id,
                attempt,
                not_before,
            },
            RequeueOutcome::DeadLettered { attempt } => Tick::DeadLettered {
                job_id: job.job_id,
                attempt,
            },
        })
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Shutdown is observed between dequeues, so a blocking dequeue finishes
    /// (at most `dequeue_timeout`) before the worker stops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.config.queue,
            namespace = %self.queue.namespace(),
            processor = %self.processor.name(),
            dequeue_timeout_ms = self.config.dequeue_timeout.as_millis() as u64,
            "Starting job worker"
        );

        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            let pause = match self.run_once().await {
                Ok(tick) => {
                    if consecutive_errors > 0 {
                        info!(consecutive_errors = consecutive_errors, "Queue recovered");
                        consecutive_errors = 0;
                    }
                    match tick {
                        Tick::NotReady { .. } => Some(self.config.poll_interval),
                        Tick::Idle if self.config.dequeue_timeout.is_zero() => {
                            Some(self.config.poll_interval)
                        }
                        _ => None,
                    }
                }
                Err(QueueError::Malformed { .. }) => None,
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff = error_backoff(consecutive_errors, self.config.max_error_backoff);
                    warn!(
                        error = %e,
                        consecutive_errors = consecutive_errors,
                        backoff_secs = backoff.as_secs(),
                        "Queue error, backing off"
                    );
                    Some(backoff)
                }
            };

            if let Some(duration) = pause {
                if wait_or_shutdown(&mut shutdown, duration).await {
                    info!("Received shutdown signal, stopping worker");
                    break;
                }
            }
        }

        info!(queue = %self.config.queue, "Job worker stopped");
    }
}

/// Exponential pause after `consecutive` broker errors: 2s, 4s, 8s... capped.
fn error_backoff(consecutive: u32, cap: Duration) -> Duration {
    Duration::from_secs(2u64.pow(consecutive.min(5))).min(cap)
}

/// Sleep for `duration`, returning `true` if shutdown was requested meanwhile.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = tokio::time::sleep(duration) => false,
    }
}
