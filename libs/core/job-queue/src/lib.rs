//! Job Queue
//!
//! Redis list based job queue shared by the IKON content pipeline stages.
//!
//! ## Features
//!
//! - **Job record**: JSON document with attempt counter, earliest eligibility
//!   time and error history
//! - **Table-driven backoff**: 60s / 300s / 900s between attempts by default
//! - **Dead Letter Queue**: jobs that exhaust their attempts land in
//!   `ideas:dead` with a final error note
//! - **Generic worker**: `JobWorker<P>` runs the dequeue/process/retry loop
//! - **Prometheus metrics**: Built-in observability
//! - **Health endpoints**: K8s-ready liveness and readiness probes plus queue
//!   admin routes
//!
//! ## Example
//!
//! ```ignore
//! use job_queue::{JobQueue, JobWorker, QueueConfig, WorkerConfig};
//! use core_config::FromEnv;
//!
//! let queue = JobQueue::connect(&QueueConfig::from_env()?).await?;
//!
//! let job = queue.create_job("idea-42", payload, None);
//! queue.enqueue("ideas:ready", &job).await?;
//!
//! let worker = JobWorker::new(queue, ScriptWriter::new(), WorkerConfig::new("ideas:ready"));
//! worker.run(shutdown_rx).await;
//! ```

mod backoff;
mod client;
mod config;
mod connect;
mod error;
mod health;
mod job;
pub mod metrics;
mod registry;
mod worker;

pub use backoff::{BackoffPolicy, DEFAULT_BACKOFF_SECS};
pub use client::{Dequeued, JobQueue, RequeueOutcome};
pub use config::{QueueConfig, DEFAULT_NAMESPACE};
pub use connect::ConnectRetry;
pub use error::{ProcessError, QueueError};
pub use health::{admin_router, full_admin_router, health_router, HealthState, MAX_PEEK_COUNT};
pub use job::{create_job, now, ErrorRecord, Job, JobState, DEFAULT_MAX_ATTEMPTS};
pub use metrics::{init_metrics, QueueMetrics};
pub use registry::{KnownQueue, DEAD_LETTER_QUEUE};
pub use worker::{JobProcessor, JobWorker, Tick, WorkerConfig};
