//! Queue client configuration
//!
//! This module provides `QueueConfig`, loaded from the environment through
//! `core_config::FromEnv` or built explicitly.

use crate::backoff::BackoffPolicy;
use crate::job::DEFAULT_MAX_ATTEMPTS;
use core_config::redis::RedisConfig;
use core_config::{env_or_default, env_parse_or, ConfigError, FromEnv};

/// Namespace used when `QUEUE_NAMESPACE` is unset.
pub const DEFAULT_NAMESPACE: &str = "ikon";

/// Configuration for the job queue client
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Broker connection
    pub redis: RedisConfig,

    /// Key prefix isolating this deployment's queues
    pub namespace: String,

    /// Retry delays applied by `requeue_with_backoff`
    pub backoff: BackoffPolicy,

    /// Attempt ceiling for jobs built through `JobQueue::create_job`
    pub max_attempts: u32,
}

impl QueueConfig {
    pub fn new(url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            redis: RedisConfig::new(url),
            namespace: namespace.into(),
            backoff: BackoffPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Clamped to at least 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            backoff: BackoffPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl FromEnv for QueueConfig {
    /// Environment variables:
    /// - `REDIS_URL` / `REDIS_HOST`: broker URL (see `RedisConfig`)
    /// - `QUEUE_NAMESPACE`: key prefix, default `ikon`
    /// - `QUEUE_BACKOFF_SECS`: comma separated delays, default `60,300,900`
    /// - `QUEUE_MAX_ATTEMPTS`: default 3
    fn from_env() -> Result<Self, ConfigError> {
        let max_attempts = env_parse_or("QUEUE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::ParseError {
                key: "QUEUE_MAX_ATTEMPTS".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            redis: RedisConfig::from_env()?,
            namespace: env_or_default("QUEUE_NAMESPACE", DEFAULT_NAMESPACE),
            backoff: env_parse_or("QUEUE_BACKOFF_SECS", BackoffPolicy::default())?,
            max_attempts,
        })
    }
}
