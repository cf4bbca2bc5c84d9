use crate::{ConfigError, FromEnv};

/// Default broker used by local pipeline runs.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";

/// Redis connection configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new(DEFAULT_REDIS_URL)
    }
}

impl FromEnv for RedisConfig {
    /// Reads `REDIS_URL`, falling back to `REDIS_HOST`, then the local default.
    fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("REDIS_URL")
            .or_else(|_| std::env::var("REDIS_HOST"))
            .unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());

        Ok(Self { url })
    }
}
