//! Broker connection with startup retry
//!
//! Construction is the one place a queue failure is fatal: a client that
//! cannot reach Redis at all is useless. Each failed attempt waits out its
//! backoff delay (1s, 2s, 4s by default) before the next attempt or the final
//! error.
//!
//! The `ConnectionManager` is built with its own retries disabled, so one
//! attempt here is one TCP connect. It also has no response timeout: a
//! `BRPOP` legitimately waits as long as the caller's dequeue timeout, and
//! abandoning it client side would leave the pop pending on the server.

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Client;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Startup connection retry schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRetry {
    /// Total connection attempts
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    pub initial_delay: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: u32,
}

impl ConnectRetry {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier: 2,
        }
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Bound on a single TCP connect + handshake.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// `ConnectionManager` settings used by every queue client.
pub fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_number_of_retries(0)
        .set_connection_timeout(Some(CONNECTION_TIMEOUT))
        .set_response_timeout(None)
}

/// Run `operation` until it succeeds or the schedule runs out.
pub async fn with_retry<F, Fut, T, E>(retry: &ConnectRetry, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt = attempt, "Connected after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                let delay = retry.delay_for(attempt);
                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Redis connection attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;

                if attempt >= max_attempts {
                    error!(
                        attempts = max_attempts,
                        error = %e,
                        "Failed to connect to Redis"
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// Open a `ConnectionManager` and verify it with `PING`.
pub async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    debug!(url = %url, "Attempting to connect to Redis");

    let client = Client::open(url)?;
    let manager = ConnectionManager::new_with_config(client, manager_config()).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!(url = %url, "Connected to Redis");
    Ok(manager)
}
