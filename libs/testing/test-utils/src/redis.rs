//! Redis test infrastructure
//!
//! Provides a `TestRedis` helper that runs a throwaway Redis container.

use redis::aio::{ConnectionManager, ConnectionManagerConfig, MultiplexedConnection};
use redis::Client;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// Test Redis wrapper; the container is stopped and removed on drop.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestRedis;
/// use redis::AsyncCommands;
///
/// # async fn example() {
/// let redis = TestRedis::new().await;
/// let mut conn = redis.connection();
///
/// conn.lpush::<_, _, ()>("ikon:ideas:ready", "{}").await.unwrap();
/// let len: u64 = conn.llen("ikon:ideas:ready").await.unwrap();
/// assert_eq!(len, 1);
/// # }
/// ```
pub struct TestRedis {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    client: Client,
    connection: MultiplexedConnection,
    pub connection_string: String,
}

impl TestRedis {
    /// Start a Redis 8 Alpine container.
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag("8-alpine")
            .start()
            .await
            .expect("Failed to start Redis container");

        let host_port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let connection_string = format!("redis://127.0.0.1:{}", host_port);

        let client = Client::open(connection_string.clone())
            .expect("Failed to create Redis client");

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .expect("Failed to connect to Redis");

        tracing::info!(port = host_port, "Test Redis ready (Redis 8-alpine)");

        Self {
            container,
            client,
            connection,
            connection_string,
        }
    }

    /// Cloned raw connection, for inspecting keys directly.
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// Fresh `ConnectionManager`, the handle the queue client is built on.
    ///
    /// No response timeout, so blocking pops can wait longer than the
    /// manager's default.
    pub async fn connection_manager(&self) -> ConnectionManager {
        let config = ConnectionManagerConfig::new().set_response_timeout(None);
        ConnectionManager::new_with_config(self.client.clone(), config)
            .await
            .expect("Failed to create ConnectionManager")
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

impl Drop for TestRedis {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test Redis container");
    }
}
