//! Shared test utilities for queue testing
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: Deterministic namespaces and ids, so tests sharing a
//!   broker never see each other's keys (always available)
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! async fn my_queue_test() {
//!     let redis = TestRedis::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_queue_test");
//!
//!     let queue = JobQueue::new(redis.connection_manager().await, builder.namespace());
//!     let idea_id = builder.idea_id("main");
//! }
//! ```

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test data with deterministic naming
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed from the test name, so reruns of a test reuse the same names.
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_requeue");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Queue namespace private to this test.
    pub fn namespace(&self) -> String {
        format!("test-{}", self.seed)
    }

    /// Idea id, e.g. `idea-12345-main`.
    pub fn idea_id(&self, suffix: &str) -> String {
        format!("idea-{}-{}", self.seed, suffix)
    }
}
