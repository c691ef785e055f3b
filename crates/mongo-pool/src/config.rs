//! Pool configuration.

use std::time::Duration;

/// Default maximum number of connections per server.
pub const DEFAULT_MAX_POOL_SIZE: u64 = 100;

/// Configuration for a connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of connections, idle and in use. Zero means unlimited.
    pub max_pool_size: u64,

    /// Upper bound on how long a checkout may wait, applied in addition to
    /// the caller's context deadline. The sooner of the two wins.
    pub wait_queue_timeout: Option<Duration>,

    /// Idle connections older than this are closed instead of reused.
    pub max_idle_time: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            wait_queue_timeout: None,
            max_idle_time: None,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_pool_size(mut self, size: u64) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the wait-queue timeout.
    #[must_use]
    pub fn wait_queue_timeout(mut self, timeout: Duration) -> Self {
        self.wait_queue_timeout = Some(timeout);
        self
    }

    /// Set the maximum idle time.
    #[must_use]
    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = Some(idle);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), crate::error::PoolError> {
        if self.wait_queue_timeout.is_some_and(|t| t.is_zero()) {
            return Err(crate::error::PoolError::Configuration(
                "wait_queue_timeout must be greater than 0".into(),
            ));
        }
        if self.max_idle_time.is_some_and(|t| t.is_zero()) {
            return Err(crate::error::PoolError::Configuration(
                "max_idle_time must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
