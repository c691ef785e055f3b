//! Pool error types.

use std::fmt;
use std::time::Duration;

use mongo_csot::ContextError;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::occupancy::PoolOccupancy;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The checkout's context ended before a connection became available.
    #[error(transparent)]
    WaitQueueTimeout(#[from] WaitQueueTimeoutError),

    /// Establishing a new connection failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The pool has been closed.
    #[error("attempted to check out a connection from closed connection pool")]
    PoolClosed,

    /// Invalid pool configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Whether this error was caused by a deadline or timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::WaitQueueTimeout(e) => e.cause().is_deadline_exceeded(),
            Self::Connection(e) => e.is_timeout(),
            Self::PoolClosed | Self::Configuration(_) => false,
        }
    }

    /// Whether a retry against the same pool might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::WaitQueueTimeout(e) => !e.cause().is_canceled(),
            Self::Connection(_) => true,
            Self::PoolClosed | Self::Configuration(_) => false,
        }
    }
}

/// A checkout ended before a connection became available.
///
/// Carries the pool occupancy observed when the wait ended so the message
/// shows where every connection was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitQueueTimeoutError {
    cause: ContextError,
    occupancy: PoolOccupancy,
    max_pool_size: u64,
    wait_duration: Duration,
}

impl WaitQueueTimeoutError {
    /// Create a new wait-queue timeout error.
    #[must_use]
    pub fn new(
        cause: ContextError,
        occupancy: PoolOccupancy,
        max_pool_size: u64,
        wait_duration: Duration,
    ) -> Self {
        Self {
            cause,
            occupancy,
            max_pool_size,
            wait_duration,
        }
    }

    /// Why the wait ended.
    #[must_use]
    pub fn cause(&self) -> ContextError {
        self.cause
    }

    /// Occupancy when the wait ended.
    #[must_use]
    pub fn occupancy(&self) -> PoolOccupancy {
        self.occupancy
    }

    /// Configured maximum pool size.
    #[must_use]
    pub fn max_pool_size(&self) -> u64 {
        self.max_pool_size
    }

    /// How long the checkout waited.
    #[must_use]
    pub fn wait_duration(&self) -> Duration {
        self.wait_duration
    }
}

impl fmt::Display for WaitQueueTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.cause {
            ContextError::DeadlineExceeded => "timed out",
            ContextError::Canceled => "canceled",
        };
        let o = &self.occupancy;
        write!(
            f,
            "{prefix} while checking out a connection from connection pool: {}; \
             total connections: {}, maxPoolSize: {}, \
             connections in use by cursors: {}, \
             connections in use by transactions: {}, \
             connections in use by other operations: {}, \
             idle connections: {}, wait duration: {:?}",
            self.cause,
            o.total,
            self.max_pool_size,
            o.cursor_pinned,
            o.transaction_pinned,
            o.other_in_use(),
            o.available,
            self.wait_duration,
        )
    }
}

impl std::error::Error for WaitQueueTimeoutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}
