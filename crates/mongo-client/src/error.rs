//! Client error types.

use mongo_csot::{ContextError, TimeoutError};
use mongo_driver_pool::{ConnectionError, PoolError};
use mongo_topology::ServerSelectionError;
use mongo_types::DecodeError;
use thiserror::Error;

use crate::options::OptionError;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Checking out a pooled connection failed.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// No eligible server was found in time.
    #[error(transparent)]
    ServerSelection(#[from] ServerSelectionError),

    /// A connection failed after checkout.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Not enough time left to send the operation.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// The operation's context ended.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// An option setter rejected its value.
    #[error("invalid option: {0}")]
    Option(#[from] OptionError),

    /// The server returned a document that could not be decoded.
    ///
    /// Never retried.
    #[error("error decoding cursor result: {0}")]
    Decode(#[from] DecodeError),

    /// The server reported a command failure.
    #[error("command failed with code {code}: {message}")]
    Command {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error was caused by a deadline or timeout.
    ///
    /// Distinct from [`Error::is_cancellation`]: an explicitly cancelled
    /// operation is never reported as a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Pool(e) => e.is_timeout(),
            Self::ServerSelection(e) => e.is_timeout(),
            Self::Connection(e) => e.is_timeout(),
            Self::Timeout(_) => true,
            Self::Context(e) => e.is_deadline_exceeded(),
            Self::Option(_) | Self::Decode(_) | Self::Command { .. } | Self::Config(_) => false,
        }
    }

    /// Whether the operation's context was cancelled explicitly.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Pool(PoolError::WaitQueueTimeout(e)) => e.cause().is_canceled(),
            Self::ServerSelection(e) => e.interrupted().is_some_and(|c| c.is_canceled()),
            Self::Context(e) => e.is_canceled(),
            _ => false,
        }
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// Admission and connection failures are transient; malformed payloads,
    /// invalid options, and configuration errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Pool(e) => e.is_transient(),
            Self::ServerSelection(_) | Self::Connection(_) => !self.is_cancellation(),
            _ => false,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
