//! Encoding boundary error types.

use thiserror::Error;

/// Errors reported by a value writer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteError {
    /// The writer is not in a state that accepts the requested value.
    #[error("cannot {action} in writer state {state}")]
    InvalidState {
        /// What the caller tried to do.
        action: &'static str,
        /// The writer's current state.
        state: String,
    },

    /// A nested scope was ended out of order.
    #[error("unbalanced scope end: expected {expected}, got {actual}")]
    UnbalancedScope {
        /// Scope kind the writer expected to close.
        expected: &'static str,
        /// Scope kind the caller closed.
        actual: &'static str,
    },

    /// Document keys cannot contain NUL bytes.
    #[error("invalid key {0:?}: keys cannot contain null bytes")]
    InvalidKey(String),

    /// Backend-specific failure.
    #[error("write failed: {0}")]
    Backend(String),
}

/// Errors produced while checking the framing of a raw document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// Fewer bytes than the smallest possible document.
    #[error("document too short: {0} bytes, need at least 5")]
    TooShort(usize),

    /// The length prefix disagrees with the number of bytes received.
    #[error("length prefix {declared} does not match document size {actual}")]
    LengthMismatch {
        /// Length declared in the first four bytes.
        declared: i64,
        /// Number of bytes actually present.
        actual: usize,
    },

    /// The document is not terminated by a null byte.
    #[error("document is not null terminated")]
    MissingTerminator,
}
