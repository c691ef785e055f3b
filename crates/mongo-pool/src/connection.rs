//! Connection identity and transport failure classification.
//!
//! Transport code reports failures as a [`TransportFailure`] whose kind is
//! decided once, where the underlying error is still concrete. The pool and
//! every operation built on it then wrap that failure in a
//! [`ConnectionError`], which renders the classification phrases in a fixed
//! order and keeps the raw cause reachable through
//! [`std::error::Error::source`].

use std::fmt;
use std::io;

use mongo_csot::ContextError;

use crate::address::ServerAddress;

/// Boxed error type used for raw transport causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Phrase prepended to failures raised while establishing a connection.
pub const HANDSHAKE_PHRASE: &str = "error occurred during connection handshake";

/// Phrase for a peer closing the stream mid-exchange.
pub const CLOSED_BY_PEER_PHRASE: &str = "connection closed unexpectedly by the other side";

/// Phrase for a client-side timeout waiting on the peer.
pub const TIMEOUT_PHRASE: &str = "client timed out waiting for server response";

/// Identifier of one pooled connection, `host:port-n`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Identifier for the `sequence`-th connection established to `address`.
    #[must_use]
    pub fn new(address: &ServerAddress, sequence: u64) -> Self {
        Self(format!("{address}-{sequence}"))
    }

    /// An identifier for a connection that has not been assigned a sequence
    /// number yet.
    #[must_use]
    pub fn unassigned(address: &ServerAddress) -> Self {
        Self(address.to_string())
    }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportFailureKind {
    /// The peer closed the stream before the exchange completed.
    EndOfStream,
    /// The operation's context deadline elapsed.
    DeadlineExceeded,
    /// A socket-level timeout fired.
    NetworkTimeout,
    /// Anything else.
    Other,
}

impl TransportFailureKind {
    /// Whether this kind counts as a client-side timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::NetworkTimeout)
    }
}

/// A transport failure with its classification.
#[derive(Debug)]
pub struct TransportFailure {
    kind: TransportFailureKind,
    source: BoxError,
}

impl TransportFailure {
    /// Classify an I/O error.
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::UnexpectedEof => TransportFailureKind::EndOfStream,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                TransportFailureKind::NetworkTimeout
            }
            _ => TransportFailureKind::Other,
        };
        Self {
            kind,
            source: Box::new(err),
        }
    }

    /// Classify the end of an operation context.
    #[must_use]
    pub fn from_context(err: ContextError) -> Self {
        let kind = match err {
            ContextError::DeadlineExceeded => TransportFailureKind::DeadlineExceeded,
            ContextError::Canceled => TransportFailureKind::Other,
        };
        Self {
            kind,
            source: Box::new(err),
        }
    }

    /// An unclassified failure.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self {
            kind: TransportFailureKind::Other,
            source: err.into(),
        }
    }

    /// The classification.
    #[must_use]
    pub fn kind(&self) -> TransportFailureKind {
        self.kind
    }

    /// The raw cause.
    #[must_use]
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.source, f)
    }
}

impl std::error::Error for TransportFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<io::Error> for TransportFailure {
    fn from(err: io::Error) -> Self {
        Self::from_io(err)
    }
}

impl From<ContextError> for TransportFailure {
    fn from(err: ContextError) -> Self {
        Self::from_context(err)
    }
}

/// A failure on a specific connection.
///
/// Renders as `"{parts}; connection({id})"`, where the parts are joined by
/// `": "` in this order: the handshake marker, the context message, the
/// classification phrase, and the raw cause.
#[derive(Debug)]
pub struct ConnectionError {
    connection_id: ConnectionId,
    failure: Option<TransportFailure>,
    during_handshake: bool,
    message: Option<String>,
}

impl ConnectionError {
    /// Wrap a classified transport failure.
    #[must_use]
    pub fn classify(
        connection_id: ConnectionId,
        failure: TransportFailure,
        during_handshake: bool,
    ) -> Self {
        Self {
            connection_id,
            failure: Some(failure),
            during_handshake,
            message: None,
        }
    }

    /// A connection error without an underlying cause.
    #[must_use]
    pub fn new(connection_id: ConnectionId, during_handshake: bool) -> Self {
        Self {
            connection_id,
            failure: None,
            during_handshake,
            message: None,
        }
    }

    /// Attach a context message, rendered after the handshake marker.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The connection this failure happened on.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Classification of the underlying failure, if any.
    #[must_use]
    pub fn kind(&self) -> Option<TransportFailureKind> {
        self.failure.as_ref().map(TransportFailure::kind)
    }

    /// Whether the failure was a client-side timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind().is_some_and(|k| k.is_timeout())
    }

    /// Whether the peer closed the stream.
    #[must_use]
    pub fn is_closed_by_peer(&self) -> bool {
        self.kind() == Some(TransportFailureKind::EndOfStream)
    }

    /// Whether the failure happened while establishing the connection.
    #[must_use]
    pub fn during_handshake(&self) -> bool {
        self.during_handshake
    }

    fn phrase(&self) -> Option<&'static str> {
        match self.kind()? {
            TransportFailureKind::EndOfStream => Some(CLOSED_BY_PEER_PHRASE),
            TransportFailureKind::DeadlineExceeded | TransportFailureKind::NetworkTimeout => {
                Some(TIMEOUT_PHRASE)
            }
            TransportFailureKind::Other => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::with_capacity(4);
        if self.during_handshake {
            parts.push(HANDSHAKE_PHRASE.to_string());
        }
        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            parts.push(message.to_string());
        }
        if let Some(phrase) = self.phrase() {
            parts.push(phrase.to_string());
        }
        if let Some(failure) = &self.failure {
            parts.push(failure.to_string());
        }

        if parts.is_empty() {
            write!(f, "connection({})", self.connection_id)
        } else {
            write!(f, "{}; connection({})", parts.join(": "), self.connection_id)
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failure
            .as_ref()
            .map(|f| f.source.as_ref() as &(dyn std::error::Error + 'static))
    }
}
