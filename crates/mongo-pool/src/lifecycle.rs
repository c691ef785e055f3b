//! Connection establishment and per-connection bookkeeping.

use std::time::Duration;

use mongo_csot::Instant;

use crate::address::ServerAddress;
use crate::connection::{ConnectionId, TransportFailure};
use crate::occupancy::PinKind;

/// Establishes connections for a pool.
///
/// `#[async_trait]` keeps the trait object-safe so callers can hold a
/// `dyn Connector` behind an `Arc` when they don't care about the concrete
/// connection type.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The established connection type.
    type Connection: Send + 'static;

    /// Open and handshake a new connection to `address`.
    ///
    /// The pool bounds this call by the checkout's context; implementations
    /// do not need their own timeout.
    async fn connect(
        &self,
        address: &ServerAddress,
        id: &ConnectionId,
    ) -> Result<Self::Connection, TransportFailure>;

    /// Whether an idle connection can still be handed out.
    ///
    /// Called on checkout and checkin. Defaults to `true`.
    fn is_valid(&self, _connection: &Self::Connection) -> bool {
        true
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Idle and available for checkout.
    Idle,
    /// Checked out by an operation.
    InUse,
    /// Checked out and pinned.
    Pinned(PinKind),
    /// Closed and removed from the pool.
    Closed,
}

impl ConnectionState {
    /// Check if the connection is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if the connection is checked out.
    #[must_use]
    pub fn is_checked_out(&self) -> bool {
        matches!(self, Self::InUse | Self::Pinned(_))
    }

    /// The pin held on the connection, if any.
    #[must_use]
    pub fn pin(&self) -> Option<PinKind> {
        match self {
            Self::Pinned(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection.
    pub id: ConnectionId,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last checked out or in.
    pub last_used_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
    /// Current state of the connection.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Create metadata for a freshly established connection.
    pub fn new(id: ConnectionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
            state: ConnectionState::Idle,
        }
    }

    /// Check if the connection has been idle too long.
    #[must_use]
    pub fn is_idle_expired(&self, max_idle_time: Duration) -> bool {
        self.state.is_available() && self.last_used_at.elapsed() > max_idle_time
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.state = ConnectionState::InUse;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.state = ConnectionState::Idle;
    }

    /// Mark the connection as closed.
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}
