//! Scripted connector for pool and client tests.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mongo_driver_pool::{ConnectionId, Connector, ServerAddress, TransportFailure};
use parking_lot::Mutex;

/// What the next connection attempt does.
#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    /// Connect immediately.
    Succeed,
    /// Connect after the delay.
    Delay(Duration),
    /// Never complete.
    Hang,
    /// Fail with an I/O error.
    Fail {
        /// I/O error kind.
        kind: io::ErrorKind,
        /// I/O error message.
        message: String,
    },
}

impl ConnectBehavior {
    /// The peer closed the stream mid-handshake.
    #[must_use]
    pub fn eof() -> Self {
        Self::Fail {
            kind: io::ErrorKind::UnexpectedEof,
            message: "EOF".into(),
        }
    }

    /// The peer refused the connection.
    #[must_use]
    pub fn refused() -> Self {
        Self::Fail {
            kind: io::ErrorKind::ConnectionRefused,
            message: "connection refused".into(),
        }
    }
}

/// A connection produced by [`MockConnector`].
#[derive(Debug)]
pub struct MockConnection {
    /// Server the connection points at.
    pub address: ServerAddress,
    /// Identifier assigned by the pool.
    pub id: ConnectionId,
    healthy: Arc<AtomicBool>,
}

impl MockConnection {
    /// Mark the connection broken; the pool closes it on check-in.
    pub fn break_connection(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Inner {
    script: Mutex<VecDeque<ConnectBehavior>>,
    fallback: Mutex<ConnectBehavior>,
    attempts: AtomicU64,
    established: AtomicU64,
}

/// A [`Connector`] whose outcomes are scripted by the test.
///
/// Queued behaviors are consumed in order; once the queue is empty every
/// attempt uses the fallback, which starts as [`ConnectBehavior::Succeed`].
/// Clones share the script and counters.
#[derive(Debug, Clone)]
pub struct MockConnector {
    inner: Arc<Inner>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// A connector that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(ConnectBehavior::Succeed),
                attempts: AtomicU64::new(0),
                established: AtomicU64::new(0),
            }),
        }
    }

    /// A connector whose fallback is `behavior`.
    #[must_use]
    pub fn with_fallback(behavior: ConnectBehavior) -> Self {
        let connector = Self::new();
        *connector.inner.fallback.lock() = behavior;
        connector
    }

    /// Queue a behavior for the next unscripted attempt.
    pub fn push(&self, behavior: ConnectBehavior) {
        self.inner.script.lock().push_back(behavior);
    }

    /// Connection attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Connections successfully established so far.
    #[must_use]
    pub fn established(&self) -> u64 {
        self.inner.established.load(Ordering::SeqCst)
    }

    fn next_behavior(&self) -> ConnectBehavior {
        match self.inner.script.lock().pop_front() {
            Some(behavior) => behavior,
            None => self.inner.fallback.lock().clone(),
        }
    }

    fn open(&self, address: &ServerAddress, id: &ConnectionId) -> MockConnection {
        self.inner.established.fetch_add(1, Ordering::SeqCst);
        MockConnection {
            address: address.clone(),
            id: id.clone(),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(
        &self,
        address: &ServerAddress,
        id: &ConnectionId,
    ) -> Result<MockConnection, TransportFailure> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self.next_behavior();
        tracing::trace!(address = %address, connection_id = %id, ?behavior, "mock connect");

        match behavior {
            ConnectBehavior::Succeed => Ok(self.open(address, id)),
            ConnectBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.open(address, id))
            }
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::Fail { kind, message } => {
                Err(TransportFailure::from_io(io::Error::new(kind, message)))
            }
        }
    }

    fn is_valid(&self, conn: &MockConnection) -> bool {
        conn.healthy.load(Ordering::SeqCst)
    }
}
