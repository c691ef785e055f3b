//! Connection pool implementation.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mongo_csot::{CancelGuard, ContextError, Instant, OperationContext};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::address::ServerAddress;
use crate::config::PoolConfig;
use crate::connection::{ConnectionError, ConnectionId};
use crate::error::{PoolError, WaitQueueTimeoutError};
use crate::lifecycle::{ConnectionMetadata, ConnectionState, Connector};
use crate::occupancy::{PinKind, PoolOccupancy};

/// A connection pool for one server.
///
/// Cloning a `Pool` is cheap; clones share the same connections and
/// accounting. Every counter lives behind a single mutex, so a status
/// snapshot or a [`WaitQueueTimeoutError`] always reflects one consistent
/// instant.
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("address", &self.inner.address)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

struct PoolInner<C: Connector> {
    address: ServerAddress,
    connector: C,
    config: PoolConfig,
    state: Mutex<PoolState<C::Connection>>,
    /// Signalled whenever a connection or a unit of capacity frees up.
    available: Notify,
    created_at: Instant,
    next_id: AtomicU64,
}

struct IdleEntry<T> {
    conn: T,
    meta: ConnectionMetadata,
}

struct PoolState<T> {
    /// Most recently checked-in connections at the back.
    idle: VecDeque<IdleEntry<T>>,
    total: u64,
    /// Connections being established; they count against the limit.
    pending: u64,
    cursor_pinned: u64,
    transaction_pinned: u64,
    waiters: u64,
    max_pool_size: u64,
    closed: bool,
    counters: Counters,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
}

impl<T> PoolState<T> {
    fn occupancy(&self) -> PoolOccupancy {
        PoolOccupancy {
            total: self.total,
            available: self.idle.len() as u64,
            cursor_pinned: self.cursor_pinned,
            transaction_pinned: self.transaction_pinned,
        }
    }

    fn has_capacity(&self) -> bool {
        self.max_pool_size == 0 || self.total + self.pending < self.max_pool_size
    }

    fn pin_counter(&mut self, kind: PinKind) -> &mut u64 {
        match kind {
            PinKind::Cursor => &mut self.cursor_pinned,
            PinKind::Transaction => &mut self.transaction_pinned,
        }
    }

    fn release_pin(&mut self, pin: Option<PinKind>) {
        if let Some(kind) = pin {
            let counter = self.pin_counter(kind);
            *counter = counter.saturating_sub(1);
        }
    }

    fn record_close(&mut self) {
        self.total = self.total.saturating_sub(1);
        self.counters.connections_closed += 1;
    }
}

enum Acquire<T> {
    Idle(IdleEntry<T>),
    Establish(ConnectionId),
    Wait,
}

impl<C: Connector> Pool<C> {
    /// Create a pool for `address` that opens connections with `connector`.
    ///
    /// No connections are opened until the first checkout.
    pub fn new(address: ServerAddress, connector: C, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        tracing::debug!(
            address = %address,
            max_pool_size = config.max_pool_size,
            "connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                address,
                connector,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    total: 0,
                    pending: 0,
                    cursor_pinned: 0,
                    transaction_pinned: 0,
                    waiters: 0,
                    max_pool_size: config.max_pool_size,
                    closed: false,
                    counters: Counters::default(),
                }),
                config,
                available: Notify::new(),
                created_at: Instant::now(),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Check out a connection.
    ///
    /// Returns the most recently checked-in idle connection if there is one,
    /// otherwise establishes a new connection when the pool is below its
    /// limit, otherwise waits for a checkin. The whole call, establishment
    /// included, is bounded by `ctx` and by the configured wait-queue
    /// timeout, whichever ends first.
    pub async fn checkout(&self, ctx: &OperationContext) -> Result<PooledConnection<C>, PoolError> {
        let start = Instant::now();
        let (ctx, _guard) = match self.inner.config.wait_queue_timeout {
            Some(timeout) => ctx.child_with_timeout(timeout),
            None => (ctx.clone(), CancelGuard::noop()),
        };

        let result = self.acquire(&ctx, start).await;

        let wait_ms = whole_millis(start.elapsed());
        match &result {
            Ok(conn) => {
                self.inner.state.lock().counters.checkouts_successful += 1;
                tracing::trace!(
                    address = %self.inner.address,
                    connection_id = %conn.id(),
                    wait_ms,
                    "connection checked out"
                );
            }
            Err(e) => {
                self.inner.state.lock().counters.checkouts_failed += 1;
                tracing::warn!(
                    address = %self.inner.address,
                    wait_ms,
                    error = %e,
                    "connection checkout failed"
                );
            }
        }

        result
    }

    async fn acquire(
        &self,
        ctx: &OperationContext,
        start: Instant,
    ) -> Result<PooledConnection<C>, PoolError> {
        let _waiter = WaiterGuard::register(&self.inner);

        loop {
            // Registered before inspecting state so a checkin between the
            // check and the wait is not missed.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(cause) = ctx.err() {
                return Err(self.inner.wait_queue_timeout(cause, start).into());
            }

            match self.inner.try_acquire()? {
                Acquire::Idle(entry) => {
                    return Ok(PooledConnection::new(&self.inner, entry.conn, entry.meta));
                }
                Acquire::Establish(id) => return self.establish(ctx, id, start).await,
                Acquire::Wait => {}
            }

            tokio::select! {
                biased;
                cause = ctx.done() => {
                    return Err(self.inner.wait_queue_timeout(cause, start).into());
                }
                () = &mut notified => {}
            }
        }
    }

    async fn establish(
        &self,
        ctx: &OperationContext,
        id: ConnectionId,
        start: Instant,
    ) -> Result<PooledConnection<C>, PoolError> {
        let pending = PendingGuard::new(&self.inner);

        // An interrupted checkout is a wait-queue failure, not a handshake
        // failure; only the connector's own errors become ConnectionError.
        let result = tokio::select! {
            biased;
            cause = ctx.done() => {
                drop(pending);
                tracing::debug!(
                    address = %self.inner.address,
                    connection_id = %id,
                    %cause,
                    "connection establishment abandoned"
                );
                return Err(self.inner.wait_queue_timeout(cause, start).into());
            }
            res = self.inner.connector.connect(&self.inner.address, &id) => res,
        };

        match result {
            Ok(conn) => {
                pending.complete();
                let mut meta = ConnectionMetadata::new(id);
                meta.mark_checkout();
                tracing::debug!(
                    address = %self.inner.address,
                    connection_id = %meta.id,
                    "connection established"
                );
                Ok(PooledConnection::new(&self.inner, conn, meta))
            }
            Err(failure) => {
                drop(pending);
                Err(ConnectionError::classify(id, failure, true).into())
            }
        }
    }

    /// Current occupancy and limits.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            occupancy: state.occupancy(),
            pending: state.pending,
            waiters: state.waiters,
            max: state.max_pool_size,
        }
    }

    /// Lifetime counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let counters = self.inner.state.lock().counters;
        PoolMetrics {
            connections_created: counters.connections_created,
            connections_closed: counters.connections_closed,
            checkouts_successful: counters.checkouts_successful,
            checkouts_failed: counters.checkouts_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Change the connection limit.
    ///
    /// When shrinking, idle connections are closed oldest-idle-first until
    /// the pool fits or no idle connections remain. Checked-out connections
    /// above the new limit are closed as they come back.
    pub fn set_max_pool_size(&self, max_pool_size: u64) {
        let evicted = {
            let mut state = self.inner.state.lock();
            state.max_pool_size = max_pool_size;
            let mut evicted = Vec::new();
            if max_pool_size != 0 {
                while state.total > max_pool_size {
                    let Some(mut entry) = state.idle.pop_front() else {
                        break;
                    };
                    entry.meta.mark_closed();
                    state.record_close();
                    evicted.push(entry);
                }
            }
            evicted
        };

        self.inner.available.notify_waiters();
        tracing::info!(
            address = %self.inner.address,
            max_pool_size,
            evicted = evicted.len(),
            "connection pool resized"
        );
    }

    /// Close every idle connection. Checked-out connections are unaffected.
    pub fn clear(&self) {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            let drained: Vec<_> = state.idle.drain(..).collect();
            for _ in &drained {
                state.record_close();
            }
            drained
        };

        self.inner.available.notify_waiters();
        tracing::debug!(
            address = %self.inner.address,
            closed = drained.len(),
            "idle connections cleared"
        );
    }

    /// Close the pool.
    ///
    /// Idle connections are closed now; checked-out connections are closed
    /// when they come back. Waiting and future checkouts fail with
    /// [`PoolError::PoolClosed`].
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            for _ in &drained {
                state.record_close();
            }
            drained
        };

        self.inner.available.notify_waiters();
        tracing::info!(
            address = %self.inner.address,
            closed = drained.len(),
            "connection pool closed"
        );
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// The server this pool connects to.
    #[must_use]
    pub fn address(&self) -> &ServerAddress {
        &self.inner.address
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl<C: Connector> PoolInner<C> {
    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(&self.address, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn is_stale(&self, entry: &IdleEntry<C::Connection>) -> bool {
        self.config
            .max_idle_time
            .is_some_and(|max_idle| entry.meta.is_idle_expired(max_idle))
    }

    fn try_acquire(&self) -> Result<Acquire<C::Connection>, PoolError> {
        let mut discarded = Vec::new();

        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }

            while state.idle.front().is_some_and(|e| self.is_stale(e)) {
                if let Some(entry) = state.idle.pop_front() {
                    state.record_close();
                    discarded.push(entry);
                }
            }

            let mut found = None;
            while let Some(mut entry) = state.idle.pop_back() {
                if self.connector.is_valid(&entry.conn) {
                    entry.meta.mark_checkout();
                    found = Some(entry);
                    break;
                }
                state.record_close();
                discarded.push(entry);
            }

            match found {
                Some(entry) => Acquire::Idle(entry),
                None if state.has_capacity() => {
                    state.pending += 1;
                    Acquire::Establish(self.next_connection_id())
                }
                None => Acquire::Wait,
            }
        };

        for mut entry in discarded {
            entry.meta.mark_closed();
            tracing::debug!(
                address = %self.address,
                connection_id = %entry.meta.id,
                "closing stale idle connection"
            );
            self.available.notify_one();
        }

        Ok(outcome)
    }

    fn wait_queue_timeout(&self, cause: ContextError, start: Instant) -> WaitQueueTimeoutError {
        let state = self.state.lock();
        WaitQueueTimeoutError::new(
            cause,
            state.occupancy(),
            state.max_pool_size,
            start.elapsed(),
        )
    }

    fn set_pin(&self, from: Option<PinKind>, to: Option<PinKind>) {
        if from == to {
            return;
        }
        let mut state = self.state.lock();
        state.release_pin(from);
        if let Some(kind) = to {
            *state.pin_counter(kind) += 1;
        }
    }

    fn checkin(&self, conn: C::Connection, mut meta: ConnectionMetadata) {
        let id = meta.id.clone();
        let rejected = {
            let mut state = self.state.lock();
            state.release_pin(meta.state.pin());

            let over_limit = state.max_pool_size != 0 && state.total > state.max_pool_size;
            if state.closed || over_limit || !self.connector.is_valid(&conn) {
                state.record_close();
                meta.mark_closed();
                Some(conn)
            } else {
                meta.mark_checkin();
                state.idle.push_back(IdleEntry { conn, meta });
                None
            }
        };

        self.available.notify_one();
        if let Some(conn) = rejected {
            tracing::debug!(
                address = %self.address,
                connection_id = %id,
                "connection closed on checkin"
            );
            drop(conn);
        } else {
            tracing::trace!(
                address = %self.address,
                connection_id = %id,
                "connection checked in"
            );
        }
    }

    fn close_checked_out(&self, meta: &ConnectionMetadata) {
        {
            let mut state = self.state.lock();
            state.release_pin(meta.state.pin());
            state.record_close();
        }
        self.available.notify_one();
        tracing::debug!(
            address = %self.address,
            connection_id = %meta.id,
            "connection discarded"
        );
    }
}

/// Counts a checkout as waiting for as long as it is in flight.
struct WaiterGuard<'a, C: Connector> {
    inner: &'a PoolInner<C>,
}

impl<'a, C: Connector> WaiterGuard<'a, C> {
    fn register(inner: &'a PoolInner<C>) -> Self {
        inner.state.lock().waiters += 1;
        Self { inner }
    }
}

impl<C: Connector> Drop for WaiterGuard<'_, C> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.waiters = state.waiters.saturating_sub(1);
    }
}

/// Holds one unit of capacity while a connection is being established.
///
/// Dropping it without [`PendingGuard::complete`] gives the capacity back,
/// which covers both failed connects and checkouts cancelled mid-connect.
struct PendingGuard<'a, C: Connector> {
    inner: &'a PoolInner<C>,
    armed: bool,
}

impl<'a, C: Connector> PendingGuard<'a, C> {
    fn new(inner: &'a PoolInner<C>) -> Self {
        Self { inner, armed: true }
    }

    fn complete(mut self) {
        self.armed = false;
        let mut state = self.inner.state.lock();
        state.pending = state.pending.saturating_sub(1);
        state.total += 1;
        state.counters.connections_created += 1;
    }
}

impl<C: Connector> Drop for PendingGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            {
                let mut state = self.inner.state.lock();
                state.pending = state.pending.saturating_sub(1);
            }
            self.inner.available.notify_one();
        }
    }
}

/// `duration` in whole milliseconds, saturating at `u64::MAX`.
fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Where the established connections are.
    pub occupancy: PoolOccupancy,
    /// Connections being established.
    pub pending: u64,
    /// Checkouts in flight.
    pub waiters: u64,
    /// Maximum allowed connections; zero means unlimited.
    pub max: u64,
}

impl PoolStatus {
    /// Share of the limit that is checked out, between 0.0 and 1.0.
    ///
    /// Always 0.0 for an unlimited pool.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        self.occupancy.in_use() as f64 / self.max as f64
    }

    /// Whether a checkout that finds no idle connection would have to wait.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.max != 0 && self.occupancy.total + self.pending >= self.max
    }
}

/// Lifetime counters for a pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolMetrics {
    /// Connections successfully established.
    pub connections_created: u64,
    /// Connections closed for any reason.
    pub connections_closed: u64,
    /// Checkouts that returned a connection.
    pub checkouts_successful: u64,
    /// Checkouts that failed.
    pub checkouts_failed: u64,
    /// Time since the pool was created.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Share of checkouts that succeeded; 1.0 when there were none.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

/// A connection checked out of a [`Pool`].
///
/// Dereferences to the underlying connection. Dropping it checks the
/// connection back in; [`PooledConnection::discard`] closes it instead.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    meta: ConnectionMetadata,
    pool: Arc<PoolInner<C>>,
}

impl<C: Connector> PooledConnection<C> {
    fn new(pool: &Arc<PoolInner<C>>, conn: C::Connection, meta: ConnectionMetadata) -> Self {
        Self {
            conn: Some(conn),
            meta,
            pool: Arc::clone(pool),
        }
    }

    /// The connection's identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.meta.id
    }

    /// Bookkeeping for this connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.meta
    }

    /// The pin currently held, if any.
    #[must_use]
    pub fn pin_kind(&self) -> Option<PinKind> {
        self.meta.state.pin()
    }

    /// Pin the connection to a cursor or transaction.
    ///
    /// Re-pinning with a different kind moves the connection between
    /// categories.
    pub fn pin(&mut self, kind: PinKind) {
        self.pool.set_pin(self.pin_kind(), Some(kind));
        self.meta.state = ConnectionState::Pinned(kind);
    }

    /// Release the pin, if any.
    pub fn unpin(&mut self) {
        self.pool.set_pin(self.pin_kind(), None);
        self.meta.state = ConnectionState::InUse;
    }

    /// Close the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.close_checked_out(&self.meta);
            drop(conn);
        }
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on drop or discard"),
        }
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on drop or discard"),
        }
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.meta)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn, self.meta.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::io;
    use std::sync::atomic::AtomicBool;

    use mongo_csot::with_timeout;
    use proptest::prelude::*;

    use super::*;
    use crate::connection::TransportFailure;

    #[derive(Debug, Default)]
    struct TestConnector {
        connects: AtomicU64,
        fail_with: Mutex<Option<io::ErrorKind>>,
        delay: Option<Duration>,
        invalid: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Connector for TestConnector {
        type Connection = u64;

        async fn connect(
            &self,
            _address: &ServerAddress,
            _id: &ConnectionId,
        ) -> Result<u64, TransportFailure> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(kind) = *self.fail_with.lock() {
                return Err(TransportFailure::from_io(io::Error::new(kind, "EOF")));
            }
            Ok(self.connects.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn is_valid(&self, _connection: &u64) -> bool {
            !self.invalid.load(Ordering::SeqCst)
        }
    }

    fn pool(config: PoolConfig) -> Pool<TestConnector> {
        pool_with(TestConnector::default(), config)
    }

    fn pool_with(connector: TestConnector, config: PoolConfig) -> Pool<TestConnector> {
        Pool::new(ServerAddress::new("db1", 27017), connector, config).unwrap()
    }

    fn bounded(timeout: Duration) -> (OperationContext, CancelGuard) {
        with_timeout(&OperationContext::background(), Some(timeout))
    }

    #[tokio::test]
    async fn test_checkout_reuses_idle_connection() {
        let pool = pool(PoolConfig::new().max_pool_size(2));
        let ctx = OperationContext::background();

        let first = pool.checkout(&ctx).await.unwrap();
        let id = first.id().clone();
        assert_eq!(*first, 1);
        drop(first);

        let second = pool.checkout(&ctx).await.unwrap();
        assert_eq!(second.id(), &id);
        assert_eq!(second.metadata().checkout_count, 2);
        assert_eq!(pool.inner.connector.connects.load(Ordering::SeqCst), 1);

        let status = pool.status();
        assert_eq!(status.occupancy.total, 1);
        assert_eq!(status.occupancy.other_in_use(), 1);
        assert_eq!(status.occupancy.available, 0);
    }

    #[tokio::test]
    async fn test_checkout_prefers_most_recent_idle() {
        let pool = pool(PoolConfig::new());
        let ctx = OperationContext::background();

        let a = pool.checkout(&ctx).await.unwrap();
        let b = pool.checkout(&ctx).await.unwrap();
        drop(a);
        drop(b);

        let next = pool.checkout(&ctx).await.unwrap();
        assert_eq!(*next, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_reports_occupancy() {
        let pool = pool(PoolConfig::new().max_pool_size(10));
        let ctx = OperationContext::background();

        let mut held = Vec::new();
        for _ in 0..10 {
            held.push(pool.checkout(&ctx).await.unwrap());
        }
        held[0].pin(PinKind::Cursor);
        held[1].pin(PinKind::Cursor);
        held[2].pin(PinKind::Transaction);

        let (bounded_ctx, _guard) = bounded(Duration::from_millis(50));
        let err = pool.checkout(&bounded_ctx).await.unwrap_err();

        let PoolError::WaitQueueTimeout(timeout) = &err else {
            panic!("expected wait queue timeout, got {err:?}");
        };
        assert_eq!(timeout.cause(), ContextError::DeadlineExceeded);
        assert_eq!(timeout.max_pool_size(), 10);
        assert_eq!(
            timeout.occupancy(),
            PoolOccupancy {
                total: 10,
                available: 0,
                cursor_pinned: 2,
                transaction_pinned: 1,
            }
        );
        assert!(timeout.wait_duration() >= Duration::from_millis(50));

        let msg = err.to_string();
        assert!(msg.starts_with("timed out while checking out a connection from connection pool"));
        assert!(msg.contains(
            "total connections: 10, maxPoolSize: 10, connections in use by cursors: 2, \
             connections in use by transactions: 1, connections in use by other operations: 7, \
             idle connections: 0"
        ));
        assert!(err.is_timeout());
        assert_eq!(pool.metrics().checkouts_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_receives_checked_in_connection() {
        let pool = pool(PoolConfig::new().max_pool_size(1));
        let ctx = OperationContext::background();
        let held = pool.checkout(&ctx).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let (ctx, _guard) = bounded(Duration::from_secs(5));
                pool.checkout(&ctx).await.map(|c| *c)
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.status().waiters, 1);
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 1);
        assert_eq!(pool.status().waiters, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_queue_timeout_bounds_unbounded_context() {
        let pool = pool(
            PoolConfig::new()
                .max_pool_size(1)
                .wait_queue_timeout(Duration::from_millis(20)),
        );
        let ctx = OperationContext::background();
        let _held = pool.checkout(&ctx).await.unwrap();

        let err = pool.checkout(&ctx).await.unwrap_err();
        assert!(matches!(err, PoolError::WaitQueueTimeout(_)));
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_checkout_reports_canceled() {
        let pool = pool(PoolConfig::new().max_pool_size(1));
        let root = OperationContext::background();
        let _held = pool.checkout(&root).await.unwrap();

        let (ctx, guard) = root.child();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.checkout(&ctx).await.map(|c| *c) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        guard.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        let PoolError::WaitQueueTimeout(timeout) = &err else {
            panic!("expected wait queue timeout, got {err:?}");
        };
        assert_eq!(timeout.cause(), ContextError::Canceled);
        assert!(err.to_string().starts_with("canceled while checking out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_failure_is_classified() {
        let connector = TestConnector::default();
        *connector.fail_with.lock() = Some(io::ErrorKind::UnexpectedEof);
        let pool = pool_with(connector, PoolConfig::new().max_pool_size(1));

        let err = pool.checkout(&OperationContext::background()).await.unwrap_err();
        let PoolError::Connection(conn_err) = &err else {
            panic!("expected connection error, got {err:?}");
        };
        assert!(conn_err.during_handshake());
        assert!(conn_err.is_closed_by_peer());
        assert_eq!(
            err.to_string(),
            "error occurred during connection handshake: connection closed unexpectedly by the other side: EOF; connection(db1:27017-1)"
        );

        // Capacity was returned.
        let status = pool.status();
        assert_eq!(status.pending, 0);
        assert_eq!(status.occupancy.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_connect_bounded_by_context() {
        let connector = TestConnector {
            delay: Some(Duration::from_secs(10)),
            ..TestConnector::default()
        };
        let pool = pool_with(connector, PoolConfig::new());

        let (ctx, _guard) = bounded(Duration::from_millis(100));
        let err = pool.checkout(&ctx).await.unwrap_err();
        let PoolError::WaitQueueTimeout(timeout) = &err else {
            panic!("expected wait queue timeout, got {err:?}");
        };
        assert_eq!(timeout.cause(), ContextError::DeadlineExceeded);
        assert_eq!(timeout.occupancy().total, 0);
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with(
            "timed out while checking out a connection from connection pool: context deadline exceeded; "
        ));
        assert_eq!(pool.status().pending, 0);
        assert_eq!(pool.metrics().connections_created, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_connect_reports_canceled() {
        let connector = TestConnector {
            delay: Some(Duration::from_secs(10)),
            ..TestConnector::default()
        };
        let pool = pool_with(connector, PoolConfig::new().max_pool_size(1));

        let (ctx, guard) = OperationContext::background().child();
        let checkout = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.checkout(&ctx).await.map(|c| *c) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(pool.status().pending, 1);
        guard.cancel();

        let err = checkout.await.unwrap().unwrap_err();
        let PoolError::WaitQueueTimeout(timeout) = &err else {
            panic!("expected wait queue timeout, got {err:?}");
        };
        assert_eq!(timeout.cause(), ContextError::Canceled);
        assert!(!err.is_timeout());
        assert!(!err.is_transient());
        assert!(err.to_string().starts_with(
            "canceled while checking out a connection from connection pool: context canceled; "
        ));

        // The abandoned slot is free again.
        assert_eq!(pool.status().pending, 0);
        let conn = pool.checkout(&OperationContext::background()).await.unwrap();
        assert_eq!(*conn, 1);
    }

    #[tokio::test]
    async fn test_pin_unpin_accounting() {
        let pool = pool(PoolConfig::new());
        let ctx = OperationContext::background();
        let mut conn = pool.checkout(&ctx).await.unwrap();

        conn.pin(PinKind::Cursor);
        assert_eq!(pool.status().occupancy.cursor_pinned, 1);

        conn.pin(PinKind::Transaction);
        let occupancy = pool.status().occupancy;
        assert_eq!(occupancy.cursor_pinned, 0);
        assert_eq!(occupancy.transaction_pinned, 1);
        assert_eq!(occupancy.total, 1);

        conn.unpin();
        assert_eq!(pool.status().occupancy.other_in_use(), 1);

        conn.pin(PinKind::Cursor);
        drop(conn);
        let occupancy = pool.status().occupancy;
        assert_eq!(occupancy.cursor_pinned, 0);
        assert_eq!(occupancy.available, 1);
        assert_eq!(occupancy.total, 1);
    }

    #[tokio::test]
    async fn test_discard_closes_connection() {
        let pool = pool(PoolConfig::new());
        let mut conn = pool.checkout(&OperationContext::background()).await.unwrap();
        conn.pin(PinKind::Transaction);
        conn.discard();

        let status = pool.status();
        assert_eq!(status.occupancy, PoolOccupancy::default());
        assert_eq!(pool.metrics().connections_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connections_expire() {
        let pool = pool(PoolConfig::new().max_idle_time(Duration::from_secs(1)));
        let ctx = OperationContext::background();
        drop(pool.checkout(&ctx).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        let conn = pool.checkout(&ctx).await.unwrap();
        assert_eq!(*conn, 2);
        assert_eq!(pool.metrics().connections_closed, 1);
        assert_eq!(pool.status().occupancy.total, 1);
    }

    #[tokio::test]
    async fn test_invalid_connection_not_reused() {
        let pool = pool(PoolConfig::new());
        let ctx = OperationContext::background();
        let conn = pool.checkout(&ctx).await.unwrap();
        pool.inner.connector.invalid.store(true, Ordering::SeqCst);
        drop(conn);

        assert_eq!(pool.status().occupancy.total, 0);
        pool.inner.connector.invalid.store(false, Ordering::SeqCst);
        assert_eq!(*pool.checkout(&ctx).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_shrink_evicts_oldest_idle_first() {
        let pool = pool(PoolConfig::new().max_pool_size(4));
        let ctx = OperationContext::background();

        let mut conns = Vec::new();
        for _ in 0..4 {
            conns.push(pool.checkout(&ctx).await.unwrap());
        }
        let busy = conns.pop().unwrap();
        // Idle order, oldest first: 1, 2, 3.
        for conn in conns {
            drop(conn);
        }

        pool.set_max_pool_size(2);
        let status = pool.status();
        assert_eq!(status.occupancy.total, 2);
        assert_eq!(status.occupancy.available, 1);
        assert_eq!(status.max, 2);

        let survivor = pool.checkout(&ctx).await.unwrap();
        assert_eq!(*survivor, 3);

        // Shrink below the checked-out count: closed on checkin.
        pool.set_max_pool_size(1);
        drop(busy);
        assert_eq!(pool.status().occupancy.total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grow_wakes_waiters() {
        let pool = pool(PoolConfig::new().max_pool_size(1));
        let _held = pool.checkout(&OperationContext::background()).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let (ctx, _guard) = bounded(Duration::from_secs(5));
                pool.checkout(&ctx).await.map(|c| *c)
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        pool.set_max_pool_size(2);

        assert_eq!(waiter.await.unwrap().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_fails_waiters_and_new_checkouts() {
        let pool = pool(PoolConfig::new().max_pool_size(1));
        let held = pool.checkout(&OperationContext::background()).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.checkout(&OperationContext::background()).await.map(|c| *c)
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        pool.close();

        assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
        assert!(matches!(
            pool.checkout(&OperationContext::background()).await,
            Err(PoolError::PoolClosed)
        ));
        assert!(pool.is_closed());

        drop(held);
        assert_eq!(pool.status().occupancy.total, 0);
    }

    #[tokio::test]
    async fn test_clear_closes_idle_only() {
        let pool = pool(PoolConfig::new());
        let ctx = OperationContext::background();
        let a = pool.checkout(&ctx).await.unwrap();
        let b = pool.checkout(&ctx).await.unwrap();
        drop(a);

        pool.clear();
        let status = pool.status();
        assert_eq!(status.occupancy.total, 1);
        assert_eq!(status.occupancy.available, 0);
        drop(b);
        assert_eq!(pool.status().occupancy.available, 1);
    }

    #[tokio::test]
    async fn test_metrics() {
        let pool = pool(PoolConfig::new());
        let ctx = OperationContext::background();
        drop(pool.checkout(&ctx).await.unwrap());
        drop(pool.checkout(&ctx).await.unwrap());

        let metrics = pool.metrics();
        assert_eq!(metrics.connections_created, 1);
        assert_eq!(metrics.checkouts_successful, 2);
        assert_eq!(metrics.checkouts_failed, 0);
        assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_utilization() {
        let status = PoolStatus {
            occupancy: PoolOccupancy {
                total: 4,
                available: 1,
                cursor_pinned: 1,
                transaction_pinned: 0,
            },
            pending: 1,
            waiters: 0,
            max: 5,
        };
        assert!((status.utilization() - 0.6).abs() < 1e-9);
        assert!(status.is_at_capacity());

        let unlimited = PoolStatus { max: 0, ..status };
        assert!((unlimited.utilization()).abs() < f64::EPSILON);
        assert!(!unlimited.is_at_capacity());
    }

    #[test]
    fn test_whole_millis_saturates() {
        assert_eq!(whole_millis(Duration::from_micros(1_500)), 1);
        assert_eq!(whole_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Pool::new(
            ServerAddress::new("db1", 27017),
            TestConnector::default(),
            PoolConfig::new().wait_queue_timeout(Duration::ZERO),
        );
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_occupancy_consistent_under_concurrency() {
        let pool = pool(PoolConfig::new().max_pool_size(5));

        let mut tasks = Vec::new();
        for task in 0..16u64 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..50u64 {
                    let (ctx, _guard) = bounded(Duration::from_secs(10));
                    let mut conn = pool.checkout(&ctx).await.unwrap();
                    match (task + round) % 4 {
                        0 => conn.pin(PinKind::Cursor),
                        1 => conn.pin(PinKind::Transaction),
                        2 => {
                            conn.pin(PinKind::Cursor);
                            conn.unpin();
                        }
                        _ => {}
                    }
                    let occupancy = pool.status().occupancy;
                    assert!(occupancy.is_consistent(), "{occupancy:?}");
                    assert!(occupancy.total <= 5);
                    tokio::task::yield_now().await;
                    if round % 7 == 0 {
                        conn.discard();
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let status = pool.status();
        assert_eq!(status.occupancy.in_use(), 0);
        assert_eq!(status.occupancy.cursor_pinned, 0);
        assert_eq!(status.occupancy.transaction_pinned, 0);
        assert_eq!(status.waiters, 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Checkout,
        Pin(usize, bool),
        Unpin(usize),
        Checkin(usize),
        Discard(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Checkout),
            (any::<usize>(), any::<bool>()).prop_map(|(i, cursor)| Op::Pin(i, cursor)),
            any::<usize>().prop_map(Op::Unpin),
            any::<usize>().prop_map(Op::Checkin),
            any::<usize>().prop_map(Op::Discard),
        ]
    }

    proptest! {
        #[test]
        fn prop_occupancy_matches_model(ops in proptest::collection::vec(op_strategy(), 1..60)) {
            tokio_test::block_on(async {
                let pool = pool(PoolConfig::new().max_pool_size(0));
                let ctx = OperationContext::background();
                let mut held: Vec<PooledConnection<TestConnector>> = Vec::new();

                for op in ops {
                    match op {
                        Op::Checkout => held.push(pool.checkout(&ctx).await.unwrap()),
                        Op::Pin(i, cursor) if !held.is_empty() => {
                            let n = held.len();
                            let kind = if cursor { PinKind::Cursor } else { PinKind::Transaction };
                            held[i % n].pin(kind);
                        }
                        Op::Unpin(i) if !held.is_empty() => {
                            let n = held.len();
                            held[i % n].unpin();
                        }
                        Op::Checkin(i) if !held.is_empty() => {
                            let n = held.len();
                            drop(held.swap_remove(i % n));
                        }
                        Op::Discard(i) if !held.is_empty() => {
                            let n = held.len();
                            held.swap_remove(i % n).discard();
                        }
                        _ => {}
                    }

                    let occupancy = pool.status().occupancy;
                    let cursor = held.iter().filter(|c| c.pin_kind() == Some(PinKind::Cursor)).count() as u64;
                    let txn = held.iter().filter(|c| c.pin_kind() == Some(PinKind::Transaction)).count() as u64;
                    let other = held.len() as u64 - cursor - txn;

                    assert_eq!(occupancy.cursor_pinned, cursor);
                    assert_eq!(occupancy.transaction_pinned, txn);
                    assert_eq!(occupancy.other_in_use(), other);
                    assert_eq!(
                        occupancy.available + occupancy.cursor_pinned + occupancy.transaction_pinned + occupancy.other_in_use(),
                        occupancy.total
                    );
                }
            });
        }
    }
}
