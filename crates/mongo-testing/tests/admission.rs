//! Connection admission tests against the scripted connector.
//!
//! Run with:
//! ```bash
//! cargo test -p mongo-testing --test admission
//! ```

#![allow(clippy::unwrap_used, clippy::panic)]

use std::error::Error as _;
use std::time::Duration;

use mongo_client::{Client, ClientConfig, Error};
use mongo_csot::{ContextError, Instant, OperationContext};
use mongo_driver_pool::{PinKind, Pool, PoolConfig, PoolError, TransportFailureKind};
use mongo_testing::{ConnectBehavior, MockConnector, fixtures};
use mongo_topology::{Readable, ServerKind, Writable};

fn pool(connector: MockConnector, config: PoolConfig) -> Pool<MockConnector> {
    Pool::new(fixtures::address("db1"), connector, config).unwrap()
}

// =============================================================================
// Pool
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_handshake_eof_rendering() {
    fixtures::init_tracing();
    let connector = MockConnector::new();
    connector.push(ConnectBehavior::eof());
    let pool = pool(connector.clone(), PoolConfig::new());

    let err = pool.checkout(&OperationContext::background()).await.unwrap_err();
    let PoolError::Connection(conn_err) = &err else {
        panic!("expected connection error, got {err:?}");
    };

    assert!(conn_err.during_handshake());
    assert!(conn_err.is_closed_by_peer());
    assert_eq!(conn_err.kind(), Some(TransportFailureKind::EndOfStream));
    assert_eq!(
        err.to_string(),
        "error occurred during connection handshake: connection closed unexpectedly by the other side: EOF; connection(db1:27017-1)"
    );

    let io = conn_err.source().unwrap().downcast_ref::<std::io::Error>().unwrap();
    assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);

    // The failed attempt frees its slot.
    assert_eq!(pool.status().occupancy.total, 0);
    assert_eq!(pool.status().pending, 0);
    assert!(err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_connect_is_bounded_by_context() {
    let connector = MockConnector::with_fallback(ConnectBehavior::Hang);
    let pool = pool(connector.clone(), PoolConfig::new());

    let start = Instant::now();
    let (ctx, _guard) = OperationContext::background().child_with_timeout(Duration::from_millis(40));
    let err = pool.checkout(&ctx).await.unwrap_err();

    let PoolError::WaitQueueTimeout(timeout) = &err else {
        panic!("expected wait queue timeout, got {err:?}");
    };
    assert_eq!(timeout.cause(), ContextError::DeadlineExceeded);
    assert!(err.is_timeout());
    assert_eq!(start.elapsed(), Duration::from_millis(40));
    assert_eq!(connector.attempts(), 1);
    assert_eq!(connector.established(), 0);
    assert_eq!(pool.status().pending, 0);
    assert!(err.to_string().starts_with(
        "timed out while checking out a connection from connection pool: context deadline exceeded; \
         total connections: 0, maxPoolSize: 100"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_refused_connection_is_not_a_timeout() {
    let connector = MockConnector::with_fallback(ConnectBehavior::refused());
    let pool = pool(connector, PoolConfig::new());

    let err = pool.checkout(&OperationContext::background()).await.unwrap_err();
    assert!(!err.is_timeout());
    assert_eq!(
        err.to_string(),
        "error occurred during connection handshake: connection refused; connection(db1:27017-1)"
    );
}

#[tokio::test(start_paused = true)]
async fn test_broken_connection_is_replaced() {
    let connector = MockConnector::new();
    let pool = pool(connector.clone(), PoolConfig::new());
    let ctx = OperationContext::background();

    let conn = pool.checkout(&ctx).await.unwrap();
    conn.break_connection();
    drop(conn);
    assert_eq!(pool.status().occupancy.total, 0);

    let conn = pool.checkout(&ctx).await.unwrap();
    assert_eq!(conn.id().as_str(), "db1:27017-2");
    assert_eq!(connector.established(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_wait_queue_failure_reports_occupancy() {
    let pool = pool(MockConnector::new(), PoolConfig::new().max_pool_size(2));
    let ctx = OperationContext::background();

    let mut cursor = pool.checkout(&ctx).await.unwrap();
    cursor.pin(PinKind::Cursor);
    let _other = pool.checkout(&ctx).await.unwrap();

    let (short, _guard) = ctx.child_with_timeout(Duration::from_millis(50));
    let err = pool.checkout(&short).await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(
        err.to_string(),
        "timed out while checking out a connection from connection pool: context deadline exceeded; \
         total connections: 2, maxPoolSize: 2, connections in use by cursors: 1, \
         connections in use by transactions: 0, connections in use by other operations: 1, \
         idle connections: 0, wait duration: 50ms"
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_connect_releases_waiters_in_order() {
    let connector = MockConnector::with_fallback(ConnectBehavior::Delay(Duration::from_millis(10)));
    let pool = pool(connector.clone(), PoolConfig::new().max_pool_size(1));
    let ctx = OperationContext::background();

    let first = pool.checkout(&ctx).await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.checkout(&OperationContext::background()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(pool.status().waiters, 1);

    drop(first);
    let second = waiter.await.unwrap().unwrap();
    assert_eq!(second.id().as_str(), "db1:27017-1");
    assert_eq!(connector.established(), 1);
}

// =============================================================================
// Client
// =============================================================================

fn client(hosts: &[&str], connector: MockConnector) -> Client<MockConnector> {
    let config = ClientConfig::new()
        .hosts(hosts.iter().map(|h| fixtures::address(h)))
        .server_selection_timeout(Duration::from_millis(200));
    Client::new(config, connector).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_checkout_waits_for_monitoring() {
    let client = client(&["db1", "db2"], MockConnector::new());
    let topology_events = client.topology().subscribe();
    let snapshot = fixtures::replica_set("db2", &["db1"]);
    let publisher = &client;

    let ctx = OperationContext::background();
    let start = Instant::now();
    let (checkout, ()) = tokio::join!(
        client.checkout(&ctx, &Writable),
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            publisher.topology().publish(snapshot);
        }
    );
    let checkout = checkout.unwrap();

    assert_eq!(start.elapsed(), Duration::from_millis(30));
    assert_eq!(checkout.server().address, fixtures::address("db2"));
    assert_eq!(checkout.server().kind, ServerKind::RsPrimary);
    assert_eq!(checkout.connection().address, fixtures::address("db2"));
    assert!(topology_events.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_lost_primary_fails_writes_but_serves_reads() {
    let client = client(&["a", "b"], MockConnector::new());
    client.topology().publish(fixtures::replica_set_no_primary(&["a", "b"]));
    let ctx = OperationContext::background();

    let read = client.checkout(&ctx, &Readable).await.unwrap();
    assert_eq!(read.server().kind, ServerKind::RsSecondary);
    drop(read);

    let err = client.checkout(&ctx, &Writable).await.unwrap_err();
    assert!(matches!(err, Error::ServerSelection(_)));
    assert!(err.is_timeout());
    assert!(err.is_transient());
    assert!(err.to_string().starts_with(
        "server selection error: context deadline exceeded: no compatible servers, current topology: { Type: ReplicaSetNoPrimary"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_operation_timeout_bounds_selection() {
    let client = Client::new(
        ClientConfig::new()
            .hosts([fixtures::address("db1")])
            .timeout(Duration::from_millis(100)),
        MockConnector::new(),
    )
    .unwrap();

    let start = Instant::now();
    let (ctx, _guard) = client.operation_context(&OperationContext::background(), None);
    let err = client.checkout(&ctx, &Writable).await.unwrap_err();

    // The 100ms operation timeout ends selection long before the default
    // 30s selection timeout.
    assert!(err.is_timeout());
    assert_eq!(start.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_checkout_handshake_failure_surfaces_through_client() {
    let connector = MockConnector::new();
    connector.push(ConnectBehavior::eof());
    let client = client(&["db1"], connector);
    client.topology().publish(fixtures::standalone("db1"));

    let err = client
        .checkout(&OperationContext::background(), &Writable)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Pool(PoolError::Connection(_))));
    assert!(err.is_transient());

    let checkout = client
        .checkout(&OperationContext::background(), &Writable)
        .await
        .unwrap();
    assert_eq!(checkout.connection().id().as_str(), "db1:27017-2");
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_connect_is_a_cancellation() {
    let connector = MockConnector::with_fallback(ConnectBehavior::Hang);
    let client = client(&["db1"], connector.clone());
    client.topology().publish(fixtures::standalone("db1"));

    let (ctx, guard) = OperationContext::background().child();
    let (result, ()) = tokio::join!(client.checkout(&ctx, &Writable), async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        guard.cancel();
    });
    let err = result.map(|_| ()).unwrap_err();

    assert!(matches!(err, Error::Pool(PoolError::WaitQueueTimeout(_))));
    assert!(err.is_cancellation());
    assert!(!err.is_timeout());
    assert!(!err.is_transient());
    assert!(err.to_string().starts_with(
        "canceled while checking out a connection from connection pool: context canceled; "
    ));
    assert_eq!(connector.attempts(), 1);
}
