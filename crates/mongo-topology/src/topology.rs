//! Snapshot publication and per-server pools.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mongo_driver_pool::{Connector, Pool, PoolConfig, PoolError, ServerAddress};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::description::{ServerDescription, TopologySnapshot};
use crate::selection::ServerSelector;

/// The client's view of the deployment.
///
/// Owns the publishing side of the snapshot channel and one [`Pool`] per
/// server address. Connectors are cloned once per pool, so they should be
/// cheap handles.
pub struct Topology<C: Connector + Clone> {
    publisher: watch::Sender<Arc<TopologySnapshot>>,
    pools: RwLock<HashMap<ServerAddress, Pool<C>>>,
    connector: C,
    pool_config: PoolConfig,
    closed: AtomicBool,
}

impl<C: Connector + Clone> std::fmt::Debug for Topology<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("snapshot", &self.snapshot())
            .field("pool_config", &self.pool_config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<C: Connector + Clone> Topology<C> {
    /// Create a topology from its first snapshot.
    pub fn new(
        initial: TopologySnapshot,
        connector: C,
        pool_config: PoolConfig,
    ) -> Result<Self, PoolError> {
        pool_config.validate()?;

        let mut pools = HashMap::with_capacity(initial.servers.len());
        for server in &initial.servers {
            let pool = Pool::new(server.address.clone(), connector.clone(), pool_config.clone())?;
            pools.insert(server.address.clone(), pool);
        }

        let (publisher, _) = watch::channel(Arc::new(initial));
        Ok(Self {
            publisher,
            pools: RwLock::new(pools),
            connector,
            pool_config,
            closed: AtomicBool::new(false),
        })
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        Arc::clone(&self.publisher.borrow())
    }

    /// A receiver that observes every future publication.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<TopologySnapshot>> {
        self.publisher.subscribe()
    }

    /// A selector over this topology's snapshots.
    #[must_use]
    pub fn selector(&self, server_selection_timeout: Duration, local_threshold: Duration) -> ServerSelector {
        ServerSelector::new(self.subscribe(), server_selection_timeout, local_threshold)
    }

    /// Replace the current snapshot.
    ///
    /// Pools are created for servers that are new in `snapshot` and closed
    /// for servers that disappeared from it. Pending selections re-evaluate
    /// against the new snapshot. After [`close`](Self::close) the snapshot is
    /// still published but no pools are created.
    pub fn publish(&self, snapshot: TopologySnapshot) {
        let removed: Vec<Pool<C>> = {
            let mut pools = self.pools.write();
            let added: &[ServerDescription] = if self.is_closed() {
                &[]
            } else {
                &snapshot.servers
            };
            for server in added {
                if pools.contains_key(&server.address) {
                    continue;
                }
                match Pool::new(
                    server.address.clone(),
                    self.connector.clone(),
                    self.pool_config.clone(),
                ) {
                    Ok(pool) => {
                        pools.insert(server.address.clone(), pool);
                    }
                    Err(e) => {
                        tracing::error!(address = %server.address, error = %e, "failed to create pool");
                    }
                }
            }

            let stale: Vec<ServerAddress> = pools
                .keys()
                .filter(|address| snapshot.server(address).is_none())
                .cloned()
                .collect();
            stale.iter().filter_map(|address| pools.remove(address)).collect()
        };

        for pool in &removed {
            pool.close();
        }

        tracing::debug!(
            kind = %snapshot.kind,
            servers = snapshot.servers.len(),
            removed = removed.len(),
            "topology snapshot published"
        );
        self.publisher.send_replace(Arc::new(snapshot));
    }

    /// The pool for `address`, if the server is part of the topology.
    #[must_use]
    pub fn pool(&self, address: &ServerAddress) -> Option<Pool<C>> {
        self.pools.read().get(address).cloned()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every pool.
    ///
    /// Later publications create no new pools.
    pub fn close(&self) {
        let pools: Vec<Pool<C>> = {
            let mut pools = self.pools.write();
            self.closed.store(true, Ordering::Release);
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in &pools {
            pool.close();
        }
        tracing::info!(pools = pools.len(), "topology closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mongo_driver_pool::{ConnectionId, TransportFailure};

    use super::*;
    use crate::description::{ServerKind, TopologyKind};

    #[derive(Debug, Clone, Copy)]
    struct NoopConnector;

    #[async_trait::async_trait]
    impl Connector for NoopConnector {
        type Connection = ();

        async fn connect(
            &self,
            _address: &ServerAddress,
            _id: &ConnectionId,
        ) -> Result<(), TransportFailure> {
            Ok(())
        }
    }

    fn snapshot(hosts: &[&str]) -> TopologySnapshot {
        TopologySnapshot::new(
            TopologyKind::ReplicaSetWithPrimary,
            hosts
                .iter()
                .map(|h| ServerDescription::new(ServerAddress::new(*h, 27017), ServerKind::RsSecondary))
                .collect(),
        )
    }

    #[test]
    fn test_pools_follow_snapshots() {
        let topology = Topology::new(snapshot(&["a", "b"]), NoopConnector, PoolConfig::new()).unwrap();
        let a = ServerAddress::new("a", 27017);
        let b = ServerAddress::new("b", 27017);
        let c = ServerAddress::new("c", 27017);

        assert!(topology.pool(&a).is_some());
        assert!(topology.pool(&c).is_none());

        let old_b = topology.pool(&b).unwrap();
        topology.publish(snapshot(&["a", "c"]));

        assert!(topology.pool(&b).is_none());
        assert!(old_b.is_closed());
        assert!(topology.pool(&c).is_some());
        assert_eq!(topology.snapshot().servers.len(), 2);
    }

    #[test]
    fn test_subscribers_see_publications() {
        let topology = Topology::new(snapshot(&["a"]), NoopConnector, PoolConfig::new()).unwrap();
        let mut rx = topology.subscribe();
        assert!(!rx.has_changed().unwrap());

        topology.publish(snapshot(&["a", "b"]));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().servers.len(), 2);
    }

    #[test]
    fn test_invalid_pool_config_rejected() {
        let config = PoolConfig::new().max_idle_time(Duration::ZERO);
        assert!(Topology::new(snapshot(&["a"]), NoopConnector, config).is_err());
    }

    #[tokio::test]
    async fn test_close_closes_pools() {
        let topology = Topology::new(snapshot(&["a"]), NoopConnector, PoolConfig::new()).unwrap();
        let pool = topology.pool(&ServerAddress::new("a", 27017)).unwrap();
        topology.close();
        assert!(pool.is_closed());
        assert!(topology.pool(&ServerAddress::new("a", 27017)).is_none());
    }

    #[test]
    fn test_publish_after_close_creates_no_pools() {
        let topology = Topology::new(snapshot(&["a"]), NoopConnector, PoolConfig::new()).unwrap();
        topology.close();
        assert!(topology.is_closed());

        topology.publish(snapshot(&["a", "b"]));
        assert!(topology.pool(&ServerAddress::new("a", 27017)).is_none());
        assert!(topology.pool(&ServerAddress::new("b", 27017)).is_none());
        assert_eq!(topology.snapshot().servers.len(), 2);
    }
}
