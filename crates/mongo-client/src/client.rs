//! Operation admission.

use std::sync::Arc;
use std::time::Duration;

use mongo_csot::{
    CancelGuard, OperationContext, RttMonitor, ZeroRttMonitor, max_time_ms, with_timeout,
};
use mongo_driver_pool::{Connector, PoolError, PooledConnection};
use mongo_topology::{
    ServerDescription, ServerPredicate, ServerSelector, Topology, TopologyKind, TopologySnapshot,
};

use crate::config::ClientConfig;
use crate::error::Result;

/// Admits operations: applies timeouts, selects a server, and checks out a
/// connection from that server's pool.
///
/// The topology starts with every seed host marked unknown. Monitoring is
/// expected to publish fresh snapshots through [`Client::topology`].
pub struct Client<C: Connector + Clone> {
    config: ClientConfig,
    topology: Arc<Topology<C>>,
    selector: ServerSelector,
    rtt: Arc<dyn RttMonitor>,
}

impl<C: Connector + Clone> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

impl<C: Connector + Clone> Client<C> {
    /// Create a client. No connections are opened until the first checkout.
    pub fn new(config: ClientConfig, connector: C) -> Result<Self> {
        config.validate()?;

        let seeds = config
            .hosts
            .iter()
            .cloned()
            .map(ServerDescription::unknown)
            .collect();
        let topology = Topology::new(
            TopologySnapshot::new(TopologyKind::Unknown, seeds),
            connector,
            config.pool_config(),
        )?;
        let selector = topology.selector(config.server_selection_timeout, config.local_threshold);

        tracing::debug!(
            hosts = config.hosts.len(),
            app_name = config.app_name.as_deref().unwrap_or(""),
            "client created"
        );

        Ok(Self {
            config,
            topology: Arc::new(topology),
            selector,
            rtt: Arc::new(ZeroRttMonitor),
        })
    }

    /// Use `rtt` when budgeting server-side time.
    #[must_use]
    pub fn with_rtt_monitor(mut self, rtt: Arc<dyn RttMonitor>) -> Self {
        self.rtt = rtt;
        self
    }

    /// The client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The client's topology.
    #[must_use]
    pub fn topology(&self) -> &Topology<C> {
        &self.topology
    }

    /// Derive the context an operation runs under.
    ///
    /// `per_call` overrides the client-level timeout. An inherited deadline on
    /// `parent` is kept as-is.
    pub fn operation_context(
        &self,
        parent: &OperationContext,
        per_call: Option<Duration>,
    ) -> (OperationContext, CancelGuard) {
        with_timeout(parent, per_call.or(self.config.timeout))
    }

    /// Select a server matching `predicate` and check out a connection to it.
    ///
    /// Selection is bounded by the server selection timeout as well as
    /// `ctx`; the checkout by `ctx` and the wait-queue timeout.
    pub async fn checkout<P>(&self, ctx: &OperationContext, predicate: &P) -> Result<Checkout<C>>
    where
        P: ServerPredicate + ?Sized,
    {
        let server = self.selector.select(ctx, predicate).await?;
        // The server can leave the topology between selection and checkout.
        let pool = self.topology.pool(&server.address).ok_or(PoolError::PoolClosed)?;
        let connection = pool.checkout(ctx).await?;

        tracing::debug!(
            address = %server.address,
            connection_id = %connection.id(),
            "operation admitted"
        );

        Ok(Checkout {
            server,
            connection,
            rtt: Arc::clone(&self.rtt),
        })
    }

    /// Close every pool.
    pub fn close(&self) {
        self.topology.close();
    }
}

/// A selected server and a connection to it.
pub struct Checkout<C: Connector> {
    server: ServerDescription,
    connection: PooledConnection<C>,
    rtt: Arc<dyn RttMonitor>,
}

impl<C: Connector> std::fmt::Debug for Checkout<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout")
            .field("server", &self.server)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Checkout<C> {
    /// The selected server.
    #[must_use]
    pub fn server(&self) -> &ServerDescription {
        &self.server
    }

    /// The checked-out connection.
    #[must_use]
    pub fn connection(&self) -> &PooledConnection<C> {
        &self.connection
    }

    /// The checked-out connection, mutably (for pinning).
    pub fn connection_mut(&mut self) -> &mut PooledConnection<C> {
        &mut self.connection
    }

    /// Give up the server description and keep the connection.
    #[must_use]
    pub fn into_connection(self) -> PooledConnection<C> {
        self.connection
    }

    /// Server-side time budget for a command sent under `ctx`.
    ///
    /// `None` when `ctx` has no deadline.
    pub fn max_time_ms(&self, ctx: &OperationContext) -> Result<Option<u64>> {
        Ok(max_time_ms(ctx, self.rtt.as_ref())?)
    }
}
