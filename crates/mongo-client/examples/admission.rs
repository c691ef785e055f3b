//! Operation admission over plain TCP.
//!
//! Connects to the servers named in a connection string, publishes them as
//! standalone servers, and checks out connections under an operation timeout
//! while printing pool status.
//!
//! # Running
//!
//! ```bash
//! export MONGODB_URI='mongodb://localhost:27017/?timeoutMS=2000&maxPoolSize=4'
//!
//! cargo run --example admission
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use async_trait::async_trait;
use mongo_client::{Client, ClientConfig};
use mongo_csot::OperationContext;
use mongo_driver_pool::{ConnectionId, Connector, ServerAddress, TransportFailure};
use mongo_topology::{ServerDescription, ServerKind, TopologyKind, TopologySnapshot, Writable};
use tokio::net::TcpStream;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Connection = TcpStream;

    async fn connect(
        &self,
        address: &ServerAddress,
        _id: &ConnectionId,
    ) -> Result<TcpStream, TransportFailure> {
        let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let uri = std::env::var("MONGODB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017/?timeoutMS=2000&maxPoolSize=4".into());
    let config = ClientConfig::from_connection_string(&uri)?
        .server_selection_timeout(Duration::from_secs(5));

    println!("=== Operation Admission Example ===\n");
    println!("Seeds: {:?}", config.hosts);
    println!("Operation timeout: {:?}", config.timeout);
    println!("Max pool size: {}\n", config.max_pool_size);

    let client = Client::new(config.clone(), TcpConnector)?;

    // Without a monitor, publish every seed as a standalone server.
    let servers = config
        .hosts
        .iter()
        .cloned()
        .map(|address| ServerDescription::new(address, ServerKind::Standalone))
        .collect();
    client
        .topology()
        .publish(TopologySnapshot::new(TopologyKind::Single, servers));

    println!("1. Single checkout:");
    let root = OperationContext::background();
    {
        let (ctx, _guard) = client.operation_context(&root, None);
        let start = Instant::now();
        let checkout = client.checkout(&ctx, &Writable).await?;
        println!(
            "  {} on {} in {:?}, maxTimeMS budget {:?}",
            checkout.connection().id(),
            checkout.server().address,
            start.elapsed(),
            checkout.max_time_ms(&ctx)?
        );
    }

    println!("\n2. More concurrent checkouts than the pool allows:");
    let (ctx, _guard) = client.operation_context(&root, Some(Duration::from_millis(500)));
    let mut held = Vec::new();
    loop {
        match client.checkout(&ctx, &Writable).await {
            Ok(checkout) => held.push(checkout.into_connection()),
            Err(e) => {
                println!("  after {} connections: {e}", held.len());
                break;
            }
        }
    }

    if let Some(pool) = client.topology().pool(&config.hosts[0]) {
        let status = pool.status();
        let metrics = pool.metrics();
        println!("\nPool status:");
        println!("  Total: {}", status.occupancy.total);
        println!("  In use: {}", status.occupancy.in_use());
        println!("  Utilization: {:.1}%", status.utilization() * 100.0);
        println!("  Checkouts succeeded: {}", metrics.checkouts_successful);
        println!("  Checkouts failed: {}", metrics.checkouts_failed);
    }

    drop(held);
    client.close();
    println!("\n=== Example Complete ===");
    Ok(())
}
