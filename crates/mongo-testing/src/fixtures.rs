//! Topology, document, and logging fixtures.

use std::time::Duration;

use bytes::Bytes;
use mongo_driver_pool::{DEFAULT_PORT, ServerAddress};
use mongo_topology::{ServerDescription, ServerKind, TopologyKind, TopologySnapshot};

/// `host:27017`.
#[must_use]
pub fn address(host: &str) -> ServerAddress {
    ServerAddress::new(host, DEFAULT_PORT)
}

/// A known server with the given role and average RTT in milliseconds.
#[must_use]
pub fn server(host: &str, kind: ServerKind, rtt_ms: u64) -> ServerDescription {
    ServerDescription::new(address(host), kind).with_rtt(Duration::from_millis(rtt_ms))
}

/// A replica set with `primary` as primary and the rest as secondaries.
#[must_use]
pub fn replica_set(primary: &str, secondaries: &[&str]) -> TopologySnapshot {
    let mut servers = vec![server(primary, ServerKind::RsPrimary, 5)];
    servers.extend(
        secondaries
            .iter()
            .map(|host| server(host, ServerKind::RsSecondary, 5)),
    );
    TopologySnapshot::new(TopologyKind::ReplicaSetWithPrimary, servers)
}

/// A replica set that has lost its primary: every host is a secondary.
#[must_use]
pub fn replica_set_no_primary(hosts: &[&str]) -> TopologySnapshot {
    TopologySnapshot::new(
        TopologyKind::ReplicaSetNoPrimary,
        hosts
            .iter()
            .map(|host| server(host, ServerKind::RsSecondary, 5))
            .collect(),
    )
}

/// A single standalone server.
#[must_use]
pub fn standalone(host: &str) -> TopologySnapshot {
    TopologySnapshot::new(
        TopologyKind::Single,
        vec![server(host, ServerKind::Standalone, 1)],
    )
}

/// A minimal well-framed document holding one boolean element `key: true`.
#[must_use]
pub fn bool_document(key: &str) -> Bytes {
    // int32 length, type 0x08, cstring key, value, terminator
    let len = 4 + 1 + key.len() + 1 + 1 + 1;
    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&(len as i32).to_le_bytes());
    buf.push(0x08);
    buf.extend_from_slice(key.as_bytes());
    buf.push(0);
    buf.push(1);
    buf.push(0);
    Bytes::from(buf)
}

/// Install a test-friendly `tracing` subscriber.
///
/// Output goes through the test harness's capture. Safe to call from every
/// test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
