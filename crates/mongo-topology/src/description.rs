//! Server and topology descriptions.

use std::fmt;
use std::time::Duration;

use mongo_driver_pool::ServerAddress;

/// The role a server plays in the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerKind {
    /// A standalone `mongod`.
    Standalone,
    /// A `mongos` router.
    Mongos,
    /// Replica set primary.
    RsPrimary,
    /// Replica set secondary.
    RsSecondary,
    /// Replica set arbiter.
    RsArbiter,
    /// Hidden or otherwise unselectable replica set member.
    RsOther,
    /// Replica set member that has not been initiated.
    RsGhost,
    /// Load balancer fronting the deployment.
    LoadBalancer,
    /// Not yet reached, or the last check failed.
    #[default]
    Unknown,
}

impl ServerKind {
    /// Whether writes can be sent to this server.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            Self::Standalone | Self::Mongos | Self::RsPrimary | Self::LoadBalancer
        )
    }

    /// Whether reads can be sent to this server.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.is_writable() || matches!(self, Self::RsSecondary)
    }

    /// Whether this server has been reached at all.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standalone => "Standalone",
            Self::Mongos => "Mongos",
            Self::RsPrimary => "RSPrimary",
            Self::RsSecondary => "RSSecondary",
            Self::RsArbiter => "RSArbiter",
            Self::RsOther => "RSOther",
            Self::RsGhost => "RSGhost",
            Self::LoadBalancer => "LoadBalancer",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// What the monitor last learned about one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescription {
    /// Where the server is.
    pub address: ServerAddress,
    /// Its role.
    pub kind: ServerKind,
    /// Average round-trip time, if measured.
    pub average_rtt: Option<Duration>,
    /// Text of the last monitoring error, if the last check failed.
    pub last_error: Option<String>,
}

impl ServerDescription {
    /// A description with no RTT and no error.
    #[must_use]
    pub fn new(address: ServerAddress, kind: ServerKind) -> Self {
        Self {
            address,
            kind,
            average_rtt: None,
            last_error: None,
        }
    }

    /// A server that has not been reached.
    #[must_use]
    pub fn unknown(address: ServerAddress) -> Self {
        Self::new(address, ServerKind::Unknown)
    }

    /// Set the average round-trip time.
    #[must_use]
    pub fn with_rtt(mut self, rtt: Duration) -> Self {
        self.average_rtt = Some(rtt);
        self
    }

    /// Record the last monitoring error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

impl fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ Addr: {}, Type: {}", self.address, self.kind)?;
        if let Some(rtt) = self.average_rtt {
            write!(f, ", Average RTT: {rtt:?}")?;
        }
        if let Some(err) = &self.last_error {
            write!(f, ", Last error: {err}")?;
        }
        f.write_str(" }")
    }
}

/// The shape of the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TopologyKind {
    /// One server, connected to directly.
    Single,
    /// Replica set without a known primary.
    ReplicaSetNoPrimary,
    /// Replica set with a known primary.
    ReplicaSetWithPrimary,
    /// Sharded cluster behind one or more `mongos`.
    Sharded,
    /// Behind a load balancer.
    LoadBalanced,
    /// Not yet determined.
    #[default]
    Unknown,
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Single => "Single",
            Self::ReplicaSetNoPrimary => "ReplicaSetNoPrimary",
            Self::ReplicaSetWithPrimary => "ReplicaSetWithPrimary",
            Self::Sharded => "Sharded",
            Self::LoadBalanced => "LoadBalanced",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// One published view of the deployment.
///
/// Snapshots are never mutated after publication; the topology replaces the
/// whole value instead.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopologySnapshot {
    /// Deployment shape.
    pub kind: TopologyKind,
    /// Known servers, in the order the monitor reported them.
    pub servers: Vec<ServerDescription>,
    /// Set when a server's wire version is outside the supported range.
    pub compatibility_error: Option<String>,
}

impl TopologySnapshot {
    /// Create a snapshot.
    #[must_use]
    pub fn new(kind: TopologyKind, servers: Vec<ServerDescription>) -> Self {
        Self {
            kind,
            servers,
            compatibility_error: None,
        }
    }

    /// Mark the snapshot as incompatible with this driver.
    #[must_use]
    pub fn with_compatibility_error(mut self, error: impl Into<String>) -> Self {
        self.compatibility_error = Some(error.into());
        self
    }

    /// Look up a server by address.
    #[must_use]
    pub fn server(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.iter().find(|s| &s.address == address)
    }
}

impl fmt::Display for TopologySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type: {}, Servers: [", self.kind)?;
        for (i, server) in self.servers.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{server}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_kind_capabilities() {
        assert!(ServerKind::RsPrimary.is_writable());
        assert!(ServerKind::Mongos.is_writable());
        assert!(!ServerKind::RsSecondary.is_writable());
        assert!(ServerKind::RsSecondary.is_readable());
        assert!(!ServerKind::RsArbiter.is_readable());
        assert!(!ServerKind::Unknown.is_known());
        assert_eq!(ServerKind::default(), ServerKind::Unknown);
    }

    #[test]
    fn test_server_description_display() {
        let plain = ServerDescription::new(ServerAddress::new("a", 27017), ServerKind::RsSecondary);
        assert_eq!(plain.to_string(), "{ Addr: a:27017, Type: RSSecondary }");

        let full = ServerDescription::unknown(ServerAddress::new("b", 27018))
            .with_rtt(Duration::from_millis(5))
            .with_error("connection refused");
        assert_eq!(
            full.to_string(),
            "{ Addr: b:27018, Type: Unknown, Average RTT: 5ms, Last error: connection refused }"
        );
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = TopologySnapshot::new(
            TopologyKind::ReplicaSetNoPrimary,
            vec![
                ServerDescription::new(ServerAddress::new("a", 27017), ServerKind::RsSecondary),
                ServerDescription::new(ServerAddress::new("b", 27017), ServerKind::RsArbiter),
            ],
        );
        assert_eq!(
            snapshot.to_string(),
            "Type: ReplicaSetNoPrimary, Servers: [{ Addr: a:27017, Type: RSSecondary }, { Addr: b:27017, Type: RSArbiter }]"
        );
        assert_eq!(
            TopologySnapshot::default().to_string(),
            "Type: Unknown, Servers: []"
        );
    }

    #[test]
    fn test_snapshot_lookup() {
        let address = ServerAddress::new("a", 27017);
        let snapshot = TopologySnapshot::new(
            TopologyKind::Single,
            vec![ServerDescription::new(address.clone(), ServerKind::Standalone)],
        );
        assert_eq!(snapshot.server(&address).map(|s| s.kind), Some(ServerKind::Standalone));
        assert!(snapshot.server(&ServerAddress::new("b", 27017)).is_none());
    }
}
