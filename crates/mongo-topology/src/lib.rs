//! # mongo-topology
//!
//! Immutable topology snapshots and server selection bounded by an
//! [`OperationContext`](mongo_csot::OperationContext).
//!
//! The monitoring subsystem publishes a new [`TopologySnapshot`] whenever its
//! view of the deployment changes. A [`ServerSelector`] evaluates a
//! [`ServerPredicate`] against the latest snapshot and, when nothing matches,
//! waits for the next one until its selection deadline fires. Failures carry
//! the snapshot that was current when selection gave up.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mongo_topology::{Readable, Topology};
//!
//! let topology = Topology::new(snapshot, connector, pool_config)?;
//! let selector = topology.selector(Duration::from_secs(30), Duration::from_millis(15));
//! let server = selector.select(&ctx, &Readable).await?;
//! let conn = topology.pool(&server.address).unwrap().checkout(&ctx).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod description;
pub mod selection;
pub mod topology;

pub use description::{ServerDescription, ServerKind, TopologyKind, TopologySnapshot};
pub use mongo_driver_pool::ServerAddress;
pub use selection::{
    AnyAvailable, Primary, Readable, SelectionCause, ServerPredicate, ServerSelectionError,
    ServerSelector, Writable, latency_window,
};
pub use topology::Topology;
