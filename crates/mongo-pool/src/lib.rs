//! # mongo-driver-pool
//!
//! Per-server connection pool with deadline-aware checkout.
//!
//! The pool tracks exactly where every connection is: idle, pinned by a
//! cursor, pinned by a transaction, or in use by some other operation. When a
//! checkout cannot complete before its [`OperationContext`] ends, the error
//! carries a snapshot of that breakdown so a single log line is enough to see
//! why the pool was exhausted.
//!
//! ## Features
//!
//! - Checkout bounded by the caller's context and an optional wait-queue timeout
//! - Exact occupancy accounting under concurrent checkout/checkin/pin/unpin
//! - Connection establishment through a pluggable [`Connector`]
//! - Classification of transport failures into [`ConnectionError`]
//! - Idle expiry and oldest-idle-first eviction on resize
//!
//! ## Example
//!
//! ```rust,ignore
//! use mongo_driver_pool::{Pool, PoolConfig, PinKind};
//! use mongo_csot::{OperationContext, with_timeout};
//!
//! let pool = Pool::new(address, connector, PoolConfig::new().max_pool_size(10))?;
//!
//! let (ctx, _guard) = with_timeout(&OperationContext::background(), Some(timeout));
//! let mut conn = pool.checkout(&ctx).await?;
//! conn.pin(PinKind::Cursor);
//! // Connection automatically checked back in on drop
//! ```
//!
//! [`OperationContext`]: mongo_csot::OperationContext

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod address;
pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod occupancy;
pub mod pool;

pub use address::{AddressParseError, DEFAULT_PORT, ServerAddress};
pub use config::PoolConfig;
pub use connection::{ConnectionError, ConnectionId, TransportFailure, TransportFailureKind};
pub use error::{PoolError, WaitQueueTimeoutError};
pub use lifecycle::{ConnectionMetadata, ConnectionState, Connector};
pub use occupancy::{PinKind, PoolOccupancy};
pub use pool::{Pool, PoolMetrics, PoolStatus, PooledConnection};
