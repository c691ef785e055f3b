//! # mongo-testing
//!
//! Test infrastructure for MongoDB driver core development.
//!
//! Nothing here talks to a real server. The mocks stand in for the pieces the
//! core treats as external: the transport that opens connections, the cursor
//! that issues getMores, and the BSON encoder behind the writer traits.
//!
//! ## Features
//!
//! - [`MockConnector`]: scripted connection outcomes (success, delay, hang, I/O failure)
//! - [`MockCursor`]: scripted getMore batches that record the deadline of every call
//! - [`RecordingWriter`]: a `ValueWriter` that logs every call and checks scope nesting
//! - Topology and document fixtures
//!
//! ## Example
//!
//! ```rust,ignore
//! use mongo_driver_pool::{Pool, PoolConfig};
//! use mongo_testing::{ConnectBehavior, MockConnector, fixtures};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_handshake_failure() {
//!     let connector = MockConnector::new();
//!     connector.push(ConnectBehavior::eof());
//!     let pool = Pool::new(fixtures::address("db1"), connector, PoolConfig::new()).unwrap();
//!     // ...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_connector;
pub mod mock_cursor;
pub mod recording_writer;

pub use mock_connector::{ConnectBehavior, MockConnection, MockConnector};
pub use mock_cursor::{GetMoreStep, MockCursor};
pub use recording_writer::RecordingWriter;
