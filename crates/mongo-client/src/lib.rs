//! # mongo-client
//!
//! Operation admission for the MongoDB driver core.
//!
//! Every outgoing operation goes through the same steps: derive an
//! [`OperationContext`](mongo_csot::OperationContext) carrying the right
//! deadline, select a server, and check out a pooled connection, all within
//! that deadline. Failures come back as one [`Error`] type that keeps timeouts,
//! cancellation, and connectivity failures apart.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mongo_client::{Client, ClientConfig};
//! use mongo_csot::OperationContext;
//! use mongo_topology::Writable;
//!
//! let config = ClientConfig::from_connection_string("mongodb://db1,db2/?timeoutMS=500")?;
//! let client = Client::new(config, connector)?;
//!
//! let (ctx, _guard) = client.operation_context(&OperationContext::background(), None);
//! let checkout = client.checkout(&ctx, &Writable).await?;
//! let budget = checkout.max_time_ms(&ctx)?;
//! ```
//!
//! ## Cursors
//!
//! [`CursorEntity`] applies a cursor's timeout to each iteration call. See
//! [`cursor`] for details.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod options;

pub use client::{Checkout, Client};
pub use config::ClientConfig;
pub use cursor::{Cursor, CursorEntity, IterationOutcome};
pub use error::{Error, Result};
pub use options::{FindArgs, FindOptions, OptionError, OptionSource, Setter, merge};
