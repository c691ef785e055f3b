//! # mongo-csot
//!
//! Client-side operation timeouts for the driver core.
//!
//! Every operation runs under an [`OperationContext`]: a cancellable scope
//! that carries at most one effective deadline plus two sticky markers
//! recording that a client-level timeout was applied and which duration it
//! used. The markers let cleanup work that runs on a fresh, detached context
//! (aborting a transaction after the caller's deadline fired, for example)
//! rebuild an equivalent bound instead of running unbounded.
//!
//! ## Rules
//!
//! - An inherited deadline is never shortened or lengthened by
//!   [`with_timeout`].
//! - A duration of zero means "unlimited": no deadline is attached, but the
//!   context still reports [`has_active_timeout`].
//! - [`with_server_selection_timeout`] always attaches its own deadline; the
//!   sooner of that and any inherited deadline is what waiters observe.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use mongo_csot::{OperationContext, with_timeout};
//!
//! let root = OperationContext::background();
//! let (ctx, _guard) = with_timeout(&root, Some(Duration::from_millis(100)));
//! assert!(ctx.deadline().is_some());
//! // `_guard` cancels `ctx` when it goes out of scope.
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod context;
pub mod rtt;
pub mod timeout;

pub use context::{CancelGuard, ContextError, OperationContext};
pub use rtt::{FixedRttMonitor, RttMonitor, ZeroRttMonitor};
pub use timeout::{
    TimeoutError, TimeoutPlan, TimeoutState, has_active_timeout, max_time_ms,
    with_server_selection_timeout, with_stored_timeout, with_timeout,
};
pub use tokio::time::Instant;
