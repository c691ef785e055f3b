//! Timeout application rules.
//!
//! The rules are expressed as a pure function, [`TimeoutState::plan`], over
//! the explicit timeout state carried by every [`OperationContext`]. The
//! `with_*` functions interpret a plan by deriving child contexts.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::context::{CancelGuard, OperationContext};
use crate::rtt::RttMonitor;

/// Deadline and client-level timeout markers of a context.
///
/// `client_level_applied` and `stored_duration` are sticky: once set on a
/// context they are carried by every context derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeoutState {
    /// Effective deadline, if any.
    pub deadline: Option<Instant>,
    /// Whether a client-level timeout has been applied.
    pub client_level_applied: bool,
    /// Duration of the first client-level timeout applied.
    pub stored_duration: Option<Duration>,
}

/// What applying a timeout to a context should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPlan {
    /// Return the parent unchanged.
    Keep,
    /// Set the markers without attaching a deadline.
    Unlimited(TimeoutState),
    /// Set the markers and derive a child bounded by `duration`.
    Bounded {
        /// Markers for the child.
        state: TimeoutState,
        /// Duration of the child's deadline.
        duration: Duration,
    },
}

impl TimeoutState {
    /// Decide how a timeout applies to a context in this state.
    #[must_use]
    pub fn plan(&self, timeout: Option<Duration>) -> TimeoutPlan {
        let Some(timeout) = timeout else {
            return TimeoutPlan::Keep;
        };

        // Inherited deadlines always win.
        if self.deadline.is_some() {
            return TimeoutPlan::Keep;
        }

        // Deadline was stripped after a client-level timeout: rebuild it from
        // the stored duration.
        if self.client_level_applied {
            let duration = self.stored_duration.unwrap_or(timeout);
            if duration.is_zero() {
                return TimeoutPlan::Keep;
            }
            return TimeoutPlan::Bounded {
                state: *self,
                duration,
            };
        }

        let state = TimeoutState {
            deadline: None,
            client_level_applied: true,
            stored_duration: Some(timeout),
        };
        if timeout.is_zero() {
            TimeoutPlan::Unlimited(state)
        } else {
            TimeoutPlan::Bounded {
                state,
                duration: timeout,
            }
        }
    }

    /// Whether retry logic should treat the operation as timeout-bounded.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deadline.is_some() || self.client_level_applied
    }
}

/// Apply a client-level timeout to `parent`.
///
/// Returns `parent` unchanged (with a no-op guard) when `timeout` is `None`,
/// when `parent` already has a deadline, or when the resolved duration is
/// zero on a context that already carries the markers. See
/// [`TimeoutState::plan`].
pub fn with_timeout(
    parent: &OperationContext,
    timeout: Option<Duration>,
) -> (OperationContext, CancelGuard) {
    match parent.timeout_state().plan(timeout) {
        TimeoutPlan::Keep => (parent.clone(), CancelGuard::noop()),
        TimeoutPlan::Unlimited(state) => (parent.with_markers(&state), CancelGuard::noop()),
        TimeoutPlan::Bounded { state, duration } => {
            tracing::trace!(timeout = ?duration, "applying operation timeout");
            parent.with_markers(&state).child_with_timeout(duration)
        }
    }
}

/// Reapply the stored client-level timeout to `parent`.
///
/// Used on detached contexts to rebuild the original bound.
pub fn with_stored_timeout(parent: &OperationContext) -> (OperationContext, CancelGuard) {
    let stored = parent.timeout_state().stored_duration;
    with_timeout(parent, stored)
}

/// Bound server selection by `selection_timeout`.
///
/// A zero timeout disables the bound and returns `parent` unchanged.
/// Otherwise the child's own deadline is exactly `selection_timeout` from now,
/// whatever the outer deadline; waiters observe whichever is sooner.
pub fn with_server_selection_timeout(
    parent: &OperationContext,
    selection_timeout: Duration,
) -> (OperationContext, CancelGuard) {
    if selection_timeout.is_zero() {
        return (parent.clone(), CancelGuard::noop());
    }
    parent.child_with_timeout(selection_timeout)
}

/// Whether `ctx` has a deadline or carries the client-level timeout marker.
#[must_use]
pub fn has_active_timeout(ctx: &OperationContext) -> bool {
    ctx.timeout_state().is_active()
}

/// Errors from computing the server-side time budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError {
    /// The time left is not enough to cover one network round trip.
    #[error(
        "remaining time {remaining:?} until context deadline is less than or equal to min network round trip time {min_rtt:?} ({stats})"
    )]
    InsufficientTime {
        /// Time left until the deadline.
        remaining: Duration,
        /// Minimum observed round-trip time.
        min_rtt: Duration,
        /// RTT statistics summary.
        stats: String,
    },
}

/// Server-side time budget in milliseconds for an operation under `ctx`.
///
/// Returns `None` when `ctx` has no deadline. The budget is the time left
/// minus the minimum round-trip time, rounded up to the next millisecond.
pub fn max_time_ms(
    ctx: &OperationContext,
    rtt: &dyn RttMonitor,
) -> Result<Option<u64>, TimeoutError> {
    let Some(deadline) = ctx.deadline() else {
        return Ok(None);
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    let min_rtt = rtt.min();
    match remaining.checked_sub(min_rtt) {
        Some(budget) if !budget.is_zero() => {
            let millis = budget.as_nanos().div_ceil(1_000_000);
            Ok(Some(u64::try_from(millis).unwrap_or(u64::MAX)))
        }
        _ => Err(TimeoutError::InsufficientTime {
            remaining,
            min_rtt,
            stats: rtt.stats(),
        }),
    }
}
