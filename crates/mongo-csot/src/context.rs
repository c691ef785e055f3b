//! Scoped operation contexts.
//!
//! An [`OperationContext`] is a cheap, clonable handle onto a node in a tree
//! of cancellation scopes. Deriving a child creates a new node whose
//! cancellation token is a child of the parent's, so cancelling a parent
//! cancels every in-flight child wait while children can never cancel their
//! parent.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::timeout::TimeoutState;

/// Why a context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ContextError {
    /// The context was cancelled explicitly.
    #[error("context canceled")]
    Canceled,

    /// The context's deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl ContextError {
    /// Whether the context ended because its deadline elapsed.
    #[must_use]
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    /// Whether the context was cancelled explicitly.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

#[derive(Debug)]
struct Scope {
    token: CancellationToken,
    /// First recorded cause; never replaced once set.
    cause: OnceLock<ContextError>,
    /// Deadline attached when this scope was derived.
    attached: Option<Instant>,
    /// Sooner of `attached` and the parent's effective deadline.
    deadline: Option<Instant>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    fn root() -> Self {
        Self {
            token: CancellationToken::new(),
            cause: OnceLock::new(),
            attached: None,
            deadline: None,
            parent: None,
        }
    }

    fn child(parent: &Arc<Scope>, attached: Option<Instant>) -> Self {
        let deadline = match (attached, parent.deadline) {
            (Some(own), Some(inherited)) => Some(own.min(inherited)),
            (own, inherited) => own.or(inherited),
        };
        Self {
            token: parent.token.child_token(),
            cause: OnceLock::new(),
            attached,
            deadline,
            parent: Some(Arc::clone(parent)),
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn cancel(&self) {
        let cause = if self.deadline_passed() {
            ContextError::DeadlineExceeded
        } else {
            ContextError::Canceled
        };
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    fn err(&self) -> Option<ContextError> {
        if let Some(cause) = self.cause.get() {
            return Some(*cause);
        }
        if self.deadline_passed() {
            return Some(ContextError::DeadlineExceeded);
        }
        self.parent.as_ref().and_then(|p| p.err())
    }
}

/// A cancellable, hierarchically derived execution scope.
///
/// Contexts are immutable: every derivation returns a new handle. Clones share
/// the same scope.
#[derive(Debug, Clone)]
pub struct OperationContext {
    scope: Arc<Scope>,
    client_level_applied: bool,
    stored_duration: Option<Duration>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::background()
    }
}

impl OperationContext {
    /// A root context with no deadline that is never cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self {
            scope: Arc::new(Scope::root()),
            client_level_applied: false,
            stored_duration: None,
        }
    }

    /// The effective deadline: the soonest deadline on this scope or any
    /// ancestor.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.scope.deadline
    }

    /// The deadline attached when this exact scope was derived, ignoring
    /// inherited deadlines.
    #[must_use]
    pub fn attached_deadline(&self) -> Option<Instant> {
        self.scope.attached
    }

    /// Time left until the effective deadline, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.scope
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Deadline plus the sticky client-level timeout markers.
    #[must_use]
    pub fn timeout_state(&self) -> TimeoutState {
        TimeoutState {
            deadline: self.scope.deadline,
            client_level_applied: self.client_level_applied,
            stored_duration: self.stored_duration,
        }
    }

    /// Why this context ended, or `None` if it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        self.scope.err()
    }

    /// Whether this context has been cancelled or its deadline has elapsed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Wait until this context is cancelled or its deadline elapses.
    ///
    /// Never resolves for a context with no deadline whose scope is never
    /// cancelled.
    pub async fn done(&self) -> ContextError {
        let scope = &self.scope;
        match scope.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = scope.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => scope.token.cancelled().await,
        }
        scope.err().unwrap_or(ContextError::Canceled)
    }

    /// Derive a cancellable child without a deadline of its own.
    #[must_use]
    pub fn child(&self) -> (Self, CancelGuard) {
        self.derive(None)
    }

    /// Derive a child whose own deadline is `timeout` from now.
    ///
    /// The effective deadline is the sooner of that and any inherited one. A
    /// timeout too large to represent attaches no deadline.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> (Self, CancelGuard) {
        self.derive(Instant::now().checked_add(timeout))
    }

    /// Derive a child with an explicit deadline.
    #[must_use]
    pub fn child_with_deadline(&self, deadline: Instant) -> (Self, CancelGuard) {
        self.derive(Some(deadline))
    }

    /// A fresh root context that keeps the client-level timeout markers.
    ///
    /// The result has no deadline and is not cancelled with `self`. Used for
    /// best-effort cleanup after the caller's deadline already fired.
    #[must_use]
    pub fn detach(&self) -> Self {
        Self {
            scope: Arc::new(Scope::root()),
            client_level_applied: self.client_level_applied,
            stored_duration: self.stored_duration,
        }
    }

    /// Same scope, new markers. Markers only ever move from unset to set.
    pub(crate) fn with_markers(&self, state: &TimeoutState) -> Self {
        Self {
            scope: Arc::clone(&self.scope),
            client_level_applied: self.client_level_applied || state.client_level_applied,
            stored_duration: self.stored_duration.or(state.stored_duration),
        }
    }

    fn derive(&self, attached: Option<Instant>) -> (Self, CancelGuard) {
        let scope = Arc::new(Scope::child(&self.scope, attached));
        let child = Self {
            scope: Arc::clone(&scope),
            client_level_applied: self.client_level_applied,
            stored_duration: self.stored_duration,
        };
        (child, CancelGuard { scope: Some(scope) })
    }
}

/// Cancels a derived context when dropped.
///
/// Guards returned for "parent unchanged" derivations do nothing.
#[derive(Debug)]
#[must_use = "dropping the guard immediately cancels the derived context"]
pub struct CancelGuard {
    scope: Option<Arc<Scope>>,
}

impl CancelGuard {
    /// A guard that cancels nothing.
    pub fn noop() -> Self {
        Self { scope: None }
    }

    /// Whether dropping this guard cancels anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.scope.is_none()
    }

    /// Cancel the derived context now.
    pub fn cancel(mut self) {
        if let Some(scope) = self.scope.take() {
            scope.cancel();
        }
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.cancel();
        }
    }
}
