//! Server selection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mongo_csot::{ContextError, OperationContext, with_server_selection_timeout};
use tokio::sync::watch;

use crate::description::{ServerDescription, ServerKind, TopologySnapshot};

/// Decides whether a server is eligible for an operation.
///
/// Implemented for every `Fn(&ServerDescription) -> bool`, so ad-hoc
/// predicates can be passed as closures.
pub trait ServerPredicate: Send + Sync {
    /// Whether `server` is eligible.
    fn matches(&self, server: &ServerDescription) -> bool;
}

impl<F> ServerPredicate for F
where
    F: Fn(&ServerDescription) -> bool + Send + Sync,
{
    fn matches(&self, server: &ServerDescription) -> bool {
        self(server)
    }
}

/// Servers that accept writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Writable;

impl ServerPredicate for Writable {
    fn matches(&self, server: &ServerDescription) -> bool {
        server.kind.is_writable()
    }
}

/// The replica set primary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Primary;

impl ServerPredicate for Primary {
    fn matches(&self, server: &ServerDescription) -> bool {
        server.kind == ServerKind::RsPrimary
    }
}

/// Servers that accept reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readable;

impl ServerPredicate for Readable {
    fn matches(&self, server: &ServerDescription) -> bool {
        server.kind.is_readable()
    }
}

/// Any server that has been reached.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyAvailable;

impl ServerPredicate for AnyAvailable {
    fn matches(&self, server: &ServerDescription) -> bool {
        server.kind.is_known()
    }
}

/// Why selection could not pick a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionCause {
    /// The deployment runs a wire version this driver does not support.
    Incompatible(String),
    /// No known server matched the predicate.
    NoCompatibleServers,
    /// No server matched and the monitor reported this error.
    ServerError(String),
    /// The topology stopped publishing snapshots.
    TopologyClosed,
}

impl fmt::Display for SelectionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incompatible(msg) | Self::ServerError(msg) => f.write_str(msg),
            Self::NoCompatibleServers => f.write_str("no compatible servers"),
            Self::TopologyClosed => f.write_str("topology is closed"),
        }
    }
}

impl std::error::Error for SelectionCause {}

/// Server selection failed.
///
/// Owns the snapshot that was current when selection gave up, so the error
/// stays meaningful after the topology has moved on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSelectionError {
    snapshot: Arc<TopologySnapshot>,
    cause: SelectionCause,
    interrupted: Option<ContextError>,
}

impl ServerSelectionError {
    /// Create a selection error.
    #[must_use]
    pub fn new(
        snapshot: Arc<TopologySnapshot>,
        cause: SelectionCause,
        interrupted: Option<ContextError>,
    ) -> Self {
        Self {
            snapshot,
            cause,
            interrupted,
        }
    }

    /// The topology as last observed.
    #[must_use]
    pub fn snapshot(&self) -> &TopologySnapshot {
        &self.snapshot
    }

    /// The last blocking reason.
    #[must_use]
    pub fn cause(&self) -> &SelectionCause {
        &self.cause
    }

    /// How the selection context ended, if that is what stopped selection.
    ///
    /// Not part of the `source()` chain, which yields the [`SelectionCause`].
    #[must_use]
    pub fn interrupted(&self) -> Option<ContextError> {
        self.interrupted
    }

    /// Whether selection ran out of time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.interrupted.is_some_and(|e| e.is_deadline_exceeded())
    }
}

impl fmt::Display for ServerSelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("server selection error: ")?;
        if let Some(interrupted) = self.interrupted {
            write!(f, "{interrupted}: ")?;
        }
        write!(
            f,
            "{}, current topology: {{ {} }}",
            self.cause, self.snapshot
        )
    }
}

impl std::error::Error for ServerSelectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Known servers matching `predicate` whose average RTT is within
/// `local_threshold` of the fastest match, fastest first.
///
/// Servers without a measured RTT do not set the window's floor. They follow
/// the measured servers in snapshot order.
pub fn latency_window<'a, P>(
    snapshot: &'a TopologySnapshot,
    predicate: &P,
    local_threshold: Duration,
) -> Vec<&'a ServerDescription>
where
    P: ServerPredicate + ?Sized,
{
    let (mut measured, unmeasured): (Vec<&ServerDescription>, Vec<&ServerDescription>) = snapshot
        .servers
        .iter()
        .filter(|s| s.kind.is_known() && predicate.matches(s))
        .partition(|s| s.average_rtt.is_some());

    if let Some(fastest) = measured.iter().filter_map(|s| s.average_rtt).min() {
        let ceiling = fastest.saturating_add(local_threshold);
        measured.retain(|s| s.average_rtt.is_some_and(|rtt| rtt <= ceiling));
        measured.sort_by_key(|s| s.average_rtt);
    }
    measured.extend(unmeasured);
    measured
}

fn blocking_cause(snapshot: &TopologySnapshot) -> SelectionCause {
    snapshot
        .servers
        .iter()
        .rev()
        .find_map(|s| s.last_error.clone())
        .map_or(SelectionCause::NoCompatibleServers, SelectionCause::ServerError)
}

/// Selects servers from published topology snapshots.
#[derive(Debug, Clone)]
pub struct ServerSelector {
    snapshots: watch::Receiver<Arc<TopologySnapshot>>,
    server_selection_timeout: Duration,
    local_threshold: Duration,
}

impl ServerSelector {
    /// Create a selector over a snapshot channel.
    ///
    /// A zero `server_selection_timeout` leaves selection bounded only by the
    /// caller's context.
    #[must_use]
    pub fn new(
        snapshots: watch::Receiver<Arc<TopologySnapshot>>,
        server_selection_timeout: Duration,
        local_threshold: Duration,
    ) -> Self {
        Self {
            snapshots,
            server_selection_timeout,
            local_threshold,
        }
    }

    /// The configured selection timeout.
    #[must_use]
    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    /// Pick a server matching `predicate`.
    ///
    /// Re-evaluates on every newly published snapshot until a server matches,
    /// the snapshot reports an incompatibility, the topology closes, or the
    /// selection context ends. Among eligible servers inside the latency
    /// window, the one with the lowest average RTT wins.
    pub async fn select<P>(
        &self,
        ctx: &OperationContext,
        predicate: &P,
    ) -> Result<ServerDescription, ServerSelectionError>
    where
        P: ServerPredicate + ?Sized,
    {
        let (ctx, _guard) = with_server_selection_timeout(ctx, self.server_selection_timeout);
        let mut snapshots = self.snapshots.clone();
        let mut cause = SelectionCause::NoCompatibleServers;

        loop {
            let snapshot = Arc::clone(&snapshots.borrow_and_update());

            if let Some(interrupted) = ctx.err() {
                return Err(self.fail(snapshot, cause, Some(interrupted)));
            }

            if let Some(err) = &snapshot.compatibility_error {
                let cause = SelectionCause::Incompatible(err.clone());
                return Err(self.fail(snapshot, cause, None));
            }

            if let Some(server) = latency_window(&snapshot, predicate, self.local_threshold).first() {
                tracing::debug!(
                    address = %server.address,
                    kind = %server.kind,
                    "server selected"
                );
                return Ok((*server).clone());
            }
            cause = blocking_cause(&snapshot);

            tracing::trace!(cause = %cause, "no suitable server, waiting for topology change");
            tokio::select! {
                biased;
                interrupted = ctx.done() => {
                    return Err(self.fail(snapshot, cause, Some(interrupted)));
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        return Err(self.fail(snapshot, SelectionCause::TopologyClosed, None));
                    }
                }
            }
        }
    }

    fn fail(
        &self,
        snapshot: Arc<TopologySnapshot>,
        cause: SelectionCause,
        interrupted: Option<ContextError>,
    ) -> ServerSelectionError {
        let err = ServerSelectionError::new(snapshot, cause, interrupted);
        tracing::warn!(error = %err, "server selection failed");
        err
    }
}
