//! Pool occupancy snapshots.

/// Why a checked-out connection is pinned to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinKind {
    /// Held for the lifetime of a cursor (load-balanced getMore).
    Cursor,
    /// Held for the lifetime of a transaction.
    Transaction,
}

/// Where the pool's connections are at one instant.
///
/// `available + cursor_pinned + transaction_pinned + other_in_use() == total`
/// holds for every snapshot taken by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolOccupancy {
    /// Established connections, idle or in use.
    pub total: u64,
    /// Idle connections ready for checkout.
    pub available: u64,
    /// Connections pinned by cursors.
    pub cursor_pinned: u64,
    /// Connections pinned by transactions.
    pub transaction_pinned: u64,
}

impl PoolOccupancy {
    /// Checked-out connections not pinned by a cursor or transaction.
    #[must_use]
    pub fn other_in_use(&self) -> u64 {
        self.total
            .saturating_sub(self.available)
            .saturating_sub(self.cursor_pinned)
            .saturating_sub(self.transaction_pinned)
    }

    /// All checked-out connections.
    #[must_use]
    pub fn in_use(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }

    /// Pinned connections of one kind.
    #[must_use]
    pub fn pinned(&self, kind: PinKind) -> u64 {
        match kind {
            PinKind::Cursor => self.cursor_pinned,
            PinKind::Transaction => self.transaction_pinned,
        }
    }

    /// Whether the categories add up to `total` without underflow.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.available
            .checked_add(self.cursor_pinned)
            .and_then(|n| n.checked_add(self.transaction_pinned))
            .is_some_and(|n| n <= self.total)
    }
}
