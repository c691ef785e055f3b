//! Round-trip time readings consumed from the monitoring subsystem.

use std::time::Duration;

/// Round-trip time statistics for one server.
///
/// Sampling and estimation belong to the monitoring subsystem; the core only
/// reads these values when budgeting time.
pub trait RttMonitor: Send + Sync {
    /// Exponentially weighted moving average.
    fn ewma(&self) -> Duration;

    /// Minimum observed round-trip time.
    fn min(&self) -> Duration;

    /// 90th percentile round-trip time.
    fn p90(&self) -> Duration;

    /// Human-readable summary, embedded in timeout errors.
    fn stats(&self) -> String;
}

/// Reports zero for every reading and an empty summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroRttMonitor;

impl RttMonitor for ZeroRttMonitor {
    fn ewma(&self) -> Duration {
        Duration::ZERO
    }

    fn min(&self) -> Duration {
        Duration::ZERO
    }

    fn p90(&self) -> Duration {
        Duration::ZERO
    }

    fn stats(&self) -> String {
        String::new()
    }
}

/// Reports constant readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRttMonitor {
    ewma: Duration,
    min: Duration,
    p90: Duration,
}

impl FixedRttMonitor {
    /// Create a monitor with fixed readings.
    #[must_use]
    pub const fn new(ewma: Duration, min: Duration, p90: Duration) -> Self {
        Self { ewma, min, p90 }
    }
}

impl RttMonitor for FixedRttMonitor {
    fn ewma(&self) -> Duration {
        self.ewma
    }

    fn min(&self) -> Duration {
        self.min
    }

    fn p90(&self) -> Duration {
        self.p90
    }

    fn stats(&self) -> String {
        format!(
            "network round-trip time stats: avg: {:?}, min: {:?}, 90th pct: {:?}",
            self.ewma, self.min, self.p90
        )
    }
}
