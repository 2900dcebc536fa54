//! Pool status and metrics.

use std::time::Duration;

/// Point-in-time occupancy of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently leased.
    pub in_use: usize,
    /// Whether the sweeper task is scheduled.
    pub sweeper_running: bool,
}

impl PoolStatus {
    /// Total number of open connections owned by the pool.
    #[must_use]
    pub fn total(&self) -> usize {
        self.available + self.in_use
    }

    /// Whether the pool owns no connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Percentage of open connections that are leased.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.in_use as f64 / total as f64) * 100.0
    }
}

/// Counters collected since the pool was created.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Connections opened through the provider.
    pub connections_created: u64,
    /// Connections closed by the pool (eviction or shutdown).
    pub connections_closed: u64,
    /// Successful acquires.
    pub checkouts: u64,
    /// Acquires served from the available set.
    pub reuses: u64,
    /// Acquires that failed because the provider failed.
    pub checkouts_failed: u64,
    /// Handles returned to the pool.
    pub releases: u64,
    /// Leases reclaimed by the leak sweep.
    pub leaks_detected: u64,
    /// Idle connections closed by the sweep.
    pub idle_evictions: u64,
    /// Close calls that failed during eviction or shutdown.
    pub close_failures: u64,
    /// Sweeps performed.
    pub sweeps: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Fraction of acquires served without opening a connection (0.0 to 1.0).
    #[must_use]
    pub fn reuse_rate(&self) -> f64 {
        if self.checkouts == 0 {
            return 0.0;
        }
        self.reuses as f64 / self.checkouts as f64
    }
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
pub(crate) struct MetricsInner {
    pub(crate) connections_created: u64,
    pub(crate) connections_closed: u64,
    pub(crate) checkouts: u64,
    pub(crate) reuses: u64,
    pub(crate) checkouts_failed: u64,
    pub(crate) releases: u64,
    pub(crate) leaks_detected: u64,
    pub(crate) idle_evictions: u64,
    pub(crate) close_failures: u64,
    pub(crate) sweeps: u64,
}

impl MetricsInner {
    pub(crate) fn snapshot(&self, uptime: Duration) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.connections_created,
            connections_closed: self.connections_closed,
            checkouts: self.checkouts,
            reuses: self.reuses,
            checkouts_failed: self.checkouts_failed,
            releases: self.releases,
            leaks_detected: self.leaks_detected,
            idle_evictions: self.idle_evictions,
            close_failures: self.close_failures,
            sweeps: self.sweeps,
            uptime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 15,
            sweeper_running: true,
        };
        assert_eq!(status.total(), 20);
        assert!((status.utilization() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_status() {
        let status = PoolStatus {
            available: 0,
            in_use: 0,
            sweeper_running: false,
        };
        assert!(status.is_empty());
        assert_eq!(status.utilization(), 0.0);
    }

    #[test]
    fn test_reuse_rate() {
        let metrics = MetricsInner {
            checkouts: 10,
            reuses: 9,
            ..Default::default()
        }
        .snapshot(Duration::from_secs(60));

        assert!((metrics.reuse_rate() - 0.9).abs() < f64::EPSILON);
        assert_eq!(metrics.uptime, Duration::from_secs(60));
    }

    #[test]
    fn test_reuse_rate_without_checkouts() {
        let metrics = MetricsInner::default().snapshot(Duration::ZERO);
        assert_eq!(metrics.reuse_rate(), 0.0);
    }
}
