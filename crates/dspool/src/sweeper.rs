//! Background leak and idle sweep.
//!
//! The sweeper is started by the first lease on an empty pool and stops
//! itself once a sweep leaves the pool with no connections at all. Eviction
//! removes connections from the pool under the lock; closing them happens
//! afterwards, so a slow or failing close never blocks acquire/release.

use std::collections::VecDeque;
use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::lease::{LeakReport, LeaseState};
use crate::pool::{IdleEntry, LeasedEntry, PoolInner};

/// Handle to a running sweeper task.
pub(crate) struct Sweeper {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a sweeper on `runtime` that ticks every `period`, first tick one
    /// period from now.
    pub(crate) fn spawn(runtime: &Handle, pool: Weak<PoolInner>, period: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.sweep().await;
            }

            tracing::trace!("sweeper task exited");
        });

        Self { token, task }
    }

    /// Stop scheduling sweeps. A sweep already in progress finishes closing
    /// the connections it evicted.
    pub(crate) fn stop(self) {
        self.token.cancel();
    }

    /// Stop immediately, abandoning any in-progress sweep.
    pub(crate) fn abort(self) {
        self.token.cancel();
        self.task.abort();
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Leases reclaimed because they exceeded the leak timeout.
    pub leaked: usize,
    /// Idle connections closed because they exceeded the idle timeout.
    pub idle: usize,
    /// Evicted connections whose close call failed.
    pub close_failures: usize,
}

impl SweepReport {
    /// Total connections evicted by the sweep.
    #[must_use]
    pub fn evicted(&self) -> usize {
        self.leaked + self.idle
    }
}

impl PoolInner {
    /// Evict leaked and idle connections, then close them.
    ///
    /// Close failures are logged and counted, never propagated: every
    /// evicted connection gets its close attempt.
    pub(crate) async fn sweep(&self) -> SweepReport {
        let now = Instant::now();

        let (leaked, idle) = {
            let mut state = self.state.lock();
            let leaked = match self.config.leak_timeout {
                Some(timeout) => take_leaked(&mut state.in_use, now, timeout),
                None => Vec::new(),
            };
            let idle = match self.config.idle_timeout {
                Some(timeout) => take_idle(&mut state.available, now, timeout),
                None => Vec::new(),
            };
            state.stop_sweeper_if_empty();
            (leaked, idle)
        };

        let mut report = SweepReport {
            leaked: leaked.len(),
            idle: idle.len(),
            close_failures: 0,
        };

        {
            let mut metrics = self.metrics.lock();
            metrics.sweeps += 1;
            metrics.leaks_detected += report.leaked as u64;
            metrics.idle_evictions += report.idle as u64;
        }

        for (id, entry) in leaked {
            let leased_for = now.saturating_duration_since(entry.since);
            match entry.site.backtrace() {
                Some(backtrace) => tracing::warn!(
                    connection_id = id,
                    leased_for = ?leased_for,
                    site = %entry.site,
                    backtrace = %backtrace,
                    "reclaiming leaked connection"
                ),
                None => tracing::warn!(
                    connection_id = id,
                    leased_for = ?leased_for,
                    site = %entry.site,
                    "reclaiming leaked connection"
                ),
            }

            if let Some(listener) = &self.on_leak {
                listener(&LeakReport {
                    connection_id: id,
                    leased_for,
                    site: &entry.site,
                });
            }

            if self.close_connection(id, entry.conn.as_ref()).await.is_err() {
                report.close_failures += 1;
            }
        }

        for entry in idle {
            tracing::debug!(
                connection_id = entry.id,
                idle_for = ?now.saturating_duration_since(entry.since),
                "closing idle connection"
            );
            if self.close_connection(entry.id, entry.conn.as_ref()).await.is_err() {
                report.close_failures += 1;
            }
        }

        if report.evicted() > 0 {
            tracing::debug!(
                leaked = report.leaked,
                idle = report.idle,
                close_failures = report.close_failures,
                "sweep evicted connections"
            );
        }

        report
    }
}

/// Remove leases older than `timeout`, marking them evicted.
fn take_leaked(
    in_use: &mut std::collections::HashMap<u64, LeasedEntry>,
    now: Instant,
    timeout: Duration,
) -> Vec<(u64, LeasedEntry)> {
    let expired: Vec<u64> = in_use
        .iter()
        .filter(|(_, entry)| now.saturating_duration_since(entry.since) > timeout)
        .map(|(id, _)| *id)
        .collect();

    expired
        .into_iter()
        .filter_map(|id| in_use.remove(&id).map(|entry| (id, entry)))
        .inspect(|(_, entry)| entry.lease.set(LeaseState::Evicted))
        .collect()
}

/// Remove idle connections released more than `timeout` ago.
fn take_idle(
    available: &mut VecDeque<IdleEntry>,
    now: Instant,
    timeout: Duration,
) -> Vec<IdleEntry> {
    let (expired, kept): (VecDeque<_>, VecDeque<_>) = available
        .drain(..)
        .partition(|entry| now.saturating_duration_since(entry.since) > timeout);
    *available = kept;
    expired.into()
}
