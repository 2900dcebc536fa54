//! Leak and idle eviction by the background sweep.
//!
//! Every test runs on a paused clock, so sweeps fire exactly on their
//! schedule and the timings below are deterministic.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{builder, ms};
use dspool::{Connection, ConnectionError, LeaseState, PoolError};
use parking_lot::Mutex;
use tokio::time::sleep;

// =============================================================================
// Leak detection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_leaked_lease_is_reclaimed() {
    let (builder, provider) = builder("mem://leak");
    let pool = builder
        .leak_timeout(ms(100))
        .sweep_interval(ms(50))
        .build()
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    sleep(ms(175)).await;

    // Underlying connection closed and no longer tracked.
    assert!(provider.probe(0).unwrap().is_closed());
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(conn.lease_state(), LeaseState::Evicted);

    // Every forwarded call now fails.
    let err = conn.execute("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, ConnectionError::Evicted { .. }));
    assert!(err.is_closed());
    assert!(conn.is_closed());

    // Releasing it reports the eviction rather than a double release.
    let err = conn.release().unwrap_err();
    assert!(matches!(
        err,
        PoolError::Connection(ConnectionError::Evicted { .. })
    ));

    assert!(!pool.is_sweeper_running());
    assert_eq!(pool.metrics().leaks_detected, 1);
}

#[tokio::test(start_paused = true)]
async fn test_lease_returned_in_time_is_never_reclaimed() {
    let (builder, provider) = builder("mem://in-time");
    let pool = builder
        .leak_timeout(ms(100))
        .sweep_interval(ms(50))
        .build()
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    sleep(ms(80)).await;
    conn.close().await.unwrap();
    sleep(ms(500)).await;

    assert!(!provider.probe(0).unwrap().is_closed());
    assert_eq!(pool.status().available, 1);
    assert_eq!(pool.metrics().leaks_detected, 0);
}

#[tokio::test(start_paused = true)]
async fn test_lease_at_exactly_the_timeout_is_kept() {
    let (builder, provider) = builder("mem://boundary");
    let pool = builder
        .leak_timeout(ms(100))
        .sweep_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    let _conn = pool.acquire().await.unwrap();
    tokio::time::advance(ms(100)).await;
    assert_eq!(pool.sweep_now().await.leaked, 0);

    tokio::time::advance(ms(1)).await;
    assert_eq!(pool.sweep_now().await.leaked, 1);
    assert!(provider.probe(0).unwrap().is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_leak_listener_receives_acquire_site() {
    let (builder, _provider) = builder("mem://listener");
    let seen: Arc<Mutex<Vec<(u64, u32, Duration)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let pool = builder
        .leak_timeout(ms(100))
        .sweep_interval(Duration::from_secs(3600))
        .on_leak(move |report| {
            sink.lock().push((
                report.connection_id,
                report.site.location().line(),
                report.leased_for,
            ));
        })
        .build()
        .unwrap();

    let line = line!() + 1;
    let conn = pool.acquire().await.unwrap();
    tokio::time::advance(ms(150)).await;
    pool.sweep_now().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, conn.connection_id());
    assert_eq!(seen[0].1, line);
    assert_eq!(seen[0].2, ms(150));
}

#[tokio::test(start_paused = true)]
async fn test_backtrace_captured_when_enabled() {
    let (builder, _provider) = builder("mem://backtrace");
    let pool = builder.capture_backtrace(true).build().unwrap();

    let conn = pool.acquire().await.unwrap();
    // Capture may be unsupported on the platform; the site is still there.
    assert!(conn.site().to_string().contains(file!()));
}

#[tokio::test(start_paused = true)]
async fn test_leak_detection_disabled_keeps_long_leases() {
    let (builder, provider) = builder("mem://no-leak");
    let pool = builder.sweep_interval(ms(50)).build().unwrap();

    let conn = pool.acquire().await.unwrap();
    sleep(Duration::from_secs(60)).await;

    assert_eq!(conn.lease_state(), LeaseState::Leased);
    assert!(!provider.probe(0).unwrap().is_closed());
    assert!(pool.is_sweeper_running());
    assert!(pool.metrics().sweeps > 1000);
}

// =============================================================================
// Idle eviction
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_connection_is_closed() {
    let (builder, provider) = builder("mem://idle");
    let pool = builder
        .idle_timeout(ms(100))
        .sweep_interval(ms(50))
        .build()
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    conn.close().await.unwrap();
    sleep(ms(175)).await;

    assert!(provider.probe(0).unwrap().is_closed());
    assert!(pool.status().is_empty());
    assert!(!pool.is_sweeper_running());
    assert_eq!(pool.metrics().idle_evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reacquired_connection_escapes_idle_eviction() {
    let (builder, provider) = builder("mem://reacquire");
    let pool = builder
        .idle_timeout(ms(100))
        .sweep_interval(ms(50))
        .build()
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    conn.close().await.unwrap();
    sleep(ms(80)).await;

    let again = pool.acquire().await.unwrap();
    sleep(ms(500)).await;

    assert_eq!(provider.created(), 1);
    assert!(!provider.probe(0).unwrap().is_closed());
    again.execute("SELECT 1", &[]).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_idle_clock_restarts_on_release() {
    let (builder, provider) = builder("mem://restart");
    let pool = builder
        .idle_timeout(ms(100))
        .sweep_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    tokio::time::advance(ms(500)).await;
    conn.close().await.unwrap();

    tokio::time::advance(ms(60)).await;
    assert_eq!(pool.sweep_now().await.idle, 0);
    tokio::time::advance(ms(60)).await;
    assert_eq!(pool.sweep_now().await.idle, 1);
    assert!(provider.probe(0).unwrap().is_closed());
}

// =============================================================================
// Sweeper lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sweeper_runs_only_while_pool_is_not_empty() {
    let (builder, provider) = builder("mem://lifecycle");
    let pool = builder
        .idle_timeout(ms(100))
        .sweep_interval(ms(50))
        .build()
        .unwrap();
    assert!(!pool.is_sweeper_running());

    let conn = pool.acquire().await.unwrap();
    assert!(pool.is_sweeper_running());

    // Releasing keeps it running: the pool still owns the connection.
    conn.close().await.unwrap();
    assert!(pool.is_sweeper_running());

    // Idle eviction empties the pool and the sweeper stops itself.
    sleep(ms(175)).await;
    assert!(pool.status().is_empty());
    assert!(!pool.is_sweeper_running());
    let sweeps = pool.metrics().sweeps;
    sleep(ms(500)).await;
    assert_eq!(pool.metrics().sweeps, sweeps);

    // The next lease starts it again.
    let _conn = pool.acquire().await.unwrap();
    assert!(pool.is_sweeper_running());
    assert_eq!(provider.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_starts_with_eviction_disabled() {
    let (builder, _provider) = builder("mem://no-eviction");
    let pool = builder.build().unwrap();
    assert!(!pool.config().evicts());

    let _conn = pool.acquire().await.unwrap();
    assert!(pool.is_sweeper_running());
}

#[tokio::test(start_paused = true)]
async fn test_close_failure_does_not_stop_the_sweep() {
    let (builder, provider) = builder("mem://close-fail");
    let pool = builder
        .idle_timeout(ms(100))
        .sweep_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    drop(a);
    drop(b);
    provider.set_fail_close(true);

    tokio::time::advance(ms(150)).await;
    let report = pool.sweep_now().await;

    assert_eq!(report.idle, 2);
    assert_eq!(report.close_failures, 2);
    assert!(pool.status().is_empty());
    assert!(!pool.is_sweeper_running());
    for probe in provider.probes() {
        assert_eq!(probe.close_calls(), 1);
    }
    assert_eq!(pool.metrics().close_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_pool_closes_idle_connections() {
    let (builder, provider) = builder("mem://dropped");
    let pool = builder
        .idle_timeout(Duration::from_secs(3600))
        .sweep_interval(ms(50))
        .build()
        .unwrap();

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    a.close().await.unwrap();
    drop(a);
    drop(b);
    drop(pool);

    // Closed right away instead of waiting out the idle timeout.
    tokio::task::yield_now().await;
    sleep(ms(1)).await;
    assert_eq!(provider.closed(), 2);
    for probe in provider.probes() {
        assert_eq!(probe.close_calls(), 1);
    }
}

#[tokio::test]
async fn test_dropped_pool_tolerates_close_failure() {
    let (builder, provider) = builder("mem://dropped-fail");
    let pool = builder.build().unwrap();

    drop(pool.acquire().await.unwrap());
    provider.set_fail_close(true);
    drop(pool);

    sleep(ms(10)).await;
    assert_eq!(provider.probe(0).unwrap().close_calls(), 1);
}
