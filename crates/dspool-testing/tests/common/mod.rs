//! Shared helpers for pool integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::time::Duration;

use dspool::{Pool, PoolBuilder};
use dspool_testing::MockProvider;

/// Route pool logs to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Builder around a fresh mock provider with eviction disabled.
pub fn builder(url: &str) -> (PoolBuilder, MockProvider) {
    init_tracing();
    let provider = MockProvider::new(url);
    let builder = Pool::builder()
        .provider(provider.shared())
        .idle_timeout(Duration::ZERO)
        .sweep_interval(Duration::from_secs(3600));
    (builder, provider)
}

/// Pool over a fresh mock provider with eviction disabled.
pub fn pool(url: &str) -> (Pool, MockProvider) {
    let (builder, provider) = builder(url);
    (builder.build().unwrap(), provider)
}
