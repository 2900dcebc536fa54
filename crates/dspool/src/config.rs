//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default period between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Default time an idle connection may sit in the pool before it is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(200);

/// Smallest sweep period. Descriptors carry timings in whole milliseconds.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a connection pool.
///
/// Leak detection is disabled by default: it is a time-based heuristic that
/// cannot tell a long-running lease from an abandoned one, so callers opt in
/// with a timeout that suits their workload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// A lease held longer than this is reclaimed. `None` disables.
    pub leak_timeout: Option<Duration>,

    /// An idle connection older than this is closed. `None` disables.
    pub idle_timeout: Option<Duration>,

    /// Period between sweeps.
    pub sweep_interval: Duration,

    /// Capture a full backtrace at every acquire for leak reports.
    pub capture_backtrace: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            leak_timeout: None,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            capture_backtrace: false,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the leak timeout. A zero duration disables leak detection.
    #[must_use]
    pub fn leak_timeout(mut self, timeout: Duration) -> Self {
        self.leak_timeout = non_zero(timeout);
        self
    }

    /// Set the idle timeout. A zero duration disables idle eviction.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = non_zero(timeout);
        self
    }

    /// Disable idle eviction.
    #[must_use]
    pub fn no_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    /// Set the sweep period.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enable or disable backtrace capture on acquire.
    #[must_use]
    pub fn capture_backtrace(mut self, enabled: bool) -> Self {
        self.capture_backtrace = enabled;
        self
    }

    /// Whether any eviction policy is active.
    #[must_use]
    pub fn evicts(&self) -> bool {
        self.leak_timeout.is_some() || self.idle_timeout.is_some()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.sweep_interval < MIN_SWEEP_INTERVAL {
            return Err(PoolError::Config(format!(
                "sweep_interval must be at least {MIN_SWEEP_INTERVAL:?}, got {:?}",
                self.sweep_interval
            )));
        }
        Ok(())
    }
}

/// Interpret a millisecond attribute: zero or negative disables.
pub(crate) fn timeout_from_millis(millis: i64) -> Option<Duration> {
    u64::try_from(millis)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Inverse of [`timeout_from_millis`]. A non-zero timeout never encodes as
/// `0`, which would read back as disabled.
pub(crate) fn timeout_to_millis(timeout: Option<Duration>) -> i64 {
    timeout
        .filter(|t| !t.is_zero())
        .map(|t| i64::try_from(t.as_millis()).unwrap_or(i64::MAX).max(1))
        .unwrap_or(0)
}

fn non_zero(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.leak_timeout, None);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(200)));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert!(!config.capture_backtrace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_disables_timeouts() {
        let config = PoolConfig::new()
            .leak_timeout(Duration::ZERO)
            .idle_timeout(Duration::ZERO);
        assert_eq!(config.leak_timeout, None);
        assert_eq!(config.idle_timeout, None);
        assert!(!config.evicts());
    }

    #[test]
    fn test_timeouts_are_independent() {
        let config = PoolConfig::new()
            .leak_timeout(Duration::from_millis(100))
            .no_idle_timeout();
        assert_eq!(config.leak_timeout, Some(Duration::from_millis(100)));
        assert_eq!(config.idle_timeout, None);
        assert!(config.evicts());
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let config = PoolConfig::new().sweep_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));
    }

    #[test]
    fn test_sub_millisecond_sweep_interval_rejected() {
        let config = PoolConfig::new().sweep_interval(Duration::from_micros(500));
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));
        assert!(
            PoolConfig::new()
                .sweep_interval(Duration::from_millis(1))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_sub_millisecond_timeout_stays_enabled() {
        let encoded = timeout_to_millis(Some(Duration::from_micros(300)));
        assert_eq!(encoded, 1);
        assert_eq!(timeout_from_millis(encoded), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_millis_conversion() {
        assert_eq!(timeout_from_millis(0), None);
        assert_eq!(timeout_from_millis(-5), None);
        assert_eq!(timeout_from_millis(250), Some(Duration::from_millis(250)));
        assert_eq!(timeout_to_millis(None), 0);
        assert_eq!(timeout_to_millis(Some(Duration::from_secs(2))), 2000);
    }
}
