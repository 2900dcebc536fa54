//! Lease bookkeeping shared between a handle and the pool.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::error::ConnectionError;

/// Lifecycle state of a single lease.
///
/// Every acquire creates a fresh lease, so a handle from an earlier lease of
/// the same connection stays released even after the connection is handed
/// out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LeaseState {
    /// Held by a caller.
    Leased = 0,
    /// Returned to the pool.
    Released = 1,
    /// Reclaimed by the leak sweep.
    Evicted = 2,
    /// Removed from the pool by the caller.
    Detached = 3,
}

impl LeaseState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Leased,
            1 => Self::Released,
            2 => Self::Evicted,
            _ => Self::Detached,
        }
    }
}

/// Atomic cell holding a [`LeaseState`].
///
/// Transitions happen only under the pool lock; reads are lock-free so that
/// forwarded calls can check the lease cheaply.
#[derive(Debug)]
pub(crate) struct Lease {
    state: AtomicU8,
}

impl Lease {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(LeaseState::Leased as u8),
        }
    }

    pub(crate) fn state(&self) -> LeaseState {
        LeaseState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: LeaseState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Fail unless the lease is still held.
    pub(crate) fn check(&self, id: u64) -> Result<(), ConnectionError> {
        match self.state() {
            LeaseState::Leased => Ok(()),
            LeaseState::Released | LeaseState::Detached => Err(ConnectionError::Released { id }),
            LeaseState::Evicted => Err(ConnectionError::Evicted { id }),
        }
    }
}

/// Where a connection was acquired.
///
/// Captured on every acquire and reported if the lease is later reclaimed
/// as a leak.
pub struct AcquireSite {
    location: &'static Location<'static>,
    thread: Option<String>,
    backtrace: Option<Backtrace>,
}

impl AcquireSite {
    /// Capture the current site. `location` should come from a
    /// `#[track_caller]` function.
    pub(crate) fn capture(location: &'static Location<'static>, with_backtrace: bool) -> Self {
        Self {
            location,
            thread: std::thread::current().name().map(str::to_string),
            backtrace: with_backtrace.then(Backtrace::force_capture),
        }
    }

    /// Source location of the `acquire` call.
    #[must_use]
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Name of the acquiring thread, if it had one.
    #[must_use]
    pub fn thread(&self) -> Option<&str> {
        self.thread.as_deref()
    }

    /// Backtrace captured at acquire time, when enabled.
    #[must_use]
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace
            .as_ref()
            .filter(|bt| bt.status() == BacktraceStatus::Captured)
    }
}

impl fmt::Display for AcquireSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location)?;
        if let Some(thread) = &self.thread {
            write!(f, " on thread '{thread}'")?;
        }
        Ok(())
    }
}

impl fmt::Debug for AcquireSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireSite")
            .field("location", &format_args!("{}", self.location))
            .field("thread", &self.thread)
            .field("backtrace", &self.backtrace().is_some())
            .finish()
    }
}

/// Diagnostic emitted when the sweep reclaims a leaked lease.
#[derive(Debug)]
pub struct LeakReport<'a> {
    /// Pool-assigned connection identifier.
    pub connection_id: u64,
    /// How long the lease had been held.
    pub leased_for: Duration,
    /// Where the lease was acquired.
    pub site: &'a AcquireSite,
}
