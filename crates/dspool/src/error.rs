//! Pool and connection error types.

use thiserror::Error;

/// Boxed error raised by a provider implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by connection operations.
///
/// Providers report their own failures through [`ConnectionError::Provider`];
/// the pool adds the handle-lifecycle variants so that a caller holding a
/// stale handle gets a clear error instead of touching a recycled connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The underlying connection is closed.
    #[error("connection is closed")]
    Closed,

    /// The handle was already returned to the pool.
    #[error("connection {id} was returned to the pool")]
    Released {
        /// Pool-assigned connection identifier.
        id: u64,
    },

    /// The handle was reclaimed by the leak sweep.
    #[error("connection {id} was reclaimed by the pool after exceeding the leak timeout")]
    Evicted {
        /// Pool-assigned connection identifier.
        id: u64,
    },

    /// The operation is not implemented by the underlying connection.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// The provider or its connection failed.
    #[error("provider error: {0}")]
    Provider(#[source] BoxError),

    /// A pool used as a provider could not hand out a connection.
    #[error("connection unavailable: {0}")]
    Unavailable(String),
}

impl ConnectionError {
    /// Wrap an arbitrary provider failure.
    pub fn provider<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Provider(err.into())
    }

    /// Whether the error means the handle can no longer be used.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Released { .. } | Self::Evicted { .. }
        )
    }
}

/// Errors returned by pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Creating or using an underlying connection failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Shutdown was attempted while connections are still leased.
    #[error("pool busy: {in_use} connection(s) still leased")]
    Busy {
        /// Number of outstanding leases.
        in_use: usize,
    },

    /// A handle was released that is not currently leased.
    #[error("connection {id} is not currently leased")]
    DoubleRelease {
        /// Pool-assigned connection identifier.
        id: u64,
    },

    /// The pool has been shut down.
    #[error("pool is closed")]
    PoolClosed,

    /// Invalid pool configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required descriptor attribute is missing.
    #[error("missing required attribute: {0}")]
    MissingAttribute(&'static str),

    /// A descriptor attribute could not be parsed.
    #[error("invalid value for attribute {name}: {value:?}")]
    InvalidAttribute {
        /// Attribute key.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// No factory is registered for the provider identity.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl PoolError {
    /// Whether the error was caused by the caller misusing the pool rather
    /// than by the provider.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. } | Self::DoubleRelease { .. } | Self::PoolClosed
        )
    }
}

impl From<PoolError> for ConnectionError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Connection(inner) => inner,
            other => ConnectionError::Unavailable(other.to_string()),
        }
    }
}
