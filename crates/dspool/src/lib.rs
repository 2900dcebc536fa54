//! # dspool
//!
//! Leak-detecting connection pool for an opaque connection provider.
//!
//! The pool sits in front of any [`Provider`] and hands out
//! [`PooledConnection`]s that behave exactly like the provider's own
//! connections, except that closing one returns it to the pool.
//!
//! ## Features
//!
//! - Reuse-first acquisition that grows the pool on demand
//! - Leak detection: leases held past a configurable timeout are reclaimed
//!   and reported with the site that acquired them
//! - Idle eviction of connections unused for too long
//! - A background sweep that runs only while the pool owns connections
//! - Descriptor-based construction, including pools that wrap pools
//!
//! ## Example
//!
//! ```rust,ignore
//! use dspool::{Connection, Pool, ProviderRegistry};
//! use std::time::Duration;
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register("postgres", postgres_factory);
//!
//! let pool = Pool::builder()
//!     .driver("postgres")
//!     .url("postgres://db.internal/orders")
//!     .credentials("app", "secret")
//!     .leak_timeout(Duration::from_secs(120))
//!     .build_with(&registry)?;
//!
//! // Get a connection from the pool
//! let conn = pool.acquire().await?;
//! let rows = conn.query("SELECT id FROM orders", &[]).await?;
//! // Closing returns the connection to the pool
//! conn.close().await?;
//!
//! // Check pool status
//! let status = pool.status();
//! println!("{} idle, {} leased", status.available, status.in_use);
//!
//! // Close idle connections once every lease is returned
//! pool.shutdown().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builder;
pub mod config;
pub mod connection;
pub mod descriptor;
pub mod error;
pub mod lease;
pub mod metrics;
pub mod pool;
pub mod provider;
pub mod sweeper;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::{BoxError, ConnectionError, PoolError};

// Connection surface
pub use connection::{Connection, ConnectionInfo, IsolationLevel, QueryResult, Value};

// Providers and descriptors
pub use descriptor::{Attributes, Credentials, Descriptor, POOL_PROVIDER};
pub use provider::{Provider, ProviderFactory, ProviderRegistry};

// Pool types
pub use builder::PoolBuilder;
pub use lease::{AcquireSite, LeakReport, LeaseState};
pub use metrics::{PoolMetrics, PoolStatus};
pub use pool::{LeakListener, Pool, PooledConnection};
pub use sweeper::SweepReport;
