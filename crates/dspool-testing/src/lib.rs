//! # dspool-testing
//!
//! Test infrastructure for the dspool connection pool.
//!
//! Provides an in-memory [`MockProvider`] whose connections record what was
//! done to them and can be told to fail, so pool behaviour can be verified
//! without a database.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dspool::Pool;
//! use dspool_testing::MockProvider;
//!
//! let provider = MockProvider::new("mem://test");
//! let pool = Pool::builder().provider(provider.shared()).build()?;
//!
//! let conn = pool.acquire().await?;
//! drop(conn);
//! assert_eq!(provider.created(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{MockConnection, MockError, MockProbe, MockProvider};
