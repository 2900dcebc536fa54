//! The connection surface shared by raw and pooled connections.
//!
//! A provider hands out boxed [`Connection`] objects. The pool wraps each one
//! in a [`PooledConnection`](crate::PooledConnection), which implements the
//! same trait, so code written against `dyn Connection` works unchanged with
//! either.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ConnectionError;

/// A parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary value.
    Bytes(Vec<u8>),
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names, in result order.
    pub columns: Vec<String>,
    /// Row values, one vector per row.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// A result with no columns and no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted,
    /// Read committed.
    #[default]
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable (highest isolation).
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL statement to set this isolation level.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// Descriptive information about a live connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Database product name reported by the server.
    pub product_name: String,
    /// Database product version.
    pub product_version: String,
    /// Target the connection was opened against.
    pub url: String,
    /// Authenticated user, if any.
    pub username: Option<String>,
}

/// A live database connection.
///
/// Operations with a default body are optional for providers; the defaults
/// report [`ConnectionError::NotSupported`].
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Execute a statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ConnectionError>;

    /// Execute a query and return its rows.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, ConnectionError>;

    /// Whether statements are committed automatically.
    async fn auto_commit(&self) -> Result<bool, ConnectionError>;

    /// Enable or disable auto-commit.
    async fn set_auto_commit(&self, enabled: bool) -> Result<(), ConnectionError>;

    /// Commit the current transaction.
    async fn commit(&self) -> Result<(), ConnectionError>;

    /// Roll back the current transaction.
    async fn rollback(&self) -> Result<(), ConnectionError>;

    /// Create a named savepoint.
    async fn savepoint(&self, _name: &str) -> Result<(), ConnectionError> {
        Err(ConnectionError::NotSupported("savepoints"))
    }

    /// Roll back to a named savepoint.
    async fn rollback_to_savepoint(&self, _name: &str) -> Result<(), ConnectionError> {
        Err(ConnectionError::NotSupported("savepoints"))
    }

    /// Release a named savepoint.
    async fn release_savepoint(&self, _name: &str) -> Result<(), ConnectionError> {
        Err(ConnectionError::NotSupported("savepoints"))
    }

    /// Current transaction isolation level.
    async fn isolation_level(&self) -> Result<IsolationLevel, ConnectionError> {
        Err(ConnectionError::NotSupported("isolation levels"))
    }

    /// Change the transaction isolation level.
    async fn set_isolation_level(&self, _level: IsolationLevel) -> Result<(), ConnectionError> {
        Err(ConnectionError::NotSupported("isolation levels"))
    }

    /// Whether the connection is read-only.
    async fn is_read_only(&self) -> Result<bool, ConnectionError> {
        Ok(false)
    }

    /// Mark the connection read-only.
    async fn set_read_only(&self, _read_only: bool) -> Result<(), ConnectionError> {
        Err(ConnectionError::NotSupported("read-only mode"))
    }

    /// Current catalog (database) name.
    async fn catalog(&self) -> Result<Option<String>, ConnectionError> {
        Ok(None)
    }

    /// Switch catalog.
    async fn set_catalog(&self, _catalog: &str) -> Result<(), ConnectionError> {
        Err(ConnectionError::NotSupported("catalogs"))
    }

    /// Current schema name.
    async fn schema(&self) -> Result<Option<String>, ConnectionError> {
        Ok(None)
    }

    /// Switch schema.
    async fn set_schema(&self, _schema: &str) -> Result<(), ConnectionError> {
        Err(ConnectionError::NotSupported("schemas"))
    }

    /// Information about the connection and server.
    async fn metadata(&self) -> Result<ConnectionInfo, ConnectionError>;

    /// Warnings reported since the last call to `clear_warnings`.
    async fn warnings(&self) -> Result<Vec<String>, ConnectionError> {
        Ok(Vec::new())
    }

    /// Discard reported warnings.
    async fn clear_warnings(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Check that the connection is still usable, waiting at most `timeout`.
    async fn is_valid(&self, timeout: Duration) -> Result<bool, ConnectionError>;

    /// Whether the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Close the connection.
    async fn close(&self) -> Result<(), ConnectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_default() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert!(IsolationLevel::Serializable.as_sql().ends_with("SERIALIZABLE"));
    }

    #[test]
    fn test_query_result_empty() {
        let result = QueryResult::empty();
        assert!(result.is_empty());
        assert_eq!(result.len(), 0);
    }
}
