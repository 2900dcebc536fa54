//! Connection pool implementation.
//!
//! The pool keeps two collections, `available` and `in_use`, behind a single
//! lock. Every open connection owned by the pool lives in exactly one of
//! them. The lock is never held across an `.await`: a brand-new connection
//! is opened with the lock released and only then inserted into `in_use`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::builder::PoolBuilder;
use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionInfo, IsolationLevel, QueryResult, Value};
use crate::descriptor::Descriptor;
use crate::error::{ConnectionError, PoolError};
use crate::lease::{AcquireSite, Lease, LeakReport, LeaseState};
use crate::metrics::{MetricsInner, PoolMetrics, PoolStatus};
use crate::provider::Provider;
use crate::sweeper::{SweepReport, Sweeper};

tokio::task_local! {
    /// Site of the outermost acquire while a pool opens a connection, so a
    /// pool used as another pool's provider reports the caller's site.
    static ACQUIRE_SITE: Arc<AcquireSite>;
}

/// Callback invoked for every leaked lease the sweep reclaims.
pub type LeakListener = Arc<dyn Fn(&LeakReport<'_>) + Send + Sync>;

/// A pool of reusable connections in front of a [`Provider`].
///
/// The pool grows on demand: [`acquire`](Pool::acquire) reuses an idle
/// connection when one is available and otherwise opens a new one. A
/// background sweep closes connections leased for longer than the leak
/// timeout and idle connections older than the idle timeout. The sweep runs
/// only while the pool owns at least one connection.
///
/// Cloning a `Pool` is cheap; clones share the same connections.
///
/// # Example
///
/// ```rust,ignore
/// use dspool::{Connection, Pool};
/// use std::time::Duration;
///
/// let pool = Pool::builder()
///     .provider(provider)
///     .leak_timeout(Duration::from_secs(60))
///     .build()?;
///
/// let conn = pool.acquire().await?;
/// conn.execute("UPDATE jobs SET state = 'done'", &[]).await?;
/// conn.close().await?; // returns the connection to the pool
///
/// pool.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    /// Source of new connections.
    pub(crate) provider: Arc<dyn Provider>,

    /// Pool configuration.
    pub(crate) config: PoolConfig,

    /// Collections and sweeper, guarded together.
    pub(crate) state: Mutex<PoolState>,

    /// Counter for generating connection IDs.
    next_connection_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,

    /// Pool metrics.
    pub(crate) metrics: Mutex<MetricsInner>,

    /// Leak callback.
    pub(crate) on_leak: Option<LeakListener>,
}

pub(crate) struct PoolState {
    pub(crate) available: VecDeque<IdleEntry>,
    pub(crate) in_use: HashMap<u64, LeasedEntry>,
    pub(crate) sweeper: Option<Sweeper>,
    pub(crate) closed: bool,
}

/// A connection waiting in `available`.
pub(crate) struct IdleEntry {
    pub(crate) id: u64,
    pub(crate) conn: Arc<dyn Connection>,
    /// When the connection was last released.
    pub(crate) since: Instant,
}

/// A connection held in `in_use`.
pub(crate) struct LeasedEntry {
    pub(crate) conn: Arc<dyn Connection>,
    /// When the lease started.
    pub(crate) since: Instant,
    pub(crate) lease: Arc<Lease>,
    pub(crate) site: Arc<AcquireSite>,
}

impl PoolState {
    fn is_empty(&self) -> bool {
        self.available.is_empty() && self.in_use.is_empty()
    }

    /// Stop the sweeper once the pool owns no connections.
    pub(crate) fn stop_sweeper_if_empty(&mut self) {
        if self.is_empty() {
            if let Some(sweeper) = self.sweeper.take() {
                sweeper.stop();
                tracing::debug!("pool is empty, sweeper stopped");
            }
        }
    }
}

impl Pool {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Create a pool around `provider`.
    ///
    /// No connection is opened until the first [`acquire`](Pool::acquire).
    pub fn new(provider: Arc<dyn Provider>, config: PoolConfig) -> Result<Self, PoolError> {
        Self::from_parts(provider, config, None)
    }

    pub(crate) fn from_parts(
        provider: Arc<dyn Provider>,
        config: PoolConfig,
        on_leak: Option<LeakListener>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        tracing::info!(
            leak_timeout = ?config.leak_timeout,
            idle_timeout = ?config.idle_timeout,
            sweep_interval = ?config.sweep_interval,
            "connection pool created"
        );

        let inner = Arc::new(PoolInner {
            provider,
            config,
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                in_use: HashMap::new(),
                sweeper: None,
                closed: false,
            }),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(MetricsInner::default()),
            on_leak,
        });

        Ok(Self { inner })
    }

    /// Lease a connection.
    ///
    /// Reuses an idle connection if one is available, otherwise opens a new
    /// one through the provider. Provider failures are returned unchanged as
    /// [`PoolError::Connection`]. The caller's source location is recorded
    /// for leak reports.
    ///
    /// The returned future must be polled inside a Tokio runtime, which
    /// hosts the background sweep. Polled anywhere else it fails with
    /// [`PoolError::Config`] without touching the provider.
    #[track_caller]
    pub fn acquire(&self) -> impl Future<Output = Result<PooledConnection, PoolError>> + Send + '_ {
        let site = AcquireSite::capture(Location::caller(), self.inner.config.capture_backtrace);
        self.inner.acquire(Arc::new(site))
    }

    /// Return a leased connection to the pool.
    ///
    /// Fails with [`PoolError::DoubleRelease`] if the handle is not currently
    /// leased from this pool, and with [`ConnectionError::Evicted`] if the
    /// sweep already reclaimed it.
    pub fn release(&self, conn: &PooledConnection) -> Result<(), PoolError> {
        if !Arc::ptr_eq(&self.inner, &conn.pool) {
            return Err(PoolError::DoubleRelease { id: conn.id });
        }
        self.inner.release(conn.id, &conn.lease)
    }

    /// Close every idle connection and stop the sweeper.
    ///
    /// Fails with [`PoolError::Busy`], leaving the pool untouched, while any
    /// connection is leased. After a successful shutdown the pool is closed
    /// and [`acquire`](Pool::acquire) fails with [`PoolError::PoolClosed`].
    /// Every idle connection is closed even if some closes fail; the first
    /// failure is returned.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        let drained: Vec<IdleEntry> = {
            let mut state = self.inner.state.lock();
            if !state.in_use.is_empty() {
                return Err(PoolError::Busy {
                    in_use: state.in_use.len(),
                });
            }
            state.closed = true;
            if let Some(sweeper) = state.sweeper.take() {
                sweeper.stop();
            }
            state.available.drain(..).collect()
        };

        let count = drained.len();
        let mut first_error = None;
        for entry in drained {
            if let Err(err) = self.inner.close_connection(entry.id, entry.conn.as_ref()).await {
                first_error.get_or_insert(err);
            }
        }

        tracing::info!(closed = count, "connection pool shut down");

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Run one sweep immediately, independent of the background schedule.
    pub async fn sweep_now(&self) -> SweepReport {
        self.inner.sweep().await
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.available.len(),
            in_use: state.in_use.len(),
            sweeper_running: state.sweeper.is_some(),
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner
            .metrics
            .lock()
            .snapshot(self.inner.created_at.elapsed())
    }

    /// Whether the background sweeper is scheduled.
    #[must_use]
    pub fn is_sweeper_running(&self) -> bool {
        self.inner.state.lock().sweeper.is_some()
    }

    /// Check if the pool has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The provider this pool draws connections from.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.inner.provider
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

/// A pool can stand in for the provider it wraps.
///
/// When an outer pool opens a connection through this one, the inner lease
/// records the outer caller's acquire site rather than this impl.
#[async_trait]
impl Provider for Pool {
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let conn = match ACQUIRE_SITE.try_with(Arc::clone) {
            Ok(site) => self.inner.acquire(site).await?,
            Err(_) => self.acquire().await?,
        };
        Ok(Box::new(conn))
    }

    fn descriptor(&self) -> Option<Descriptor> {
        self.inner
            .provider
            .descriptor()
            .map(|inner| Descriptor::wrap_with_config(&inner, &self.inner.config))
    }
}

impl PoolInner {
    async fn acquire(
        self: &Arc<Self>,
        site: Arc<AcquireSite>,
    ) -> Result<PooledConnection, PoolError> {
        let runtime = Handle::try_current().map_err(|_| {
            PoolError::Config("acquire must be polled inside a Tokio runtime".into())
        })?;

        let reused = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            match state.available.pop_front() {
                Some(idle) => Some(self.lease(
                    &runtime,
                    &mut state,
                    idle.id,
                    idle.conn,
                    Arc::clone(&site),
                )),
                None => None,
            }
        };

        if let Some(conn) = reused {
            let mut metrics = self.metrics.lock();
            metrics.checkouts += 1;
            metrics.reuses += 1;
            tracing::trace!(connection_id = conn.id, "reusing idle connection");
            return Ok(conn);
        }

        let raw = match ACQUIRE_SITE
            .scope(Arc::clone(&site), self.provider.connect())
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                self.metrics.lock().checkouts_failed += 1;
                tracing::debug!(error = %err, "provider failed to open connection");
                return Err(err.into());
            }
        };
        let conn: Arc<dyn Connection> = Arc::from(raw);
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        let leased = {
            let mut state = self.state.lock();
            if state.closed {
                Err(conn)
            } else {
                Ok(self.lease(&runtime, &mut state, id, conn, site))
            }
        };

        match leased {
            Ok(handle) => {
                let mut metrics = self.metrics.lock();
                metrics.connections_created += 1;
                metrics.checkouts += 1;
                tracing::debug!(connection_id = id, "opened new connection");
                Ok(handle)
            }
            Err(conn) => {
                tracing::debug!(
                    connection_id = id,
                    "pool shut down while connecting, discarding connection"
                );
                // Already logged and counted; the caller only needs to know
                // the pool is gone.
                let _ = self.close_connection(id, conn.as_ref()).await;
                Err(PoolError::PoolClosed)
            }
        }
    }

    /// Move a connection into `in_use` under a fresh lease.
    fn lease(
        self: &Arc<Self>,
        runtime: &Handle,
        state: &mut PoolState,
        id: u64,
        conn: Arc<dyn Connection>,
        site: Arc<AcquireSite>,
    ) -> PooledConnection {
        let lease = Arc::new(Lease::new());
        state.in_use.insert(
            id,
            LeasedEntry {
                conn: Arc::clone(&conn),
                since: Instant::now(),
                lease: Arc::clone(&lease),
                site: Arc::clone(&site),
            },
        );

        if state.sweeper.is_none() {
            state.sweeper = Some(Sweeper::spawn(
                runtime,
                Arc::downgrade(self),
                self.config.sweep_interval,
            ));
            tracing::debug!(interval = ?self.config.sweep_interval, "sweeper started");
        }

        PooledConnection {
            pool: Arc::clone(self),
            id,
            conn,
            lease,
            site,
        }
    }

    /// Remove the lease from `in_use` if `lease` is the one currently held.
    fn take_lease(
        &self,
        state: &mut PoolState,
        id: u64,
        lease: &Arc<Lease>,
    ) -> Result<LeasedEntry, PoolError> {
        let current = state
            .in_use
            .get(&id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.lease, lease));

        match (current, lease.state()) {
            (true, _) => state
                .in_use
                .remove(&id)
                .ok_or(PoolError::DoubleRelease { id }),
            (false, LeaseState::Evicted) => Err(ConnectionError::Evicted { id }.into()),
            (false, _) => Err(PoolError::DoubleRelease { id }),
        }
    }

    fn release(&self, id: u64, lease: &Arc<Lease>) -> Result<(), PoolError> {
        {
            let mut state = self.state.lock();
            let entry = self.take_lease(&mut state, id, lease)?;
            entry.lease.set(LeaseState::Released);
            state.available.push_back(IdleEntry {
                id,
                conn: entry.conn,
                since: Instant::now(),
            });
            state.stop_sweeper_if_empty();
        }

        self.metrics.lock().releases += 1;
        tracing::trace!(connection_id = id, "connection returned to pool");
        Ok(())
    }

    fn detach(&self, id: u64, lease: &Arc<Lease>) -> Result<Arc<dyn Connection>, PoolError> {
        let mut state = self.state.lock();
        let entry = self.take_lease(&mut state, id, lease)?;
        entry.lease.set(LeaseState::Detached);
        state.stop_sweeper_if_empty();
        tracing::debug!(connection_id = id, "connection detached from pool");
        Ok(entry.conn)
    }

    /// Close a connection the pool no longer tracks.
    pub(crate) async fn close_connection(
        &self,
        id: u64,
        conn: &dyn Connection,
    ) -> Result<(), ConnectionError> {
        match conn.close().await {
            Ok(()) => {
                self.metrics.lock().connections_closed += 1;
                Ok(())
            }
            Err(err) => {
                self.metrics.lock().close_failures += 1;
                tracing::error!(connection_id = id, error = %err, "failed to close connection");
                Err(err)
            }
        }
    }
}

/// Dropping the last handle to a pool that was never shut down still closes
/// its idle connections, on a task of the current runtime when there is one.
impl Drop for PoolInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(sweeper) = state.sweeper.take() {
            sweeper.abort();
        }
        if state.available.is_empty() {
            return;
        }

        let idle: Vec<IdleEntry> = state.available.drain(..).collect();
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(
                idle = idle.len(),
                "pool dropped outside a runtime, idle connections dropped unclosed"
            );
            return;
        };

        tracing::debug!(
            idle = idle.len(),
            "pool dropped without shutdown, closing idle connections"
        );
        runtime.spawn(async move {
            for entry in idle {
                if let Err(err) = entry.conn.close().await {
                    tracing::warn!(
                        connection_id = entry.id,
                        error = %err,
                        "failed to close idle connection of dropped pool"
                    );
                }
            }
        });
    }
}

/// A connection leased from the pool.
///
/// Behaves exactly like the wrapped connection except that
/// [`close`](Connection::close) returns it to the pool. Dropping a handle
/// that is still leased also returns it. Once the handle is released, or the
/// sweep reclaims it as a leak, every forwarded call fails with
/// [`ConnectionError::Released`] or [`ConnectionError::Evicted`].
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    id: u64,
    conn: Arc<dyn Connection>,
    lease: Arc<Lease>,
    site: Arc<AcquireSite>,
}

impl PooledConnection {
    /// Pool-assigned identifier of the underlying connection.
    ///
    /// Stays the same across leases of the same connection.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.id
    }

    /// Where this lease was acquired.
    #[must_use]
    pub fn site(&self) -> &AcquireSite {
        &self.site
    }

    /// Current state of this lease.
    #[must_use]
    pub fn lease_state(&self) -> LeaseState {
        self.lease.state()
    }

    /// The underlying connection.
    ///
    /// Calls made through this reference bypass the lease check.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// Return the connection to the pool.
    ///
    /// Calling this twice fails with [`PoolError::DoubleRelease`].
    pub fn release(&self) -> Result<(), PoolError> {
        self.pool.release(self.id, &self.lease)
    }

    /// Remove the connection from the pool and take ownership of it.
    ///
    /// The pool forgets the connection entirely: it is neither reused nor
    /// swept, and the caller becomes responsible for closing it.
    pub fn detach(self) -> Result<Arc<dyn Connection>, PoolError> {
        self.pool.detach(self.id, &self.lease)
    }

    fn check(&self) -> Result<&dyn Connection, ConnectionError> {
        self.lease.check(self.id)?;
        Ok(self.conn.as_ref())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.lease.state() == LeaseState::Leased {
            if let Err(err) = self.pool.release(self.id, &self.lease) {
                tracing::trace!(connection_id = self.id, error = %err, "release on drop skipped");
            }
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("state", &self.lease.state())
            .field("site", &self.site)
            .finish()
    }
}

#[async_trait]
impl Connection for PooledConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ConnectionError> {
        self.check()?.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, ConnectionError> {
        self.check()?.query(sql, params).await
    }

    async fn auto_commit(&self) -> Result<bool, ConnectionError> {
        self.check()?.auto_commit().await
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<(), ConnectionError> {
        self.check()?.set_auto_commit(enabled).await
    }

    async fn commit(&self) -> Result<(), ConnectionError> {
        self.check()?.commit().await
    }

    async fn rollback(&self) -> Result<(), ConnectionError> {
        self.check()?.rollback().await
    }

    async fn savepoint(&self, name: &str) -> Result<(), ConnectionError> {
        self.check()?.savepoint(name).await
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<(), ConnectionError> {
        self.check()?.rollback_to_savepoint(name).await
    }

    async fn release_savepoint(&self, name: &str) -> Result<(), ConnectionError> {
        self.check()?.release_savepoint(name).await
    }

    async fn isolation_level(&self) -> Result<IsolationLevel, ConnectionError> {
        self.check()?.isolation_level().await
    }

    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<(), ConnectionError> {
        self.check()?.set_isolation_level(level).await
    }

    async fn is_read_only(&self) -> Result<bool, ConnectionError> {
        self.check()?.is_read_only().await
    }

    async fn set_read_only(&self, read_only: bool) -> Result<(), ConnectionError> {
        self.check()?.set_read_only(read_only).await
    }

    async fn catalog(&self) -> Result<Option<String>, ConnectionError> {
        self.check()?.catalog().await
    }

    async fn set_catalog(&self, catalog: &str) -> Result<(), ConnectionError> {
        self.check()?.set_catalog(catalog).await
    }

    async fn schema(&self) -> Result<Option<String>, ConnectionError> {
        self.check()?.schema().await
    }

    async fn set_schema(&self, schema: &str) -> Result<(), ConnectionError> {
        self.check()?.set_schema(schema).await
    }

    async fn metadata(&self) -> Result<ConnectionInfo, ConnectionError> {
        self.check()?.metadata().await
    }

    async fn warnings(&self) -> Result<Vec<String>, ConnectionError> {
        self.check()?.warnings().await
    }

    async fn clear_warnings(&self) -> Result<(), ConnectionError> {
        self.check()?.clear_warnings().await
    }

    async fn is_valid(&self, timeout: Duration) -> Result<bool, ConnectionError> {
        self.check()?.is_valid(timeout).await
    }

    fn is_closed(&self) -> bool {
        self.lease.state() != LeaseState::Leased || self.conn.is_closed()
    }

    /// Returns the connection to the pool instead of closing it.
    async fn close(&self) -> Result<(), ConnectionError> {
        match self.release() {
            Ok(()) => Ok(()),
            Err(PoolError::DoubleRelease { id }) => Err(ConnectionError::Released { id }),
            Err(err) => Err(err.into()),
        }
    }
}
