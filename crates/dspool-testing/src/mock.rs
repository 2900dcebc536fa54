//! In-memory mock provider and connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dspool::descriptor::ATTR_URL;
use dspool::{
    Connection, ConnectionError, ConnectionInfo, Credentials, Descriptor, IsolationLevel, PoolError,
    Provider, ProviderFactory, ProviderRegistry, QueryResult, Value,
};
use parking_lot::Mutex;
use thiserror::Error;

/// Failures injected by the mock.
#[derive(Debug, Error)]
pub enum MockError {
    /// Connection creation was refused.
    #[error("mock provider refused connection to {0}")]
    ConnectRefused(String),

    /// Closing a connection failed.
    #[error("mock connection {0} failed to close")]
    CloseFailed(u64),
}

struct Shared {
    url: String,
    credentials: Credentials,
    descriptor: Mutex<Option<Descriptor>>,
    next_serial: AtomicU64,
    connects: AtomicUsize,
    fail_connect: AtomicBool,
    fail_close: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    probes: Mutex<Vec<Arc<MockProbe>>>,
}

/// A provider that opens in-memory connections.
///
/// Clones share state, so a test can keep one clone for inspection while the
/// pool owns another.
#[derive(Clone)]
pub struct MockProvider {
    shared: Arc<Shared>,
}

impl MockProvider {
    /// Create a provider for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_credentials(url, Credentials::default())
    }

    /// Create a provider for `url` that reports `credentials` in metadata.
    #[must_use]
    pub fn with_credentials(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                credentials,
                descriptor: Mutex::new(None),
                next_serial: AtomicU64::new(1),
                connects: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
                fail_close: AtomicBool::new(false),
                connect_delay: Mutex::new(None),
                probes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// This provider as a trait object for [`dspool::PoolBuilder::provider`].
    #[must_use]
    pub fn shared(&self) -> Arc<dyn Provider> {
        Arc::new(self.clone())
    }

    /// Register a factory under `identity` that builds providers sharing
    /// this provider's state.
    ///
    /// The factory requires a `url` attribute and records the descriptor it
    /// was given, which the provider then reports as its own.
    pub fn register(&self, registry: &mut ProviderRegistry, identity: &str) {
        registry.register(identity, MockFactory { provider: self.clone() });
    }

    /// Number of connections opened.
    #[must_use]
    pub fn created(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Probes for every connection opened, in creation order.
    #[must_use]
    pub fn probes(&self) -> Vec<Arc<MockProbe>> {
        self.shared.probes.lock().clone()
    }

    /// Probe for the `n`th connection opened (zero based).
    #[must_use]
    pub fn probe(&self, n: usize) -> Option<Arc<MockProbe>> {
        self.shared.probes.lock().get(n).cloned()
    }

    /// Number of connections that were closed.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.shared
            .probes
            .lock()
            .iter()
            .filter(|probe| probe.is_closed())
            .count()
    }

    /// Make subsequent connects fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make every close call fail. The connection still counts as closed.
    pub fn set_fail_close(&self, fail: bool) {
        self.shared.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Delay every connect by `delay`.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.shared.connect_delay.lock() = delay;
    }
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("url", &self.shared.url)
            .field("created", &self.created())
            .finish()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let delay = *self.shared.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::provider(MockError::ConnectRefused(
                self.shared.url.clone(),
            )));
        }

        let serial = self.shared.next_serial.fetch_add(1, Ordering::SeqCst);
        let probe = Arc::new(MockProbe::new(serial));
        self.shared.probes.lock().push(Arc::clone(&probe));
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(serial, "mock connection opened");

        Ok(Box::new(MockConnection {
            shared: Arc::clone(&self.shared),
            probe,
        }))
    }

    fn descriptor(&self) -> Option<Descriptor> {
        self.shared.descriptor.lock().clone()
    }
}

struct MockFactory {
    provider: MockProvider,
}

impl ProviderFactory for MockFactory {
    fn create(
        &self,
        descriptor: &Descriptor,
        _registry: &ProviderRegistry,
    ) -> Result<Arc<dyn Provider>, PoolError> {
        descriptor.attributes.require(ATTR_URL)?;
        *self.provider.shared.descriptor.lock() = Some(descriptor.clone());
        Ok(self.provider.shared())
    }
}

/// What happened to one mock connection.
#[derive(Debug)]
pub struct MockProbe {
    serial: u64,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    auto_commit: AtomicBool,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    statements: Mutex<Vec<String>>,
}

impl MockProbe {
    fn new(serial: u64) -> Self {
        Self {
            serial,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            auto_commit: AtomicBool::new(true),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            statements: Mutex::new(Vec::new()),
        }
    }

    /// Provider-assigned serial number, starting at 1.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Whether the connection was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of close calls received.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Number of commits.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of rollbacks.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Statements executed or queried, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }
}

/// A connection opened by [`MockProvider`].
pub struct MockConnection {
    shared: Arc<Shared>,
    probe: Arc<MockProbe>,
}

impl MockConnection {
    /// The probe tracking this connection.
    #[must_use]
    pub fn probe(&self) -> &Arc<MockProbe> {
        &self.probe
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.probe.is_closed() {
            Err(ConnectionError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<u64, ConnectionError> {
        self.ensure_open()?;
        self.probe.statements.lock().push(sql.to_string());
        Ok(1)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, ConnectionError> {
        self.ensure_open()?;
        self.probe.statements.lock().push(sql.to_string());
        Ok(QueryResult {
            columns: vec!["serial".into()],
            rows: vec![vec![Value::Int(self.probe.serial as i64)]]
                .into_iter()
                .chain(params.iter().map(|p| vec![p.clone()]))
                .collect(),
        })
    }

    async fn auto_commit(&self) -> Result<bool, ConnectionError> {
        self.ensure_open()?;
        Ok(self.probe.auto_commit.load(Ordering::SeqCst))
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.probe.auto_commit.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.probe.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.probe.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn isolation_level(&self) -> Result<IsolationLevel, ConnectionError> {
        self.ensure_open()?;
        Ok(IsolationLevel::ReadCommitted)
    }

    async fn metadata(&self) -> Result<ConnectionInfo, ConnectionError> {
        self.ensure_open()?;
        Ok(ConnectionInfo {
            product_name: "mock".into(),
            product_version: env!("CARGO_PKG_VERSION").into(),
            url: self.shared.url.clone(),
            username: self.shared.credentials.username.clone(),
        })
    }

    async fn is_valid(&self, _timeout: Duration) -> Result<bool, ConnectionError> {
        Ok(!self.probe.is_closed())
    }

    fn is_closed(&self) -> bool {
        self.probe.is_closed()
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.closed.store(true, Ordering::SeqCst);
        if self.shared.fail_close.load(Ordering::SeqCst) {
            return Err(ConnectionError::provider(MockError::CloseFailed(
                self.probe.serial,
            )));
        }
        Ok(())
    }
}
