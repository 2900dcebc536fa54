//! Pool construction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PoolConfig;
use crate::descriptor::{ATTR_URL, Attributes, Credentials, Descriptor};
use crate::error::PoolError;
use crate::lease::LeakReport;
use crate::pool::{LeakListener, Pool};
use crate::provider::{Provider, ProviderFactory, ProviderRegistry};

/// Builder for creating a connection pool.
///
/// The provider is either given directly with
/// [`provider`](PoolBuilder::provider), or described by a driver identity,
/// target and credentials and resolved through a [`ProviderRegistry`] by
/// [`build_with`](PoolBuilder::build_with). Building never opens a
/// connection.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .driver("postgres")
///     .url("postgres://db.internal/orders")
///     .credentials("app", "secret")
///     .leak_timeout(Duration::from_secs(120))
///     .build_with(&registry)?;
/// ```
#[derive(Default)]
pub struct PoolBuilder {
    pool_config: PoolConfig,
    provider: Option<Arc<dyn Provider>>,
    driver: Option<String>,
    url: Option<String>,
    credentials: Credentials,
    on_leak: Option<LeakListener>,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a descriptor into a pool.
    ///
    /// A wrapper descriptor (see [`Descriptor::wrap`]) has its inner provider
    /// resolved first and its pool settings applied; any other descriptor is
    /// resolved as-is and wrapped with the default configuration.
    pub fn from_descriptor(
        descriptor: &Descriptor,
        registry: &ProviderRegistry,
    ) -> Result<Pool, PoolError> {
        let (inner, config) = if descriptor.is_wrapper() {
            descriptor.unwrap_inner()?
        } else {
            (descriptor.clone(), PoolConfig::default())
        };

        tracing::debug!(provider = %inner.provider, "building pool from descriptor");
        let provider = registry.resolve(&inner)?;
        Pool::new(provider, config)
    }

    /// Use an already constructed provider.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Identity of the provider to resolve in [`build_with`](Self::build_with).
    #[must_use]
    pub fn driver(mut self, identity: impl Into<String>) -> Self {
        self.driver = Some(identity.into());
        self
    }

    /// Connection target passed to the resolved provider.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Credentials passed to the resolved provider.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::new(username, password);
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the leak timeout. Zero disables leak detection.
    #[must_use]
    pub fn leak_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config = self.pool_config.leak_timeout(timeout);
        self
    }

    /// Set the idle timeout. Zero disables idle eviction.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config = self.pool_config.idle_timeout(timeout);
        self
    }

    /// Set the sweep period.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.pool_config = self.pool_config.sweep_interval(interval);
        self
    }

    /// Capture a backtrace on every acquire for leak reports.
    #[must_use]
    pub fn capture_backtrace(mut self, enabled: bool) -> Self {
        self.pool_config = self.pool_config.capture_backtrace(enabled);
        self
    }

    /// Call `listener` for every leaked lease the sweep reclaims.
    #[must_use]
    pub fn on_leak<F>(mut self, listener: F) -> Self
    where
        F: Fn(&LeakReport<'_>) + Send + Sync + 'static,
    {
        self.on_leak = Some(Arc::new(listener));
        self
    }

    /// The descriptor of the provider this builder would resolve.
    ///
    /// Fails if no driver identity was set.
    pub fn provider_descriptor(&self) -> Result<Descriptor, PoolError> {
        let driver = self
            .driver
            .clone()
            .ok_or_else(|| PoolError::Config("no driver identity configured".into()))?;

        let mut attributes = Attributes::new();
        if let Some(url) = &self.url {
            attributes.insert(ATTR_URL, url.clone());
        }
        self.credentials.apply(&mut attributes);
        Ok(Descriptor::new(driver, attributes))
    }

    /// Build the pool around the provider given with
    /// [`provider`](Self::provider).
    pub fn build(self) -> Result<Pool, PoolError> {
        let provider = self
            .provider
            .ok_or_else(|| PoolError::Config("no provider configured".into()))?;
        Pool::from_parts(provider, self.pool_config, self.on_leak)
    }

    /// Build the pool, resolving the driver through `registry` unless a
    /// provider was given directly.
    pub fn build_with(self, registry: &ProviderRegistry) -> Result<Pool, PoolError> {
        let provider = match self.provider {
            Some(provider) => provider,
            None => registry.resolve(&self.provider_descriptor()?)?,
        };
        Pool::from_parts(provider, self.pool_config, self.on_leak)
    }
}

impl fmt::Debug for PoolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("pool_config", &self.pool_config)
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}

/// Factory registered under [`POOL_PROVIDER`](crate::POOL_PROVIDER).
pub(crate) struct PoolFactory;

impl ProviderFactory for PoolFactory {
    fn create(
        &self,
        descriptor: &Descriptor,
        registry: &ProviderRegistry,
    ) -> Result<Arc<dyn Provider>, PoolError> {
        let pool = PoolBuilder::from_descriptor(descriptor, registry)?;
        Ok(Arc::new(pool))
    }
}
