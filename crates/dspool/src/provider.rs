//! Connection providers and their resolution from descriptors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::builder::PoolFactory;
use crate::connection::Connection;
use crate::descriptor::{Descriptor, POOL_PROVIDER};
use crate::error::{ConnectionError, PoolError};

/// A source of new connections.
///
/// The pool treats providers as opaque factories: it never inspects the
/// connections they return, only forwards calls to them and closes them.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Open a new connection.
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError>;

    /// The descriptor that rebuilds this provider, if it has one.
    fn descriptor(&self) -> Option<Descriptor> {
        None
    }
}

#[async_trait]
impl<T: Provider + ?Sized> Provider for Arc<T> {
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        (**self).connect().await
    }

    fn descriptor(&self) -> Option<Descriptor> {
        (**self).descriptor()
    }
}

/// Builds providers from descriptors.
///
/// The registry is passed in so that factories describing a wrapper can
/// resolve the provider they wrap.
pub trait ProviderFactory: Send + Sync + 'static {
    /// Build a provider from `descriptor`.
    fn create(
        &self,
        descriptor: &Descriptor,
        registry: &ProviderRegistry,
    ) -> Result<Arc<dyn Provider>, PoolError>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&Descriptor) -> Result<Arc<dyn Provider>, PoolError> + Send + Sync + 'static,
{
    fn create(
        &self,
        descriptor: &Descriptor,
        _registry: &ProviderRegistry,
    ) -> Result<Arc<dyn Provider>, PoolError> {
        self(descriptor)
    }
}

/// Maps provider identities to factories.
///
/// A new registry already knows how to build pools (identity
/// [`POOL_PROVIDER`]), so wrapped descriptors resolve like any other.
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Create a registry containing only the pool factory.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(POOL_PROVIDER, PoolFactory);
        registry
    }

    /// Register a factory, replacing any previous one with the same identity.
    pub fn register<F>(&mut self, identity: impl Into<String>, factory: F) -> &mut Self
    where
        F: ProviderFactory,
    {
        let identity = identity.into();
        tracing::debug!(identity = %identity, "registering provider factory");
        self.factories.insert(identity, Arc::new(factory));
        self
    }

    /// Whether a factory is registered for `identity`.
    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.factories.contains_key(identity)
    }

    /// Build the provider described by `descriptor`.
    pub fn resolve(&self, descriptor: &Descriptor) -> Result<Arc<dyn Provider>, PoolError> {
        let factory = self
            .factories
            .get(&descriptor.provider)
            .ok_or_else(|| PoolError::UnknownProvider(descriptor.provider.clone()))?;
        tracing::trace!(provider = %descriptor.provider, "resolving provider");
        factory.create(descriptor, self)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut identities: Vec<_> = self.factories.keys().collect();
        identities.sort();
        f.debug_struct("ProviderRegistry")
            .field("identities", &identities)
            .finish()
    }
}
