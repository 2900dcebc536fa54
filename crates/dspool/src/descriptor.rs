//! Provider descriptors.
//!
//! A descriptor is the serialisable description of a provider: the identity
//! of the factory that builds it plus a flat string attribute set. A naming
//! service stores descriptors and hands them back already resolved and
//! substituted; this module only interprets them.
//!
//! A pool wrapping another provider is described by a wrapper descriptor
//! that carries the pool settings and nests the wrapped provider's own
//! descriptor:
//!
//! ```text
//! provider = "pool"
//!   leak-timeout      = "60000"       (milliseconds, 0 = off)
//!   idle-timeout      = "200000"
//!   sweep-interval    = "30000"       (at least 1)
//!   capture-backtrace = "false"
//!   inner:
//!     provider = "postgres"
//!       url      = "postgres://db.internal/orders"
//!       username = "app"
//! ```
//!
//! Wrappers nest, so a pool can wrap another pool.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::config::{PoolConfig, timeout_from_millis, timeout_to_millis};
use crate::error::PoolError;

/// Identity under which the pool wrapper factory is registered.
pub const POOL_PROVIDER: &str = "pool";

/// Provider identity when attributes are given as a flat map.
pub const ATTR_DRIVER: &str = "driver";
/// Connection target.
pub const ATTR_URL: &str = "url";
/// User name.
pub const ATTR_USERNAME: &str = "username";
/// Password.
pub const ATTR_PASSWORD: &str = "password";
/// Leak timeout in milliseconds.
pub const ATTR_LEAK_TIMEOUT: &str = "leak-timeout";
/// Idle timeout in milliseconds.
pub const ATTR_IDLE_TIMEOUT: &str = "idle-timeout";
/// Sweep period in milliseconds.
pub const ATTR_SWEEP_INTERVAL: &str = "sweep-interval";
/// Whether leases record a backtrace, `true` or `false`.
pub const ATTR_CAPTURE_BACKTRACE: &str = "capture-backtrace";

/// An ordered set of string attributes.
#[derive(Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    /// Create an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute, replacing any previous value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert an attribute, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove an attribute.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Look up an attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up an attribute that must be present.
    pub fn require(&self, key: &'static str) -> Result<&str, PoolError> {
        self.get(key).ok_or(PoolError::MissingAttribute(key))
    }

    /// Parse an optional millisecond timeout; zero or negative disables.
    ///
    /// Returns `Ok(None)` both when the key is absent and when it disables
    /// the timeout; use [`Attributes::get`] to tell the two apart.
    pub fn timeout_millis(&self, key: &'static str) -> Result<Option<Duration>, PoolError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(timeout_from_millis)
                .map_err(|_| PoolError::InvalidAttribute {
                    name: key,
                    value: raw.to_string(),
                }),
        }
    }

    /// Parse an optional `true`/`false` flag.
    pub fn flag(&self, key: &'static str) -> Result<Option<bool>, PoolError> {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<bool>()
                    .map_err(|_| PoolError::InvalidAttribute {
                        name: key,
                        value: raw.to_string(),
                    })
            })
            .transpose()
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.0 {
            if key == ATTR_PASSWORD {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A provider identity plus the attributes needed to build it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Descriptor {
    /// Identity of the factory that builds the provider.
    pub provider: String,
    /// Factory-specific attributes.
    pub attributes: Attributes,
    /// The wrapped provider, for wrapper descriptors.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub inner: Option<Box<Descriptor>>,
}

impl Descriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(provider: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            provider: provider.into(),
            attributes,
            inner: None,
        }
    }

    /// Build a descriptor from a flat map whose `driver` entry names the
    /// provider.
    pub fn from_attributes(mut attributes: Attributes) -> Result<Self, PoolError> {
        let provider = attributes
            .remove(ATTR_DRIVER)
            .ok_or(PoolError::MissingAttribute(ATTR_DRIVER))?;
        Ok(Self::new(provider, attributes))
    }

    /// Describe a pool wrapping `inner` with the given leak timeout.
    #[must_use]
    pub fn wrap(inner: &Descriptor, leak_timeout: Option<Duration>) -> Self {
        let config = PoolConfig {
            leak_timeout,
            ..PoolConfig::default()
        };
        Self::wrap_with_config(inner, &config)
    }

    /// Describe a pool wrapping `inner` with a full configuration.
    #[must_use]
    pub fn wrap_with_config(inner: &Descriptor, config: &PoolConfig) -> Self {
        let attributes = Attributes::new()
            .with(
                ATTR_LEAK_TIMEOUT,
                timeout_to_millis(config.leak_timeout).to_string(),
            )
            .with(
                ATTR_IDLE_TIMEOUT,
                timeout_to_millis(config.idle_timeout).to_string(),
            )
            .with(
                ATTR_SWEEP_INTERVAL,
                timeout_to_millis(Some(config.sweep_interval)).to_string(),
            )
            .with(ATTR_CAPTURE_BACKTRACE, config.capture_backtrace.to_string());
        Self {
            provider: POOL_PROVIDER.to_string(),
            attributes,
            inner: Some(Box::new(inner.clone())),
        }
    }

    /// Whether this descriptor describes a pool wrapper.
    #[must_use]
    pub fn is_wrapper(&self) -> bool {
        self.provider == POOL_PROVIDER
    }

    /// Split a wrapper descriptor into the wrapped descriptor and the pool
    /// configuration it carries.
    ///
    /// Missing timeout attributes fall back to [`PoolConfig::default`];
    /// present ones override it, with `0` or a negative value disabling the
    /// timeout. Unknown attributes are ignored.
    pub fn unwrap_inner(&self) -> Result<(Descriptor, PoolConfig), PoolError> {
        if !self.is_wrapper() {
            return Err(PoolError::Config(format!(
                "descriptor for provider {:?} is not a pool wrapper",
                self.provider
            )));
        }

        let inner = self
            .inner
            .as_deref()
            .ok_or_else(|| PoolError::Config("pool descriptor has no inner provider".into()))?;

        let attrs = &self.attributes;
        let mut config = PoolConfig::default();
        if attrs.get(ATTR_LEAK_TIMEOUT).is_some() {
            config.leak_timeout = attrs.timeout_millis(ATTR_LEAK_TIMEOUT)?;
        }
        if attrs.get(ATTR_IDLE_TIMEOUT).is_some() {
            config.idle_timeout = attrs.timeout_millis(ATTR_IDLE_TIMEOUT)?;
        }
        if let Some(raw) = attrs.get(ATTR_SWEEP_INTERVAL) {
            config.sweep_interval = attrs.timeout_millis(ATTR_SWEEP_INTERVAL)?.ok_or_else(|| {
                PoolError::InvalidAttribute {
                    name: ATTR_SWEEP_INTERVAL,
                    value: raw.to_string(),
                }
            })?;
        }
        if let Some(enabled) = attrs.flag(ATTR_CAPTURE_BACKTRACE)? {
            config.capture_backtrace = enabled;
        }
        config.validate()?;

        Ok((inner.clone(), config))
    }
}

/// User name and password passed to a provider.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl Credentials {
    /// Credentials with both user name and password.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read optional `username`/`password` attributes.
    #[must_use]
    pub fn from_attributes(attributes: &Attributes) -> Self {
        Self {
            username: attributes.get(ATTR_USERNAME).map(str::to_string),
            password: attributes.get(ATTR_PASSWORD).map(str::to_string),
        }
    }

    /// Write the credentials into an attribute set.
    pub fn apply(&self, attributes: &mut Attributes) {
        if let Some(username) = &self.username {
            attributes.insert(ATTR_USERNAME, username.clone());
        }
        if let Some(password) = &self.password {
            attributes.insert(ATTR_PASSWORD, password.clone());
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inner() -> Descriptor {
        Descriptor::new(
            "mem",
            Attributes::new()
                .with(ATTR_URL, "mem://orders")
                .with(ATTR_USERNAME, "app")
                .with(ATTR_PASSWORD, "secret"),
        )
    }

    #[test]
    fn test_from_attributes_takes_driver() {
        let attrs = Attributes::new()
            .with(ATTR_DRIVER, "mem")
            .with(ATTR_URL, "mem://x");
        let desc = Descriptor::from_attributes(attrs).unwrap();
        assert_eq!(desc.provider, "mem");
        assert_eq!(desc.attributes.get(ATTR_URL), Some("mem://x"));
        assert_eq!(desc.attributes.get(ATTR_DRIVER), None);
    }

    #[test]
    fn test_from_attributes_requires_driver() {
        let err = Descriptor::from_attributes(Attributes::new()).unwrap_err();
        assert!(matches!(err, PoolError::MissingAttribute(ATTR_DRIVER)));
    }

    #[test]
    fn test_wrap_then_unwrap_restores_inner() {
        let wrapped = Descriptor::wrap(&inner(), Some(Duration::from_secs(60)));
        assert!(wrapped.is_wrapper());
        assert_eq!(wrapped.attributes.get(ATTR_LEAK_TIMEOUT), Some("60000"));
        assert_eq!(wrapped.attributes.get(ATTR_URL), None);

        let (restored, config) = wrapped.unwrap_inner().unwrap();
        assert_eq!(restored, inner());
        assert_eq!(config.leak_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.idle_timeout, PoolConfig::default().idle_timeout);
    }

    #[test]
    fn test_wrappers_nest() {
        let middle = Descriptor::wrap(&inner(), None);
        let outer = Descriptor::wrap(&middle, Some(Duration::from_secs(1)));

        let (unwrapped, config) = outer.unwrap_inner().unwrap();
        assert_eq!(unwrapped, middle);
        assert_eq!(config.leak_timeout, Some(Duration::from_secs(1)));

        let (innermost, config) = unwrapped.unwrap_inner().unwrap();
        assert_eq!(innermost, inner());
        assert_eq!(config.leak_timeout, None);
    }

    #[test]
    fn test_unwrap_defaults_when_timeouts_absent() {
        let wrapped = Descriptor {
            provider: POOL_PROVIDER.into(),
            attributes: Attributes::new().with("unrelated", "ignored"),
            inner: Some(Box::new(inner())),
        };
        let (restored, config) = wrapped.unwrap_inner().unwrap();
        assert_eq!(restored.provider, "mem");
        assert_eq!(config, PoolConfig::default());
    }

    fn wrapper_with(key: &str, value: &str) -> Descriptor {
        Descriptor {
            provider: POOL_PROVIDER.into(),
            attributes: Attributes::new().with(key, value),
            inner: Some(Box::new(inner())),
        }
    }

    #[test]
    fn test_negative_leak_timeout_disables() {
        let mut wrapped = wrapper_with(ATTR_LEAK_TIMEOUT, "-1");
        wrapped.attributes.insert(ATTR_IDLE_TIMEOUT, "0");
        let (_, config) = wrapped.unwrap_inner().unwrap();
        assert_eq!(config.leak_timeout, None);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let err = wrapper_with(ATTR_LEAK_TIMEOUT, "soon")
            .unwrap_inner()
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::InvalidAttribute { name: ATTR_LEAK_TIMEOUT, .. }
        ));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        assert!(wrapper_with(ATTR_SWEEP_INTERVAL, "0").unwrap_inner().is_err());
    }

    #[test]
    fn test_full_config_survives_wrap() {
        let config = PoolConfig::new()
            .leak_timeout(Duration::from_micros(400))
            .idle_timeout(Duration::from_secs(90))
            .sweep_interval(Duration::from_millis(5))
            .capture_backtrace(true);
        let wrapped = Descriptor::wrap_with_config(&inner(), &config);
        assert_eq!(wrapped.attributes.get(ATTR_CAPTURE_BACKTRACE), Some("true"));

        let (_, restored) = wrapped.unwrap_inner().unwrap();
        // Sub-millisecond timeouts round up instead of reading back as off.
        assert_eq!(restored.leak_timeout, Some(Duration::from_millis(1)));
        assert_eq!(restored.idle_timeout, config.idle_timeout);
        assert_eq!(restored.sweep_interval, config.sweep_interval);
        assert!(restored.capture_backtrace);

        // Describing the restored config gives back the same descriptor.
        assert_eq!(Descriptor::wrap_with_config(&inner(), &restored), wrapped);
    }

    #[test]
    fn test_invalid_backtrace_flag_rejected() {
        let err = wrapper_with(ATTR_CAPTURE_BACKTRACE, "sometimes")
            .unwrap_inner()
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::InvalidAttribute { name: ATTR_CAPTURE_BACKTRACE, .. }
        ));
        let (_, config) = wrapper_with(ATTR_CAPTURE_BACKTRACE, "false")
            .unwrap_inner()
            .unwrap();
        assert!(!config.capture_backtrace);
    }

    #[test]
    fn test_unwrap_rejects_plain_descriptor() {
        assert!(matches!(inner().unwrap_inner(), Err(PoolError::Config(_))));
    }

    #[test]
    fn test_unwrap_requires_inner_descriptor() {
        let wrapped = Descriptor::new(POOL_PROVIDER, Attributes::new());
        assert!(matches!(wrapped.unwrap_inner(), Err(PoolError::Config(_))));
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", inner().attributes);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));

        let creds = Credentials::new("app", "secret");
        assert!(!format!("{creds:?}").contains("secret"));
    }

    #[test]
    fn test_credentials_round_trip_through_attributes() {
        let mut attrs = Attributes::new();
        Credentials::new("app", "pw").apply(&mut attrs);
        let creds = Credentials::from_attributes(&attrs);
        assert_eq!(creds.username.as_deref(), Some("app"));
        assert_eq!(creds.password.as_deref(), Some("pw"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_descriptor_serializes_nested() {
        let json = serde_json::to_value(Descriptor::wrap(&inner(), None)).unwrap();
        assert_eq!(json["provider"], "pool");
        assert_eq!(json["attributes"]["leak-timeout"], "0");
        assert_eq!(json["inner"]["attributes"]["url"], "mem://orders");
        assert!(json["inner"].get("inner").is_none());
    }
}
