use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ConfigError;
use crate::node::NodeSet;

#[async_trait]
/// A service discovery backend the local node registers with and learns
/// about its peers from.
///
/// The orchestrator only ever talks to a backend through this trait, so every
/// implementation must behave the same way regardless of what sits behind it
/// (a cloud API, a key-value store, DNS, ...).
pub trait DiscoveryBackend: Send + Sync {
    /// Returns the nodes currently visible through the discovery service.
    ///
    /// This may or may not include the local node.
    async fn node_list(&self) -> anyhow::Result<NodeSet>;

    /// Registers the local node with the discovery service.
    ///
    /// This must be idempotent, registering a node which is already
    /// registered should not return an error.
    async fn register(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
/// The family of discovery service a backend talks to.
pub enum BackendKind {
    /// Cloud provider instance/tag lookup.
    Aws,
    /// Consul key-value registration with TTL health checks.
    Consul,
    /// etcd key-value registration with TTL.
    Etcd,
    /// DNS A-record resolution.
    Dns,
    /// Kubernetes endpoints lookup.
    K8s,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Aws => "aws",
            BackendKind::Consul => "consul",
            BackendKind::Etcd => "etcd",
            BackendKind::Dns => "dns",
            BackendKind::K8s => "k8s",
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(BackendKind::Aws),
            "consul" => Ok(BackendKind::Consul),
            "etcd" => Ok(BackendKind::Etcd),
            "dns" => Ok(BackendKind::Dns),
            "k8s" => Ok(BackendKind::K8s),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
/// Backend specific settings.
///
/// The core never interprets these, they're handed to the backend factory
/// as-is.
pub struct BackendSettings(BTreeMap<String, String>);

impl BackendSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parses the value of `key` if it is set.
    pub fn parse<T>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("Invalid value for `{}`: {}", key, e)),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BackendSettings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Builds a backend instance from its settings.
pub type BackendFactory = Arc<
    dyn Fn(&BackendSettings) -> anyhow::Result<Box<dyn DiscoveryBackend>> + Send + Sync,
>;

#[derive(Clone, Default)]
/// The lookup table used to pick the backend implementation for a run.
pub struct BackendRegistry {
    factories: HashMap<BackendKind, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the factory used to build backends of the given kind.
    ///
    /// Any existing factory for the kind is replaced.
    pub fn register<F>(&mut self, kind: BackendKind, factory: F)
    where
        F: Fn(&BackendSettings) -> anyhow::Result<Box<dyn DiscoveryBackend>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Registers the factory and returns the registry.
    pub fn with<F>(mut self, kind: BackendKind, factory: F) -> Self
    where
        F: Fn(&BackendSettings) -> anyhow::Result<Box<dyn DiscoveryBackend>>
            + Send
            + Sync
            + 'static,
    {
        self.register(kind, factory);
        self
    }

    #[inline]
    pub fn supports(&self, kind: BackendKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Builds the backend for the given kind.
    pub fn select(
        &self,
        kind: BackendKind,
        settings: &BackendSettings,
    ) -> Result<Box<dyn DiscoveryBackend>, ConfigError> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or(ConfigError::UnsupportedBackend(kind))?;

        factory(settings).map_err(|source| ConfigError::BackendInit {
            backend: kind,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopBackend;

    #[async_trait]
    impl DiscoveryBackend for NoopBackend {
        async fn node_list(&self) -> anyhow::Result<NodeSet> {
            Ok(NodeSet::new())
        }

        async fn register(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_backend_kind() {
        assert_eq!("consul".parse::<BackendKind>().unwrap(), BackendKind::Consul);
        assert_eq!(" AWS ".parse::<BackendKind>().unwrap(), BackendKind::Aws);
        assert!(matches!(
            "zookeeper".parse::<BackendKind>(),
            Err(ConfigError::UnknownBackend(name)) if name == "zookeeper"
        ));
    }

    #[test]
    fn test_registry_select() {
        let registry = BackendRegistry::new()
            .with(BackendKind::Dns, |_| Ok(Box::new(NoopBackend)))
            .with(BackendKind::Etcd, |settings| {
                settings
                    .get("ETCD_HOST")
                    .ok_or_else(|| anyhow::anyhow!("ETCD_HOST is required"))?;
                Ok(Box::new(NoopBackend))
            });

        let settings = BackendSettings::new();
        assert!(registry.select(BackendKind::Dns, &settings).is_ok());
        assert!(!registry.supports(BackendKind::Aws));
        assert!(matches!(
            registry.select(BackendKind::Aws, &settings),
            Err(ConfigError::UnsupportedBackend(BackendKind::Aws))
        ));
        assert!(matches!(
            registry.select(BackendKind::Etcd, &settings),
            Err(ConfigError::BackendInit { backend: BackendKind::Etcd, .. })
        ));
    }

    #[test]
    fn test_settings_parse() {
        let settings = [("ETCD_PORT", "2379"), ("ETCD_TTL", "soon")]
            .into_iter()
            .collect::<BackendSettings>();

        assert_eq!(settings.parse::<u16>("ETCD_PORT").unwrap(), Some(2379));
        assert_eq!(settings.parse::<u16>("MISSING").unwrap(), None);
        assert!(settings.parse::<u64>("ETCD_TTL").is_err());
        assert_eq!(settings.get_or("ETCD_SCHEME", "http"), "http");
    }
}
