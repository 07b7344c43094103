use std::time::Duration;

use tracing::warn;

use crate::backend::{BackendKind, BackendSettings};
use crate::error::ConfigError;
use crate::failure::FailureMode;
use crate::node::{NodeId, NodeType};

pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(5);

static BACKEND_KEYS: &[&str] = &["AUTOCLUSTER_TYPE", "backend"];
static FAILURE_KEYS: &[&str] = &["AUTOCLUSTER_FAILURE", "autocluster_failure"];
static DELAY_KEYS: &[&str] = &["AUTOCLUSTER_DELAY", "startup_delay"];
static NODE_TYPE_KEYS: &[&str] = &["RABBITMQ_NODE_TYPE", "NODE_TYPE", "node_type"];
static BACKEND_ENV_PREFIXES: &[&str] =
    &["AUTOCLUSTER_", "CONSUL_", "ETCD_", "AWS_", "K8S_", "DNS_"];

#[derive(Debug, Clone)]
/// Everything a single startup run reads from configuration.
///
/// This is built once and handed to the orchestrator, nothing is read from
/// global state while the pipeline runs.
pub struct AutoclusterConfig {
    /// The identity of the local node.
    pub node_id: NodeId,

    /// The discovery backend to use.
    ///
    /// `None` means no backend has been configured, which fails the run.
    pub backend: Option<BackendKind>,

    /// Whether a clustering failure should abort startup.
    pub failure_mode: FailureMode,

    /// The upper bound of the randomised delay applied before the pipeline runs.
    ///
    /// A zero duration disables the delay.
    pub startup_delay: Duration,

    /// Passed to the membership store when joining.
    pub node_type: NodeType,

    /// Settings forwarded to the selected backend.
    pub backend_settings: BackendSettings,
}

impl AutoclusterConfig {
    /// Creates a new config for the given node using the defaults.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            backend: None,
            failure_mode: FailureMode::default(),
            startup_delay: DEFAULT_STARTUP_DELAY,
            node_type: NodeType::default(),
            backend_settings: BackendSettings::default(),
        }
    }

    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.backend = Some(kind);
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn with_startup_delay(mut self, max: Duration) -> Self {
        self.startup_delay = max;
        self
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_backend_setting(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.backend_settings.insert(key, value);
        self
    }

    /// Reads the config from the process environment.
    ///
    /// Only the autocluster keys and keys prefixed with a backend name
    /// (`CONSUL_`, `ETCD_`, `AWS_`, `K8S_`, `DNS_`) are read, the rest of the
    /// environment is never forwarded to the backend.
    pub fn from_env(node_id: impl Into<NodeId>) -> Result<Self, ConfigError> {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .filter(|(k, _)| is_autocluster_env_key(k));
        Self::from_env_map(node_id, vars)
    }

    /// Reads the config from a set of environment style key-value pairs.
    ///
    /// Keys which aren't understood by the core are kept as backend settings.
    /// When a setting is given under more than one spelling, the upper-case
    /// key wins regardless of order.
    pub fn from_env_map<K, V>(
        node_id: impl Into<NodeId>,
        vars: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, ConfigError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut cfg = Self::new(node_id);

        let mut backend = AliasedKey::new(BACKEND_KEYS);
        let mut failure_mode = AliasedKey::new(FAILURE_KEYS);
        let mut delay = AliasedKey::new(DELAY_KEYS);
        let mut node_type = AliasedKey::new(NODE_TYPE_KEYS);

        for (key, value) in vars {
            let key = key.into();
            let value = value.into();

            let unused = [&mut backend, &mut failure_mode, &mut delay, &mut node_type]
                .into_iter()
                .try_fold(value, |value, setting| setting.offer(&key, value));

            if let Some(value) = unused {
                cfg.backend_settings.insert(key, value);
            }
        }

        if let Some(value) = backend.into_value() {
            cfg.backend = parse_backend(&value)?;
        }
        if let Some(value) = failure_mode.into_value() {
            cfg.failure_mode = FailureMode::from_config(&value);
        }
        if let Some(value) = delay.into_value() {
            cfg.startup_delay = parse_delay(&value)?;
        }
        if let Some(value) = node_type.into_value() {
            cfg.node_type = parse_node_type(&value);
        }

        Ok(cfg)
    }
}

/// A setting which may be given under several keys.
///
/// Keys earlier in the list take precedence over later ones.
struct AliasedKey {
    keys: &'static [&'static str],
    value: Option<(usize, String)>,
}

impl AliasedKey {
    fn new(keys: &'static [&'static str]) -> Self {
        Self { keys, value: None }
    }

    /// Takes the value if `key` is one of this setting's keys, otherwise
    /// hands it back.
    fn offer(&mut self, key: &str, value: String) -> Option<String> {
        let rank = match self.keys.iter().position(|k| *k == key) {
            Some(rank) => rank,
            None => return Some(value),
        };

        let has_preferred = matches!(self.value, Some((existing, _)) if existing < rank);
        if !has_preferred {
            self.value = Some((rank, value));
        }

        None
    }

    fn into_value(self) -> Option<String> {
        self.value.map(|(_, value)| value)
    }
}

fn is_autocluster_env_key(key: &str) -> bool {
    let is_core_key = [BACKEND_KEYS, FAILURE_KEYS, DELAY_KEYS, NODE_TYPE_KEYS]
        .iter()
        .any(|keys| keys.contains(&key));

    is_core_key
        || BACKEND_ENV_PREFIXES
            .iter()
            .any(|prefix| key.starts_with(prefix))
}

fn parse_backend(value: &str) -> Result<Option<BackendKind>, ConfigError> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("unconfigured") {
        return Ok(None);
    }

    value.parse().map(Some)
}

fn parse_delay(value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidValue {
            key: DELAY_KEYS[0],
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_node_type(value: &str) -> NodeType {
    match value.trim().to_ascii_lowercase().as_str() {
        "disc" | "disk" => NodeType::Disc,
        "ram" => NodeType::Ram,
        _ => {
            warn!(value = %value, "Unknown node type, defaulting to `disc`.");
            NodeType::Disc
        },
    }
}
