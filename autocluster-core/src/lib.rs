//! # Autocluster Core
//! Decides at node startup whether the node should join an existing cluster,
//! and orchestrates the join using a pluggable service discovery backend.
//!
//! The pipeline runs once per boot:
//! 1. Sleep for a random startup delay so nodes booting together don't race.
//! 2. Select the discovery backend configured for this run.
//! 3. List the nodes known to discovery, registering the local node if it is absent.
//! 4. Compare the discovered nodes against the membership store's view of the cluster.
//! 5. Drop any join candidate which isn't reachable.
//! 6. Stop, reset and re-join the local membership store to the first reachable peer.
//!
//! Any failure along the way is resolved through the configured [FailureMode].
//!
//! ## Basic Example
//!
//! ```no_run
//! use autocluster_core::{
//!     AutoclusterBuilder,
//!     AutoclusterConfig,
//!     BackendKind,
//!     DiscoveryBackend,
//!     HostLifecycle,
//!     MembershipStore,
//!     NodeSet,
//!     TcpProbe,
//! };
//!
//! struct StaticDiscovery(NodeSet);
//!
//! #[async_trait::async_trait]
//! impl DiscoveryBackend for StaticDiscovery {
//!     async fn node_list(&self) -> anyhow::Result<NodeSet> {
//!         Ok(self.0.clone())
//!     }
//!
//!     async fn register(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! async fn start_node<S>(store: S) -> anyhow::Result<()>
//! where
//!     S: MembershipStore + HostLifecycle + Clone + 'static,
//! {
//!     let config = AutoclusterConfig::from_env("rabbit@node-1")?;
//!     let orchestrator =
//!         AutoclusterBuilder::new(config, store.clone(), store, TcpProbe::new(4369))
//!             .with_backend(BackendKind::Dns, |_| {
//!                 let nodes = ["rabbit@node-1", "rabbit@node-2"].into_iter().collect();
//!                 Ok(Box::new(StaticDiscovery(nodes)))
//!             })
//!             .build();
//!
//!     if !orchestrator.run().await.is_success() {
//!         anyhow::bail!("Unable to form a cluster.");
//!     }
//!
//!     Ok(())
//! }
//! ```

mod backend;
mod config;
mod delay;
mod error;
mod failure;
mod membership;
mod node;
mod orchestrator;
mod probe;
mod statistics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::sync::Arc;

pub use backend::{
    BackendFactory,
    BackendKind,
    BackendRegistry,
    BackendSettings,
    DiscoveryBackend,
};
pub use config::{AutoclusterConfig, DEFAULT_STARTUP_DELAY};
pub use delay::StartupDelay;
pub use error::{AutoclusterError, ConfigError, DiscoveryOp};
pub use failure::{resolve as resolve_failure, FailureMode, Outcome};
pub use membership::{HostLifecycle, JoinStep, MembershipScope, MembershipStore};
pub use node::{NodeId, NodeSet, NodeType};
pub use orchestrator::{
    decide_join,
    JoinDecision,
    Orchestrator,
    RegistrationOutcome,
    StartupReport,
};
pub use probe::{LivenessProbe, TcpProbe, DEFAULT_PROBE_TIMEOUT};
pub use statistics::AutoclusterStatistics;

/// Build an autocluster [Orchestrator] using provided settings.
pub struct AutoclusterBuilder {
    config: AutoclusterConfig,
    registry: BackendRegistry,
    store: Arc<dyn MembershipStore>,
    host: Arc<dyn HostLifecycle>,
    probe: Arc<dyn LivenessProbe>,
    delay_seed: Option<u64>,
}

impl AutoclusterBuilder {
    /// Create a new builder.
    ///
    /// No backends are registered, at least the backend named by the config
    /// must be added for a run to succeed.
    pub fn new(
        config: AutoclusterConfig,
        store: impl MembershipStore + 'static,
        host: impl HostLifecycle + 'static,
        probe: impl LivenessProbe + 'static,
    ) -> Self {
        Self {
            config,
            registry: BackendRegistry::default(),
            store: Arc::new(store),
            host: Arc::new(host),
            probe: Arc::new(probe),
            delay_seed: None,
        }
    }

    /// Register the factory used to build the backend of the given kind.
    pub fn with_backend<F>(mut self, kind: BackendKind, factory: F) -> Self
    where
        F: Fn(&BackendSettings) -> anyhow::Result<Box<dyn DiscoveryBackend>>
            + Send
            + Sync
            + 'static,
    {
        self.registry.register(kind, factory);
        self
    }

    /// Replace the backend lookup table with an existing one.
    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Seed the startup delay rather than seeding it from the OS.
    pub fn with_delay_seed(mut self, seed: u64) -> Self {
        self.delay_seed = Some(seed);
        self
    }

    pub fn build(self) -> Orchestrator {
        let max_delay = self.config.startup_delay;
        let delay = match self.delay_seed {
            Some(seed) => StartupDelay::with_seed(max_delay, seed),
            None => StartupDelay::new(max_delay),
        };

        Orchestrator::new(
            self.config,
            self.registry,
            self.store,
            self.host,
            self.probe,
            delay,
        )
    }
}
