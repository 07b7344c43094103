use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendKind, BackendRegistry, DiscoveryBackend};
use crate::config::AutoclusterConfig;
use crate::delay::StartupDelay;
use crate::error::{AutoclusterError, ConfigError, DiscoveryOp};
use crate::failure::{self, Outcome};
use crate::membership::{HostLifecycle, JoinStep, MembershipScope, MembershipStore};
use crate::node::{NodeId, NodeSet};
use crate::probe::LivenessProbe;
use crate::statistics::AutoclusterStatistics;

#[derive(Debug, Clone, Eq, PartialEq)]
/// How the local node ended up registered with the discovery backend.
pub enum RegistrationOutcome {
    /// The backend already listed the node, no registration was needed.
    AlreadyMember,
    /// The node was registered.
    Registered,
    /// The backend rejected the registration.
    RegistrationFailed(String),
}

#[derive(Debug, Clone, Eq, PartialEq)]
/// What the node should do with respect to joining a cluster.
pub enum JoinDecision {
    /// Discovery knows of no other node, this node seeds the cluster.
    NoOtherNodes,
    /// The membership store knows only of the local node, so the other
    /// discovered nodes are the join candidates.
    SingleKnownNode(NodeSet),
    /// The membership store already has the local node as part of a
    /// multi-node cluster.
    AlreadyClustered,
    /// The membership store knows of a cluster the local node isn't part of,
    /// its members are the join candidates.
    NeedsJoin(NodeSet),
}

impl JoinDecision {
    /// The nodes which may be joined, if a join is required at all.
    pub fn candidates(&self) -> Option<&NodeSet> {
        match self {
            JoinDecision::SingleKnownNode(nodes) | JoinDecision::NeedsJoin(nodes) => {
                Some(nodes)
            },
            JoinDecision::NoOtherNodes | JoinDecision::AlreadyClustered => None,
        }
    }
}

/// Decides whether the local node needs to join a cluster.
///
/// `discovered` is what the discovery backend reported and `members` is the
/// membership store's own view of the cluster. Once the store knows of more
/// than the local node, its view is trusted over discovery.
pub fn decide_join(
    local: &NodeId,
    discovered: &NodeSet,
    members: &NodeSet,
) -> JoinDecision {
    let others = discovered.without(local);
    if others.is_empty() {
        return JoinDecision::NoOtherNodes;
    }

    // An empty view is treated the same as the store only knowing itself.
    if members.len() <= 1 {
        return JoinDecision::SingleKnownNode(others);
    }

    if members.contains(local) {
        JoinDecision::AlreadyClustered
    } else {
        JoinDecision::NeedsJoin(members.clone())
    }
}

#[derive(Debug)]
/// A record of a single run of the pipeline.
pub struct StartupReport {
    pub node_id: NodeId,
    pub outcome: Outcome,
    /// `None` if the run never got as far as the backend.
    pub registration: Option<RegistrationOutcome>,
    pub decision: Option<JoinDecision>,
    /// The peer the node joined, if it joined one.
    pub joined: Option<NodeId>,
    /// The error which failed the run, even if the failure mode chose to ignore it.
    pub error: Option<AutoclusterError>,
}

impl StartupReport {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            outcome: Outcome::Success,
            registration: None,
            decision: None,
            joined: None,
            error: None,
        }
    }
}

/// Sequences registration, membership comparison and joining at node startup.
///
/// The orchestrator is designed to run once per process at boot.
pub struct Orchestrator {
    config: AutoclusterConfig,
    registry: BackendRegistry,
    store: Arc<dyn MembershipStore>,
    host: Arc<dyn HostLifecycle>,
    probe: Arc<dyn LivenessProbe>,
    delay: StartupDelay,
    statistics: AutoclusterStatistics,
}

impl Orchestrator {
    pub(crate) fn new(
        config: AutoclusterConfig,
        registry: BackendRegistry,
        store: Arc<dyn MembershipStore>,
        host: Arc<dyn HostLifecycle>,
        probe: Arc<dyn LivenessProbe>,
        delay: StartupDelay,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            host,
            probe,
            delay,
            statistics: AutoclusterStatistics::default(),
        }
    }

    #[inline]
    /// Gets the live pipeline statistics.
    pub fn statistics(&self) -> AutoclusterStatistics {
        self.statistics.clone()
    }

    #[inline]
    pub fn config(&self) -> &AutoclusterConfig {
        &self.config
    }

    /// Runs the pipeline, returning whether startup should carry on.
    pub async fn run(&self) -> Outcome {
        self.run_with_report().await.outcome
    }

    /// Runs the pipeline, returning a record of every decision made.
    pub async fn run_with_report(&self) -> StartupReport {
        self.statistics.num_runs.fetch_add(1, Ordering::Relaxed);

        let node_id = self.config.node_id.clone();
        let mut report = StartupReport::new(node_id.clone());

        self.delay.wait().await;

        let result = match self.select_backend() {
            Ok((kind, backend)) => {
                info!(
                    node_id = %node_id,
                    backend = %kind,
                    failure_mode = %self.config.failure_mode,
                    "Starting autocluster."
                );

                self.discover_and_join(kind, backend.as_ref(), &mut report)
                    .await
            },
            Err(e) => {
                error!(node_id = %node_id, error = %e, "Unable to select a discovery backend.");
                Err(e.into())
            },
        };

        match result {
            Ok(()) => {
                report.outcome = Outcome::Success;
            },
            Err(e) => {
                error!(node_id = %node_id, error = %e, "Autocluster failed.");
                report.outcome = failure::resolve(&self.config.failure_mode);
                let counter = if report.outcome.is_success() {
                    &self.statistics.num_ignored_failures
                } else {
                    &self.statistics.num_failures
                };
                counter.fetch_add(1, Ordering::Relaxed);
                report.error = Some(e);
            },
        }

        report
    }

    fn select_backend(
        &self,
    ) -> Result<(BackendKind, Box<dyn DiscoveryBackend>), ConfigError> {
        let kind = self.config.backend.ok_or(ConfigError::MissingBackend)?;
        let backend = self.registry.select(kind, &self.config.backend_settings)?;
        Ok((kind, backend))
    }

    async fn discover_and_join(
        &self,
        kind: BackendKind,
        backend: &dyn DiscoveryBackend,
        report: &mut StartupReport,
    ) -> Result<(), AutoclusterError> {
        let discovered = self.register(kind, backend, report).await?;

        let members = self
            .store
            .current_members(MembershipScope::All)
            .await
            .map_err(AutoclusterError::Membership)?;

        let decision = decide_join(&self.config.node_id, &discovered, &members);
        report.decision = Some(decision.clone());

        let candidates = match decision {
            JoinDecision::NoOtherNodes => {
                info!(
                    node_id = %self.config.node_id,
                    "No other nodes have been discovered, starting as the first node of the cluster."
                );
                return Ok(());
            },
            JoinDecision::AlreadyClustered => {
                info!(
                    node_id = %self.config.node_id,
                    members = %members,
                    "Node is already part of the cluster."
                );
                return Ok(());
            },
            JoinDecision::SingleKnownNode(candidates) | JoinDecision::NeedsJoin(candidates) => {
                candidates
            },
        };

        let reachable = self.filter_reachable(&candidates).await;
        let peer = reachable
            .first()
            .cloned()
            .ok_or(AutoclusterError::NoReachablePeer { candidates })?;

        self.join_cluster(&peer).await?;
        self.statistics.num_joins.fetch_add(1, Ordering::Relaxed);
        report.joined = Some(peer);

        Ok(())
    }

    /// Makes sure the local node is known to the backend, returning the nodes
    /// the backend listed before any registration.
    async fn register(
        &self,
        kind: BackendKind,
        backend: &dyn DiscoveryBackend,
        report: &mut StartupReport,
    ) -> Result<NodeSet, AutoclusterError> {
        let discovered = backend.node_list().await.map_err(|source| {
            AutoclusterError::Discovery {
                backend: kind,
                op: DiscoveryOp::NodeList,
                source,
            }
        })?;

        debug!(
            node_id = %self.config.node_id,
            backend = %kind,
            discovered = %discovered,
            "Discovered nodes."
        );

        if discovered.contains(&self.config.node_id) {
            debug!(node_id = %self.config.node_id, "Node is already registered.");
            report.registration = Some(RegistrationOutcome::AlreadyMember);
            return Ok(discovered);
        }

        if let Err(source) = backend.register().await {
            report.registration =
                Some(RegistrationOutcome::RegistrationFailed(format!("{:#}", source)));
            return Err(AutoclusterError::Discovery {
                backend: kind,
                op: DiscoveryOp::Register,
                source,
            });
        }

        info!(node_id = %self.config.node_id, backend = %kind, "Registered node.");
        self.statistics
            .num_registrations
            .fetch_add(1, Ordering::Relaxed);
        report.registration = Some(RegistrationOutcome::Registered);

        // The backend isn't queried again, it may not reflect the registration yet.
        Ok(discovered)
    }

    /// Drops every candidate the liveness probe can't reach.
    async fn filter_reachable(&self, candidates: &NodeSet) -> NodeSet {
        let probes = candidates
            .iter()
            .map(|node| async move { (node, self.probe.is_reachable(node).await) });
        let results = future::join_all(probes).await;

        let mut reachable = NodeSet::new();
        for (node, is_reachable) in results {
            if is_reachable {
                reachable.insert(node.clone());
            } else {
                warn!(
                    node_id = %self.config.node_id,
                    target_node_id = %node,
                    "Candidate node is not reachable, skipping."
                );
                self.statistics
                    .num_unreachable_peers
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        reachable
    }

    /// Joins the local membership store to the cluster of `peer`.
    ///
    /// Steps are issued in order and the first failure aborts the remaining
    /// ones. Nothing is rolled back, so a failure part way through leaves
    /// the local services stopped.
    async fn join_cluster(&self, peer: &NodeId) -> Result<(), AutoclusterError> {
        info!(
            node_id = %self.config.node_id,
            target_node_id = %peer,
            node_type = %self.config.node_type,
            "Joining cluster."
        );

        for step in JoinStep::ALL {
            debug!(node_id = %self.config.node_id, step = %step, "Issuing join step.");

            let result = match step {
                JoinStep::StopService => self.host.stop_service().await,
                JoinStep::StopStore => self.store.stop().await,
                JoinStep::ResetStore => self.store.reset().await,
                JoinStep::JoinStore => self.store.join(peer, self.config.node_type).await,
                JoinStep::StartStore => self.store.start().await,
                JoinStep::StartService => self.host.start_service().await,
            };

            result.map_err(|source| AutoclusterError::JoinExecution {
                peer: peer.clone(),
                step,
                source,
            })?;
        }

        info!(node_id = %self.config.node_id, target_node_id = %peer, "Joined cluster.");

        Ok(())
    }
}
