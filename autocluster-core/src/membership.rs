use std::fmt::{self, Display};

use async_trait::async_trait;

use crate::node::{NodeId, NodeSet, NodeType};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
/// Which view of the cluster the membership store should report.
pub enum MembershipScope {
    /// Every node the store considers part of the cluster.
    All,
    /// Only the members which are currently running.
    Running,
}

#[async_trait]
/// The distributed store holding the authoritative cluster membership once
/// nodes have actually joined.
pub trait MembershipStore: Send + Sync {
    /// The members of the cluster as the local store currently sees it.
    ///
    /// A store which has never joined anything reports only the local node.
    async fn current_members(&self, scope: MembershipScope) -> anyhow::Result<NodeSet>;

    /// Attaches the local store to the cluster `peer` belongs to.
    async fn join(&self, peer: &NodeId, node_type: NodeType) -> anyhow::Result<()>;

    /// Wipes the local membership state.
    async fn reset(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn start(&self) -> anyhow::Result<()>;
}

#[async_trait]
/// The host application running on top of the membership store.
///
/// It must be stopped while the store is reset and re-joined.
pub trait HostLifecycle: Send + Sync {
    async fn stop_service(&self) -> anyhow::Result<()>;

    async fn start_service(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
/// The individual steps of joining a peer, in the order they are issued.
pub enum JoinStep {
    StopService,
    StopStore,
    ResetStore,
    JoinStore,
    StartStore,
    StartService,
}

impl JoinStep {
    pub const ALL: [JoinStep; 6] = [
        JoinStep::StopService,
        JoinStep::StopStore,
        JoinStep::ResetStore,
        JoinStep::JoinStore,
        JoinStep::StartStore,
        JoinStep::StartService,
    ];
}

impl Display for JoinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            JoinStep::StopService => "stop the local service",
            JoinStep::StopStore => "stop the membership store",
            JoinStep::ResetStore => "reset the membership store",
            JoinStep::JoinStore => "join the membership store to the peer",
            JoinStep::StartStore => "start the membership store",
            JoinStep::StartService => "start the local service",
        };
        f.write_str(msg)
    }
}
