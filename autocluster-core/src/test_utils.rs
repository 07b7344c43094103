use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{BackendSettings, DiscoveryBackend};
use crate::membership::{HostLifecycle, JoinStep, MembershipScope, MembershipStore};
use crate::node::{NodeId, NodeSet, NodeType};
use crate::probe::LivenessProbe;

#[derive(Clone)]
/// An in-memory discovery backend.
///
/// Clones share the same state so a test can keep a handle while the
/// orchestrator owns another.
pub struct MemoryBackend(Arc<MemoryBackendInner>);

struct MemoryBackendInner {
    local: NodeId,
    nodes: Mutex<NodeSet>,
    fail_node_list: Mutex<Option<String>>,
    fail_register: Mutex<Option<String>>,
    num_node_list_calls: AtomicUsize,
    num_register_calls: AtomicUsize,
}

impl MemoryBackend {
    /// Creates a backend for `local` which already lists `nodes`.
    pub fn new<N: Into<NodeId>>(
        local: impl Into<NodeId>,
        nodes: impl IntoIterator<Item = N>,
    ) -> Self {
        Self(Arc::new(MemoryBackendInner {
            local: local.into(),
            nodes: Mutex::new(nodes.into_iter().collect()),
            fail_node_list: Mutex::new(None),
            fail_register: Mutex::new(None),
            num_node_list_calls: AtomicUsize::new(0),
            num_register_calls: AtomicUsize::new(0),
        }))
    }

    /// Makes every `node_list` call fail with the given reason.
    pub fn fail_node_list(&self, reason: impl Into<String>) {
        *self.0.fail_node_list.lock() = Some(reason.into());
    }

    /// Makes every `register` call fail with the given reason.
    pub fn fail_register(&self, reason: impl Into<String>) {
        *self.0.fail_register.lock() = Some(reason.into());
    }

    pub fn nodes(&self) -> NodeSet {
        self.0.nodes.lock().clone()
    }

    pub fn num_node_list_calls(&self) -> usize {
        self.0.num_node_list_calls.load(Ordering::Relaxed)
    }

    pub fn num_register_calls(&self) -> usize {
        self.0.num_register_calls.load(Ordering::Relaxed)
    }

    /// A factory handing out this backend, for use with a `BackendRegistry`.
    pub fn factory(
        &self,
    ) -> impl Fn(&BackendSettings) -> anyhow::Result<Box<dyn DiscoveryBackend>>
           + Send
           + Sync
           + 'static {
        let backend = self.clone();
        move |_: &BackendSettings| -> anyhow::Result<Box<dyn DiscoveryBackend>> {
            Ok(Box::new(backend.clone()))
        }
    }
}

#[async_trait]
impl DiscoveryBackend for MemoryBackend {
    async fn node_list(&self) -> anyhow::Result<NodeSet> {
        self.0.num_node_list_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(reason) = self.0.fail_node_list.lock().as_ref() {
            return Err(anyhow!("{}", reason));
        }

        Ok(self.nodes())
    }

    async fn register(&self) -> anyhow::Result<()> {
        self.0.num_register_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(reason) = self.0.fail_register.lock().as_ref() {
            return Err(anyhow!("{}", reason));
        }

        self.0.nodes.lock().insert(self.0.local.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
/// A call made against a [MemoryMembershipStore].
pub enum StoreCall {
    CurrentMembers(MembershipScope),
    StopService,
    StopStore,
    ResetStore,
    Join(NodeId, NodeType),
    StartStore,
    StartService,
}

impl StoreCall {
    /// Whether the call is part of the join sequence rather than a read.
    pub fn is_join_step(&self) -> bool {
        !matches!(self, StoreCall::CurrentMembers(_))
    }
}

#[derive(Clone)]
/// An in-memory membership store which also acts as the host application.
///
/// Every call is recorded in order.
pub struct MemoryMembershipStore(Arc<MemoryMembershipStoreInner>);

struct MemoryMembershipStoreInner {
    local: NodeId,
    members: Mutex<NodeSet>,
    calls: Mutex<Vec<StoreCall>>,
    fail_on: Mutex<Option<JoinStep>>,
    fail_current_members: Mutex<bool>,
}

impl MemoryMembershipStore {
    /// Creates a store for `local` which has never joined anything.
    pub fn new(local: impl Into<NodeId>) -> Self {
        let local = local.into();
        Self::with_members(local.clone(), [local])
    }

    /// Creates a store for `local` which reports `members` as the cluster.
    pub fn with_members<N: Into<NodeId>>(
        local: impl Into<NodeId>,
        members: impl IntoIterator<Item = N>,
    ) -> Self {
        Self(Arc::new(MemoryMembershipStoreInner {
            local: local.into(),
            members: Mutex::new(members.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            fail_current_members: Mutex::new(false),
        }))
    }

    /// Makes the given join step fail.
    pub fn fail_on(&self, step: JoinStep) {
        *self.0.fail_on.lock() = Some(step);
    }

    /// Makes `current_members` fail.
    pub fn fail_current_members(&self) {
        *self.0.fail_current_members.lock() = true;
    }

    pub fn members(&self) -> NodeSet {
        self.0.members.lock().clone()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.0.calls.lock().clone()
    }

    /// The calls made as part of a join sequence, in order.
    pub fn join_steps(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(StoreCall::is_join_step)
            .collect()
    }

    fn record(&self, call: StoreCall, step: Option<JoinStep>) -> anyhow::Result<()> {
        self.0.calls.lock().push(call);

        match (step, *self.0.fail_on.lock()) {
            (Some(step), Some(failing)) if step == failing => {
                Err(anyhow!("Simulated failure while trying to {}", step))
            },
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn current_members(&self, scope: MembershipScope) -> anyhow::Result<NodeSet> {
        self.record(StoreCall::CurrentMembers(scope), None)?;

        if *self.0.fail_current_members.lock() {
            return Err(anyhow!("Membership store is unavailable"));
        }

        Ok(self.members())
    }

    async fn join(&self, peer: &NodeId, node_type: NodeType) -> anyhow::Result<()> {
        self.record(
            StoreCall::Join(peer.clone(), node_type),
            Some(JoinStep::JoinStore),
        )?;

        let mut members = self.0.members.lock();
        members.insert(self.0.local.clone());
        members.insert(peer.clone());
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.record(StoreCall::ResetStore, Some(JoinStep::ResetStore))?;

        let mut members = self.0.members.lock();
        *members = NodeSet::new();
        members.insert(self.0.local.clone());
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.record(StoreCall::StopStore, Some(JoinStep::StopStore))
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.record(StoreCall::StartStore, Some(JoinStep::StartStore))
    }
}

#[async_trait]
impl HostLifecycle for MemoryMembershipStore {
    async fn stop_service(&self) -> anyhow::Result<()> {
        self.record(StoreCall::StopService, Some(JoinStep::StopService))
    }

    async fn start_service(&self) -> anyhow::Result<()> {
        self.record(StoreCall::StartService, Some(JoinStep::StartService))
    }
}

#[derive(Clone, Default)]
/// A liveness probe with a fixed answer per node.
///
/// Nodes are unreachable unless marked otherwise.
pub struct StaticProbe(Arc<StaticProbeInner>);

#[derive(Default)]
struct StaticProbeInner {
    reachable: Mutex<HashSet<NodeId>>,
    all_reachable: Mutex<bool>,
    probed: Mutex<Vec<NodeId>>,
}

impl StaticProbe {
    /// A probe reporting every node as reachable.
    pub fn all_reachable() -> Self {
        let probe = Self::default();
        *probe.0.all_reachable.lock() = true;
        probe
    }

    /// A probe reporting only the given nodes as reachable.
    pub fn reachable<N: Into<NodeId>>(nodes: impl IntoIterator<Item = N>) -> Self {
        let probe = Self::default();
        probe
            .0
            .reachable
            .lock()
            .extend(nodes.into_iter().map(Into::into));
        probe
    }

    /// The nodes which have been probed, in order.
    pub fn probed(&self) -> Vec<NodeId> {
        self.0.probed.lock().clone()
    }
}

#[async_trait]
impl LivenessProbe for StaticProbe {
    async fn is_reachable(&self, node: &NodeId) -> bool {
        self.0.probed.lock().push(node.clone());
        *self.0.all_reachable.lock() || self.0.reachable.lock().contains(node)
    }
}
