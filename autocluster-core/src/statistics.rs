use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live counters describing what the autocluster pipeline has done.
pub struct AutoclusterStatistics(Arc<AutoclusterStatisticsInner>);

impl Deref for AutoclusterStatistics {
    type Target = AutoclusterStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct AutoclusterStatisticsInner {
    /// The number of times the pipeline has been run.
    pub(crate) num_runs: Counter,
    /// The number of times the node registered itself with the backend.
    pub(crate) num_registrations: Counter,
    /// The number of times the node joined a peer.
    pub(crate) num_joins: Counter,
    /// The number of candidate peers which failed the liveness probe.
    pub(crate) num_unreachable_peers: Counter,
    /// The number of runs which failed and aborted startup.
    pub(crate) num_failures: Counter,
    /// The number of runs which failed but were allowed to continue.
    pub(crate) num_ignored_failures: Counter,
}

impl AutoclusterStatisticsInner {
    /// The number of times the pipeline has been run.
    pub fn num_runs(&self) -> u64 {
        self.num_runs.load(Ordering::Relaxed)
    }

    /// The number of times the node registered itself with the backend.
    pub fn num_registrations(&self) -> u64 {
        self.num_registrations.load(Ordering::Relaxed)
    }

    /// The number of times the node joined a peer.
    pub fn num_joins(&self) -> u64 {
        self.num_joins.load(Ordering::Relaxed)
    }

    /// The number of candidate peers which failed the liveness probe.
    pub fn num_unreachable_peers(&self) -> u64 {
        self.num_unreachable_peers.load(Ordering::Relaxed)
    }

    /// The number of runs which failed and aborted startup.
    pub fn num_failures(&self) -> u64 {
        self.num_failures.load(Ordering::Relaxed)
    }

    /// The number of runs which failed but were allowed to continue.
    pub fn num_ignored_failures(&self) -> u64 {
        self.num_ignored_failures.load(Ordering::Relaxed)
    }
}
