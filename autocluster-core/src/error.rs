use std::fmt::{self, Display};

use thiserror::Error;

use crate::backend::BackendKind;
use crate::membership::JoinStep;
use crate::node::{NodeId, NodeSet};

#[derive(Debug, Error)]
pub enum AutoclusterError {
    #[error("Configuration error: {0}")]
    /// The run could not be set up from the provided configuration.
    Configuration(#[from] ConfigError),

    #[error("The {backend} backend failed to {op}: {source:#}")]
    /// The discovery backend failed to list or register nodes.
    Discovery {
        backend: BackendKind,
        op: DiscoveryOp,
        source: anyhow::Error,
    },

    #[error("Failed to read the current cluster members: {0:#}")]
    /// The membership store could not report its view of the cluster.
    Membership(anyhow::Error),

    #[error("None of the candidate nodes {candidates} are reachable.")]
    /// Join candidates existed but every one of them failed the liveness probe.
    NoReachablePeer { candidates: NodeSet },

    #[error("Failed to join the cluster via {peer} while trying to {step}: {source:#}")]
    /// A step of the stop/reset/join/start sequence failed.
    ///
    /// Steps already issued are not rolled back, so the local services may
    /// be left stopped.
    JoinExecution {
        peer: NodeId,
        step: JoinStep,
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No discovery backend has been configured.")]
    MissingBackend,

    #[error("Unknown discovery backend `{0}`.")]
    UnknownBackend(String),

    #[error("The {0} backend is not supported by this build.")]
    UnsupportedBackend(BackendKind),

    #[error("Failed to initialise the {backend} backend: {source:#}")]
    BackendInit {
        backend: BackendKind,
        source: anyhow::Error,
    },

    #[error("Invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
/// The backend operation that failed.
pub enum DiscoveryOp {
    NodeList,
    Register,
}

impl Display for DiscoveryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryOp::NodeList => f.write_str("list nodes"),
            DiscoveryOp::Register => f.write_str("register the node"),
        }
    }
}
