use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::node::NodeId;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
/// Checks whether a remote node can currently be reached.
///
/// Implementations must always produce an answer in bounded time, errors
/// are reported as the node being unreachable.
pub trait LivenessProbe: Send + Sync {
    async fn is_reachable(&self, node: &NodeId) -> bool;
}

#[derive(Debug, Clone)]
/// A probe which considers a node alive if a TCP connection can be opened to
/// its host on a known port.
///
/// Identities which are themselves a socket address (`127.0.0.1:4369`) are
/// connected to directly, otherwise the host part of a `name@host` identity
/// is used together with the configured port.
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Set how long a single probe may take before the node is considered down.
    pub fn with_timeout(mut self, dur: Duration) -> Self {
        self.timeout = dur;
        self
    }

    async fn connect(&self, node: &NodeId) -> std::io::Result<TcpStream> {
        if let Ok(addr) = node.as_str().parse::<SocketAddr>() {
            return TcpStream::connect(addr).await;
        }

        TcpStream::connect((node.host(), self.port)).await
    }
}

#[async_trait]
impl LivenessProbe for TcpProbe {
    async fn is_reachable(&self, node: &NodeId) -> bool {
        match timeout(self.timeout, self.connect(node)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(node_id = %node, error = ?e, "Node is not reachable.");
                false
            },
            Err(_) => {
                debug!(node_id = %node, timeout = ?self.timeout, "Timed out probing node.");
                false
            },
        }
    }
}
