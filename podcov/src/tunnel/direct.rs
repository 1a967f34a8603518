//! Direct connection backend: the relay is already reachable.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use podcov_common::{RetryPolicy, run_with_retry};

use super::{EndpointId, TunnelBackend, TunnelError, TunnelHandle, TunnelKind};

/// No forwarding. The selector (or pod name) is used as the relay host.
pub struct DirectTunnel {
    retry: RetryPolicy,
}

impl DirectTunnel {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    async fn probe(&self, endpoint: &EndpointId, remote_port: u16) -> Result<SocketAddr, TunnelError> {
        let mut addrs = tokio::net::lookup_host((endpoint.name.as_str(), remote_port)).await?;
        let addr = addrs.next().ok_or_else(|| TunnelError::EndpointNotFound {
            namespace: endpoint.namespace.clone(),
            target: endpoint.name.clone(),
        })?;
        TcpStream::connect(addr).await?;
        debug!(endpoint = %endpoint, %addr, "relay reachable directly");
        Ok(addr)
    }
}

#[async_trait]
impl TunnelBackend for DirectTunnel {
    fn kind(&self) -> TunnelKind {
        TunnelKind::Direct
    }

    async fn find_endpoint(&self, namespace: &str, label_selector: &str) -> Result<EndpointId, TunnelError> {
        if label_selector.trim().is_empty() {
            return Err(TunnelError::InvalidConfig(
                "direct tunnels need a host in place of the selector".into(),
            ));
        }
        Ok(EndpointId::new(namespace, label_selector.trim()))
    }

    async fn open(
        &self,
        endpoint: &EndpointId,
        remote_port: u16,
        local_port: u16,
    ) -> Result<TunnelHandle, TunnelError> {
        if local_port != 0 && local_port != remote_port {
            warn!(local_port, remote_port, "direct tunnel ignores the local port");
        }
        let addr = run_with_retry("tunnel", &self.retry, || self.probe(endpoint, remote_port)).await?;
        Ok(TunnelHandle::new(addr, endpoint.clone()))
    }
}
