//! Kubernetes API port-forward backend.
//!
//! No external binaries: discovery and forwarding go through the API server
//! with `kube`. Each accepted local connection opens its own port-forward
//! stream, which the API server tears down once the relay closes its side.

use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use podcov_common::{RetryPolicy, run_with_retry};

use super::{EndpointId, ErrorSlot, TunnelBackend, TunnelError, TunnelHandle, TunnelKind};

impl TunnelError {
    fn from_kube(err: kube::Error) -> Self {
        let retryable = match &err {
            kube::Error::Api(response) => response.code >= 500 || response.code == 429,
            kube::Error::InferConfig(_) | kube::Error::Auth(_) => false,
            _ => true,
        };
        TunnelError::Api {
            message: err.to_string(),
            retryable,
        }
    }
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// Port forwarding through the Kubernetes API.
pub struct NativeTunnel {
    client: OnceCell<Client>,
    retry: RetryPolicy,
}

impl NativeTunnel {
    /// Client configuration is inferred (in-cluster or kubeconfig) on first use.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            client: OnceCell::new(),
            retry,
        }
    }

    async fn pods(&self, namespace: &str) -> Result<Api<Pod>, TunnelError> {
        let client = self
            .client
            .get_or_try_init(|| async { Client::try_default().await.map_err(TunnelError::from_kube) })
            .await?;
        Ok(Api::namespaced(client.clone(), namespace))
    }

    async fn list_running(&self, namespace: &str, selector: &str) -> Result<EndpointId, TunnelError> {
        let pods = self.pods(namespace).await?;
        let list = pods
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(TunnelError::from_kube)?;

        let mut running: Vec<String> = list
            .items
            .iter()
            .filter(|pod| pod_phase(pod) == Some("Running"))
            .filter_map(|pod| pod.metadata.name.clone())
            .collect();
        running.sort();

        running
            .into_iter()
            .next()
            .map(|name| EndpointId::new(namespace, name))
            .ok_or_else(|| TunnelError::EndpointNotFound {
                namespace: namespace.to_string(),
                target: selector.to_string(),
            })
    }

    async fn check_running(&self, pods: &Api<Pod>, endpoint: &EndpointId) -> Result<(), TunnelError> {
        let pod = match pods.get(&endpoint.name).await {
            Ok(pod) => pod,
            Err(kube::Error::Api(response)) if response.code == 404 => {
                return Err(TunnelError::EndpointNotFound {
                    namespace: endpoint.namespace.clone(),
                    target: endpoint.name.clone(),
                });
            }
            Err(e) => return Err(TunnelError::from_kube(e)),
        };
        match pod_phase(&pod) {
            Some("Running") => Ok(()),
            other => Err(TunnelError::EndpointNotReady {
                endpoint: endpoint.to_string(),
                reason: format!("phase is {}", other.unwrap_or("unknown")),
            }),
        }
    }

    async fn establish(
        &self,
        endpoint: &EndpointId,
        remote_port: u16,
        local_port: u16,
    ) -> Result<TunnelHandle, TunnelError> {
        let pods = self.pods(&endpoint.namespace).await?;
        self.check_running(&pods, endpoint).await?;

        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, local_port))).await?;
        let address = listener.local_addr()?;

        let handle = TunnelHandle::new(address, endpoint.clone());
        let errors = handle.error_slot();
        let pod_name = endpoint.name.clone();
        let task = tokio::spawn(accept_loop(listener, pods, pod_name, remote_port, errors));

        info!(endpoint = %endpoint, %address, remote_port, "native port-forward ready");
        Ok(handle.with_task(task))
    }
}

async fn accept_loop(listener: TcpListener, pods: Api<Pod>, pod_name: String, remote_port: u16, errors: ErrorSlot) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "port-forward listener failed");
                record_error(&errors, TunnelError::Io(e));
                return;
            }
        };
        debug!(%peer, pod = %pod_name, "forwarding connection");
        let pods = pods.clone();
        let pod_name = pod_name.clone();
        let errors = errors.clone();
        tokio::spawn(async move {
            if let Err(err) = forward_connection(socket, &pods, &pod_name, remote_port).await {
                warn!(pod = %pod_name, error = %err, "port-forward connection failed");
                record_error(&errors, err);
            }
        });
    }
}

fn record_error(slot: &ErrorSlot, err: TunnelError) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.is_none() {
        *guard = Some(err);
    }
}

async fn forward_connection(
    mut local: TcpStream,
    pods: &Api<Pod>,
    pod_name: &str,
    remote_port: u16,
) -> Result<(), TunnelError> {
    let mut forwarder = pods
        .portforward(pod_name, &[remote_port])
        .await
        .map_err(TunnelError::from_kube)?;
    let upstream = forwarder.take_stream(remote_port).ok_or_else(|| TunnelError::Api {
        message: format!("no stream for port {remote_port}"),
        retryable: true,
    })?;

    let (mut local_read, mut local_write) = local.split();
    let (mut up_read, mut up_write) = tokio::io::split(upstream);

    let to_pod = async {
        let result = tokio::io::copy(&mut local_read, &mut up_write).await;
        let _ = up_write.shutdown().await;
        result
    };
    let (sent, received) = tokio::join!(to_pod, copy_counting(&mut up_read, &mut local_write));

    if let Err(e) = sent {
        debug!(pod = %pod_name, error = %e, "local side closed early");
    }
    match received {
        Ok(bytes) => debug!(pod = %pod_name, bytes, "connection relayed"),
        // The API server resets the stream right after the relay closes it.
        Err((e, bytes)) if bytes > 0 => {
            debug!(pod = %pod_name, bytes, error = %e, "stream reset after response (expected teardown)")
        }
        Err((e, _)) => return Err(TunnelError::Io(e)),
    }

    drop(up_read);
    drop(up_write);
    if let Err(e) = forwarder.join().await {
        debug!(pod = %pod_name, error = %e, "port-forward teardown reported an error");
    }
    Ok(())
}

/// Copy until EOF, reporting how many bytes made it through even on error.
async fn copy_counting<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, (std::io::Error, u64)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 16 * 1024];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => return Err((e, total)),
        };
        writer.write_all(&buf[..n]).await.map_err(|e| (e, total))?;
        total += n as u64;
    }
    let _ = writer.shutdown().await;
    Ok(total)
}

#[async_trait]
impl TunnelBackend for NativeTunnel {
    fn kind(&self) -> TunnelKind {
        TunnelKind::Native
    }

    async fn find_endpoint(&self, namespace: &str, label_selector: &str) -> Result<EndpointId, TunnelError> {
        run_with_retry("discover", &self.retry, || self.list_running(namespace, label_selector)).await
    }

    async fn open(
        &self,
        endpoint: &EndpointId,
        remote_port: u16,
        local_port: u16,
    ) -> Result<TunnelHandle, TunnelError> {
        run_with_retry("tunnel", &self.retry, || self.establish(endpoint, remote_port, local_port)).await
    }
}
