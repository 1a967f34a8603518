//! `kubectl port-forward` backend.

use std::net::SocketAddr;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use podcov_common::run_with_retry;

use super::{EndpointId, TunnelBackend, TunnelConfig, TunnelError, TunnelHandle, TunnelKind};

/// Parse kubectl's readiness line, e.g.
/// `Forwarding from 127.0.0.1:54321 -> 9095`.
///
/// Returns the bound local address and the remote port.
pub fn parse_forwarding_line(line: &str) -> Option<(SocketAddr, u16)> {
    let rest = line.trim().strip_prefix("Forwarding from ")?;
    let (local, remote) = rest.split_once(" -> ")?;
    let local: SocketAddr = local.trim().parse().ok()?;
    let remote: u16 = remote.trim().parse().ok()?;
    Some((local, remote))
}

/// Map helper stderr to a typed failure.
fn classify_failure(endpoint: &EndpointId, status: String, stderr: String) -> TunnelError {
    let lower = stderr.to_lowercase();
    if lower.contains("not found") {
        TunnelError::EndpointNotFound {
            namespace: endpoint.namespace.clone(),
            target: endpoint.name.clone(),
        }
    } else if lower.contains("not running") || stderr.contains("ContainerCreating") || stderr.contains("Pending") {
        TunnelError::EndpointNotReady {
            endpoint: endpoint.to_string(),
            reason: stderr.trim().to_string(),
        }
    } else {
        TunnelError::HelperExited {
            status,
            stderr: stderr.trim().to_string(),
        }
    }
}

async fn read_all(stream: Option<impl AsyncRead + Unpin>) -> String {
    let mut out = String::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_string(&mut out).await;
    }
    out
}

/// Port forwarding through an external `kubectl` process.
pub struct ProcessTunnel {
    config: TunnelConfig,
}

impl ProcessTunnel {
    pub fn new(config: TunnelConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.kubectl);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> TunnelError {
        if e.kind() == std::io::ErrorKind::NotFound {
            TunnelError::HelperMissing {
                helper: self.config.kubectl.clone(),
            }
        } else {
            TunnelError::Io(e)
        }
    }

    async fn list_running(&self, namespace: &str, selector: &str) -> Result<EndpointId, TunnelError> {
        let output = self
            .command()
            .args(["get", "pods", "-n", namespace, "-l", selector])
            .arg("--field-selector=status.phase=Running")
            .args(["-o", "jsonpath={.items[*].metadata.name}"])
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let probe = EndpointId::new(namespace, selector);
            return Err(classify_failure(&probe, output.status.to_string(), stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut names: Vec<&str> = stdout.split_whitespace().collect();
        names.sort_unstable();
        match names.first() {
            Some(name) => Ok(EndpointId::new(namespace, *name)),
            None => Err(TunnelError::EndpointNotFound {
                namespace: namespace.to_string(),
                target: selector.to_string(),
            }),
        }
    }

    async fn start_forward(
        &self,
        endpoint: &EndpointId,
        remote_port: u16,
        local_port: u16,
    ) -> Result<TunnelHandle, TunnelError> {
        let mut child = self
            .command()
            .args(["port-forward", "-n", &endpoint.namespace])
            .arg(format!("pod/{}", endpoint.name))
            .arg(format!("{local_port}:{remote_port}"))
            .args(["--address", "127.0.0.1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let Some(stdout) = child.stdout.take() else {
            return Err(TunnelError::InvalidConfig("helper stdout not captured".into()));
        };
        let mut lines = BufReader::new(stdout).lines();

        let ready = tokio::time::timeout(self.config.ready_timeout, async {
            while let Some(line) = lines.next_line().await? {
                debug!(endpoint = %endpoint, line = %line, "port-forward output");
                if let Some((addr, _)) = parse_forwarding_line(&line) {
                    return Ok(Some(addr));
                }
            }
            Ok::<_, std::io::Error>(None)
        })
        .await;

        let address = match ready {
            Ok(Ok(Some(addr))) => addr,
            Ok(Ok(None)) => return Err(self.exited_before_ready(endpoint, child).await),
            Ok(Err(e)) => return Err(TunnelError::Io(e)),
            Err(_) => return Err(TunnelError::Timeout(self.config.ready_timeout)),
        };

        // kubectl keeps logging per connection; drain both pipes so it never blocks.
        let label = endpoint.to_string();
        let drain_stdout = tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(endpoint = %label, line = %line, "port-forward output");
            }
        });
        let handle = TunnelHandle::new(address, endpoint.clone()).with_task(drain_stdout);

        // The watcher owns the child: closing the handle aborts it and kill_on_drop
        // stops kubectl. An exit before that is recorded as a tunnel failure.
        let errors = handle.error_slot();
        let label = endpoint.to_string();
        let stderr = child.stderr.take();
        let watcher = tokio::spawn(async move {
            let stderr_tail = async {
                let mut tail = String::new();
                if let Some(stderr) = stderr {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        warn!(endpoint = %label, line = %line, "port-forward stderr");
                        tail = line;
                    }
                }
                tail
            };
            let (stderr, status) = tokio::join!(stderr_tail, child.wait());
            let status = match status {
                Ok(status) => status.to_string(),
                Err(e) => e.to_string(),
            };
            warn!(endpoint = %label, %status, "port-forward helper exited");
            let mut slot = errors.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_none() {
                *slot = Some(TunnelError::HelperExited {
                    status,
                    stderr: stderr.trim().to_string(),
                });
            }
        });

        info!(endpoint = %endpoint, %address, remote_port, "kubectl port-forward ready");
        Ok(handle.with_task(watcher))
    }

    async fn exited_before_ready(&self, endpoint: &EndpointId, mut child: Child) -> TunnelError {
        let stderr = read_all(child.stderr.take()).await;
        let status = match child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        };
        let err = classify_failure(endpoint, status, stderr);
        debug!(endpoint = %endpoint, error = %err, "port-forward helper exited before ready");
        err
    }
}

#[async_trait]
impl TunnelBackend for ProcessTunnel {
    fn kind(&self) -> TunnelKind {
        TunnelKind::Process
    }

    async fn find_endpoint(&self, namespace: &str, label_selector: &str) -> Result<EndpointId, TunnelError> {
        run_with_retry("discover", &self.config.retry, || self.list_running(namespace, label_selector)).await
    }

    async fn open(
        &self,
        endpoint: &EndpointId,
        remote_port: u16,
        local_port: u16,
    ) -> Result<TunnelHandle, TunnelError> {
        run_with_retry("tunnel", &self.config.retry, || {
            self.start_forward(endpoint, remote_port, local_port)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_and_ipv6_readiness() {
        let (addr, remote) = parse_forwarding_line("Forwarding from 127.0.0.1:54321 -> 9095").unwrap();
        assert_eq!(addr, "127.0.0.1:54321".parse::<SocketAddr>().unwrap());
        assert_eq!(remote, 9095);

        let (addr, _) = parse_forwarding_line("Forwarding from [::1]:54321 -> 9095\n").unwrap();
        assert!(addr.is_ipv6());

        assert!(parse_forwarding_line("Handling connection for 54321").is_none());
        assert!(parse_forwarding_line("Forwarding from nowhere -> 9095").is_none());
    }

    #[test]
    fn stderr_classification() {
        let ep = EndpointId::new("default", "demo-0");
        let err = classify_failure(
            &ep,
            "exit status: 1".into(),
            "Error from server (NotFound): pods \"demo-0\" not found".into(),
        );
        assert!(matches!(err, TunnelError::EndpointNotFound { .. }));

        let err = classify_failure(
            &ep,
            "exit status: 1".into(),
            "error: unable to forward port because pod is not running. Current status=Pending".into(),
        );
        assert!(matches!(err, TunnelError::EndpointNotReady { .. }));

        let err = classify_failure(&ep, "exit status: 1".into(), "error: lost connection to pod".into());
        assert!(matches!(err, TunnelError::HelperExited { .. }));
    }
}
