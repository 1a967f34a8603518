//! Local port to remote relay forwarding.
//!
//! A [`TunnelBackend`] finds a running pod and opens a forward from a local
//! port to a port inside it. Three backends implement the same contract:
//!
//! - [`ProcessTunnel`] drives an external `kubectl port-forward` process
//! - [`NativeTunnel`] talks to the Kubernetes API directly through `kube`
//! - [`DirectTunnel`] performs no forwarding, for relays that are reachable
//!   as-is (in-cluster harnesses, local development, tests)
//!
//! Every open returns a [`TunnelHandle`] that owns whatever was acquired and
//! releases it exactly once.

mod direct;
mod native;
mod process;

pub use direct::DirectTunnel;
pub use native::NativeTunnel;
pub use process::{ProcessTunnel, parse_forwarding_line};

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use podcov_common::{RetryPolicy, RetryableError};

/// A pod (or, for [`DirectTunnel`], a host) the relay runs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId {
    pub namespace: String,
    pub name: String,
}

impl EndpointId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Which forwarding mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TunnelKind {
    /// `kubectl port-forward` child process.
    #[default]
    Process,
    /// Kubernetes API port-forward, no external binaries.
    Native,
    /// Connect to the relay directly.
    Direct,
}

impl fmt::Display for TunnelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelKind::Process => "process",
            TunnelKind::Native => "native",
            TunnelKind::Direct => "direct",
        };
        f.write_str(s)
    }
}

impl FromStr for TunnelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" | "kubectl" => Ok(TunnelKind::Process),
            "native" | "api" => Ok(TunnelKind::Native),
            "direct" => Ok(TunnelKind::Direct),
            other => Err(format!("unknown tunnel kind '{other}'")),
        }
    }
}

/// Tunnel establishment failure.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("no running pod matches '{target}' in namespace '{namespace}'")]
    EndpointNotFound { namespace: String, target: String },

    #[error("pod {endpoint} is not ready: {reason}")]
    EndpointNotReady { endpoint: String, reason: String },

    #[error("port-forward helper '{}' not found", .helper.display())]
    HelperMissing { helper: PathBuf },

    #[error("port-forward helper exited before becoming ready ({status}): {stderr}")]
    HelperExited { status: String, stderr: String },

    #[error("tunnel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kubernetes API error: {message}")]
    Api { message: String, retryable: bool },

    #[error("tunnel did not open within {0:?}")]
    Timeout(Duration),

    #[error("invalid tunnel configuration: {0}")]
    InvalidConfig(String),
}

impl RetryableError for TunnelError {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            TunnelError::HelperExited { .. } => true,
            TunnelError::Api { retryable, .. } => *retryable,
            TunnelError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::UnexpectedEof
            ),
            TunnelError::EndpointNotFound { .. }
            | TunnelError::EndpointNotReady { .. }
            | TunnelError::HelperMissing { .. }
            | TunnelError::Timeout(_)
            | TunnelError::InvalidConfig(_) => false,
        }
    }
}

/// Settings shared by all backends.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// `kubectl` binary used by [`ProcessTunnel`].
    pub kubectl: PathBuf,
    /// Retry policy for transient establishment failures.
    pub retry: RetryPolicy,
    /// How long a single helper start may take to report readiness.
    pub ready_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            kubectl: PathBuf::from("kubectl"),
            retry: RetryPolicy::default(),
            ready_timeout: Duration::from_secs(15),
        }
    }
}


/// Slot where background forwarding tasks report failures.
pub(crate) type ErrorSlot = Arc<Mutex<Option<TunnelError>>>;

/// An open forward to a remote relay.
pub struct TunnelHandle {
    address: SocketAddr,
    endpoint: EndpointId,
    tasks: Vec<JoinHandle<()>>,
    errors: ErrorSlot,
}

impl TunnelHandle {
    pub(crate) fn new(address: SocketAddr, endpoint: EndpointId) -> Self {
        Self {
            address,
            endpoint,
            tasks: Vec::new(),
            errors: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    pub(crate) fn error_slot(&self) -> ErrorSlot {
        self.errors.clone()
    }

    /// Local address to send relay requests to.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// First failure reported by background forwarding, if any.
    pub fn take_error(&self) -> Option<TunnelError> {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn is_closed(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Release the forward. Safe to call more than once.
    pub fn close(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!(endpoint = %self.endpoint, address = %self.address, "Tunnel closed");
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("address", &self.address)
            .field("endpoint", &self.endpoint)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

/// Pod discovery and port forwarding.
#[async_trait]
pub trait TunnelBackend: Send + Sync {
    fn kind(&self) -> TunnelKind;

    /// Find one running endpoint matching `label_selector`.
    async fn find_endpoint(&self, namespace: &str, label_selector: &str) -> Result<EndpointId, TunnelError>;

    /// Forward `local_port` (0 = ephemeral) to `remote_port` in `endpoint`.
    ///
    /// Resolves once the forward accepts connections.
    async fn open(
        &self,
        endpoint: &EndpointId,
        remote_port: u16,
        local_port: u16,
    ) -> Result<TunnelHandle, TunnelError>;
}

/// Open a tunnel, giving up after `timeout`.
///
/// Anything acquired by an abandoned open is released when its future is
/// dropped.
pub async fn open_with_timeout(
    backend: &dyn TunnelBackend,
    endpoint: &EndpointId,
    remote_port: u16,
    local_port: u16,
    timeout: Duration,
) -> Result<TunnelHandle, TunnelError> {
    match tokio::time::timeout(timeout, backend.open(endpoint, remote_port, local_port)).await {
        Ok(result) => result,
        Err(_) => Err(TunnelError::Timeout(timeout)),
    }
}

/// Construct the backend selected by `kind`.
pub fn backend_for(kind: TunnelKind, config: &TunnelConfig) -> Box<dyn TunnelBackend> {
    match kind {
        TunnelKind::Process => Box::new(ProcessTunnel::new(config.clone())),
        TunnelKind::Native => Box::new(NativeTunnel::new(config.retry.clone())),
        TunnelKind::Direct => Box::new(DirectTunnel::new(config.retry.clone())),
    }
}
