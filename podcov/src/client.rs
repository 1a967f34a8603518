//! Client pipeline: tunnel, fetch, decode, persist, report.
//!
//! Every public operation returns a [`CollectionError`] tagged with the phase
//! that failed and the endpoint involved. Collection is bounded by the
//! configured timeout; persisted blobs are written through a temporary file
//! and renamed into place, so a call that fails or times out leaves nothing
//! behind.

use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use podcov_common::{
    ExclusionPolicy, PatternError, RetryableError, Snapshot, TransportDecodeError, decode_blob, decode_envelope,
    encode_blob, run_with_retry,
};

use crate::config::{ClientConfig, file_label};
use crate::remap::{Diagnostic, RemapError, remap};
use crate::report::{self, CoverageSummary, LineAnalyzer, ReportFormat, SourceAnalyzer};
use crate::tunnel::{EndpointId, TunnelBackend, TunnelError, TunnelHandle, backend_for, open_with_timeout};

const LOCAL_ENDPOINT: &str = "local";
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Discover,
    Tunnel,
    Health,
    Fetch,
    Decode,
    Persist,
    Remap,
    Report,
}

impl Phase {
    const ALL: [Phase; 8] = [
        Phase::Discover,
        Phase::Tunnel,
        Phase::Health,
        Phase::Fetch,
        Phase::Decode,
        Phase::Persist,
        Phase::Remap,
        Phase::Report,
    ];

    fn from_u8(raw: u8) -> Phase {
        Self::ALL.get(raw as usize).copied().unwrap_or(Phase::Discover)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Discover => "discover",
            Phase::Tunnel => "tunnel",
            Phase::Health => "health",
            Phase::Fetch => "fetch",
            Phase::Decode => "decode",
            Phase::Persist => "persist",
            Phase::Remap => "remap",
            Phase::Report => "report",
        };
        f.write_str(s)
    }
}

/// The relay did not answer its health endpoint.
#[derive(Debug, thiserror::Error)]
#[error("relay for {endpoint} at {address} unavailable: {reason}")]
pub struct RelayUnavailableError {
    pub endpoint: String,
    pub address: SocketAddr,
    pub reason: String,
    retryable: bool,
}

impl RetryableError for RelayUnavailableError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Underlying cause of a [`CollectionError`].
#[derive(Debug, thiserror::Error)]
pub enum CollectionFailure {
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error(transparent)]
    Relay(#[from] RelayUnavailableError),
    #[error("relay answered HTTP {status}: {body}")]
    RelayStatus { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error(transparent)]
    Decode(#[from] TransportDecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Remap(#[from] RemapError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("report encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gave up after {0:?}")]
    Timeout(Duration),
}

/// A pipeline failure with its phase and endpoint.
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed for {endpoint}: {source}")]
pub struct CollectionError {
    pub phase: Phase,
    pub endpoint: String,
    pub source: CollectionFailure,
}

impl CollectionError {
    fn new(phase: Phase, endpoint: impl fmt::Display, source: impl Into<CollectionFailure>) -> Self {
        Self {
            phase,
            endpoint: endpoint.to_string(),
            source: source.into(),
        }
    }

    fn local(phase: Phase, source: impl Into<CollectionFailure>) -> Self {
        Self::new(phase, LOCAL_ENDPOINT, source)
    }

    /// The tunnel error behind this failure, if any.
    pub fn tunnel_error(&self) -> Option<&TunnelError> {
        match &self.source {
            CollectionFailure::Tunnel(e) => Some(e),
            _ => None,
        }
    }
}

/// Which relay to talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Discover a running pod by label selector.
    Selector(String),
    /// A known pod name (or host, for direct tunnels).
    Pod(String),
}

impl Target {
    /// `--pod` wins over the selector.
    pub fn from_config(config: &ClientConfig) -> Self {
        match &config.pod {
            Some(pod) => Target::Pod(pod.clone()),
            None => Target::Selector(config.selector.clone()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Selector(selector) => write!(f, "selector {selector}"),
            Target::Pod(pod) => write!(f, "pod {pod}"),
        }
    }
}

/// Body of the relay's `/health` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayHealth {
    pub status: String,
    pub coverage_enabled: bool,
    pub epoch: u64,
    pub files: usize,
    pub uptime_seconds: u64,
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct ResetBody {
    epoch: u64,
}

#[derive(Debug, Clone)]
pub struct CollectionResult {
    pub test_name: String,
    pub endpoint: EndpointId,
    pub path: PathBuf,
    pub files: usize,
    pub lines: usize,
    /// Relay epoch observed before the fetch.
    pub epoch: u64,
}

#[derive(Debug, Clone)]
pub struct ResetResult {
    pub endpoint: EndpointId,
    pub epoch: u64,
}

#[derive(Debug, Clone)]
pub struct HealthResult {
    pub endpoint: EndpointId,
    pub address: SocketAddr,
    pub health: RelayHealth,
}

#[derive(Debug, Clone)]
pub struct MergeResult {
    pub path: PathBuf,
    pub merged: Vec<String>,
    pub skipped: Vec<String>,
    pub files: usize,
}

#[derive(Debug, Clone)]
pub struct ReportResult {
    pub summary: CoverageSummary,
    pub outputs: Vec<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
    pub remapped: usize,
}

/// Phase and endpoint reached so far, readable after a timeout.
struct Progress {
    phase: AtomicU8,
    endpoint: Mutex<String>,
}

impl Progress {
    fn new(target: &Target) -> Self {
        Self {
            phase: AtomicU8::new(Phase::Discover as u8),
            endpoint: Mutex::new(target.to_string()),
        }
    }

    fn enter(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn set_endpoint(&self, endpoint: &EndpointId) {
        *self.endpoint.lock().unwrap_or_else(|p| p.into_inner()) = endpoint.to_string();
    }

    fn endpoint(&self) -> String {
        self.endpoint.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn timed_out(&self, timeout: Duration) -> CollectionError {
        let phase = self.phase();
        let source = if phase == Phase::Tunnel {
            CollectionFailure::Tunnel(TunnelError::Timeout(timeout))
        } else {
            CollectionFailure::Timeout(timeout)
        };
        CollectionError::new(phase, self.endpoint(), source)
    }
}

/// Drives collection, reset, merge and report generation.
pub struct CoverageClient {
    config: ClientConfig,
    backend: Box<dyn TunnelBackend>,
    http: reqwest::Client,
}

impl CoverageClient {
    /// Client with the backend selected by `config.tunnel`.
    pub fn new(config: ClientConfig) -> Result<Self, CollectionError> {
        let backend = backend_for(config.tunnel, &config.tunnel_config());
        Self::with_backend(config, backend)
    }

    /// A failure to build the HTTP client is reported against the discover phase.
    pub fn with_backend(config: ClientConfig, backend: Box<dyn TunnelBackend>) -> Result<Self, CollectionError> {
        // Tunnels are short-lived: never reuse pooled connections or go through a proxy.
        let http = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| CollectionError::local(Phase::Discover, e))?;
        Ok(Self { config, backend, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch the relay snapshot and persist it as `.coverage_<test_name>`.
    pub async fn collect(&self, target: &Target, test_name: &str) -> Result<CollectionResult, CollectionError> {
        let progress = Progress::new(target);
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.collect_inner(target, test_name, &progress)).await {
            Ok(result) => result,
            Err(_) => {
                let err = progress.timed_out(timeout);
                warn!(test = test_name, phase = %err.phase, endpoint = %err.endpoint, "Coverage collection timed out");
                Err(err)
            }
        }
    }

    async fn collect_inner(
        &self,
        target: &Target,
        test_name: &str,
        progress: &Progress,
    ) -> Result<CollectionResult, CollectionError> {
        let (mut tunnel, health) = self.connect(target, progress).await?;
        let endpoint = tunnel.endpoint().clone();

        progress.enter(Phase::Fetch);
        let body = self
            .fetch(&tunnel, &format!("/coverage?name={}", urlencoding::encode(test_name)))
            .await?;

        progress.enter(Phase::Decode);
        let (envelope, snapshot) =
            decode_envelope(&body).map_err(|e| CollectionError::new(Phase::Decode, &endpoint, e))?;
        if envelope.name != test_name {
            warn!(requested = test_name, received = %envelope.name, "Relay labelled the snapshot differently");
        }
        let blob = envelope
            .blob()
            .map_err(|e| CollectionError::new(Phase::Decode, &endpoint, e))?;

        progress.enter(Phase::Persist);
        let path = self.config.blob_path(test_name);
        write_atomic(&path, &blob).map_err(|e| CollectionError::new(Phase::Persist, &endpoint, e))?;

        self.close_tunnel(&mut tunnel);
        info!(
            test = test_name,
            endpoint = %endpoint,
            files = snapshot.len(),
            lines = snapshot.line_count(),
            path = %path.display(),
            "Coverage collected"
        );
        Ok(CollectionResult {
            test_name: test_name.to_string(),
            endpoint,
            path,
            files: snapshot.len(),
            lines: snapshot.line_count(),
            epoch: health.epoch,
        })
    }

    /// Ask the relay to discard recorded data.
    pub async fn reset(&self, target: &Target) -> Result<ResetResult, CollectionError> {
        let progress = Progress::new(target);
        let timeout = self.config.timeout;
        let work = async {
            let (mut tunnel, _) = self.connect(target, &progress).await?;
            let endpoint = tunnel.endpoint().clone();

            progress.enter(Phase::Fetch);
            let body = self.fetch(&tunnel, "/coverage/reset").await?;
            let reset: ResetBody = serde_json::from_slice(&body)
                .map_err(|e| CollectionError::new(Phase::Decode, &endpoint, e))?;

            self.close_tunnel(&mut tunnel);
            info!(endpoint = %endpoint, epoch = reset.epoch, "Coverage reset");
            Ok(ResetResult {
                endpoint,
                epoch: reset.epoch,
            })
        };
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(progress.timed_out(timeout)),
        }
    }

    /// Open a tunnel and report the relay's health.
    pub async fn health(&self, target: &Target) -> Result<HealthResult, CollectionError> {
        let progress = Progress::new(target);
        let timeout = self.config.timeout;
        let work = async {
            let (mut tunnel, health) = self.connect(target, &progress).await?;
            let result = HealthResult {
                endpoint: tunnel.endpoint().clone(),
                address: tunnel.address(),
                health,
            };
            self.close_tunnel(&mut tunnel);
            Ok(result)
        };
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(progress.timed_out(timeout)),
        }
    }

    /// Read a persisted snapshot.
    pub fn load(&self, test_name: &str) -> Result<Snapshot, CollectionError> {
        let blob = std::fs::read(self.config.blob_path(test_name))
            .map_err(|e| CollectionError::local(Phase::Persist, e))?;
        decode_blob(&blob).map_err(|e| CollectionError::local(Phase::Decode, e))
    }

    /// Union persisted snapshots into `.coverage_<merged_name>`.
    ///
    /// Inputs that were never collected are skipped with a warning.
    pub fn merge(&self, test_names: &[String], merged_name: &str) -> Result<MergeResult, CollectionError> {
        let mut merged = Snapshot::new();
        let mut used = Vec::new();
        let mut skipped = Vec::new();

        for name in test_names {
            match self.load(name) {
                Ok(snapshot) => {
                    merged.merge(&snapshot);
                    used.push(name.clone());
                }
                Err(CollectionError {
                    source: CollectionFailure::Io(e),
                    ..
                }) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(test = %name, "No collected coverage to merge, skipping");
                    skipped.push(name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        let blob = encode_blob(&merged).map_err(|e| CollectionError::local(Phase::Persist, e))?;
        let path = self.config.blob_path(merged_name);
        write_atomic(&path, &blob).map_err(|e| CollectionError::local(Phase::Persist, e))?;

        info!(into = merged_name, inputs = used.len(), skipped = skipped.len(), files = merged.len(), "Coverage merged");
        Ok(MergeResult {
            path,
            merged: used,
            skipped,
            files: merged.len(),
        })
    }

    /// Render reports for a persisted snapshot.
    pub fn report(
        &self,
        test_name: &str,
        source_root: &Path,
        formats: &[ReportFormat],
        remap_paths: bool,
    ) -> Result<ReportResult, CollectionError> {
        self.report_with(test_name, source_root, formats, remap_paths, &LineAnalyzer)
    }

    pub fn report_with(
        &self,
        test_name: &str,
        source_root: &Path,
        formats: &[ReportFormat],
        remap_paths: bool,
        analyzer: &dyn SourceAnalyzer,
    ) -> Result<ReportResult, CollectionError> {
        let captured = self.load(test_name)?;

        let (snapshot, diagnostics, remapped) = if remap_paths {
            let outcome = remap(&captured, source_root).map_err(|e| CollectionError::local(Phase::Remap, e))?;
            for diagnostic in &outcome.diagnostics {
                warn!(test = test_name, %diagnostic, "Path left unmapped");
            }
            let remapped = outcome.remapped(&captured);
            debug!(test = test_name, remapped, prefixes = outcome.mapping.len(), "Paths remapped");
            (outcome.snapshot, outcome.diagnostics, remapped)
        } else {
            (captured, Vec::new(), 0)
        };

        let exclusions: ExclusionPolicy = self
            .config
            .report_exclusions()
            .map_err(|e| CollectionError::local(Phase::Report, e))?;
        let summary = report::summarize(&snapshot, &exclusions, analyzer);

        let outputs = self
            .write_reports(test_name, &summary, formats)
            .map_err(|e| CollectionError::local(Phase::Report, e))?;

        info!(
            test = test_name,
            files = summary.totals.files,
            percent = summary.totals.percent,
            outputs = outputs.len(),
            "Report generated"
        );
        Ok(ReportResult {
            summary,
            outputs,
            diagnostics,
            remapped,
        })
    }

    fn write_reports(
        &self,
        test_name: &str,
        summary: &CoverageSummary,
        formats: &[ReportFormat],
    ) -> Result<Vec<PathBuf>, CollectionFailure> {
        let dir = &self.config.output_dir;
        let label = file_label(test_name);
        std::fs::create_dir_all(dir)?;

        let mut formats = formats.to_vec();
        formats.sort();
        formats.dedup();

        let mut outputs = Vec::new();
        for format in formats {
            let path = match format {
                ReportFormat::Text => {
                    let path = dir.join(format!("report_{label}.txt"));
                    std::fs::write(&path, report::text::render(summary))?;
                    path
                }
                ReportFormat::Html => {
                    let title = format!("Coverage for {test_name}");
                    report::html::write_report(&dir.join(format!("html_{label}")), &title, summary)?
                }
                ReportFormat::Json => {
                    let path = dir.join(format!("coverage_{label}.json"));
                    std::fs::write(&path, report::json::render(test_name, summary, Utc::now())?)?;
                    path
                }
            };
            debug!(format = %format, path = %path.display(), "Report written");
            outputs.push(path);
        }
        Ok(outputs)
    }

    /// Discover, open the tunnel and wait for the relay to answer `/health`.
    async fn connect(
        &self,
        target: &Target,
        progress: &Progress,
    ) -> Result<(TunnelHandle, RelayHealth), CollectionError> {
        let started = Instant::now();
        let namespace = &self.config.namespace;

        progress.enter(Phase::Discover);
        let endpoint = match target {
            Target::Pod(pod) => EndpointId::new(namespace, pod),
            Target::Selector(selector) => self
                .backend
                .find_endpoint(namespace, selector)
                .await
                .map_err(|e| CollectionError::new(Phase::Discover, target, e))?,
        };
        progress.set_endpoint(&endpoint);
        debug!(endpoint = %endpoint, backend = %self.backend.kind(), "Endpoint selected");

        progress.enter(Phase::Tunnel);
        let remaining = self.config.timeout.saturating_sub(started.elapsed());
        let tunnel = open_with_timeout(
            self.backend.as_ref(),
            &endpoint,
            self.config.remote_port,
            self.config.local_port,
            remaining,
        )
        .await
        .map_err(|e| CollectionError::new(Phase::Tunnel, &endpoint, e))?;

        progress.enter(Phase::Health);
        let health = run_with_retry("health", &self.config.health_retry, || self.probe_health(&tunnel))
            .await
            .map_err(|e| CollectionError::new(Phase::Health, &endpoint, e))?;
        debug!(endpoint = %endpoint, epoch = health.epoch, files = health.files, "Relay ready");
        Ok((tunnel, health))
    }

    async fn probe_health(&self, tunnel: &TunnelHandle) -> Result<RelayHealth, RelayUnavailableError> {
        let unavailable = |reason: String, retryable: bool| RelayUnavailableError {
            endpoint: tunnel.endpoint().to_string(),
            address: tunnel.address(),
            reason,
            retryable,
        };

        let url = format!("http://{}/health", tunnel.address());
        let response = match self.http.get(&url).timeout(HEALTH_REQUEST_TIMEOUT).send().await {
            Ok(response) => response,
            Err(e) => {
                let reason = match tunnel.take_error() {
                    Some(tunnel_err) => format!("{e} ({tunnel_err})"),
                    None => e.to_string(),
                };
                return Err(unavailable(reason, true));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {status}"), status.is_server_error()));
        }
        let health: RelayHealth = response
            .json()
            .await
            .map_err(|e| unavailable(format!("unreadable health body: {e}"), false))?;
        if !health.coverage_enabled {
            return Err(unavailable("coverage is disabled on the relay".into(), false));
        }
        Ok(health)
    }

    /// GET `path` on the relay. A request that fails after the forward died
    /// reports the tunnel's error in the tunnel phase.
    async fn fetch(&self, tunnel: &TunnelHandle, path: &str) -> Result<Vec<u8>, CollectionError> {
        let url = format!("http://{}{path}", tunnel.address());
        self.get(&url).await.map_err(|e| match e {
            CollectionFailure::Request(request_err) => match tunnel.take_error() {
                Some(tunnel_err) => {
                    debug!(error = %request_err, "Relay request failed after the tunnel went down");
                    CollectionError::new(Phase::Tunnel, tunnel.endpoint(), tunnel_err)
                }
                None => CollectionError::new(Phase::Fetch, tunnel.endpoint(), request_err),
            },
            other => CollectionError::new(Phase::Fetch, tunnel.endpoint(), other),
        })
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, CollectionFailure> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectionFailure::RelayStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    fn close_tunnel(&self, tunnel: &mut TunnelHandle) {
        if let Some(err) = tunnel.take_error() {
            warn!(endpoint = %tunnel.endpoint(), error = %err, "Tunnel reported an error");
        }
        tunnel.close();
    }
}

/// Write `bytes` to `path` via a sibling temporary file and a rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_round_trips_through_u8() {
        for phase in Phase::ALL {
            assert_eq!(Phase::from_u8(phase as u8), phase);
        }
        assert_eq!(Phase::Persist.to_string(), "persist");
    }

    #[test]
    fn timeout_during_tunnel_is_a_tunnel_timeout() {
        let progress = Progress::new(&Target::Selector("app=demo".into()));
        progress.set_endpoint(&EndpointId::new("default", "demo-0"));
        progress.enter(Phase::Tunnel);

        let err = progress.timed_out(Duration::from_secs(3));
        assert_eq!(err.phase, Phase::Tunnel);
        assert_eq!(err.endpoint, "default/demo-0");
        assert!(matches!(err.tunnel_error(), Some(TunnelError::Timeout(_))));

        progress.enter(Phase::Fetch);
        let err = progress.timed_out(Duration::from_secs(3));
        assert!(matches!(err.source, CollectionFailure::Timeout(_)));
    }

    #[test]
    fn target_prefers_pod() {
        let mut config = ClientConfig::default();
        assert_eq!(Target::from_config(&config), Target::Selector("app=coverage-demo".into()));
        config.pod = Some("demo-0".into());
        assert_eq!(Target::from_config(&config), Target::Pod("demo-0".into()));
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(".coverage_t");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn merge_skips_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            output_dir: dir.path().to_path_buf(),
            tunnel: crate::tunnel::TunnelKind::Direct,
            ..ClientConfig::default()
        };
        let client = CoverageClient::new(config).unwrap();

        let a = Snapshot::new().with_file("/app/a.py", [1, 2]);
        let b = Snapshot::new().with_file("/app/a.py", [3]).with_file("/app/b.py", [1]);
        write_atomic(&client.config().blob_path("a"), &encode_blob(&a).unwrap()).unwrap();
        write_atomic(&client.config().blob_path("b"), &encode_blob(&b).unwrap()).unwrap();

        let names = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let result = client.merge(&names, "all").unwrap();
        assert_eq!(result.merged, vec!["a", "b"]);
        assert_eq!(result.skipped, vec!["missing"]);
        assert_eq!(result.files, 2);

        let merged = client.load("all").unwrap();
        assert_eq!(merged, a.merged(&b));
    }

    #[test]
    fn load_reports_phase() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            output_dir: dir.path().to_path_buf(),
            ..ClientConfig::default()
        };
        let client = CoverageClient::new(config).unwrap();

        let err = client.load("never").unwrap_err();
        assert_eq!(err.phase, Phase::Persist);
        assert_eq!(err.endpoint, "local");

        std::fs::write(client.config().blob_path("junk"), b"not a blob").unwrap();
        assert_eq!(client.load("junk").unwrap_err().phase, Phase::Decode);
    }
}
