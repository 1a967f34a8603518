//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use podcov_common::{
    ConfigSource, DEFAULT_RELAY_PORT, EnvError, EnvParser, ExclusionPolicy, PatternError, RetryPolicy, Sourced,
};
use tracing::debug;

use crate::tunnel::{TunnelConfig, TunnelKind};

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_SELECTOR: &str = "app=coverage-demo";
pub const DEFAULT_OUTPUT_DIR: &str = "./coverage-output";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the client pipeline needs to reach a relay and store results.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub namespace: String,
    /// Label selector used for pod discovery (a host for direct tunnels).
    pub selector: String,
    /// Skip discovery and use this pod.
    pub pod: Option<String>,
    pub output_dir: PathBuf,
    pub tunnel: TunnelKind,
    /// Bound on a whole collect/reset/health call.
    pub timeout: Duration,
    pub remote_port: u16,
    /// Local forward port; 0 picks an ephemeral one.
    pub local_port: u16,
    pub kubectl: PathBuf,
    /// Tunnel establishment retries.
    pub retry: RetryPolicy,
    /// Readiness polling of `/health` before fetching.
    pub health_retry: RetryPolicy,
    /// Globs dropped from reports; `None` uses the default policy.
    pub report_exclude: Option<Vec<String>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            selector: DEFAULT_SELECTOR.to_string(),
            pod: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            tunnel: TunnelKind::default(),
            timeout: DEFAULT_TIMEOUT,
            remote_port: DEFAULT_RELAY_PORT,
            local_port: 0,
            kubectl: PathBuf::from("kubectl"),
            retry: RetryPolicy::default(),
            health_retry: RetryPolicy::health_probe(),
            report_exclude: None,
        }
    }
}

/// Invalid client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ClientConfigError {
    #[error("invalid client environment: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Env(Vec<EnvError>),
}

/// Command-line values that take precedence over `PODCOV_*` variables.
#[derive(Debug, Clone, Default)]
pub struct ClientOverrides {
    pub namespace: Option<String>,
    pub selector: Option<String>,
    pub pod: Option<String>,
    pub tunnel: Option<TunnelKind>,
    pub remote_port: Option<u16>,
    pub output_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    /// Read `PODCOV_NAMESPACE`, `PODCOV_SELECTOR`, `PODCOV_OUTPUT_DIR`,
    /// `PODCOV_TUNNEL`, `PODCOV_TIMEOUT_SECS`, `PODCOV_REMOTE_PORT`,
    /// `PODCOV_KUBECTL` and `PODCOV_REPORT_EXCLUDE`.
    pub fn from_env() -> Result<Self, ClientConfigError> {
        Self::load(ClientOverrides::default())
    }

    /// Defaults, then the environment, then `overrides`.
    pub fn load(overrides: ClientOverrides) -> Result<Self, ClientConfigError> {
        let mut parser = EnvParser::new();
        let defaults = Self::default();

        let namespace = parser.get_string("NAMESPACE", &defaults.namespace);
        let selector = parser.get_string("SELECTOR", &defaults.selector);
        let output_dir = parser.get_path("OUTPUT_DIR", DEFAULT_OUTPUT_DIR);
        let tunnel: Sourced<TunnelKind> = parser.get_parsed("TUNNEL", defaults.tunnel, "process, native or direct");
        let timeout_secs = parser.get_range("TIMEOUT_SECS", defaults.timeout.as_secs(), 1, 3600);
        let remote_port = parser.get_port("REMOTE_PORT", defaults.remote_port);
        let kubectl = parser.get_path("KUBECTL", "kubectl");
        let report_exclude = parser.get_string_list("REPORT_EXCLUDE", Vec::new());

        if parser.has_errors() {
            return Err(ClientConfigError::Env(parser.take_errors()));
        }

        let namespace = namespace.override_with(overrides.namespace, "--namespace");
        let selector = selector.override_with(overrides.selector, "--selector");
        let output_dir = output_dir.override_with(overrides.output_dir, "--output-dir");
        let tunnel = tunnel.override_with(overrides.tunnel, "--tunnel");
        let timeout = timeout_secs
            .map(Duration::from_secs)
            .override_with(overrides.timeout.map(|t| t.max(Duration::from_secs(1))), "--timeout");
        let remote_port = remote_port.override_with(overrides.remote_port, "--remote-port");

        debug!(
            namespace = %namespace,
            selector = %selector,
            tunnel = %tunnel,
            remote_port = %remote_port,
            timeout = ?timeout.value,
            timeout_source = %timeout.source,
            "Client configuration loaded"
        );

        Ok(Self {
            namespace: namespace.into_inner(),
            selector: selector.into_inner(),
            pod: overrides.pod,
            output_dir: output_dir.into_inner(),
            tunnel: tunnel.into_inner(),
            timeout: timeout.into_inner(),
            remote_port: remote_port.into_inner(),
            kubectl: kubectl.into_inner(),
            // Set but empty means "exclude nothing"; unset keeps the defaults.
            report_exclude: (report_exclude.source == ConfigSource::Environment).then_some(report_exclude.value),
            ..defaults
        })
    }

    pub fn tunnel_config(&self) -> TunnelConfig {
        TunnelConfig {
            kubectl: self.kubectl.clone(),
            retry: self.retry.clone(),
            ..TunnelConfig::default()
        }
    }

    /// Policy applied to snapshots at report time.
    pub fn report_exclusions(&self) -> Result<ExclusionPolicy, PatternError> {
        match &self.report_exclude {
            Some(patterns) => ExclusionPolicy::new(patterns),
            None => Ok(ExclusionPolicy::with_defaults()),
        }
    }

    /// Persisted blob for a test label.
    pub fn blob_path(&self, test_name: &str) -> PathBuf {
        self.output_dir.join(format!(".coverage_{}", file_label(test_name)))
    }
}

/// File-name-safe form of a test label.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`, so labels such as pytest
/// node ids (`tests/test_app.py::test_home`) always name a single entry
/// directly inside the output directory.
pub fn file_label(test_name: &str) -> String {
    let label: String = test_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    if label.is_empty() { "_".to_string() } else { label }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use podcov_common::config::env_test_lock;

    const VARS: [&str; 8] = [
        "PODCOV_NAMESPACE",
        "PODCOV_SELECTOR",
        "PODCOV_OUTPUT_DIR",
        "PODCOV_TUNNEL",
        "PODCOV_TIMEOUT_SECS",
        "PODCOV_REMOTE_PORT",
        "PODCOV_KUBECTL",
        "PODCOV_REPORT_EXCLUDE",
    ];

    fn clear() {
        for var in VARS {
            // SAFETY: env mutation is serialized by env_test_lock
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn defaults() {
        let _guard = env_test_lock();
        clear();
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.selector, "app=coverage-demo");
        assert_eq!(config.remote_port, 9095);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.tunnel, TunnelKind::Process);
        assert_eq!(config.blob_path("t1"), PathBuf::from("./coverage-output/.coverage_t1"));
    }

    #[test]
    fn reads_environment() {
        let _guard = env_test_lock();
        clear();
        // SAFETY: env mutation is serialized by env_test_lock
        unsafe {
            std::env::set_var("PODCOV_NAMESPACE", "staging");
            std::env::set_var("PODCOV_TUNNEL", "native");
            std::env::set_var("PODCOV_TIMEOUT_SECS", "5");
            std::env::set_var("PODCOV_KUBECTL", "/opt/bin/kubectl");
            std::env::set_var("PODCOV_REPORT_EXCLUDE", "*/tests/*");
        }
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.namespace, "staging");
        assert_eq!(config.tunnel, TunnelKind::Native);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.tunnel_config().kubectl, PathBuf::from("/opt/bin/kubectl"));
        let policy = config.report_exclusions().unwrap();
        assert!(policy.is_excluded("/app/tests/test_x.py"));
        assert!(!policy.is_excluded("/app/site-packages/x.py"));
        clear();
    }

    #[test]
    fn errors_are_accumulated() {
        let _guard = env_test_lock();
        clear();
        // SAFETY: env mutation is serialized by env_test_lock
        unsafe {
            std::env::set_var("PODCOV_TUNNEL", "ssh");
            std::env::set_var("PODCOV_TIMEOUT_SECS", "0");
        }
        let ClientConfigError::Env(errors) = ClientConfig::from_env().unwrap_err();
        assert_eq!(errors.len(), 2);
        clear();
    }

    #[test]
    fn command_line_overrides_environment() {
        let _guard = env_test_lock();
        clear();
        // SAFETY: env mutation is serialized by env_test_lock
        unsafe {
            std::env::set_var("PODCOV_NAMESPACE", "staging");
            std::env::set_var("PODCOV_REMOTE_PORT", "9100");
            std::env::set_var("PODCOV_SELECTOR", "app=env");
        }
        let config = ClientConfig::load(ClientOverrides {
            namespace: Some("ci".into()),
            pod: Some("demo-0".into()),
            timeout: Some(Duration::ZERO),
            ..ClientOverrides::default()
        })
        .unwrap();
        assert_eq!(config.namespace, "ci");
        assert_eq!(config.selector, "app=env");
        assert_eq!(config.remote_port, 9100);
        assert_eq!(config.pod.as_deref(), Some("demo-0"));
        assert_eq!(config.timeout, Duration::from_secs(1));
        clear();
    }

    #[test]
    fn empty_report_exclude_disables_defaults() {
        let _guard = env_test_lock();
        clear();
        // SAFETY: env mutation is serialized by env_test_lock
        unsafe { std::env::set_var("PODCOV_REPORT_EXCLUDE", "") };
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.report_exclude, Some(Vec::new()));
        assert!(config.report_exclusions().unwrap().is_empty());
        clear();
    }

    #[test]
    fn test_labels_stay_inside_output_dir() {
        let config = ClientConfig {
            output_dir: PathBuf::from("/out"),
            ..ClientConfig::default()
        };
        assert_eq!(file_label("tests/test_app.py::test_home"), "tests_test_app.py__test_home");
        assert_eq!(file_label("smoke-1"), "smoke-1");
        assert_eq!(file_label(""), "_");
        for name in ["x/../../../etc/foo", "..\\up", "a/b"] {
            let path = config.blob_path(name);
            assert_eq!(path.parent(), Some(std::path::Path::new("/out")), "{name}");
        }
    }
}
