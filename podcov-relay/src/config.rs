//! Relay configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use podcov_common::{
    ConfigSource, DEFAULT_RELAY_PORT, EnvError, EnvParser, ExclusionPolicy, PatternError, Sourced,
};
use tracing::debug;

/// Where the relay listens and what it leaves out of snapshots.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    /// Exclusion globs; `None` means [`ExclusionPolicy::DEFAULT_PATTERNS`].
    pub exclude: Option<Vec<String>>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_RELAY_PORT),
            exclude: None,
        }
    }
}

/// Invalid relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum RelayConfigError {
    #[error("invalid relay environment: {}", format_errors(.0))]
    Env(Vec<EnvError>),
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

fn format_errors(errors: &[EnvError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl RelayConfig {
    /// Loopback on an ephemeral port, for tests and local runs.
    pub fn loopback() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            exclude: None,
        }
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Read `PODCOV_BIND`, `PODCOV_PORT` and `PODCOV_EXCLUDE`.
    ///
    /// `PODCOV_PORT` overrides the port of `PODCOV_BIND` when both are set.
    pub fn from_env() -> Result<Self, RelayConfigError> {
        let mut parser = EnvParser::new();
        let defaults = Self::default();

        let bind: Sourced<SocketAddr> = parser.get_parsed("BIND", defaults.bind, "socket address (ip:port)");
        let port = parser.get_port("PORT", bind.value.port());
        let exclude = parser.get_string_list("EXCLUDE", Vec::new());

        if parser.has_errors() {
            return Err(RelayConfigError::Env(parser.take_errors()));
        }

        // Set but empty means "exclude nothing"; unset keeps the defaults.
        let exclude = (exclude.source == ConfigSource::Environment).then_some(exclude.value);

        debug!(bind = %bind, port = %port, "Relay configuration loaded");
        Ok(Self {
            bind: SocketAddr::new(bind.value.ip(), port.value),
            exclude,
        })
    }

    /// Build the exclusion policy the store should use.
    pub fn exclusion_policy(&self) -> Result<ExclusionPolicy, PatternError> {
        match &self.exclude {
            Some(patterns) => ExclusionPolicy::new(patterns),
            None => Ok(ExclusionPolicy::with_defaults()),
        }
    }
}
