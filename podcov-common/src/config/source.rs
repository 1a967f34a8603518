//! Source tracking for configuration values.

use std::fmt;

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// A `PODCOV_*` environment variable.
    Environment,
    /// A command-line flag.
    CommandLine,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment"),
            ConfigSource::CommandLine => write!(f, "command line"),
        }
    }
}

/// A value paired with the source it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Variable or flag name, when not a default.
    pub origin: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            origin: None,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            origin: Some(var.into()),
        }
    }

    pub fn from_cli(value: T, flag: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::CommandLine,
            origin: Some(flag.into()),
        }
    }

    /// Replace the value when a command-line override is present.
    pub fn override_with(self, cli: Option<T>, flag: &str) -> Self {
        match cli {
            Some(value) => Self::from_cli(value, flag),
            None => self,
        }
    }

    /// Convert the value, keeping where it came from.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            origin: self.origin,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: fmt::Display> fmt::Display for Sourced<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{} (from {} {})", self.value, self.source, origin),
            None => write!(f, "{} ({})", self.value, self.source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_override_wins() {
        let port = Sourced::from_env(9095u16, "PODCOV_PORT").override_with(Some(9100), "--remote-port");
        assert_eq!(port.value, 9100);
        assert_eq!(port.source, ConfigSource::CommandLine);

        let port = Sourced::default_value(9095u16).override_with(None, "--remote-port");
        assert_eq!(port.source, ConfigSource::Default);

        let secs = Sourced::from_env(5u64, "PODCOV_TIMEOUT_SECS").map(std::time::Duration::from_secs);
        assert_eq!(secs.value, std::time::Duration::from_secs(5));
        assert_eq!(secs.origin.as_deref(), Some("PODCOV_TIMEOUT_SECS"));
    }

    #[test]
    fn display_names_origin() {
        let s = Sourced::from_env("ns".to_string(), "PODCOV_NAMESPACE");
        assert_eq!(s.to_string(), "ns (from environment PODCOV_NAMESPACE)");
        assert_eq!(Sourced::default_value(1).to_string(), "1 (default)");
    }
}
