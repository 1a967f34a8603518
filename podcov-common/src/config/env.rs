//! Environment variable parsing with type safety.
//!
//! Every podcov setting can come from a `PODCOV_*` variable. The parser
//! collects errors instead of failing on the first one so that a
//! misconfigured pod or CI job reports all of its problems at once.

use super::source::{ConfigSource, Sourced};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Prefix shared by all podcov variables.
    pub const PREFIX: &'static str = "PODCOV_";

    /// Create a new parser with the `PODCOV_` prefix.
    pub fn new() -> Self {
        Self::with_prefix(Self::PREFIX)
    }

    /// Create a parser reading variables under another prefix.
    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Get the full variable name with prefix.
    pub fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> (String, Option<String>) {
        let var_name = self.var_name(name);
        let value = env::var(&var_name).ok();
        (var_name, value)
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match self.raw(name) {
            (var, Some(value)) => Sourced::from_env(value, var),
            (_, None) => Sourced::default_value(default.to_string()),
        }
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match self.raw(name) {
            (var, Some(value)) if value.is_empty() => Sourced::from_env(None, var),
            (var, Some(value)) => Sourced::from_env(Some(value), var),
            (_, None) => Sourced::default_value(None),
        }
    }

    /// Get a numeric value with default and inclusive range validation.
    pub fn get_range<T>(&mut self, name: &str, default: T, min: T, max: T) -> Sourced<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
    {
        let (var, value) = self.raw(name);
        let Some(value) = value else {
            return Sourced::default_value(default);
        };
        match value.trim().parse::<T>() {
            Ok(n) if n >= min && n <= max => Sourced::from_env(n, var),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var.clone(),
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                Sourced::from_env(default, var)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var.clone(),
                    expected: std::any::type_name::<T>().to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    /// Get a TCP port. Zero is allowed and means "ephemeral".
    pub fn get_port(&mut self, name: &str, default: u16) -> Sourced<u16> {
        self.get_range(name, default, 0, u16::MAX)
    }

    /// Get any value implementing `FromStr`, describing the expected form on error.
    pub fn get_parsed<T>(&mut self, name: &str, default: T, expected: &str) -> Sourced<T>
    where
        T: FromStr,
    {
        let (var, value) = self.raw(name);
        let Some(value) = value else {
            return Sourced::default_value(default);
        };
        match value.trim().parse::<T>() {
            Ok(parsed) => Sourced::from_env(parsed, var),
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var.clone(),
                    expected: expected.to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    /// Get a path value with `~/` expansion against `$HOME`.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        let (var, value) = self.raw(name);
        let (value, source) = match value {
            Some(v) => (v, ConfigSource::Environment),
            None => (default.to_string(), ConfigSource::Default),
        };

        let expanded = match (value.strip_prefix("~/"), env::var_os("HOME")) {
            (Some(stripped), Some(home)) => PathBuf::from(home).join(stripped),
            _ => PathBuf::from(&value),
        };

        if source == ConfigSource::Environment {
            Sourced::from_env(expanded, var)
        } else {
            Sourced::default_value(expanded)
        }
    }

    /// Get a log level value with validation.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let (var, value) = self.raw(name);
        let Some(value) = value else {
            return Sourced::default_value(default.to_string());
        };
        let lower = value.to_lowercase();
        match lower.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Sourced::from_env(lower, var),
            _ => {
                self.errors.push(EnvError::InvalidLogLevel { var: var.clone(), value });
                Sourced::from_env(default.to_string(), var)
            }
        }
    }

    /// Get a comma-separated list of strings.
    pub fn get_string_list(&mut self, name: &str, default: Vec<String>) -> Sourced<Vec<String>> {
        match self.raw(name) {
            (var, Some(value)) => {
                let items: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                Sourced::from_env(items, var)
            }
            (_, None) => Sourced::default_value(default),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}
