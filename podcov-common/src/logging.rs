//! Logging initialization shared by the podcov binaries.
//!
//! Output goes to stdout or stderr in a human or JSON format, optionally
//! duplicated to a file through a non-blocking appender. The returned
//! [`LoggingGuards`] must be held for the lifetime of the program so the
//! file writer is flushed on exit.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::EnvParser;

/// Console log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" | "human" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    pub stderr: bool,
}

impl LogConfig {
    /// Read `PODCOV_LOG_LEVEL`, `PODCOV_LOG_FORMAT` and `PODCOV_LOG_FILE`.
    ///
    /// Invalid values fall back to defaults; logging is not initialized yet
    /// so they cannot be reported here.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let format = parser
            .get_parsed("LOG_FORMAT", LogFormat::Pretty, "pretty or json")
            .value;
        let file = parser.get_optional_string("LOG_FILE").value.map(PathBuf::from);
        Self {
            level,
            format,
            file,
            stderr: false,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Write console output to stderr, keeping stdout for command results.
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
            stderr: false,
        }
    }
}

/// Keeps background log writers alive.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

fn console_writer(stderr: bool) -> BoxMakeWriter {
    if stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    }
}

fn file_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .with_context(|| format!("log file path has no file name: {}", path.display()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create log directory {}", dir.display()))?;
    Ok(tracing_appender::rolling::never(dir, name))
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid log filter")?;

    let console = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_writer(console_writer(config.stderr))
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(console_writer(config.stderr))
            .boxed(),
    };

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuards { _file: guard })
}
