//! podcov - collect coverage from a relay running in a pod.
//!
//! Environment variables (`PODCOV_*`) provide defaults; command-line flags
//! override them.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, warn};

use podcov::{ClientConfig, ClientOverrides, CoverageClient, ReportFormat, Target, TunnelKind};
use podcov_common::{LogConfig, init_logging};

#[derive(Parser)]
#[command(name = "podcov")]
#[command(author, version, about = "Collect coverage from a process running in a pod")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Label selector used to find the pod (a host for --tunnel direct)
    #[arg(short = 'l', long, global = true)]
    selector: Option<String>,

    /// Use this pod instead of discovering one
    #[arg(long, global = true)]
    pod: Option<String>,

    /// Forwarding mechanism
    #[arg(long, value_enum, global = true)]
    tunnel: Option<TunnelKind>,

    /// Relay port inside the pod
    #[arg(long, global = true)]
    remote_port: Option<u16>,

    /// Directory for collected blobs and reports
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Timeout for a whole collect/reset/health call, in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current snapshot and store it as .coverage_<TEST_NAME>
    Collect {
        test_name: String,
    },

    /// Clear coverage recorded by the relay
    Reset,

    /// Check that the relay answers
    Health,

    /// Render reports for a collected snapshot
    Report {
        test_name: String,

        /// Local source tree used for path remapping and source listings
        #[arg(long, default_value = ".")]
        source_dir: PathBuf,

        /// Report formats
        #[arg(long, value_enum, value_delimiter = ',', default_value = "text,html,json")]
        format: Vec<ReportFormat>,

        /// Keep captured paths as-is
        #[arg(long)]
        no_remap: bool,
    },

    /// Union several collected snapshots
    Merge {
        /// Snapshots to merge
        #[arg(required = true)]
        names: Vec<String>,

        /// Name of the merged snapshot
        #[arg(long)]
        into: String,
    },
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig> {
        ClientConfig::load(ClientOverrides {
            namespace: self.namespace.clone(),
            selector: self.selector.clone(),
            pod: self.pod.clone(),
            tunnel: self.tunnel,
            remote_port: self.remote_port,
            output_dir: self.output_dir.clone(),
            timeout: self.timeout.map(Duration::from_secs),
        })
        .context("invalid PODCOV_* environment")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = match init_logging(&log_config) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("podcov: failed to initialise logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "podcov failed");
            eprintln!("podcov: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.client_config()?;
    let target = Target::from_config(&config);
    let client = CoverageClient::new(config)?;

    match cli.command {
        Commands::Collect { test_name } => {
            let result = client.collect(&target, &test_name).await?;
            println!(
                "Collected {} files ({} lines) from {} into {}",
                result.files,
                result.lines,
                result.endpoint,
                result.path.display()
            );
        }
        Commands::Reset => {
            let result = client.reset(&target).await?;
            println!("Reset coverage on {} (epoch {})", result.endpoint, result.epoch);
        }
        Commands::Health => {
            let result = client.health(&target).await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "endpoint": result.endpoint.to_string(),
                "address": result.address.to_string(),
                "status": result.health.status,
                "epoch": result.health.epoch,
                "files": result.health.files,
                "uptime_seconds": result.health.uptime_seconds,
                "version": result.health.version,
            }))?);
        }
        Commands::Report {
            test_name,
            source_dir,
            format,
            no_remap,
        } => {
            let result = client.report(&test_name, &source_dir, &format, !no_remap)?;
            for diagnostic in &result.diagnostics {
                warn!(%diagnostic, "Unmapped path");
            }
            if format.contains(&ReportFormat::Text) {
                print!("{}", podcov::report::text::render(&result.summary));
            }
            for output in &result.outputs {
                println!("Wrote {}", output.display());
            }
        }
        Commands::Merge { names, into } => {
            let result = client.merge(&names, &into)?;
            println!(
                "Merged {} snapshots ({} files) into {}",
                result.merged.len(),
                result.files,
                result.path.display()
            );
            if !result.skipped.is_empty() {
                println!("Skipped (not collected): {}", result.skipped.join(", "));
            }
        }
    }
    Ok(())
}
