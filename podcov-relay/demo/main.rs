//! podcov demo - a small web app that measures itself.
//!
//! Serves `/`, `/status` and `/untested` on the app port and the coverage
//! relay alongside it, so the whole collect/remap/report pipeline can be
//! exercised against a real pod.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, routing::get};
use clap::Parser;
use serde::Serialize;
use tracing::info;

use podcov_common::{LogConfig, SnapshotStore, init_logging};
use podcov_relay::{LineTracer, RelayConfig, RelayServer, probe};

#[derive(Parser)]
#[command(name = "podcov-demo")]
#[command(author, version, about = "Demo application with an embedded coverage relay")]
struct Cli {
    /// Address the application listens on
    #[arg(long, default_value = "0.0.0.0:8080", env = "PODCOV_DEMO_ADDR")]
    addr: SocketAddr,

    /// Directory the sources live under inside the container
    #[arg(long, default_value = "/app", env = "PODCOV_DEMO_ROOT")]
    source_root: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Status {
    status: &'static str,
    version: &'static str,
    time: chrono::DateTime<chrono::Utc>,
}

async fn index(State(tracer): State<Arc<LineTracer>>) -> &'static str {
    probe!(tracer);
    "podcov demo\n"
}

async fn status(State(tracer): State<Arc<LineTracer>>) -> Json<Status> {
    probe!(tracer);
    let status = Status {
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
        time: chrono::Utc::now(),
    };
    probe!(tracer);
    Json(status)
}

// Deliberately left out of the end-to-end requests so reports show misses.
async fn untested(State(tracer): State<Arc<LineTracer>>) -> &'static str {
    probe!(tracer);
    "this route is not covered by the tests\n"
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let relay_config = RelayConfig::from_env().context("invalid relay configuration")?;
    let store = Arc::new(SnapshotStore::with_exclusions(relay_config.exclusion_policy()?));
    let relay = RelayServer::start(&relay_config, store.clone()).context("failed to start coverage relay")?;

    let tracer = Arc::new(LineTracer::new(store, &cli.source_root));
    probe!(tracer);

    let app = Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/untested", get(untested))
        .with_state(tracer);

    let listener = tokio::net::TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;
    info!(app = %cli.addr, relay = %relay.local_addr(), "podcov demo started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    relay.shutdown();
    Ok(())
}
