//! Relay server lifecycle.
//!
//! The relay runs on its own OS thread with a current-thread tokio runtime,
//! so embedding it never requires the measured program to be async and a
//! relay failure never unwinds into the program's threads.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use podcov_common::SnapshotStore;

use crate::config::RelayConfig;
use crate::http_api::{HttpState, create_router};

/// Failure to start the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind relay on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start relay thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// Entry point for starting the relay.
pub struct RelayServer;

impl RelayServer {
    /// Bind the listener and start serving on a background thread.
    ///
    /// Returns once the socket is bound, so address-in-use and permission
    /// errors surface here rather than on the relay thread.
    pub fn start(config: &RelayConfig, store: Arc<SnapshotStore>) -> Result<RelayHandle, RelayError> {
        let listener = std::net::TcpListener::bind(config.bind).map_err(|source| RelayError::Bind {
            addr: config.bind,
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| RelayError::Bind {
                addr: config.bind,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| RelayError::Bind {
            addr: config.bind,
            source,
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let state = HttpState::new(store);

        let thread = std::thread::Builder::new()
            .name("podcov-relay".into())
            .spawn(move || serve(listener, state, shutdown_rx))
            .map_err(RelayError::Thread)?;

        info!(%local_addr, "Coverage relay listening");
        Ok(RelayHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

fn serve(listener: std::net::TcpListener, state: HttpState, shutdown: oneshot::Receiver<()>) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "Failed to build relay runtime");
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(l) => l,
            Err(err) => {
                error!(error = %err, "Failed to register relay listener");
                return;
            }
        };
        let router = create_router(state);
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown.await;
            })
            .await;
        if let Err(err) = result {
            error!(error = %err, "Relay serve loop failed");
        }
    });
}

/// Running relay. Dropping the handle stops the relay.
pub struct RelayHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Address the relay is bound to (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the relay thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(addr = %self.local_addr, "Relay thread panicked");
            } else {
                info!(addr = %self.local_addr, "Coverage relay stopped");
            }
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
