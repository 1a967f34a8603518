//! Coverage relay embedded in the measured process.
//!
//! Start it with [`RelayServer::start`], handing over the same
//! [`SnapshotStore`](podcov_common::SnapshotStore) the program records into.

pub mod config;
pub mod http_api;
pub mod probe;
pub mod server;

pub use config::{RelayConfig, RelayConfigError};
pub use http_api::{HttpState, create_router};
pub use probe::LineTracer;
pub use server::{RelayError, RelayHandle, RelayServer};
