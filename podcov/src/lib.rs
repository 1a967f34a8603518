//! podcov client library.
//!
//! Opens a tunnel to the coverage relay inside a pod, fetches and persists
//! snapshots, reconciles container paths with the local source tree and
//! renders reports.

pub mod client;
pub mod config;
pub mod remap;
pub mod report;
pub mod tunnel;

pub use client::{
    CollectionError, CollectionFailure, CollectionResult, CoverageClient, HealthResult, MergeResult, Phase,
    RelayHealth, RelayUnavailableError, ReportResult, ResetResult, Target,
};
pub use config::{ClientConfig, ClientConfigError, ClientOverrides, file_label};
pub use remap::{Diagnostic, PathMapping, RemapOptions, RemapOutcome, remap, remap_with};
pub use report::{CoverageSummary, ReportFormat, summarize};
pub use tunnel::{
    DirectTunnel, EndpointId, NativeTunnel, ProcessTunnel, TunnelBackend, TunnelConfig, TunnelError, TunnelHandle,
    TunnelKind, backend_for, open_with_timeout,
};
