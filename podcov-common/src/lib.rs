//! Shared types and utilities for podcov.
//!
//! The remote side (relay) and the local side (client) agree on three
//! things defined here: the [`Snapshot`] data model, the opaque blob and
//! JSON envelope that carry it over HTTP, and the [`SnapshotStore`] that
//! accumulates observations inside the measured process.

pub mod codec;
pub mod config;
pub mod logging;
pub mod retry;
pub mod snapshot;
pub mod store;

pub use codec::{
    CoverageEnvelope, DecodeStage, TransportDecodeError, decode_blob, decode_envelope, encode_blob,
    encode_envelope,
};
pub use config::{ConfigSource, EnvError, EnvParser, Sourced};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use retry::{RetryPolicy, RetryableError, run_with_retry};
pub use snapshot::{FileRecord, LineArc, Snapshot};
pub use store::{ExclusionPolicy, PatternError, SnapshotStore, StoreStats};

/// Default port the relay listens on inside the remote process.
pub const DEFAULT_RELAY_PORT: u16 = 9095;

/// Label used when a scrape does not name its test.
pub const DEFAULT_SNAPSHOT_LABEL: &str = "session";
