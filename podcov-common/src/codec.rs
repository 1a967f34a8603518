//! Snapshot blob codec and the JSON envelope the relay serves.
//!
//! The blob is `PCV1` followed by zstd-compressed JSON of a [`Snapshot`].
//! Relay and tunnel layers only ever move it around as bytes; the envelope
//! carries it base64-encoded together with the scrape label and a UTC
//! timestamp.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

/// Magic prefix identifying a snapshot blob.
pub const BLOB_MAGIC: &[u8; 4] = b"PCV1";

const ZSTD_LEVEL: i32 = 3;

/// Stage at which a transport payload failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// Envelope JSON was malformed or missing fields.
    Envelope,
    /// `data` was not valid base64.
    Base64,
    /// Blob did not start with the magic prefix.
    Magic,
    /// zstd frame was corrupt.
    Decompress,
    /// Decompressed bytes were not a snapshot document.
    Json,
}

impl std::fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecodeStage::Envelope => "envelope",
            DecodeStage::Base64 => "base64",
            DecodeStage::Magic => "magic",
            DecodeStage::Decompress => "decompress",
            DecodeStage::Json => "json",
        };
        f.write_str(s)
    }
}

/// Error decoding (or, rarely, encoding) a snapshot payload.
#[derive(Debug, thiserror::Error)]
pub enum TransportDecodeError {
    #[error("payload failed to decode at {stage} stage: {message}")]
    Decode { stage: DecodeStage, message: String },

    #[error("snapshot could not be encoded: {0}")]
    Encode(String),
}

impl TransportDecodeError {
    fn at(stage: DecodeStage, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            stage,
            message: err.to_string(),
        }
    }

    /// The stage that failed, if this is a decode error.
    pub fn stage(&self) -> Option<DecodeStage> {
        match self {
            Self::Decode { stage, .. } => Some(*stage),
            Self::Encode(_) => None,
        }
    }
}

/// Encode a snapshot into an opaque blob.
pub fn encode_blob(snapshot: &Snapshot) -> Result<Vec<u8>, TransportDecodeError> {
    let json = serde_json::to_vec(snapshot).map_err(|e| TransportDecodeError::Encode(e.to_string()))?;
    let compressed =
        zstd::encode_all(json.as_slice(), ZSTD_LEVEL).map_err(|e| TransportDecodeError::Encode(e.to_string()))?;

    let mut blob = Vec::with_capacity(BLOB_MAGIC.len() + compressed.len());
    blob.extend_from_slice(BLOB_MAGIC);
    blob.extend_from_slice(&compressed);
    Ok(blob)
}

/// Decode a blob produced by [`encode_blob`].
pub fn decode_blob(blob: &[u8]) -> Result<Snapshot, TransportDecodeError> {
    let body = blob
        .strip_prefix(BLOB_MAGIC.as_slice())
        .ok_or_else(|| TransportDecodeError::at(DecodeStage::Magic, "missing PCV1 prefix"))?;
    let json = zstd::decode_all(body).map_err(|e| TransportDecodeError::at(DecodeStage::Decompress, e))?;
    serde_json::from_slice(&json).map_err(|e| TransportDecodeError::at(DecodeStage::Json, e))
}

/// JSON body of a `/coverage` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageEnvelope {
    /// Scrape label, usually the test name.
    pub name: String,
    /// Base64 of the snapshot blob.
    pub data: String,
    /// When the snapshot was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl CoverageEnvelope {
    /// Decode the carried snapshot.
    pub fn snapshot(&self) -> Result<Snapshot, TransportDecodeError> {
        decode_blob(&self.blob()?)
    }

    /// Raw blob bytes, base64-decoded.
    pub fn blob(&self) -> Result<Vec<u8>, TransportDecodeError> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| TransportDecodeError::at(DecodeStage::Base64, e))
    }
}

/// Wrap a snapshot into a timestamped envelope.
pub fn encode_envelope(name: &str, snapshot: &Snapshot) -> Result<CoverageEnvelope, TransportDecodeError> {
    let blob = encode_blob(snapshot)?;
    Ok(CoverageEnvelope {
        name: name.to_string(),
        data: STANDARD.encode(blob),
        timestamp: Some(Utc::now()),
    })
}

/// Parse an envelope body and decode the snapshot it carries.
pub fn decode_envelope(body: &[u8]) -> Result<(CoverageEnvelope, Snapshot), TransportDecodeError> {
    let envelope: CoverageEnvelope =
        serde_json::from_slice(body).map_err(|e| TransportDecodeError::at(DecodeStage::Envelope, e))?;
    let snapshot = envelope.snapshot()?;
    Ok((envelope, snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::FileRecord;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new().with_file("/app/app.py", [1, 2, 5]);
        snapshot.insert(
            "/app/lib.py",
            FileRecord {
                lines: [3].into_iter().collect(),
                arcs: [(-1, 3), (3, -1)].into_iter().collect(),
            },
        );
        snapshot
    }

    #[test]
    fn blob_round_trip() {
        let snapshot = sample();
        let blob = encode_blob(&snapshot).unwrap();
        assert!(blob.starts_with(b"PCV1"));
        assert_eq!(decode_blob(&blob).unwrap(), snapshot);
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(encode_blob(&sample()).unwrap(), encode_blob(&sample()).unwrap());
    }

    #[test]
    fn envelope_round_trip_through_json() {
        let envelope = encode_envelope("test_home", &sample()).unwrap();
        let body = serde_json::to_vec(&envelope).unwrap();
        let (parsed, snapshot) = decode_envelope(&body).unwrap();
        assert_eq!(parsed.name, "test_home");
        assert!(parsed.timestamp.is_some());
        assert_eq!(snapshot, sample());
    }

    #[test]
    fn envelope_without_timestamp_is_accepted() {
        let blob = encode_blob(&sample()).unwrap();
        let body = serde_json::json!({ "name": "session", "data": STANDARD.encode(blob) });
        let (parsed, _) = decode_envelope(body.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.timestamp, None);
    }

    #[test]
    fn garbage_is_rejected_with_stage() {
        let err = decode_blob(b"nope").unwrap_err();
        assert_eq!(err.stage(), Some(DecodeStage::Magic));

        let err = decode_blob(b"PCV1not-zstd").unwrap_err();
        assert_eq!(err.stage(), Some(DecodeStage::Decompress));

        let not_snapshot = zstd::encode_all(&b"[1,2,3]"[..], 3).unwrap();
        let mut blob = BLOB_MAGIC.to_vec();
        blob.extend_from_slice(&not_snapshot);
        assert_eq!(decode_blob(&blob).unwrap_err().stage(), Some(DecodeStage::Json));

        let err = decode_envelope(br#"{"name":"x","data":"!!!"}"#).unwrap_err();
        assert_eq!(err.stage(), Some(DecodeStage::Base64));

        let err = decode_envelope(b"<html>").unwrap_err();
        assert_eq!(err.stage(), Some(DecodeStage::Envelope));
    }
}
