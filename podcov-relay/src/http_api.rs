//! HTTP API of the coverage relay.
//!
//! Provides:
//! - `/coverage?name=<label>` - current snapshot as a JSON envelope
//! - `/coverage/reset` - discard recorded data, start a new epoch
//! - `/health` - liveness and store counters
//!
//! Any other path is answered with 404.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tracing::{debug, error, info};

use podcov_common::{DEFAULT_SNAPSHOT_LABEL, SnapshotStore, encode_envelope};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Store read on every scrape.
    pub store: Arc<SnapshotStore>,
    /// Relay version.
    pub version: &'static str,
    /// Relay start time.
    pub started_at: Instant,
}

impl HttpState {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self {
            store,
            version: env!("CARGO_PKG_VERSION"),
            started_at: Instant::now(),
        }
    }
}

/// Create the relay router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/coverage", get(coverage_handler))
        .route("/coverage/reset", get(reset_handler))
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(Arc::new(state))
}

/// Handler for `/coverage` - snapshot, encode, wrap in an envelope.
async fn coverage_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let label = params
        .get("name")
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_SNAPSHOT_LABEL);

    let snapshot = state.store.snapshot();
    match encode_envelope(label, &snapshot) {
        Ok(envelope) => {
            debug!(label, files = snapshot.len(), bytes = envelope.data.len(), "Serving coverage snapshot");
            (StatusCode::OK, Json(envelope)).into_response()
        }
        Err(e) => {
            error!(label, error = %e, "Failed to encode coverage snapshot");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Handler for `/coverage/reset`.
async fn reset_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let epoch = state.store.reset();
    info!(epoch, "Coverage reset via relay");
    Json(json!({ "status": "reset", "epoch": epoch }))
}

/// Handler for `/health` - reads counters only, never copies the store.
async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let stats = state.store.stats();

    Json(json!({
        "status": "ok",
        "coverage_enabled": true,
        "epoch": stats.epoch,
        "files": stats.files,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "version": state.version,
    }))
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use podcov_common::{Snapshot, decode_envelope};
    use tower::ServiceExt;

    fn make_test_state() -> HttpState {
        let store = Arc::new(SnapshotStore::new());
        HttpState {
            store,
            version: "0.3.0-test",
            started_at: Instant::now(),
        }
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value, Vec<u8>) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = make_test_state();
        state.store.record("/app/app.py", 1);
        let (status, json, _) = get_json(create_router(state), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["coverage_enabled"], true);
        assert_eq!(json["files"], 1);
        assert_eq!(json["epoch"], 0);
        assert_eq!(json["version"], "0.3.0-test");
    }

    #[tokio::test]
    async fn test_coverage_endpoint_returns_envelope() {
        let state = make_test_state();
        state.store.record_lines("/app/app.py", [1, 2, 5]);
        let (status, json, body) = get_json(create_router(state), "/coverage?name=test_home").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "test_home");
        assert!(json["timestamp"].is_string());

        let (_, snapshot) = decode_envelope(&body).unwrap();
        assert_eq!(snapshot, Snapshot::new().with_file("/app/app.py", [1, 2, 5]));
    }

    #[tokio::test]
    async fn test_coverage_label_defaults_to_session() {
        let (_, json, _) = get_json(create_router(make_test_state()), "/coverage").await;
        assert_eq!(json["name"], "session");

        let (_, json, _) = get_json(create_router(make_test_state()), "/coverage?name=").await;
        assert_eq!(json["name"], "session");
    }

    #[tokio::test]
    async fn test_reset_endpoint_clears_store() {
        let state = make_test_state();
        state.store.record("/app/f.py", 1);
        let store = state.store.clone();
        let router = create_router(state);

        let (status, json, _) = get_json(router.clone(), "/coverage/reset").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "reset");
        assert_eq!(json["epoch"], 1);
        assert!(store.snapshot().is_empty());

        store.record("/app/f.py", 2);
        let (_, _, body) = get_json(router, "/coverage").await;
        let (_, snapshot) = decode_envelope(&body).unwrap();
        assert_eq!(snapshot, Snapshot::new().with_file("/app/f.py", [2]));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let (status, json, _) = get_json(create_router(make_test_state()), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not found");
    }
}
