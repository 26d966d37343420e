//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and the backend

use crate::services::file_registry::Registry;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Always 200; performs no I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Pings the metadata store and probes the active storage backend.
/// HTTP 200 when both pass, 503 otherwise.
pub async fn readyz(State(registry): State<Registry>) -> impl IntoResponse {
    let metadata = CheckStatus::from(
        registry
            .probe_store()
            .await
            .map_err(|e| format!("error: {e}")),
    );
    let storage = CheckStatus::from(
        registry
            .probe_backend()
            .await
            .map_err(|e| format!("error: {e}")),
    );

    let overall_ok = metadata.ok && storage.ok;
    if !overall_ok {
        tracing::warn!(
            metadata = ?metadata.error,
            storage = ?storage.error,
            "readiness check failed"
        );
    }

    let mut checks = HashMap::new();
    checks.insert("metadata", metadata);
    checks.insert("storage", storage);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<Result<(), String>> for CheckStatus {
    fn from(result: Result<(), String>) -> Self {
        Self {
            ok: result.is_ok(),
            error: result.err(),
        }
    }
}
