//! Health check endpoints
//!
//! - /health, /healthz - liveness (is the service running?)
//! - /ready, /readyz   - readiness (can the service reach the store?)
//! - /version          - build information

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::json_response;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness probe: 200 whenever the process is up.
pub fn health_check() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &HealthResponse {
            healthy: true,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: chrono::Utc::now().to_rfc3339(),
        },
    )
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness probe: 200 only when the key-value store answers.
pub async fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.kv.ping().await {
        Ok(()) => json_response(StatusCode::OK, &ReadinessResponse { ready: true, error: None }),
        Err(e) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &ReadinessResponse {
                ready: false,
                error: Some(e.to_string()),
            },
        ),
    }
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub service: &'static str,
}

/// Build information for deployment verification.
pub fn version_info() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            version: env!("CARGO_PKG_VERSION"),
            commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
            service: "vigil",
        },
    )
}
