//! HTTP routes for Vigil

pub mod dms_routes;
pub mod health;
pub mod recovery_routes;

pub use dms_routes::handle_dms_request;
pub use health::{health_check, readiness_check, version_info};
pub use recovery_routes::handle_recovery_request;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{Result, VigilError};

/// Uniform error body: `{"error": "<message>"}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Serialize a value into a JSON response with CORS headers.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"error":"Serialization failed"}"#.to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Map a service error onto the uniform error shape.
pub fn error_response(error: &VigilError) -> Response<Full<Bytes>> {
    json_response(
        error.status(),
        &ErrorResponse {
            error: error.to_string(),
        },
    )
}

/// Collapse a service result into a 200-or-error response.
pub fn respond<T: Serialize>(result: Result<T>) -> Response<Full<Bytes>> {
    match result {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(e) => error_response(&e),
    }
}

/// CORS preflight reply shared by both route groups.
pub fn cors_preflight() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, X-Cron-Secret")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Standard replies for unroutable requests within a group.
pub fn not_found() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse {
            error: "Endpoint not found".to_string(),
        },
    )
}

pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorResponse {
            error: "Method not allowed".to_string(),
        },
    )
}

/// Read and deserialize a JSON request body.
pub async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| VigilError::Internal(format!("Failed to read request body: {e}")))?
        .to_bytes();

    serde_json::from_slice(&bytes)
        .map_err(|e| VigilError::Validation(format!("Invalid request body: {e}")))
}
