//! HTTP routes for the dead-man's-switch scheduler
//!
//! - POST   /api/dms/create             - arm a switch (signed)
//! - POST   /api/dms/checkin            - prove liveness (signed)
//! - GET    /api/dms/list/:pubkey       - metadata for a sender's switches
//! - GET    /api/dms/release/:switchId  - pull a released message
//! - DELETE /api/dms/:switchId          - disarm a switch (signed)
//! - POST   /api/dms/process            - sweep overdue switches (cron secret)

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::debug;

use crate::routes::{
    cors_preflight, method_not_allowed, not_found, read_json, respond,
};
use crate::server::AppState;

const PREFIX: &str = "/api/dms";

/// Header carrying the sweep shared secret
const CRON_SECRET_HEADER: &str = "X-Cron-Secret";

/// Dispatch `/api/dms/*`. `None` when the path belongs elsewhere.
pub async fn handle_dms_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Option<Response<Full<Bytes>>> {
    let path = req.uri().path();
    if !path.starts_with(PREFIX) {
        return None;
    }

    if req.method() == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let path = path.split('?').next().unwrap_or(path).to_string();
    let method = req.method().clone();
    debug!(%method, %path, "DMS request");

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/api/dms/create") => match read_json(req).await {
            Ok(body) => respond(state.dms.create(body).await),
            Err(e) => respond::<()>(Err(e)),
        },
        (_, "/api/dms/create") => method_not_allowed(),

        (&Method::POST, "/api/dms/checkin") => match read_json(req).await {
            Ok(body) => respond(state.dms.checkin(body).await),
            Err(e) => respond::<()>(Err(e)),
        },
        (_, "/api/dms/checkin") => method_not_allowed(),

        (&Method::POST, "/api/dms/process") => {
            let secret = req
                .headers()
                .get(CRON_SECRET_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            respond(state.dms.process(secret.as_deref()).await)
        }
        (_, "/api/dms/process") => method_not_allowed(),

        (&Method::GET, p) if p.starts_with("/api/dms/list/") => {
            let pubkey = &p["/api/dms/list/".len()..];
            respond(state.dms.list(pubkey).await)
        }

        (&Method::GET, p) if p.starts_with("/api/dms/release/") => {
            let switch_id = &p["/api/dms/release/".len()..];
            match state.dms.release_record(switch_id).await {
                // Already JSON; pass the stored record through verbatim
                Ok(record) => Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "application/json")
                    .header("Access-Control-Allow-Origin", "*")
                    .body(Full::new(Bytes::from(record)))
                    .unwrap(),
                Err(e) => crate::routes::error_response(&e),
            }
        }

        (&Method::DELETE, p) => match switch_route(p) {
            Some(switch_id) => {
                let switch_id = switch_id.to_string();
                match read_json(req).await {
                    Ok(body) => respond(state.dms.cancel(&switch_id, body).await),
                    Err(e) => respond::<()>(Err(e)),
                }
            }
            None => not_found(),
        },

        _ => not_found(),
    };

    Some(response)
}

/// Extract the switch id from `/api/dms/{switchId}`, rejecting paths that
/// shadow the named endpoints.
fn switch_route(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/api/dms/")?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    match rest {
        "create" | "checkin" | "process" | "list" | "release" => None,
        switch_id => Some(switch_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_route_parsing() {
        assert_eq!(switch_route("/api/dms/abc-123"), Some("abc-123"));
        assert_eq!(switch_route("/api/dms/"), None);
        assert_eq!(switch_route("/api/dms/abc/def"), None);
        assert_eq!(switch_route("/api/dms/create"), None);
        assert_eq!(switch_route("/api/dms/process"), None);
    }
}
