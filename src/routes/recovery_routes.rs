//! HTTP routes for the recovery orchestrator
//!
//! - POST   /api/recovery/distribute           - store config + guardian shares (signed)
//! - GET    /api/recovery/guardians/:pubkey    - public guardian set of an owner
//! - GET    /api/recovery/guardianships/:pubkey - owners a guardian holds shares for
//! - POST   /api/recovery/request              - open an approval session (open by design)
//! - GET    /api/recovery/session/:id/status   - poll a session
//! - POST   /api/recovery/session/:id/approve  - record a guardian approval (signed)
//! - GET    /api/recovery/session/:id/shares   - release re-encrypted shares (open by design)
//! - DELETE /api/recovery/revoke               - delete config + shares (signed)

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::sync::Arc;
use tracing::debug;

use crate::routes::{cors_preflight, method_not_allowed, not_found, read_json, respond};
use crate::server::AppState;

const PREFIX: &str = "/api/recovery";

/// Dispatch `/api/recovery/*`. `None` when the path belongs elsewhere.
pub async fn handle_recovery_request(
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
    debug!(%method, %path, "Recovery request");

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/api/recovery/distribute") => match read_json(req).await {
            Ok(body) => respond(state.recovery.distribute(body).await),
            Err(e) => respond::<()>(Err(e)),
        },
        (_, "/api/recovery/distribute") => method_not_allowed(),

        (&Method::POST, "/api/recovery/request") => match read_json(req).await {
            Ok(body) => respond(state.recovery.request_session(body).await),
            Err(e) => respond::<()>(Err(e)),
        },
        (_, "/api/recovery/request") => method_not_allowed(),

        (&Method::DELETE, "/api/recovery/revoke") => match read_json(req).await {
            Ok(body) => respond(state.recovery.revoke(body).await),
            Err(e) => respond::<()>(Err(e)),
        },
        (_, "/api/recovery/revoke") => method_not_allowed(),

        (&Method::GET, p) if p.starts_with("/api/recovery/guardians/") => {
            let owner = &p["/api/recovery/guardians/".len()..];
            respond(state.recovery.guardians(owner).await)
        }

        (&Method::GET, p) if p.starts_with("/api/recovery/guardianships/") => {
            let guardian = &p["/api/recovery/guardianships/".len()..];
            respond(state.recovery.guardianships(guardian).await)
        }

        (&Method::GET, p) => match session_route(p) {
            Some((session_id, "status")) => respond(state.recovery.session_status(session_id).await),
            Some((session_id, "shares")) => respond(state.recovery.released_shares(session_id).await),
            _ => not_found(),
        },

        (&Method::POST, p) => match session_route(p) {
            Some((session_id, "approve")) => {
                let session_id = session_id.to_string();
                match read_json(req).await {
                    Ok(body) => respond(state.recovery.approve(&session_id, body).await),
                    Err(e) => respond::<()>(Err(e)),
                }
            }
            _ => not_found(),
        },

        _ => not_found(),
    };

    Some(response)
}

/// Split `/api/recovery/session/{id}/{verb}` into its parts.
fn session_route(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("/api/recovery/session/")?;
    let mut parts = rest.splitn(2, '/');
    let session_id = parts.next()?;
    let verb = parts.next()?;
    if session_id.is_empty() || verb.contains('/') {
        return None;
    }
    Some((session_id, verb))
}
