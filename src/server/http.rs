//! HTTP server implementation
//!
//! hyper http1 with TokioIo: one task per connection, a single top-level
//! dispatcher that delegates to the two route groups.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::dms::DmsService;
use crate::kv::KvStore;
use crate::recovery::RecoveryService;
use crate::routes::{self, handle_dms_request, handle_recovery_request};
use crate::types::{Result, VigilError};

/// Shared application state
///
/// The store connection and the configuration are the only process-wide
/// state; both are built at startup and handed to each service explicitly.
pub struct AppState {
    pub args: Args,
    pub kv: Arc<dyn KvStore>,
    pub recovery: RecoveryService,
    pub dms: DmsService,
}

/// Accept loop. Runs until the process is killed.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| VigilError::Internal(format!("Failed to bind {}: {e}", state.args.listen)))?;

    info!("Vigil listening on {}", state.args.listen);
    if state.args.dev_mode {
        warn!("Development mode enabled - sweep endpoint is unauthenticated");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        debug!("Connection from {} ended: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().split('?').next().unwrap_or("/").to_string();
    debug!(%method, %path, client = %addr, "Request");

    // Route groups own their prefixes and consume the request
    if path.starts_with("/api/recovery") {
        let response = handle_recovery_request(req, state)
            .await
            .unwrap_or_else(routes::not_found);
        return Ok(response);
    }
    if path.starts_with("/api/dms") {
        let response = handle_dms_request(req, state)
            .await
            .unwrap_or_else(routes::not_found);
        return Ok(response);
    }

    let response = match (method, path.as_str()) {
        (Method::OPTIONS, _) => routes::cors_preflight(),

        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(),

        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(state).await
        }

        (Method::GET, "/version") => routes::version_info(),

        _ => routes::not_found(),
    };

    Ok(response)
}
