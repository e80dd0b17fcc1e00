//! Vigil - guardian recovery and dead-man's-switch service

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil::auth::SignatureVerifier;
use vigil::config::Args;
use vigil::dms::DmsService;
use vigil::kv::RedisStore;
use vigil::recovery::RecoveryService;
use vigil::server::{self, AppState};
use vigil::services::{HttpBlobStore, HttpIdentityResolver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vigil={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Vigil - recovery & dead-man's switch");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("KV store: {}", args.kv_url);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!(
        "Blob store: {}",
        args.blob_upload_endpoint.as_deref().unwrap_or("(none - local fallback only)")
    );
    info!(
        "Identity resolver: {}",
        args.identity_lookup_endpoint.as_deref().unwrap_or("(none)")
    );
    info!("Signature skew: {}s", args.signature_skew_seconds);
    info!("======================================");

    let kv = match RedisStore::connect(&args.kv_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Key-value store connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let verifier = SignatureVerifier::new(args.signature_skew_seconds);
    let identity = Arc::new(HttpIdentityResolver::new(
        args.identity_lookup_endpoint.clone(),
        args.upstream_timeout_ms,
    ));
    let blobs = Arc::new(HttpBlobStore::new(
        args.blob_upload_endpoint.clone(),
        args.upstream_timeout_ms,
    ));

    let recovery = RecoveryService::new(kv.clone(), verifier.clone());
    let dms = DmsService::new(
        kv.clone(),
        verifier,
        identity,
        blobs,
        args.dms_cron_secret.clone(),
    );

    let state = Arc::new(AppState {
        args,
        kv,
        recovery,
        dms,
    });

    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
