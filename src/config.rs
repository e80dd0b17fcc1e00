//! Configuration for Vigil
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;

/// Vigil - guardian recovery and dead-man's-switch service
#[derive(Parser, Debug, Clone)]
#[command(name = "vigil")]
#[command(about = "Holds encrypted key shares for guardians and timed message releases")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Key-value store connection URL
    #[arg(long, env = "KV_URL", default_value = "redis://127.0.0.1:6379")]
    pub kv_url: String,

    /// External permanent-storage endpoint for switch ciphertexts
    /// When unset or unreachable, payloads fall back to the local store
    #[arg(long, env = "BLOB_UPLOAD_ENDPOINT")]
    pub blob_upload_endpoint: Option<String>,

    /// External username -> pubkey resolver endpoint
    #[arg(long, env = "IDENTITY_LOOKUP_ENDPOINT")]
    pub identity_lookup_endpoint: Option<String>,

    /// Shared secret required by the /api/dms/process sweep endpoint
    #[arg(long, env = "DMS_CRON_SECRET")]
    pub dms_cron_secret: Option<String>,

    /// Signed-request freshness window in seconds
    #[arg(long, env = "SIGNATURE_SKEW_SECONDS", default_value = "300")]
    pub signature_skew_seconds: u64,

    /// Outbound request timeout for collaborators, in milliseconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", default_value = "10000")]
    pub upstream_timeout_ms: u64,

    /// Enable development mode (cron secret optional, sweep open)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.dms_cron_secret.is_none() {
            return Err("DMS_CRON_SECRET is required in production mode".to_string());
        }

        if self.signature_skew_seconds == 0 {
            return Err("SIGNATURE_SKEW_SECONDS must be greater than zero".to_string());
        }

        Ok(())
    }
}
