//! Shared error type for Vigil
//!
//! Every fault the core distinguishes maps to exactly one HTTP status code;
//! handlers never pick status codes themselves.

use hyper::StatusCode;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T, E = VigilError> = std::result::Result<T, E>;

/// Error kinds the core distinguishes
#[derive(Debug, Error)]
pub enum VigilError {
    /// Missing fields, out-of-range numbers, wrong array shape (400)
    #[error("{0}")]
    Validation(String),

    /// No signature/timestamp or no cron secret where required (401)
    #[error("{0}")]
    AuthMissing(String),

    /// Signature verification failed, timestamp out of skew, cron secret
    /// mismatch, or guardian not authorized for a session (403)
    #[error("{0}")]
    AuthInvalid(String),

    /// No config, no session, no switch, unknown recipient (404)
    #[error("{0}")]
    NotFound(String),

    /// Guardian already approved this session (409)
    #[error("{0}")]
    Conflict(String),

    /// Shares requested before the threshold was reached (403)
    #[error("Not enough guardians have approved yet")]
    NotReady,

    /// Key-value store I/O or protocol failure (500)
    #[error("Store error: {0}")]
    Store(String),

    /// External collaborator (identity resolver, blob store) failure (500)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Serialization or other unhandled server fault (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VigilError {
    /// HTTP status code carrying this error's classification
    pub fn status(&self) -> StatusCode {
        match self {
            VigilError::Validation(_) => StatusCode::BAD_REQUEST,
            VigilError::AuthMissing(_) => StatusCode::UNAUTHORIZED,
            VigilError::AuthInvalid(_) => StatusCode::FORBIDDEN,
            VigilError::NotFound(_) => StatusCode::NOT_FOUND,
            VigilError::Conflict(_) => StatusCode::CONFLICT,
            VigilError::NotReady => StatusCode::FORBIDDEN,
            VigilError::Store(_) | VigilError::Upstream(_) | VigilError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The opaque message returned for every signature sub-check failure.
    ///
    /// Stale timestamp, malformed key, malformed signature, and signature
    /// mismatch all surface identically so callers cannot probe which
    /// check rejected them.
    pub fn bad_signature() -> Self {
        VigilError::AuthInvalid("Invalid signature".to_string())
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(e: serde_json::Error) -> Self {
        VigilError::Internal(format!("Serialization failed: {e}"))
    }
}
