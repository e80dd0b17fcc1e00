//! Username resolution
//!
//! The identity registry (an external service fronting the on-chain
//! username contract) maps usernames to recipient public keys. The core
//! has no other opinion about it.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::types::{Result, VigilError};

/// A registered identity as the resolver reports it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub username: String,
    pub pubkey: String,
}

/// Resolves a username to its registered identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` means the username is not registered; errors are
    /// resolver faults.
    async fn resolve(&self, username: &str) -> Result<Option<ResolvedIdentity>>;
}

/// HTTP resolver against `IDENTITY_LOOKUP_ENDPOINT`.
///
/// Expects `GET {endpoint}/{username}` to answer 200 with
/// `{username, pubkey}` or 404 for an unknown name.
pub struct HttpIdentityResolver {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpIdentityResolver {
    pub fn new(endpoint: Option<String>, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn resolve(&self, username: &str) -> Result<Option<ResolvedIdentity>> {
        let Some(endpoint) = &self.endpoint else {
            return Err(VigilError::Upstream(
                "IDENTITY_LOOKUP_ENDPOINT is not configured".to_string(),
            ));
        };

        let url = format!("{}/{}", endpoint.trim_end_matches('/'), username);
        debug!(url = %url, "Resolving username");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VigilError::Upstream(format!("Identity lookup failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(VigilError::Upstream(format!(
                "Identity lookup returned {}",
                response.status()
            )));
        }

        let identity: ResolvedIdentity = response
            .json()
            .await
            .map_err(|e| VigilError::Upstream(format!("Identity lookup body malformed: {e}")))?;
        Ok(Some(identity))
    }
}

/// Fixed-table resolver for tests.
pub struct StaticIdentityResolver {
    identities: HashMap<String, String>,
}

impl StaticIdentityResolver {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            identities: pairs
                .iter()
                .map(|(username, pubkey)| (username.to_string(), pubkey.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, username: &str) -> Result<Option<ResolvedIdentity>> {
        Ok(self.identities.get(username).map(|pubkey| ResolvedIdentity {
            username: username.to_string(),
            pubkey: pubkey.clone(),
        }))
    }
}
