//! Shared fixtures: real keypairs, real signatures, in-memory store and
//! collaborators.
#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use std::sync::Arc;

use vigil::auth::SignatureVerifier;
use vigil::dms::DmsService;
use vigil::kv::MemoryStore;
use vigil::recovery::RecoveryService;
use vigil::services::{MemoryBlobStore, StaticIdentityResolver};

pub const CRON_SECRET: &str = "test-cron-secret";

/// A signing identity with its base58 pubkey.
pub struct Identity {
    key: SigningKey,
    pub pubkey: String,
}

impl Identity {
    pub fn generate() -> Self {
        let key = SigningKey::generate(&mut OsRng);
        let pubkey = bs58::encode(key.verifying_key().to_bytes()).into_string();
        Self { key, pubkey }
    }

    /// Sign the canonical challenge for `action`/`params` at the current
    /// time, returning `(signature, timestamp)` as a request carries them.
    pub fn sign(&self, action: &str, params: &[&str]) -> (Option<String>, Option<i64>) {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let challenge = SignatureVerifier::challenge(action, params, timestamp);
        let signature = BASE64.encode(self.key.sign(challenge.as_bytes()).to_bytes());
        (Some(signature), Some(timestamp))
    }
}

/// Both services wired over one in-memory store.
pub struct Harness {
    pub kv: Arc<MemoryStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub recovery: RecoveryService,
    pub dms: DmsService,
}

impl Harness {
    /// Identity table shared by every test; blob uploads succeed.
    pub fn new(identities: &[(&str, &str)]) -> Self {
        Self::build(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::new()),
            identities,
        )
    }

    /// Same, but with the external blob store down.
    pub fn with_failing_blobs(identities: &[(&str, &str)]) -> Self {
        Self::build(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::failing()),
            identities,
        )
    }

    /// Rebuild the services over the same store and blobs with a different
    /// identity table, as if the registry changed between requests.
    pub fn with_identities(&self, identities: &[(&str, &str)]) -> Self {
        Self::build(self.kv.clone(), self.blobs.clone(), identities)
    }

    fn build(
        kv: Arc<MemoryStore>,
        blobs: Arc<MemoryBlobStore>,
        identities: &[(&str, &str)],
    ) -> Self {
        let verifier = SignatureVerifier::new(300);
        let resolver = Arc::new(StaticIdentityResolver::new(identities));

        let recovery = RecoveryService::new(kv.clone(), verifier.clone());
        let dms = DmsService::new(
            kv.clone(),
            verifier,
            resolver,
            blobs.clone(),
            Some(CRON_SECRET.to_string()),
        );

        Self {
            kv,
            blobs,
            recovery,
            dms,
        }
    }
}
