//! Recovery orchestration service
//!
//! Implements distribute, the guardian queries, the k-of-n session state
//! machine, share release, and revocation over the key-value store. The
//! server never decrypts a share and never verifies that the ciphertexts
//! encode a valid Shamir split; it only guarantees the bookkeeping.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{actions, SignatureVerifier};
use crate::kv::KvStore;
use crate::recovery::records::{
    keys, GuardianShare, RecoveryConfig, RecoverySession, SessionStatus,
};
use crate::types::{Result, VigilError};

/// Sessions and their share records live for 24 hours.
pub const SESSION_TTL_SECONDS: u64 = 24 * 3600;

/// Upper bound on the guardian set.
pub const MAX_GUARDIANS: usize = 10;

/// A single share must be reconstructable only with a second one.
pub const MIN_THRESHOLD: u32 = 2;

// =============================================================================
// Request / Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianShareInput {
    pub pubkey: String,
    pub encrypted_share: String,
    pub share_index: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeRequest {
    pub sender_pubkey: String,
    pub threshold: u32,
    pub guardians: Vec<GuardianShareInput>,
    pub signature: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeResponse {
    pub success: bool,
    pub guardian_count: usize,
    pub threshold: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardiansResponse {
    pub configured: bool,
    pub guardians: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianshipsResponse {
    pub guardianships: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub owner_pubkey: String,
    pub ephemeral_pubkey: String,
    pub requested_guardians: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedResponse {
    pub success: bool,
    pub session_id: String,
    pub threshold: u32,
    pub expires_in: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub status: String,
    pub approvals_received: u32,
    pub threshold_required: u32,
    pub owner_pubkey: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub guardian_pubkey: String,
    pub re_encrypted_share: String,
    pub signature: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveResponse {
    pub approved: bool,
    pub approvals_received: u32,
    pub threshold_required: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasedShare {
    pub guardian_pubkey: String,
    pub re_encrypted_share: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharesResponse {
    pub shares: Vec<ReleasedShare>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    pub sender_pubkey: String,
    pub signature: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeResponse {
    pub success: bool,
}

// =============================================================================
// Service
// =============================================================================

/// Recovery orchestrator over the shared key-value store.
pub struct RecoveryService {
    kv: Arc<dyn KvStore>,
    verifier: SignatureVerifier,
}

impl RecoveryService {
    pub fn new(kv: Arc<dyn KvStore>, verifier: SignatureVerifier) -> Self {
        Self { kv, verifier }
    }

    /// Idempotent replacement of an owner's guardian set: revoke whatever
    /// exists, then write the new config and one share per guardian.
    pub async fn distribute(&self, req: DistributeRequest) -> Result<DistributeResponse> {
        self.verifier.require(
            &req.sender_pubkey,
            req.signature.as_deref(),
            req.timestamp,
            actions::RECOVERY_DISTRIBUTE,
            &[],
        )?;

        validate_distribute(&req)?;

        // Replace, never merge: any previous set is revoked first so no
        // stale share survives a redistribution.
        self.revoke_all(&req.sender_pubkey).await?;

        let created_at = chrono::Utc::now().to_rfc3339();
        let config = RecoveryConfig {
            threshold: req.threshold,
            guardians: req.guardians.iter().map(|g| g.pubkey.clone()).collect(),
            created_at: created_at.clone(),
        };
        self.kv
            .hash_set(&keys::config(&req.sender_pubkey), config.to_fields()?)
            .await?;

        for guardian in &req.guardians {
            let share = GuardianShare {
                encrypted_share: guardian.encrypted_share.clone(),
                share_index: guardian.share_index,
                created_at: created_at.clone(),
            };
            self.kv
                .hash_set(
                    &keys::share(&guardian.pubkey, &req.sender_pubkey),
                    share.to_fields(),
                )
                .await?;
        }

        info!(
            owner = %req.sender_pubkey,
            guardians = req.guardians.len(),
            threshold = req.threshold,
            "Recovery shares distributed"
        );

        Ok(DistributeResponse {
            success: true,
            guardian_count: req.guardians.len(),
            threshold: req.threshold,
        })
    }

    /// Public view of an owner's configuration. The guardian set is not a
    /// secret.
    pub async fn guardians(&self, owner_pubkey: &str) -> Result<GuardiansResponse> {
        match self.load_config(owner_pubkey).await? {
            Some(config) => Ok(GuardiansResponse {
                configured: true,
                guardians: config.guardians,
                threshold: Some(config.threshold),
                created_at: Some(config.created_at),
            }),
            None => Ok(GuardiansResponse {
                configured: false,
                guardians: Vec::new(),
                threshold: None,
                created_at: None,
            }),
        }
    }

    /// Owners this pubkey holds a share for, derived from the share keys.
    pub async fn guardianships(&self, guardian_pubkey: &str) -> Result<GuardianshipsResponse> {
        let prefix = format!("recovery:share:{guardian_pubkey}:");
        let mut owners: Vec<String> = self
            .kv
            .scan_keys(&keys::shares_of_guardian(guardian_pubkey))
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        owners.sort();
        Ok(GuardianshipsResponse { guardianships: owners })
    }

    /// Open an approval session. Unauthenticated by design: the caller
    /// has, by hypothesis, lost every signing key.
    pub async fn request_session(&self, req: SessionRequest) -> Result<SessionCreatedResponse> {
        let config = self
            .load_config(&req.owner_pubkey)
            .await?
            .ok_or_else(|| VigilError::NotFound("No recovery configuration found".to_string()))?;

        if req.requested_guardians.is_empty() {
            return Err(VigilError::Validation(
                "At least one guardian must be requested".to_string(),
            ));
        }
        if req.ephemeral_pubkey.is_empty() {
            return Err(VigilError::Validation(
                "An ephemeral public key is required".to_string(),
            ));
        }
        for guardian in &req.requested_guardians {
            if !config.guardians.contains(guardian) {
                return Err(VigilError::Validation(format!(
                    "{guardian} is not a configured guardian"
                )));
            }
        }

        let session_id = Uuid::new_v4().to_string();
        let session = RecoverySession {
            owner_pubkey: req.owner_pubkey.clone(),
            ephemeral_pubkey: req.ephemeral_pubkey,
            requested_guardians: req.requested_guardians,
            threshold: config.threshold,
            approvals: 0,
            status: SessionStatus::Pending,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let session_key = keys::session(&session_id);
        self.kv.hash_set(&session_key, session.to_fields()?).await?;
        self.kv.expire(&session_key, SESSION_TTL_SECONDS).await?;

        info!(
            owner = %req.owner_pubkey,
            session = %session_id,
            threshold = config.threshold,
            "Recovery session opened"
        );

        Ok(SessionCreatedResponse {
            success: true,
            session_id,
            threshold: config.threshold,
            expires_in: "24h",
        })
    }

    /// Poll a session. Expired sessions have been reaped by TTL and
    /// surface as not-found.
    pub async fn session_status(&self, session_id: &str) -> Result<SessionStatusResponse> {
        let session = self.load_session(session_id).await?;
        Ok(SessionStatusResponse {
            session_id: session_id.to_string(),
            status: session.status.as_str().to_string(),
            approvals_received: session.approvals,
            threshold_required: session.threshold,
            owner_pubkey: session.owner_pubkey,
            created_at: session.created_at,
        })
    }

    /// Record one guardian's approval and its re-encrypted share.
    ///
    /// The share write is set-if-absent, so two racing approvals from the
    /// same guardian resolve to one winner; the loser gets a conflict.
    /// Approvals past the threshold still land (the requester may want
    /// every share that arrives before the session expires).
    pub async fn approve(&self, session_id: &str, req: ApproveRequest) -> Result<ApproveResponse> {
        self.verifier.require(
            &req.guardian_pubkey,
            req.signature.as_deref(),
            req.timestamp,
            actions::RECOVERY_APPROVE,
            &[session_id],
        )?;

        let session_key = keys::session(session_id);
        let session = self.load_session(session_id).await?;

        if !session.requested_guardians.contains(&req.guardian_pubkey) {
            return Err(VigilError::AuthInvalid(
                "Guardian not authorized for this session".to_string(),
            ));
        }
        if req.re_encrypted_share.is_empty() {
            return Err(VigilError::Validation(
                "A re-encrypted share is required".to_string(),
            ));
        }

        // Share records expire with the session, not on their own clock.
        let ttl = self
            .kv
            .ttl_seconds(&session_key)
            .await?
            .unwrap_or(SESSION_TTL_SECONDS);

        let share_key = keys::session_share(session_id, &req.guardian_pubkey);
        let wrote = self
            .kv
            .string_set_if_absent(&share_key, &req.re_encrypted_share, Some(ttl))
            .await?;
        if !wrote {
            return Err(VigilError::Conflict(
                "Guardian has already approved this session".to_string(),
            ));
        }

        let approvals = self.kv.hash_incr(&session_key, "approvals", 1).await?;
        let approvals = u32::try_from(approvals.max(0))
            .map_err(|_| VigilError::Internal("Approval counter overflow".to_string()))?;

        if approvals >= session.threshold && session.status == SessionStatus::Pending {
            self.kv
                .hash_set_field(&session_key, "status", SessionStatus::Ready.as_str())
                .await?;
            info!(
                session = %session_id,
                approvals,
                threshold = session.threshold,
                "Recovery session ready"
            );
        }

        Ok(ApproveResponse {
            approved: true,
            approvals_received: approvals,
            threshold_required: session.threshold,
        })
    }

    /// Release every re-encrypted share of a ready session.
    ///
    /// Unauthenticated by design: each share is a sealed-box ciphertext
    /// addressed to the session's one-time ephemeral key, so possession of
    /// the response is useless to anyone else.
    pub async fn released_shares(&self, session_id: &str) -> Result<SharesResponse> {
        let session = self.load_session(session_id).await?;
        if session.status != SessionStatus::Ready {
            return Err(VigilError::NotReady);
        }

        let prefix = format!("recovery:session:{session_id}:share:");
        let mut shares = Vec::new();
        for key in self.kv.scan_keys(&keys::session_shares(session_id)).await? {
            let Some(guardian) = key.strip_prefix(&prefix) else {
                continue;
            };
            match self.kv.string_get(&key).await? {
                Some(share) => shares.push(ReleasedShare {
                    guardian_pubkey: guardian.to_string(),
                    re_encrypted_share: share,
                }),
                // Reaped between scan and read; the session TTL is near.
                None => warn!(session = %session_id, guardian, "Session share vanished mid-release"),
            }
        }
        shares.sort_by(|a, b| a.guardian_pubkey.cmp(&b.guardian_pubkey));

        Ok(SharesResponse { shares })
    }

    /// Delete the config and every share. Idempotent: revoking a
    /// never-configured owner is a no-op success.
    pub async fn revoke(&self, req: RevokeRequest) -> Result<RevokeResponse> {
        self.verifier.require(
            &req.sender_pubkey,
            req.signature.as_deref(),
            req.timestamp,
            actions::RECOVERY_REVOKE,
            &[],
        )?;

        self.revoke_all(&req.sender_pubkey).await?;
        info!(owner = %req.sender_pubkey, "Recovery configuration revoked");
        Ok(RevokeResponse { success: true })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load_config(&self, owner_pubkey: &str) -> Result<Option<RecoveryConfig>> {
        match self.kv.hash_get_all(&keys::config(owner_pubkey)).await? {
            Some(map) => Ok(Some(RecoveryConfig::from_hash(&map)?)),
            None => Ok(None),
        }
    }

    async fn load_session(&self, session_id: &str) -> Result<RecoverySession> {
        let map = self
            .kv
            .hash_get_all(&keys::session(session_id))
            .await?
            .ok_or_else(|| VigilError::NotFound("Session not found or expired".to_string()))?;
        RecoverySession::from_hash(&map)
    }

    /// Shares first, config last: a crash mid-way leaves a config whose
    /// next distribute or revoke re-runs the same deletes.
    async fn revoke_all(&self, owner_pubkey: &str) -> Result<()> {
        let Some(config) = self.load_config(owner_pubkey).await? else {
            return Ok(());
        };
        for guardian in &config.guardians {
            self.kv.delete(&keys::share(guardian, owner_pubkey)).await?;
        }
        self.kv.delete(&keys::config(owner_pubkey)).await?;
        Ok(())
    }
}

fn validate_distribute(req: &DistributeRequest) -> Result<()> {
    if req.threshold < MIN_THRESHOLD {
        return Err(VigilError::Validation(format!(
            "Threshold must be at least {MIN_THRESHOLD}"
        )));
    }
    if (req.guardians.len() as u32) < req.threshold {
        return Err(VigilError::Validation(
            "Threshold cannot exceed the number of guardians".to_string(),
        ));
    }
    if req.guardians.len() > MAX_GUARDIANS {
        return Err(VigilError::Validation(format!(
            "At most {MAX_GUARDIANS} guardians are supported"
        )));
    }

    let n = req.guardians.len() as u32;
    let mut seen = vec![false; req.guardians.len()];
    for guardian in &req.guardians {
        if guardian.pubkey.is_empty() {
            return Err(VigilError::Validation(
                "Guardian pubkey must not be empty".to_string(),
            ));
        }
        if guardian.encrypted_share.is_empty() {
            return Err(VigilError::Validation(
                "Guardian share must not be empty".to_string(),
            ));
        }
        if guardian.share_index >= n {
            return Err(VigilError::Validation(format!(
                "Share index {} out of range 0..{}",
                guardian.share_index, n
            )));
        }
        let idx = guardian.share_index as usize;
        if seen[idx] {
            return Err(VigilError::Validation(format!(
                "Duplicate share index {}",
                guardian.share_index
            )));
        }
        seen[idx] = true;
    }

    Ok(())
}
