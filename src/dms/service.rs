//! Dead-man's-switch service
//!
//! Switch lifecycle (create, check-in, cancel, list) and the periodic
//! sweep that releases overdue messages. The sweep is a single-shot
//! endpoint driven by an external scheduler; the service owns no
//! background loop.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{actions, SignatureVerifier};
use crate::dms::records::{keys, DmsSwitch, SwitchStatus, LOCAL_HANDLE_PREFIX};
use crate::kv::KvStore;
use crate::services::{BlobStore, IdentityResolver};
use crate::types::{Result, VigilError};

/// Interval bounds: one hour to one year.
pub const MIN_INTERVAL_HOURS: u32 = 1;
pub const MAX_INTERVAL_HOURS: u32 = 8760;

/// Fallback payloads outlive any legal deadline.
pub const FALLBACK_PAYLOAD_TTL_SECONDS: u64 = 365 * 24 * 3600;

/// Released messages wait 90 days for the recipient to pull them.
pub const RELEASE_TTL_SECONDS: u64 = 90 * 24 * 3600;

// =============================================================================
// Request / Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSwitchRequest {
    pub recipient_username: String,
    pub encrypted_message: String,
    pub check_in_interval_hours: u32,
    pub sender_pubkey: String,
    pub signature: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSwitchResponse {
    pub success: bool,
    pub switch_id: String,
    pub next_deadline: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinRequest {
    pub sender_pubkey: String,
    pub signature: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinResponse {
    pub success: bool,
    pub checked_in: bool,
    pub switch_count: usize,
    /// Latest of the bumped deadlines; absent when no switch was active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_deadline: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub sender_pubkey: String,
    pub signature: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
}

/// Metadata-only view of a switch. Ciphertexts are never listed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchSummary {
    pub switch_id: String,
    pub recipient_username: String,
    pub interval_hours: u32,
    pub next_deadline: String,
    pub status: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSwitchesResponse {
    pub switches: Vec<SwitchSummary>,
}

/// Sweep summary. Per-switch failures land in `errors` without aborting
/// the batch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub processed: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// The record a recipient pulls from `dms:release:{switchId}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub switch_id: String,
    pub sender_pubkey: String,
    pub recipient_username: String,
    pub encrypted_message: String,
    pub triggered_at: String,
}

// =============================================================================
// Service
// =============================================================================

/// DMS scheduler over the shared key-value store.
pub struct DmsService {
    kv: Arc<dyn KvStore>,
    verifier: SignatureVerifier,
    identity: Arc<dyn IdentityResolver>,
    blobs: Arc<dyn BlobStore>,
    /// Shared secret for the sweep endpoint; `None` only in dev mode
    cron_secret: Option<String>,
}

impl DmsService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        verifier: SignatureVerifier,
        identity: Arc<dyn IdentityResolver>,
        blobs: Arc<dyn BlobStore>,
        cron_secret: Option<String>,
    ) -> Self {
        Self {
            kv,
            verifier,
            identity,
            blobs,
            cron_secret,
        }
    }

    /// Create a switch: resolve the recipient, park the ciphertext, arm
    /// the deadline.
    pub async fn create(&self, req: CreateSwitchRequest) -> Result<CreateSwitchResponse> {
        self.create_at(Utc::now(), req).await
    }

    /// `create` against an explicit clock. Used by the wrapper and by tests.
    pub async fn create_at(
        &self,
        now: DateTime<Utc>,
        req: CreateSwitchRequest,
    ) -> Result<CreateSwitchResponse> {
        self.verifier.require(
            &req.sender_pubkey,
            req.signature.as_deref(),
            req.timestamp,
            actions::DMS_CREATE,
            &[&req.recipient_username],
        )?;

        if !(MIN_INTERVAL_HOURS..=MAX_INTERVAL_HOURS).contains(&req.check_in_interval_hours) {
            return Err(VigilError::Validation(format!(
                "Check-in interval must be between {MIN_INTERVAL_HOURS} and {MAX_INTERVAL_HOURS} hours"
            )));
        }
        if req.encrypted_message.is_empty() {
            return Err(VigilError::Validation(
                "An encrypted message is required".to_string(),
            ));
        }

        if self.identity.resolve(&req.recipient_username).await?.is_none() {
            return Err(VigilError::NotFound(format!(
                "Recipient username '{}' is not registered",
                req.recipient_username
            )));
        }

        // Prefer permanent storage; a store outage silently degrades to a
        // payload parked in the key-value store. The caller is not told.
        let payload_handle = match self.blobs.upload(&req.encrypted_message).await {
            Ok(blob_id) => blob_id,
            Err(e) => {
                warn!(error = %e, "Blob upload failed, parking payload locally");
                let local_id = Uuid::new_v4().to_string();
                self.kv
                    .string_set(
                        &keys::fallback_payload(&local_id),
                        &req.encrypted_message,
                        Some(FALLBACK_PAYLOAD_TTL_SECONDS),
                    )
                    .await?;
                format!("{LOCAL_HANDLE_PREFIX}{local_id}")
            }
        };

        let switch_id = Uuid::new_v4().to_string();
        let next_deadline = (now + Duration::hours(req.check_in_interval_hours as i64)).to_rfc3339();
        let switch = DmsSwitch {
            switch_id: switch_id.clone(),
            sender_pubkey: req.sender_pubkey.clone(),
            recipient_username: req.recipient_username.clone(),
            payload_handle,
            interval_hours: req.check_in_interval_hours,
            next_deadline: next_deadline.clone(),
            status: SwitchStatus::Active,
            created_at: now.to_rfc3339(),
            triggered_at: None,
        };

        self.kv
            .hash_set(&keys::switch(&switch_id), switch.to_fields())
            .await?;
        self.kv
            .set_add(&keys::user_index(&req.sender_pubkey), &switch_id)
            .await?;
        self.kv.set_add(&keys::active_index(), &switch_id).await?;

        info!(
            switch = %switch_id,
            sender = %req.sender_pubkey,
            recipient = %req.recipient_username,
            interval_hours = req.check_in_interval_hours,
            "Switch armed"
        );

        Ok(CreateSwitchResponse {
            success: true,
            switch_id,
            next_deadline,
        })
    }

    /// Prove liveness: push every active switch's deadline out by its own
    /// interval.
    pub async fn checkin(&self, req: CheckinRequest) -> Result<CheckinResponse> {
        self.checkin_at(Utc::now(), req).await
    }

    /// `checkin` against an explicit clock.
    pub async fn checkin_at(
        &self,
        now: DateTime<Utc>,
        req: CheckinRequest,
    ) -> Result<CheckinResponse> {
        self.verifier.require(
            &req.sender_pubkey,
            req.signature.as_deref(),
            req.timestamp,
            actions::DMS_CHECKIN,
            &[],
        )?;

        let mut bumped = 0usize;
        let mut latest: Option<DateTime<Utc>> = None;

        for switch_id in self
            .kv
            .set_members(&keys::user_index(&req.sender_pubkey))
            .await?
        {
            let Some(switch) = self.load_switch(&switch_id).await? else {
                continue;
            };
            if switch.status != SwitchStatus::Active {
                continue;
            }

            let next = now + Duration::hours(switch.interval_hours as i64);
            self.kv
                .hash_set_field(&keys::switch(&switch_id), "nextDeadline", &next.to_rfc3339())
                .await?;
            bumped += 1;
            latest = Some(latest.map_or(next, |l| l.max(next)));
        }

        info!(sender = %req.sender_pubkey, switches = bumped, "Check-in recorded");

        Ok(CheckinResponse {
            success: true,
            checked_in: true,
            switch_count: bumped,
            next_deadline: latest.map(|l| l.to_rfc3339()),
        })
    }

    /// Disarm a switch. Unknown and foreign switches answer identically so
    /// the endpoint is not an existence oracle.
    pub async fn cancel(&self, switch_id: &str, req: CancelRequest) -> Result<CancelResponse> {
        self.verifier.require(
            &req.sender_pubkey,
            req.signature.as_deref(),
            req.timestamp,
            actions::DMS_CANCEL,
            &[switch_id],
        )?;

        let switch = self
            .load_switch(switch_id)
            .await?
            .filter(|sw| sw.sender_pubkey == req.sender_pubkey)
            .ok_or_else(|| VigilError::NotFound("Switch not found".to_string()))?;

        self.kv
            .hash_set_field(
                &keys::switch(switch_id),
                "status",
                SwitchStatus::Cancelled.as_str(),
            )
            .await?;
        self.kv
            .set_remove(&keys::user_index(&switch.sender_pubkey), switch_id)
            .await?;
        self.kv.set_remove(&keys::active_index(), switch_id).await?;

        info!(switch = %switch_id, sender = %req.sender_pubkey, "Switch cancelled");
        Ok(CancelResponse { success: true })
    }

    /// Metadata for every switch the pubkey owns, newest first. Triggered
    /// switches stay listed as history.
    pub async fn list(&self, pubkey: &str) -> Result<ListSwitchesResponse> {
        let mut switches = Vec::new();
        for switch_id in self.kv.set_members(&keys::user_index(pubkey)).await? {
            if let Some(sw) = self.load_switch(&switch_id).await? {
                switches.push(SwitchSummary {
                    switch_id: sw.switch_id,
                    recipient_username: sw.recipient_username,
                    interval_hours: sw.interval_hours,
                    next_deadline: sw.next_deadline,
                    status: sw.status.as_str().to_string(),
                    created_at: sw.created_at,
                    triggered_at: sw.triggered_at,
                });
            }
        }
        switches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(ListSwitchesResponse { switches })
    }

    /// The release record a recipient pulls by switch id. Returned as the
    /// stored JSON; the shares inside are sealed to the recipient anyway.
    pub async fn release_record(&self, switch_id: &str) -> Result<String> {
        self.kv
            .string_get(&keys::release(switch_id))
            .await?
            .ok_or_else(|| {
                VigilError::NotFound("No released message for this switch".to_string())
            })
    }

    /// One sweep over the active index, releasing every overdue switch.
    pub async fn process(&self, cron_secret: Option<&str>) -> Result<ProcessResponse> {
        self.process_at(Utc::now(), cron_secret).await
    }

    /// `process` against an explicit clock.
    pub async fn process_at(
        &self,
        now: DateTime<Utc>,
        cron_secret: Option<&str>,
    ) -> Result<ProcessResponse> {
        self.authorize_sweep(cron_secret)?;

        let active_ids = self.kv.set_members(&keys::active_index()).await?;
        let total = active_ids.len();
        let mut processed = 0usize;
        let mut errors = Vec::new();

        for switch_id in active_ids {
            let switch = match self.load_switch(&switch_id).await {
                Ok(Some(sw)) => sw,
                Ok(None) => {
                    // Stale index entry; the record is gone
                    self.kv.set_remove(&keys::active_index(), &switch_id).await?;
                    continue;
                }
                Err(e) => {
                    errors.push(format!("{switch_id}: {e}"));
                    continue;
                }
            };

            if switch.status != SwitchStatus::Active {
                // A crash between markTriggered steps, or a cancel that
                // died mid-way, leaves these behind; the sweep repairs.
                self.kv.set_remove(&keys::active_index(), &switch_id).await?;
                continue;
            }

            match DateTime::parse_from_rfc3339(&switch.next_deadline) {
                Ok(deadline) if deadline.with_timezone(&Utc) < now => {}
                Ok(_) => continue,
                Err(_) => {
                    errors.push(format!("{switch_id}: unparseable deadline"));
                    continue;
                }
            }

            match self.release_switch(now, &switch).await {
                Ok(()) => processed += 1,
                Err(e) => errors.push(format!("{switch_id}: {e}")),
            }
        }

        info!(processed, total, errors = errors.len(), "Sweep complete");
        Ok(ProcessResponse {
            processed,
            total,
            errors,
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn authorize_sweep(&self, provided: Option<&str>) -> Result<()> {
        let Some(expected) = &self.cron_secret else {
            // Dev mode runs without a secret
            return Ok(());
        };
        let Some(provided) = provided else {
            return Err(VigilError::AuthMissing(
                "Cron secret is required".to_string(),
            ));
        };
        if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
            Ok(())
        } else {
            Err(VigilError::AuthInvalid("Invalid cron secret".to_string()))
        }
    }

    async fn load_switch(&self, switch_id: &str) -> Result<Option<DmsSwitch>> {
        match self.kv.hash_get_all(&keys::switch(switch_id)).await? {
            Some(map) => Ok(Some(DmsSwitch::from_hash(&map)?)),
            None => Ok(None),
        }
    }

    /// Release one overdue switch: write the pull record, then mark
    /// triggered. A crash in between re-releases on the next sweep, which
    /// only refreshes the record's TTL.
    async fn release_switch(&self, now: DateTime<Utc>, switch: &DmsSwitch) -> Result<()> {
        if self
            .identity
            .resolve(&switch.recipient_username)
            .await?
            .is_none()
        {
            return Err(VigilError::NotFound(format!(
                "recipient '{}' no longer resolvable",
                switch.recipient_username
            )));
        }

        let encrypted_message = match switch.payload_handle.strip_prefix(LOCAL_HANDLE_PREFIX) {
            Some(local_id) => self
                .kv
                .string_get(&keys::fallback_payload(local_id))
                .await?
                .ok_or_else(|| {
                    VigilError::Internal(format!("fallback payload {local_id} missing"))
                })?,
            None => self.blobs.fetch(&switch.payload_handle).await?,
        };

        let triggered_at = now.to_rfc3339();
        let record = ReleaseRecord {
            record_type: "dms_release".to_string(),
            switch_id: switch.switch_id.clone(),
            sender_pubkey: switch.sender_pubkey.clone(),
            recipient_username: switch.recipient_username.clone(),
            encrypted_message,
            triggered_at: triggered_at.clone(),
        };
        self.kv
            .string_set(
                &keys::release(&switch.switch_id),
                &serde_json::to_string(&record)?,
                Some(RELEASE_TTL_SECONDS),
            )
            .await?;

        // markTriggered: status first, then the index; a crash in between
        // is repaired by the next sweep's non-active cleanup.
        self.kv
            .hash_set_field(
                &keys::switch(&switch.switch_id),
                "status",
                SwitchStatus::Triggered.as_str(),
            )
            .await?;
        self.kv
            .hash_set_field(&keys::switch(&switch.switch_id), "triggeredAt", &triggered_at)
            .await?;
        self.kv
            .set_remove(&keys::active_index(), &switch.switch_id)
            .await?;

        info!(
            switch = %switch.switch_id,
            recipient = %switch.recipient_username,
            "Switch triggered, message released"
        );
        Ok(())
    }
}
