//! Recovery record types and their hash codecs
//!
//! Hash values come out of the store as untyped string maps; each record
//! type owns a decoder that coerces numeric fields and rejects missing
//! ones.

use std::collections::HashMap;

use crate::types::{Result, VigilError};

/// Storage keys for the recovery side.
pub mod keys {
    pub fn config(owner: &str) -> String {
        format!("recovery:config:{owner}")
    }

    pub fn share(guardian: &str, owner: &str) -> String {
        format!("recovery:share:{guardian}:{owner}")
    }

    pub fn shares_of_guardian(guardian: &str) -> String {
        format!("recovery:share:{guardian}:*")
    }

    pub fn session(session_id: &str) -> String {
        format!("recovery:session:{session_id}")
    }

    pub fn session_share(session_id: &str, guardian: &str) -> String {
        format!("recovery:session:{session_id}:share:{guardian}")
    }

    pub fn session_shares(session_id: &str) -> String {
        format!("recovery:session:{session_id}:share:*")
    }
}

fn field(map: &HashMap<String, String>, name: &str) -> Result<String> {
    map.get(name)
        .cloned()
        .ok_or_else(|| VigilError::Internal(format!("Record missing field '{name}'")))
}

fn numeric_field(map: &HashMap<String, String>, name: &str) -> Result<u32> {
    field(map, name)?
        .parse()
        .map_err(|_| VigilError::Internal(format!("Record field '{name}' is not numeric")))
}

fn list_field(map: &HashMap<String, String>, name: &str) -> Result<Vec<String>> {
    serde_json::from_str(&field(map, name)?)
        .map_err(|_| VigilError::Internal(format!("Record field '{name}' is not a list")))
}

// =============================================================================
// RecoveryConfig
// =============================================================================

/// Per-owner recovery configuration. No TTL; lives until revoked.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub threshold: u32,
    /// Ordered guardian pubkeys
    pub guardians: Vec<String>,
    pub created_at: String,
}

impl RecoveryConfig {
    pub fn to_fields(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![
            ("threshold".to_string(), self.threshold.to_string()),
            ("guardians".to_string(), serde_json::to_string(&self.guardians)?),
            ("createdAt".to_string(), self.created_at.clone()),
        ])
    }

    pub fn from_hash(map: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            threshold: numeric_field(map, "threshold")?,
            guardians: list_field(map, "guardians")?,
            created_at: field(map, "createdAt")?,
        })
    }
}

// =============================================================================
// GuardianShare
// =============================================================================

/// One encrypted share held for a (guardian, owner) pair.
#[derive(Debug, Clone)]
pub struct GuardianShare {
    pub encrypted_share: String,
    pub share_index: u32,
    pub created_at: String,
}

impl GuardianShare {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("encryptedShare".to_string(), self.encrypted_share.clone()),
            ("shareIndex".to_string(), self.share_index.to_string()),
            ("createdAt".to_string(), self.created_at.clone()),
        ]
    }

    pub fn from_hash(map: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            encrypted_share: field(map, "encryptedShare")?,
            share_index: numeric_field(map, "shareIndex")?,
            created_at: field(map, "createdAt")?,
        })
    }
}

// =============================================================================
// RecoverySession
// =============================================================================

/// Session lifecycle. Expiry is the record's TTL, not a stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Ready,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Ready => "ready",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "ready" => Ok(SessionStatus::Ready),
            other => Err(VigilError::Internal(format!(
                "Unknown session status '{other}'"
            ))),
        }
    }
}

/// Transient approval session. 24-hour TTL on the record and its shares.
#[derive(Debug, Clone)]
pub struct RecoverySession {
    pub owner_pubkey: String,
    /// Requester's throwaway X25519 public key; guardians re-encrypt to it
    pub ephemeral_pubkey: String,
    pub requested_guardians: Vec<String>,
    pub threshold: u32,
    pub approvals: u32,
    pub status: SessionStatus,
    pub created_at: String,
}

impl RecoverySession {
    pub fn to_fields(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![
            ("ownerPubkey".to_string(), self.owner_pubkey.clone()),
            ("ephemeralPubkey".to_string(), self.ephemeral_pubkey.clone()),
            (
                "requestedGuardians".to_string(),
                serde_json::to_string(&self.requested_guardians)?,
            ),
            ("threshold".to_string(), self.threshold.to_string()),
            ("approvals".to_string(), self.approvals.to_string()),
            ("status".to_string(), self.status.as_str().to_string()),
            ("createdAt".to_string(), self.created_at.clone()),
        ])
    }

    pub fn from_hash(map: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            owner_pubkey: field(map, "ownerPubkey")?,
            ephemeral_pubkey: field(map, "ephemeralPubkey")?,
            requested_guardians: list_field(map, "requestedGuardians")?,
            threshold: numeric_field(map, "threshold")?,
            approvals: numeric_field(map, "approvals")?,
            status: SessionStatus::parse(&field(map, "status")?)?,
            created_at: field(map, "createdAt")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_roundtrip() {
        let config = RecoveryConfig {
            threshold: 2,
            guardians: vec!["g1".to_string(), "g2".to_string(), "g3".to_string()],
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };

        let map: HashMap<String, String> = config.to_fields().unwrap().into_iter().collect();
        let decoded = RecoveryConfig::from_hash(&map).unwrap();
        assert_eq!(decoded.threshold, 2);
        assert_eq!(decoded.guardians, config.guardians);
    }

    #[test]
    fn test_session_roundtrip() {
        let session = RecoverySession {
            owner_pubkey: "owner".to_string(),
            ephemeral_pubkey: "ephemeral".to_string(),
            requested_guardians: vec!["g1".to_string(), "g2".to_string()],
            threshold: 2,
            approvals: 1,
            status: SessionStatus::Pending,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };

        let map: HashMap<String, String> = session.to_fields().unwrap().into_iter().collect();
        let decoded = RecoverySession::from_hash(&map).unwrap();
        assert_eq!(decoded.approvals, 1);
        assert_eq!(decoded.status, SessionStatus::Pending);
        assert_eq!(decoded.requested_guardians, session.requested_guardians);
    }

    #[test]
    fn test_missing_field_rejected() {
        let mut map: HashMap<String, String> = HashMap::new();
        map.insert("threshold".to_string(), "2".to_string());
        assert!(RecoveryConfig::from_hash(&map).is_err());
    }

    #[test]
    fn test_non_numeric_field_rejected() {
        let mut map: HashMap<String, String> = HashMap::new();
        map.insert("threshold".to_string(), "two".to_string());
        map.insert("guardians".to_string(), "[]".to_string());
        map.insert("createdAt".to_string(), "now".to_string());
        assert!(RecoveryConfig::from_hash(&map).is_err());
    }
}
