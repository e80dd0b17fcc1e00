//! Switch record type and its hash codec

use std::collections::HashMap;

use crate::types::{Result, VigilError};

/// Payload handles for ciphertexts kept in the local store rather than the
/// external blob store carry this prefix.
pub const LOCAL_HANDLE_PREFIX: &str = "local:";

/// Storage keys for the DMS side.
pub mod keys {
    pub fn switch(switch_id: &str) -> String {
        format!("dms:switch:{switch_id}")
    }

    pub fn user_index(pubkey: &str) -> String {
        format!("dms:user:{pubkey}")
    }

    pub fn active_index() -> String {
        "dms:active".to_string()
    }

    pub fn release(switch_id: &str) -> String {
        format!("dms:release:{switch_id}")
    }

    pub fn fallback_payload(local_id: &str) -> String {
        format!("dms:{local_id}")
    }
}

/// Switch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStatus {
    Active,
    Triggered,
    Cancelled,
}

impl SwitchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchStatus::Active => "active",
            SwitchStatus::Triggered => "triggered",
            SwitchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SwitchStatus::Active),
            "triggered" => Ok(SwitchStatus::Triggered),
            "cancelled" => Ok(SwitchStatus::Cancelled),
            other => Err(VigilError::Internal(format!(
                "Unknown switch status '{other}'"
            ))),
        }
    }
}

/// One dead-man's switch. Metadata only; the ciphertext lives behind
/// `payload_handle`.
#[derive(Debug, Clone)]
pub struct DmsSwitch {
    pub switch_id: String,
    pub sender_pubkey: String,
    pub recipient_username: String,
    /// External blob id, or `local:{id}` for a fallback payload
    pub payload_handle: String,
    pub interval_hours: u32,
    /// ISO-8601
    pub next_deadline: String,
    pub status: SwitchStatus,
    pub created_at: String,
    pub triggered_at: Option<String>,
}

impl DmsSwitch {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("switchId".to_string(), self.switch_id.clone()),
            ("senderPubkey".to_string(), self.sender_pubkey.clone()),
            (
                "recipientUsername".to_string(),
                self.recipient_username.clone(),
            ),
            ("payloadHandle".to_string(), self.payload_handle.clone()),
            ("intervalHours".to_string(), self.interval_hours.to_string()),
            ("nextDeadline".to_string(), self.next_deadline.clone()),
            ("status".to_string(), self.status.as_str().to_string()),
            ("createdAt".to_string(), self.created_at.clone()),
        ];
        if let Some(triggered_at) = &self.triggered_at {
            fields.push(("triggeredAt".to_string(), triggered_at.clone()));
        }
        fields
    }

    pub fn from_hash(map: &HashMap<String, String>) -> Result<Self> {
        let field = |name: &str| -> Result<String> {
            map.get(name)
                .cloned()
                .ok_or_else(|| VigilError::Internal(format!("Record missing field '{name}'")))
        };

        Ok(Self {
            switch_id: field("switchId")?,
            sender_pubkey: field("senderPubkey")?,
            recipient_username: field("recipientUsername")?,
            payload_handle: field("payloadHandle")?,
            interval_hours: field("intervalHours")?.parse().map_err(|_| {
                VigilError::Internal("Record field 'intervalHours' is not numeric".to_string())
            })?,
            next_deadline: field("nextDeadline")?,
            status: SwitchStatus::parse(&field("status")?)?,
            created_at: field("createdAt")?,
            triggered_at: map.get("triggeredAt").cloned(),
        })
    }
}
