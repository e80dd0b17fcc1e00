//! Signed-request verification
//!
//! Privileged requests carry `{pubkey, signature, timestamp}`. The server
//! reconstructs the canonical challenge the client signed and runs detached
//! Ed25519 verification over its UTF-8 bytes. The challenge binds the
//! operation, any operation-specific identifier, and the timestamp:
//!
//! ```text
//! recovery:distribute:{timestamp}
//! recovery:revoke:{timestamp}
//! recovery:approve:{sessionId}:{timestamp}
//! dms:create:{recipientUsername}:{timestamp}
//! dms:checkin:{timestamp}
//! dms:cancel:{switchId}:{timestamp}
//! ```
//!
//! Every failure mode - malformed encoding, wrong length, mismatch, stale
//! or future-dated timestamp - surfaces as the same opaque error.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::types::{Result, VigilError};

/// Ed25519 public key length (32 bytes)
const PUBKEY_LEN: usize = 32;

/// Ed25519 detached signature length (64 bytes)
const SIGNATURE_LEN: usize = 64;

/// Canonical action prefixes, shared bit-exact with clients.
pub mod actions {
    pub const RECOVERY_DISTRIBUTE: &str = "recovery:distribute";
    pub const RECOVERY_REVOKE: &str = "recovery:revoke";
    pub const RECOVERY_APPROVE: &str = "recovery:approve";
    pub const DMS_CREATE: &str = "dms:create";
    pub const DMS_CHECKIN: &str = "dms:checkin";
    pub const DMS_CANCEL: &str = "dms:cancel";
}

/// Verifies detached signatures and enforces the freshness window.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    skew_ms: i64,
}

impl SignatureVerifier {
    pub fn new(skew_seconds: u64) -> Self {
        Self {
            skew_ms: (skew_seconds as i64) * 1000,
        }
    }

    /// Reconstruct the canonical challenge string.
    pub fn challenge(action: &str, params: &[&str], timestamp_ms: i64) -> String {
        let mut parts = Vec::with_capacity(params.len() + 2);
        parts.push(action.to_string());
        parts.extend(params.iter().map(|p| p.to_string()));
        parts.push(timestamp_ms.to_string());
        parts.join(":")
    }

    /// Verify a signed request against the current clock.
    pub fn verify(
        &self,
        pubkey_b58: &str,
        signature_b64: &str,
        timestamp_ms: i64,
        action: &str,
        params: &[&str],
    ) -> bool {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.verify_at(now_ms, pubkey_b58, signature_b64, timestamp_ms, action, params)
    }

    /// Verify against an explicit clock. Used by `verify` and by tests.
    pub fn verify_at(
        &self,
        now_ms: i64,
        pubkey_b58: &str,
        signature_b64: &str,
        timestamp_ms: i64,
        action: &str,
        params: &[&str],
    ) -> bool {
        if (now_ms - timestamp_ms).abs() > self.skew_ms {
            return false;
        }

        let Some(verifying_key) = decode_pubkey(pubkey_b58) else {
            return false;
        };
        let Some(signature) = decode_signature(signature_b64) else {
            return false;
        };

        let challenge = Self::challenge(action, params, timestamp_ms);
        verifying_key.verify(challenge.as_bytes(), &signature).is_ok()
    }

    /// Gate a service operation on a signed request.
    ///
    /// Absent credentials are a 401; any verification failure is the
    /// opaque 403.
    pub fn require(
        &self,
        pubkey_b58: &str,
        signature_b64: Option<&str>,
        timestamp_ms: Option<i64>,
        action: &str,
        params: &[&str],
    ) -> Result<()> {
        let (signature_b64, timestamp_ms) = match (signature_b64, timestamp_ms) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                return Err(VigilError::AuthMissing(
                    "Signature and timestamp are required".to_string(),
                ))
            }
        };

        if self.verify(pubkey_b58, signature_b64, timestamp_ms, action, params) {
            Ok(())
        } else {
            Err(VigilError::bad_signature())
        }
    }
}

/// Decode a base58 Ed25519 public key. `None` on any malformation.
fn decode_pubkey(pubkey_b58: &str) -> Option<VerifyingKey> {
    let bytes = bs58::decode(pubkey_b58).into_vec().ok()?;
    let bytes: [u8; PUBKEY_LEN] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Decode a base64 detached signature. `None` on any malformation.
fn decode_signature(signature_b64: &str) -> Option<Signature> {
    let bytes = BASE64.decode(signature_b64).ok()?;
    let bytes: [u8; SIGNATURE_LEN] = bytes.try_into().ok()?;
    Some(Signature::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, String) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let pubkey_b58 = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();
        (signing_key, pubkey_b58)
    }

    fn sign(signing_key: &SigningKey, action: &str, params: &[&str], ts: i64) -> String {
        let challenge = SignatureVerifier::challenge(action, params, ts);
        BASE64.encode(signing_key.sign(challenge.as_bytes()).to_bytes())
    }

    #[test]
    fn test_challenge_format() {
        assert_eq!(
            SignatureVerifier::challenge(actions::RECOVERY_DISTRIBUTE, &[], 1700000000000),
            "recovery:distribute:1700000000000"
        );
        assert_eq!(
            SignatureVerifier::challenge(actions::RECOVERY_APPROVE, &["sid-1"], 42),
            "recovery:approve:sid-1:42"
        );
        assert_eq!(
            SignatureVerifier::challenge(actions::DMS_CREATE, &["alice"], 42),
            "dms:create:alice:42"
        );
    }

    #[test]
    fn test_valid_signature() {
        let (signing_key, pubkey) = keypair();
        let verifier = SignatureVerifier::new(300);
        let now = 1_700_000_000_000;
        let sig = sign(&signing_key, actions::DMS_CHECKIN, &[], now);

        assert!(verifier.verify_at(now, &pubkey, &sig, now, actions::DMS_CHECKIN, &[]));
    }

    #[test]
    fn test_wrong_action_rejected() {
        let (signing_key, pubkey) = keypair();
        let verifier = SignatureVerifier::new(300);
        let now = 1_700_000_000_000;
        let sig = sign(&signing_key, actions::DMS_CHECKIN, &[], now);

        assert!(!verifier.verify_at(now, &pubkey, &sig, now, actions::RECOVERY_REVOKE, &[]));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let (signing_key, _) = keypair();
        let (_, other_pubkey) = keypair();
        let verifier = SignatureVerifier::new(300);
        let now = 1_700_000_000_000;
        let sig = sign(&signing_key, actions::DMS_CHECKIN, &[], now);

        assert!(!verifier.verify_at(now, &other_pubkey, &sig, now, actions::DMS_CHECKIN, &[]));
    }

    #[test]
    fn test_stale_and_future_timestamps_rejected() {
        let (signing_key, pubkey) = keypair();
        let verifier = SignatureVerifier::new(300);
        let now = 1_700_000_000_000;

        // Just inside the window on both sides
        for offset in [-299_000, 299_000] {
            let ts = now + offset;
            let sig = sign(&signing_key, actions::DMS_CHECKIN, &[], ts);
            assert!(verifier.verify_at(now, &pubkey, &sig, ts, actions::DMS_CHECKIN, &[]));
        }

        // Just outside the window: stale and future-dated
        for offset in [-301_000, 301_000] {
            let ts = now + offset;
            let sig = sign(&signing_key, actions::DMS_CHECKIN, &[], ts);
            assert!(!verifier.verify_at(now, &pubkey, &sig, ts, actions::DMS_CHECKIN, &[]));
        }
    }

    #[test]
    fn test_malformed_encodings_rejected() {
        let verifier = SignatureVerifier::new(300);
        let now = 1_700_000_000_000;

        // Not base58 / not base64 / wrong lengths
        assert!(!verifier.verify_at(now, "0OIl", "sig", now, actions::DMS_CHECKIN, &[]));
        assert!(!verifier.verify_at(now, "abc", "!!!", now, actions::DMS_CHECKIN, &[]));

        let (_, pubkey) = keypair();
        let short_sig = BASE64.encode([0u8; 10]);
        assert!(!verifier.verify_at(now, &pubkey, &short_sig, now, actions::DMS_CHECKIN, &[]));
    }

    #[test]
    fn test_require_distinguishes_missing_from_invalid() {
        let (_, pubkey) = keypair();
        let verifier = SignatureVerifier::new(300);

        let missing = verifier
            .require(&pubkey, None, None, actions::DMS_CHECKIN, &[])
            .unwrap_err();
        assert!(matches!(missing, VigilError::AuthMissing(_)));

        let invalid = verifier
            .require(&pubkey, Some("garbage"), Some(0), actions::DMS_CHECKIN, &[])
            .unwrap_err();
        assert!(matches!(invalid, VigilError::AuthInvalid(_)));
    }
}
