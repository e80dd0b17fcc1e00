//! Recovery orchestrator
//!
//! Holds encrypted key shares on behalf of guardians and mediates the
//! k-of-n approval session that releases re-encrypted shares to an owner
//! who reappears on a new device.

pub mod records;
pub mod service;

pub use records::{GuardianShare, RecoveryConfig, RecoverySession, SessionStatus};
pub use service::RecoveryService;
