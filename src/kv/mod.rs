//! Key-value store adapter
//!
//! Thin abstraction over the underlying store: typed hash records, string
//! records with TTL, set membership, key-pattern scans, and the
//! set-if-absent primitive the approval path relies on.
//!
//! ## Key patterns
//!
//! ```text
//! recovery:config:{owner}                      → RecoveryConfig hash
//! recovery:share:{guardian}:{owner}            → GuardianShare hash
//! recovery:session:{sid}                       → RecoverySession hash (TTL 24h)
//! recovery:session:{sid}:share:{guardian}      → re-encrypted share (TTL 24h)
//! dms:switch:{switchId}                        → DMSSwitch hash
//! dms:user:{pubkey}                            → owned switch id set
//! dms:active                                   → active switch id set
//! dms:{localId}                                → fallback payload (TTL 1y)
//! dms:release:{switchId}                       → released-message JSON (TTL 90d)
//! ```

pub mod memory;
pub mod redis;
pub mod store;

pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use store::KvStore;
