//! The `KvStore` trait both services are written against.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::types::Result;

/// Store operations the two services rely on.
///
/// Implementations must make every call atomic with respect to the single
/// key it touches; no multi-key transactions are required (the mutation
/// sequencing in the services is crash-tolerant without them).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Cheap liveness check, used by the readiness probe.
    async fn ping(&self) -> Result<()>;

    /// Write all fields of a hash record, creating or extending it.
    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<()>;

    /// Read a whole hash record. `None` when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>>;

    /// Overwrite a single field of a hash record.
    async fn hash_set_field(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Atomically add `delta` to a numeric hash field, returning the new value.
    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Write a string record, optionally with a TTL in seconds.
    async fn string_set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()>;

    /// Write a string record only if the key is absent. Returns whether the
    /// write happened. The one concurrency primitive the approval path needs.
    async fn string_set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<bool>;

    /// Read a string record.
    async fn string_get(&self, key: &str) -> Result<Option<String>>;

    /// Delete a key of any kind. Deleting a missing key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Add a member to a set.
    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a set.
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set. Empty for a missing key.
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// All keys matching a glob pattern (`prefix:*`). Full scan of the
    /// keyspace; callers keep patterns narrow.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Set a TTL on an existing key.
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()>;

    /// Remaining TTL in seconds. `None` when the key is missing or has no TTL.
    async fn ttl_seconds(&self, key: &str) -> Result<Option<u64>>;
}
