//! In-memory `KvStore` for tests
//!
//! A single mutex over the whole keyspace gives every operation the same
//! single-key atomicity the Redis implementation provides. Expiry runs off
//! an internal millisecond clock that tests can advance, so TTL behavior is
//! deterministic without sleeping.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::kv::store::KvStore;
use crate::types::{Result, VigilError};

enum Value {
    Hash(HashMap<String, String>),
    Str(String),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    /// Store-clock millisecond deadline, if any
    expires_at_ms: Option<u64>,
}

/// In-memory store with a manually advanceable clock.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock_ms: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock_ms: AtomicU64::new(0),
        }
    }

    /// Advance the store clock, expiring any keys whose TTL has elapsed.
    pub fn advance_secs(&self, secs: u64) {
        self.clock_ms.fetch_add(secs * 1000, Ordering::SeqCst);
    }

    fn now_ms(&self) -> u64 {
        self.clock_ms.load(Ordering::SeqCst)
    }

    /// Drop the entry if its deadline has passed. Called with the lock held.
    fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now_ms: u64) {
        if let Some(entry) = entries.get(key) {
            if matches!(entry.expires_at_ms, Some(deadline) if deadline <= now_ms) {
                entries.remove(key);
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| VigilError::Store("memory store poisoned".to_string()))
    }
}

/// Glob match supporting `*` as "any sequence"; the only patterns the
/// services use are `prefix:*` and `prefix:*:suffix`.
fn glob_match(pattern: &str, key: &str) -> bool {
    fn inner(p: &[u8], k: &[u8]) -> bool {
        match (p.first(), k.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], k) || (!k.is_empty() && inner(p, &k[1..]))
            }
            (Some(pc), Some(kc)) if pc == kc => inner(&p[1..], &k[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), key.as_bytes())
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        Self::purge_if_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at_ms: None,
        });
        match &mut entry.value {
            Value::Hash(map) => {
                for (field, value) in fields {
                    map.insert(field, value);
                }
                Ok(())
            }
            _ => Err(VigilError::Store(format!("{key} is not a hash"))),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        Self::purge_if_expired(&mut entries, key, now);
        match entries.get(key) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => Ok(Some(map.clone())),
            Some(_) => Err(VigilError::Store(format!("{key} is not a hash"))),
            None => Ok(None),
        }
    }

    async fn hash_set_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hash_set(key, vec![(field.to_string(), value.to_string())])
            .await
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        Self::purge_if_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at_ms: None,
        });
        match &mut entry.value {
            Value::Hash(map) => {
                let current: i64 = map
                    .get(field)
                    .map(|v| v.parse())
                    .transpose()
                    .map_err(|_| VigilError::Store(format!("{key}.{field} is not numeric")))?
                    .unwrap_or(0);
                let next = current + delta;
                map.insert(field.to_string(), next.to_string());
                Ok(next)
            }
            _ => Err(VigilError::Store(format!("{key} is not a hash"))),
        }
    }

    async fn string_set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at_ms: ttl_seconds.map(|ttl| now + ttl * 1000),
            },
        );
        Ok(())
    }

    async fn string_set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<bool> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        Self::purge_if_expired(&mut entries, key, now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at_ms: ttl_seconds.map(|ttl| now + ttl * 1000),
            },
        );
        Ok(true)
    }

    async fn string_get(&self, key: &str) -> Result<Option<String>> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        Self::purge_if_expired(&mut entries, key, now);
        match entries.get(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(VigilError::Store(format!("{key} is not a string"))),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        entries.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        Self::purge_if_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at_ms: None,
        });
        match &mut entry.value {
            Value::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            _ => Err(VigilError::Store(format!("{key} is not a set"))),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if let Some(Entry {
            value: Value::Set(set),
            ..
        }) = entries.get_mut(key)
        {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        Self::purge_if_expired(&mut entries, key, now);
        match entries.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(VigilError::Store(format!("{key} is not a set"))),
            None => Ok(Vec::new()),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| matches!(e.expires_at_ms, Some(d) if d <= now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            entries.remove(&key);
        }
        Ok(entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        Self::purge_if_expired(&mut entries, key, now);
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at_ms = Some(now + ttl_seconds * 1000);
        }
        Ok(())
    }

    async fn ttl_seconds(&self, key: &str) -> Result<Option<u64>> {
        let now = self.now_ms();
        let mut entries = self.lock()?;
        Self::purge_if_expired(&mut entries, key, now);
        Ok(entries
            .get(key)
            .and_then(|e| e.expires_at_ms)
            .map(|deadline| (deadline.saturating_sub(now)) / 1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_roundtrip() {
        let store = MemoryStore::new();
        store
            .hash_set(
                "h",
                vec![
                    ("a".to_string(), "1".to_string()),
                    ("b".to_string(), "two".to_string()),
                ],
            )
            .await
            .unwrap();

        let map = store.hash_get_all("h").await.unwrap().unwrap();
        assert_eq!(map.get("a").unwrap(), "1");
        assert_eq!(map.get("b").unwrap(), "two");
        assert!(store.hash_get_all("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hash_incr() {
        let store = MemoryStore::new();
        assert_eq!(store.hash_incr("h", "n", 1).await.unwrap(), 1);
        assert_eq!(store.hash_incr("h", "n", 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store.string_set("k", "v", Some(60)).await.unwrap();
        assert!(store.string_get("k").await.unwrap().is_some());
        assert_eq!(store.ttl_seconds("k").await.unwrap(), Some(60));

        store.advance_secs(61);
        assert!(store.string_get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expire_on_hash() {
        let store = MemoryStore::new();
        store
            .hash_set("h", vec![("a".to_string(), "1".to_string())])
            .await
            .unwrap();
        store.expire("h", 30).await.unwrap();

        store.advance_secs(31);
        assert!(store.hash_get_all("h").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = MemoryStore::new();
        assert!(store.string_set_if_absent("k", "1", None).await.unwrap());
        assert!(!store.string_set_if_absent("k", "2", None).await.unwrap());
        assert_eq!(store.string_get("k").await.unwrap().unwrap(), "1");
    }

    #[tokio::test]
    async fn test_scan_keys() {
        let store = MemoryStore::new();
        store.string_set("recovery:share:g1:o1", "x", None).await.unwrap();
        store.string_set("recovery:share:g1:o2", "x", None).await.unwrap();
        store.string_set("recovery:share:g2:o1", "x", None).await.unwrap();

        let mut keys = store.scan_keys("recovery:share:g1:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["recovery:share:g1:o1", "recovery:share:g1:o2"]);
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::new();
        store.set_add("s", "a").await.unwrap();
        store.set_add("s", "b").await.unwrap();
        store.set_add("s", "a").await.unwrap();

        let mut members = store.set_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        store.set_remove("s", "a").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["b"]);
    }
}
