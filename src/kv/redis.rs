//! Redis-backed `KvStore`
//!
//! One `ConnectionManager` shared by every handler; the manager multiplexes
//! and reconnects internally, so each call clones it cheaply.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::info;

use crate::kv::store::KvStore;
use crate::types::{Result, VigilError};

/// Redis-backed store
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

fn store_err(e: redis::RedisError) -> VigilError {
    VigilError::Store(e.to_string())
}

impl RedisStore {
    /// Connect to the store and verify the connection with a PING.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to key-value store at {}", url);

        let client = redis::Client::open(url)
            .map_err(|e| VigilError::Store(format!("Invalid KV_URL: {e}")))?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| VigilError::Store(format!("Failed to connect to store: {e}")))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| VigilError::Store(format!("Store ping failed: {e}")))?;
        if pong != "PONG" {
            return Err(VigilError::Store(format!("Unexpected ping reply: {pong}")));
        }

        info!("Key-value store connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(key, &fields).await.map_err(store_err)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(key).await.map_err(store_err)?;
        // Redis reports a missing hash as an empty map; a stored hash always
        // has at least one field.
        if map.is_empty() {
            Ok(None)
        } else {
            Ok(Some(map))
        }
    }

    async fn hash_set_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await.map_err(store_err)?;
        Ok(())
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.hincr(key, field, delta).await.map_err(store_err)?;
        Ok(value)
    }

    async fn string_set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl_seconds {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await.map_err(store_err)?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(store_err)?;
            }
        }
        Ok(())
    }

    async fn string_set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl_seconds {
            cmd.arg("EX").arg(ttl);
        }
        // SET ... NX replies OK on write, nil when the key already exists
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(store_err)?;
        Ok(reply.is_some())
    }

    async fn string_get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(store_err)?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(store_err)?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await.map_err(store_err)?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await.map_err(store_err)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await.map_err(store_err)?;
        Ok(members)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .expire(key, ttl_seconds as i64)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn ttl_seconds(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        // TTL replies -2 for a missing key, -1 for a key without expiry
        let ttl: i64 = conn.ttl(key).await.map_err(store_err)?;
        if ttl < 0 {
            Ok(None)
        } else {
            Ok(Some(ttl as u64))
        }
    }
}
