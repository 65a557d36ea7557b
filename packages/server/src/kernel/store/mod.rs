//! The shared key-value store.
//!
//! Everything durable - queue, device leases, cache entries, heartbeats,
//! counters, event streams - lives behind this trait. Workers run as separate
//! processes, so the store is the single source of truth for device occupancy
//! and no in-process lock can substitute for it.

mod memory;
mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::config::{Settings, StoreBackend};

/// Build the configured store backend.
pub async fn build_store(settings: &Settings) -> anyhow::Result<std::sync::Arc<dyn KvStore>> {
    match settings.store_backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&settings.redis_url)
                .await
                .map_err(|e| anyhow::anyhow!("failed to connect to {}: {e}", settings.redis_url))?;
            tracing::info!(url = %settings.redis_url, "connected to redis store");
            Ok(std::sync::Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("memory store selected; state is process-local and non-durable");
            Ok(std::sync::Arc::new(MemoryStore::new()))
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store encoding error: {0}")]
    Encoding(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One entry read back from a capped event stream. Timestamps travel as an
/// explicit field written by the producer, never parsed out of backend ids.
pub type StreamEntry = HashMap<String, String>;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Remove keys of any type. Returns how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// All keys starting with `prefix`, across value types.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Atomic hash-field increment (counter hashes).
    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Append to the tail of a FIFO list.
    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Pop from the head of a FIFO list.
    async fn list_pop(&self, key: &str) -> StoreResult<Option<String>>;

    async fn list_len(&self, key: &str) -> StoreResult<u64>;

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// Atomically remove and return every member with score <= `max_score`.
    async fn zset_pop_due(&self, key: &str, max_score: f64) -> StoreResult<Vec<String>>;

    /// Atomically: purge expired leases, then grant one to `member` if fewer
    /// than `max_leases` remain active. The purge+check+insert must be
    /// indivisible against concurrent acquirers on the same key.
    async fn acquire_lease(
        &self,
        key: &str,
        member: &str,
        max_leases: usize,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Drop one member's lease. Idempotent.
    async fn release_lease(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Count of unexpired leases under `key`.
    async fn lease_count(&self, key: &str) -> StoreResult<usize>;

    /// Append an entry to a capped stream, trimming to `maxlen`.
    async fn stream_add(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        maxlen: usize,
    ) -> StoreResult<()>;

    /// Read up to `count` entries, newest first.
    async fn stream_revrange(&self, key: &str, count: usize) -> StoreResult<Vec<StreamEntry>>;
}
