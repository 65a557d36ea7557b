//! Result cache.
//!
//! Keys are `<prefix>:<device>:<normalised command>` where normalisation
//! lowercases and collapses internal whitespace, so `"show ip"` and
//! `"  show   ip "` land on the same entry. The cache is an optimisation,
//! not a dependency: store failures degrade to a logged miss and never
//! propagate. There is no single-flight guarantee - concurrent misses may
//! both compute and both write, which is fine because the device semaphore
//! serialises the device end.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::KvStore;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub key_prefix: String,
    pub default_ttl: u64,
    pub max_ttl: u64,
}

impl CacheConfig {
    pub fn from_settings(settings: &crate::Settings) -> Self {
        Self {
            enabled: settings.cache_enabled,
            key_prefix: settings.cache_key_prefix.clone(),
            default_ttl: settings.cache_default_ttl,
            max_ttl: settings.cache_max_ttl,
        }
    }
}

/// A successful cache read.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub value: serde_json::Value,
    pub ttl: u64,
    pub cached_at: DateTime<Utc>,
    pub age_seconds: f64,
}

/// Outcome of a cache read. Absent, undecodable, and store-error entries all
/// read as a miss.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Disabled,
    Miss,
    Hit(CacheHit),
}

/// The stored blob: the value plus enough metadata to answer age questions
/// without a second round-trip. The TTL is mirrored into the store's own
/// expiry as well.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    result: serde_json::Value,
    ttl: u64,
    cached_at: DateTime<Utc>,
}

pub struct CacheManager {
    store: Arc<dyn KvStore>,
    config: CacheConfig,
}

impl CacheManager {
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The fingerprint for one device+command pair.
    pub fn generate_key(&self, device: &str, command: &str) -> String {
        format!(
            "{}:{}:{}",
            self.config.key_prefix,
            normalise(device),
            normalise(command)
        )
    }

    pub async fn get(&self, key: &str) -> CacheLookup {
        if !self.config.enabled {
            return CacheLookup::Disabled;
        }
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(key, error = %e, "cache read failed");
                return CacheLookup::Miss;
            }
        };
        let Some(raw) = raw else {
            tracing::debug!(key, "cache miss");
            return CacheLookup::Miss;
        };
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => {
                let age = Utc::now()
                    .signed_duration_since(entry.cached_at)
                    .num_milliseconds() as f64
                    / 1000.0;
                CacheLookup::Hit(CacheHit {
                    value: entry.result,
                    ttl: entry.ttl,
                    cached_at: entry.cached_at,
                    age_seconds: age.max(0.0),
                })
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "undecodable cache entry treated as miss");
                CacheLookup::Miss
            }
        }
    }

    /// Store a result. The TTL is silently capped at the configured maximum;
    /// store failures are logged and swallowed.
    pub async fn set(&self, key: &str, value: &serde_json::Value, ttl: Option<u64>) {
        if !self.config.enabled {
            return;
        }
        let ttl = ttl.unwrap_or(self.config.default_ttl).min(self.config.max_ttl);
        let entry = CacheEntry {
            result: value.clone(),
            ttl,
            cached_at: Utc::now(),
        };
        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self
            .store
            .set_ex(key, &encoded, Duration::from_secs(ttl.max(1)))
            .await
        {
            tracing::error!(key, error = %e, "cache write failed");
            return;
        }
        tracing::debug!(key, ttl, "cache set");
    }

    pub async fn delete(&self, key: &str) {
        if !self.config.enabled {
            return;
        }
        if let Err(e) = self.store.delete(&[key.to_string()]).await {
            tracing::error!(key, error = %e, "cache delete failed");
        }
    }

    /// Delete every entry for one device. Returns how many were removed.
    pub async fn invalidate_device(&self, device: &str) -> u64 {
        if !self.config.enabled {
            return 0;
        }
        let prefix = format!("{}:{}:", self.config.key_prefix, normalise(device));
        self.delete_by_prefix(&prefix).await
    }

    /// Delete every cache entry. Returns how many were removed.
    pub async fn clear_all(&self) -> u64 {
        if !self.config.enabled {
            return 0;
        }
        let prefix = format!("{}:", self.config.key_prefix);
        self.delete_by_prefix(&prefix).await
    }

    /// Cache keys with the prefix stripped, optionally filtered by device.
    pub async fn list_keys(&self, device: Option<&str>) -> Vec<String> {
        if !self.config.enabled {
            return Vec::new();
        }
        let prefix = match device {
            Some(device) => format!("{}:{}:", self.config.key_prefix, normalise(device)),
            None => format!("{}:", self.config.key_prefix),
        };
        match self.store.keys_with_prefix(&prefix).await {
            Ok(keys) => {
                let strip = format!("{}:", self.config.key_prefix);
                keys.into_iter()
                    .filter_map(|key| key.strip_prefix(&strip).map(str::to_string))
                    .collect()
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to list cache keys");
                Vec::new()
            }
        }
    }

    async fn delete_by_prefix(&self, prefix: &str) -> u64 {
        let keys = match self.store.keys_with_prefix(prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(prefix, error = %e, "failed to enumerate cache keys");
                return 0;
            }
        };
        if keys.is_empty() {
            return 0;
        }
        match self.store.delete(&keys).await {
            Ok(removed) => {
                tracing::debug!(prefix, removed, "invalidated cache entries");
                removed
            }
            Err(e) => {
                tracing::error!(prefix, error = %e, "failed to delete cache entries");
                0
            }
        }
    }
}

/// Lowercase and collapse internal whitespace.
fn normalise(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
