//! In-memory store backend.
//!
//! Single-process stand-in for Redis, used by the test harness and by
//! `store_backend = memory` dev mode (which implies the embedded worker -
//! a separate worker process cannot see this store). TTLs are honoured
//! lazily: expired entries are dropped when touched.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{KvStore, StoreResult, StreamEntry};

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn alive(&self) -> bool {
        self.expires_at.map_or(true, |at| at > Instant::now())
    }
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, Expiring<String>>,
    hashes: HashMap<String, Expiring<HashMap<String, String>>>,
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    streams: HashMap<String, VecDeque<StreamEntry>>,
}

impl Inner {
    fn purge_expired(&mut self) {
        self.strings.retain(|_, entry| entry.alive());
        self.hashes.retain(|_, entry| entry.alive());
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_unix() -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        Ok(inner.strings.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        let mut removed = 0;
        for key in keys {
            let mut hit = inner.strings.remove(key).is_some();
            hit |= inner.hashes.remove(key).is_some();
            hit |= inner.lists.remove(key).is_some();
            hit |= inner.zsets.remove(key).is_some();
            hit |= inner.streams.remove(key).is_some();
            if hit {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        let mut keys: Vec<String> = inner
            .strings
            .keys()
            .chain(inner.hashes.keys())
            .chain(inner.lists.keys())
            .chain(inner.zsets.keys())
            .chain(inner.streams.keys())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let deadline = Some(Instant::now() + ttl);
        if let Some(entry) = inner.strings.get_mut(key) {
            entry.expires_at = deadline;
        }
        if let Some(entry) = inner.hashes.get_mut(key) {
            entry.expires_at = deadline;
        }
        Ok(())
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        let entry = inner
            .hashes
            .entry(key.to_string())
            .or_insert_with(|| Expiring {
                value: HashMap::new(),
                expires_at: None,
            });
        let slot = entry.value.entry(field.to_string()).or_insert_with(|| "0".into());
        let current: i64 = slot.parse().unwrap_or(0);
        let next = current + by;
        *slot = next.to_string();
        Ok(next)
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        Ok(inner
            .hashes
            .get(key)
            .map(|entry| entry.value.clone())
            .unwrap_or_default())
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn list_pop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.lists.get_mut(key).and_then(|list| list.pop_front()))
    }

    async fn list_len(&self, key: &str) -> StoreResult<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.lists.get(key).map_or(0, |list| list.len() as u64))
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zset_pop_due(&self, key: &str, max_score: f64) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(zset) = inner.zsets.get_mut(key) else {
            return Ok(Vec::new());
        };
        let mut due: Vec<(String, f64)> = zset
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        due.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        for (member, _) in &due {
            zset.remove(member);
        }
        Ok(due.into_iter().map(|(member, _)| member).collect())
    }

    async fn acquire_lease(
        &self,
        key: &str,
        member: &str,
        max_leases: usize,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let now = Self::now_unix();
        let zset = inner.zsets.entry(key.to_string()).or_default();
        zset.retain(|_, expires_at| *expires_at > now);
        if zset.len() >= max_leases {
            return Ok(false);
        }
        zset.insert(member.to_string(), now + ttl.as_secs_f64());
        Ok(true)
    }

    async fn release_lease(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(zset) = inner.zsets.get_mut(key) {
            zset.remove(member);
        }
        Ok(())
    }

    async fn lease_count(&self, key: &str) -> StoreResult<usize> {
        let inner = self.inner.lock().unwrap();
        let now = Self::now_unix();
        Ok(inner.zsets.get(key).map_or(0, |zset| {
            zset.values().filter(|expires_at| **expires_at > now).count()
        }))
    }

    async fn stream_add(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        maxlen: usize,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner.streams.entry(key.to_string()).or_default();
        stream.push_back(fields.into_iter().collect());
        while stream.len() > maxlen {
            stream.pop_front();
        }
        Ok(())
    }

    async fn stream_revrange(&self, key: &str, count: usize) -> StoreResult<Vec<StreamEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .streams
            .get(key)
            .map(|stream| stream.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }
}
