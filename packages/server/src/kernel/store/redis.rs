//! Redis store backend.
//!
//! Leases use a Lua script so the purge + count + grant sequence is a single
//! round-trip, indivisible against concurrent acquirers. Scheduled-job
//! promotion uses the same trick.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::StreamRangeReply;

use super::{KvStore, StoreResult, StreamEntry};

const ACQUIRE_LEASE_SCRIPT: &str = r#"
local lease_key = KEYS[1]
local job_id = ARGV[1]
local max_concurrent = tonumber(ARGV[2])
local lease_ttl = tonumber(ARGV[3])
local current_time = tonumber(redis.call('TIME')[1])

redis.call('ZREMRANGEBYSCORE', lease_key, 0, current_time)

if redis.call('ZCARD', lease_key) >= max_concurrent then
    return 0
end

redis.call('ZADD', lease_key, current_time + lease_ttl, job_id)
redis.call('EXPIRE', lease_key, lease_ttl * 2)
return 1
"#;

const POP_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], 0, ARGV[1])
if #due > 0 then
    redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, ARGV[1])
end
return due
"#;

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64> {
        let mut conn = self.conn();
        let value: i64 = redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(by)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(map)
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_pop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("LPOP").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn list_len(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        let len: u64 = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zset_pop_due(&self, key: &str, max_score: f64) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let due: Vec<String> = redis::Script::new(POP_DUE_SCRIPT)
            .key(key)
            .arg(max_score)
            .invoke_async(&mut conn)
            .await?;
        Ok(due)
    }

    async fn acquire_lease(
        &self,
        key: &str,
        member: &str,
        max_leases: usize,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn();
        let granted: i64 = redis::Script::new(ACQUIRE_LEASE_SCRIPT)
            .key(key)
            .arg(member)
            .arg(max_leases)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(granted == 1)
    }

    async fn release_lease(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn lease_count(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        let now = chrono::Utc::now().timestamp();
        let count: usize = redis::cmd("ZCOUNT")
            .arg(key)
            .arg(format!("({now}"))
            .arg("+inf")
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn stream_add(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        maxlen: usize,
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg("MAXLEN").arg("~").arg(maxlen).arg("*");
        for (field, value) in &fields {
            cmd.arg(field).arg(value);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn stream_revrange(&self, key: &str, count: usize) -> StoreResult<Vec<StreamEntry>> {
        let mut conn = self.conn();
        let reply: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(reply
            .ids
            .into_iter()
            .map(|entry| {
                entry
                    .map
                    .into_iter()
                    .filter_map(|(field, value)| {
                        redis::from_redis_value::<String>(&value)
                            .ok()
                            .map(|value| (field, value))
                    })
                    .collect()
            })
            .collect())
    }
}
