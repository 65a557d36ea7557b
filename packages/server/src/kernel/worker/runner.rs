//! Cache-aware command runner.
//!
//! Runs a job's commands in submitted order on a single open session,
//! consulting the result cache per command and writing back on miss. Output
//! keys preserve the request order; duplicate commands are suffixed `_1`,
//! `_2`, ... to keep the map unique.

use indexmap::IndexMap;
use serde_json::Value;

use crate::common::models::{CacheMetadata, CommandCacheInfo};
use crate::common::ExecutionRequest;
use crate::kernel::cache::{CacheLookup, CacheManager};
use crate::kernel::drivers::{DeviceSession, DriverError};

/// Cache directives for one execution.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub use_cache: bool,
    pub refresh: bool,
    pub ttl: Option<u64>,
}

impl From<&ExecutionRequest> for CachePolicy {
    fn from(request: &ExecutionRequest) -> Self {
        Self {
            use_cache: request.use_cache,
            refresh: request.cache_refresh,
            ttl: request.cache_ttl,
        }
    }
}

/// Execute `commands` against `session`, returning outputs keyed by command
/// plus the aggregate cache metadata.
pub async fn run_commands(
    session: &mut dyn DeviceSession,
    device: &str,
    commands: &[String],
    cache: &CacheManager,
    policy: CachePolicy,
) -> Result<(IndexMap<String, String>, CacheMetadata), DriverError> {
    let cache_active = cache.enabled() && policy.use_cache;
    let mut data: IndexMap<String, String> = IndexMap::new();
    let mut infos: IndexMap<String, CommandCacheInfo> = IndexMap::new();

    for command in commands {
        let key = unique_key(&data, command);

        if cache_active && !policy.refresh {
            let fingerprint = cache.generate_key(device, command);
            if let CacheLookup::Hit(hit) = cache.get(&fingerprint).await {
                let text = match hit.value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                infos.insert(
                    key.clone(),
                    CommandCacheInfo {
                        cache_status: "hit".to_string(),
                        cached_at: Some(hit.cached_at),
                        age_seconds: Some(hit.age_seconds),
                        ttl: Some(hit.ttl),
                    },
                );
                data.insert(key, text);
                continue;
            }
        }

        let output = session.send_command(command).await?;
        if cache_active {
            let fingerprint = cache.generate_key(device, command);
            cache
                .set(&fingerprint, &Value::String(output.clone()), policy.ttl)
                .await;
            infos.insert(key.clone(), CommandCacheInfo::miss());
        }
        data.insert(key, output);
    }

    let meta = if cache_active {
        CacheMetadata::aggregate(infos)
    } else {
        CacheMetadata::disabled()
    };
    Ok((data, meta))
}

/// Suffix repeated commands so the output map stays unique while preserving
/// execution order: `show a`, `show a_1`, `show a_2`, ...
fn unique_key(data: &IndexMap<String, String>, command: &str) -> String {
    let mut key = command.to_string();
    while data.contains_key(&key) {
        key = match key.rsplit_once('_').and_then(|(stem, n)| {
            n.parse::<u32>().ok().map(|n| format!("{stem}_{}", n + 1))
        }) {
            Some(bumped) => bumped,
            None => format!("{key}_1"),
        };
    }
    key
}
