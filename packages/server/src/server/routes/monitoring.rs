//! Observability endpoints: worker liveness, failure history, counters.

use std::collections::HashMap;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::common::ApiError;
use crate::kernel::monitoring::{
    device_stats_key, worker_health, WorkerHeartbeat, FAILED_COMMANDS_STREAM,
    HEARTBEAT_KEY_PREFIX, STATS_GLOBAL_KEY,
};
use crate::kernel::store::StreamEntry;
use crate::server::app::AppState;

/// GET `/api/monitoring/workers` - workers seen via heartbeat, with health
/// derived from heartbeat age.
pub async fn workers(
    Extension(state): Extension<AppState>,
) -> Result<Json<Value>, ApiError> {
    let mut workers = Vec::new();
    let keys = state.deps.store.keys_with_prefix(HEARTBEAT_KEY_PREFIX).await?;
    for key in keys {
        let Some(raw) = state.deps.store.get(&key).await? else {
            continue;
        };
        let heartbeat: WorkerHeartbeat = match serde_json::from_str(&raw) {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "invalid heartbeat record");
                continue;
            }
        };
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let seconds_ago = (now - heartbeat.timestamp).max(0.0);
        workers.push(json!({
            "id": heartbeat.worker_id,
            "status": worker_health(seconds_ago),
            "last_heartbeat": unix_to_iso(heartbeat.timestamp),
            "seconds_since_heartbeat": seconds_ago as u64,
            "hostname": heartbeat.hostname,
            "version": heartbeat.version,
            "pid": heartbeat.pid,
        }));
    }
    Ok(Json(json!({"total": workers.len(), "workers": workers})))
}

#[derive(Debug, Default, Deserialize)]
pub struct FailedCommandsQuery {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub error_class: Option<String>,
    /// Unix timestamp lower bound.
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// GET `/api/monitoring/failed_commands` - recent failures off the capped
/// stream, with filtering.
pub async fn failed_commands(
    Extension(state): Extension<AppState>,
    Query(query): Query<FailedCommandsQuery>,
) -> Result<Json<Value>, ApiError> {
    // Over-read to leave room for the filters.
    let entries = state
        .deps
        .store
        .stream_revrange(FAILED_COMMANDS_STREAM, query.limit.saturating_mul(2).max(10))
        .await?;

    let mut failures = Vec::new();
    for entry in entries {
        if failures.len() >= query.limit {
            break;
        }
        let ts = entry_timestamp(&entry);
        if let Some(since) = query.since {
            if ts < since {
                continue;
            }
        }
        if let Some(device) = &query.device {
            if entry.get("device").map(String::as_str) != Some(device.as_str()) {
                continue;
            }
        }
        if let Some(class) = &query.error_class {
            if entry.get("error_class").map(String::as_str) != Some(class.as_str()) {
                continue;
            }
        }
        failures.push(failure_record(&entry, ts));
    }

    Ok(Json(json!({"total": failures.len(), "failures": failures})))
}

/// GET `/api/monitoring/stats/summary` - global counters, per-worker
/// breakdown, and the busiest devices.
pub async fn stats_summary(
    Extension(state): Extension<AppState>,
) -> Result<Json<Value>, ApiError> {
    let global = state.deps.store.hash_get_all(STATS_GLOBAL_KEY).await?;
    let (complete, failed, _) = split_counts(&global);
    let total = complete + failed;
    let success_rate = if total > 0 {
        (complete as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
    } else {
        0.0
    };

    let mut workers = Vec::new();
    for key in state.deps.store.keys_with_prefix("stats:worker:").await? {
        let stats = state.deps.store.hash_get_all(&key).await?;
        let (complete, failed, _) = split_counts(&stats);
        let worker_id = key.trim_start_matches("stats:worker:");
        workers.push(json!({
            "id": worker_id,
            "complete": complete,
            "failed": failed,
            "total": complete + failed,
        }));
    }

    let mut devices = Vec::new();
    for key in state.deps.store.keys_with_prefix("stats:device:").await? {
        let stats = state.deps.store.hash_get_all(&key).await?;
        let (complete, failed, _) = split_counts(&stats);
        let device = key.trim_start_matches("stats:device:");
        devices.push(json!({
            "device": device,
            "complete": complete,
            "failed": failed,
            "total": complete + failed,
        }));
    }
    devices.sort_by_key(|entry| std::cmp::Reverse(entry["total"].as_u64().unwrap_or(0)));
    devices.truncate(10);

    Ok(Json(json!({
        "global": {
            "total_jobs": total,
            "successful": complete,
            "failed": failed,
            "success_rate": success_rate,
        },
        "workers": workers,
        "top_devices": devices,
    })))
}

/// GET `/api/monitoring/device_stats/{name}` - one device's counters and
/// recent failures.
pub async fn device_stats(
    Extension(state): Extension<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let stats = state.deps.store.hash_get_all(&device_stats_key(&name)).await?;
    let (complete, failed, breakdown) = split_counts(&stats);
    let total = complete + failed;
    let failure_rate = if total > 0 {
        (failed as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
    } else {
        0.0
    };

    let mut recent = Vec::new();
    for entry in state
        .deps
        .store
        .stream_revrange(FAILED_COMMANDS_STREAM, 100)
        .await?
    {
        if recent.len() >= 10 {
            break;
        }
        if entry.get("device").map(String::as_str) == Some(name.as_str()) {
            recent.push(failure_record(&entry, entry_timestamp(&entry)));
        }
    }

    Ok(Json(json!({
        "device": name,
        "stats": {
            "total_success": complete,
            "total_failed": failed,
            "total": total,
            "failure_rate": failure_rate,
            "error_breakdown": breakdown,
        },
        "recent_failures": recent,
    })))
}

/// Split a counter hash into (complete, failed, per-class breakdown).
fn split_counts(stats: &HashMap<String, String>) -> (u64, u64, HashMap<String, u64>) {
    let mut complete = 0;
    let mut failed = 0;
    let mut breakdown = HashMap::new();
    for (field, value) in stats {
        let count: u64 = value.parse().unwrap_or(0);
        match field.as_str() {
            "complete" => complete = count,
            "failed" => failed = count,
            other => {
                if let Some(class) = other.strip_suffix("_failed") {
                    breakdown.insert(class.to_string(), count);
                }
            }
        }
    }
    (complete, failed, breakdown)
}

fn entry_timestamp(entry: &StreamEntry) -> i64 {
    entry
        .get("timestamp")
        .and_then(|ts| ts.parse().ok())
        .unwrap_or(0)
}

fn failure_record(entry: &StreamEntry, ts: i64) -> Value {
    json!({
        "timestamp": unix_to_iso(ts as f64),
        "device": entry.get("device"),
        "command": entry.get("command"),
        "error_class": entry.get("error_class"),
        "error": entry.get("error"),
        "job_id": entry.get("job_id"),
        "worker": entry.get("worker_id"),
        "credential_id": entry.get("credential_id"),
        "attempts": entry.get("attempts").and_then(|a| a.parse::<u32>().ok()).unwrap_or(1),
    })
}

fn unix_to_iso(ts: f64) -> String {
    DateTime::<Utc>::from_timestamp_millis((ts * 1000.0) as i64)
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}
