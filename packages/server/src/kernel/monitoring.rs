//! Worker liveness and job outcome accounting.
//!
//! Counter hashes (`stats:global`, `stats:worker:<id>`, `stats:device:<host>`)
//! are incremented atomically in the store and re-expired to one hour on
//! every update. A short metrics event goes onto a capped stream for latency
//! graphing; failures additionally produce a truncated, capped failure event.
//! None of this ever propagates an error to the job path.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::store::KvStore;

pub const HEARTBEAT_KEY_PREFIX: &str = "worker:heartbeat:";
pub const STATS_GLOBAL_KEY: &str = "stats:global";
pub const FAILED_COMMANDS_STREAM: &str = "failed_commands";
pub const METRICS_STREAM: &str = "metrics:stream";

const STATS_TTL: Duration = Duration::from_secs(3600);
const FAILED_COMMANDS_MAXLEN: usize = 1_000;
const METRICS_MAXLEN: usize = 10_000;

pub fn worker_stats_key(worker_id: &str) -> String {
    format!("stats:worker:{worker_id}")
}

pub fn device_stats_key(device: &str) -> String {
    format!("stats:device:{device}")
}

pub fn heartbeat_key(worker_id: &str) -> String {
    format!("{HEARTBEAT_KEY_PREFIX}{worker_id}")
}

/// Classify an error message for metrics. Case-insensitive substring match,
/// first match wins.
pub fn classify_error(error: &str) -> &'static str {
    let error = error.to_lowercase();
    const CLASSES: &[(&str, &[&str])] = &[
        ("auth", &["auth", "password", "credential", "permission"]),
        ("gating", &["gating", "busy", "lease"]),
        ("timeout", &["timeout", "timed out"]),
        ("network", &["connection", "network", "unreachable"]),
    ];
    for (class, needles) in CLASSES {
        if needles.iter().any(|needle| error.contains(needle)) {
            return class;
        }
    }
    "other"
}

/// A terminal job outcome, ready to be counted.
pub struct JobOutcome {
    pub worker_id: String,
    pub device: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub job_id: String,
    pub credential_id: Option<String>,
    pub command: Option<String>,
    pub attempts: u32,
}

/// Record one finished job into the counter hashes and event streams.
/// Store failures are logged and swallowed.
pub async fn record_job_stats(store: &Arc<dyn KvStore>, outcome: &JobOutcome) {
    if let Err(e) = record_job_stats_inner(store, outcome).await {
        tracing::error!(error = %e, "failed to record job stats");
    }
}

async fn record_job_stats_inner(
    store: &Arc<dyn KvStore>,
    outcome: &JobOutcome,
) -> Result<(), crate::kernel::store::StoreError> {
    let error_class = match (&outcome.success, &outcome.error) {
        (false, Some(error)) => Some(classify_error(error)),
        (false, None) => Some("other"),
        _ => None,
    };

    for key in [
        STATS_GLOBAL_KEY.to_string(),
        worker_stats_key(&outcome.worker_id),
        device_stats_key(&outcome.device),
    ] {
        if outcome.success {
            store.hash_incr(&key, "complete", 1).await?;
        } else {
            store.hash_incr(&key, "failed", 1).await?;
            if let Some(class) = error_class {
                store.hash_incr(&key, &format!("{class}_failed"), 1).await?;
            }
        }
        store.expire(&key, STATS_TTL).await?;
    }

    let now = chrono::Utc::now().timestamp();
    let metrics_fields = vec![
        ("timestamp".to_string(), now.to_string()),
        ("worker".to_string(), outcome.worker_id.clone()),
        ("device".to_string(), outcome.device.clone()),
        (
            "status".to_string(),
            if outcome.success { "success" } else { "failed" }.to_string(),
        ),
        (
            "error_class".to_string(),
            error_class.unwrap_or("none").to_string(),
        ),
        (
            "duration".to_string(),
            format!("{:.3}", outcome.duration_seconds),
        ),
    ];
    store
        .stream_add(METRICS_STREAM, metrics_fields, METRICS_MAXLEN)
        .await?;

    if !outcome.success {
        let command = outcome.command.as_deref().unwrap_or("unknown");
        let error = outcome.error.as_deref().unwrap_or("unknown error");
        store
            .stream_add(
                FAILED_COMMANDS_STREAM,
                vec![
                    ("timestamp".to_string(), now.to_string()),
                    ("device".to_string(), outcome.device.clone()),
                    ("command".to_string(), truncate(command, 500)),
                    ("error".to_string(), truncate(error, 1000)),
                    (
                        "error_class".to_string(),
                        error_class.unwrap_or("other").to_string(),
                    ),
                    ("job_id".to_string(), outcome.job_id.clone()),
                    ("worker_id".to_string(), outcome.worker_id.clone()),
                    (
                        "credential_id".to_string(),
                        outcome.credential_id.clone().unwrap_or_default(),
                    ),
                    ("attempts".to_string(), outcome.attempts.to_string()),
                ],
                FAILED_COMMANDS_MAXLEN,
            )
            .await?;
    }

    tracing::debug!(
        worker = %outcome.worker_id,
        device = %outcome.device,
        success = outcome.success,
        "recorded job stats"
    );
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

// ============================================================================
// Heartbeats
// ============================================================================

/// The liveness record each worker publishes under a store-enforced TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub hostname: String,
    pub pid: u32,
    pub version: String,
    /// Unix seconds.
    pub timestamp: f64,
    pub status: String,
}

impl WorkerHeartbeat {
    pub fn now(worker_id: &str) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            status: "healthy".to_string(),
        }
    }
}

/// Bucket a heartbeat's age into the health states the monitoring surface
/// reports.
pub fn worker_health(seconds_since_heartbeat: f64) -> &'static str {
    if seconds_since_heartbeat < 60.0 {
        "healthy"
    } else if seconds_since_heartbeat < 180.0 {
        "stale"
    } else {
        "unhealthy"
    }
}

/// Publish liveness every `interval` until `shutdown` flips, each write
/// carrying the configured TTL so a stopped worker's record purges itself.
pub async fn heartbeat_task(
    store: Arc<dyn KvStore>,
    worker_id: String,
    interval: Duration,
    ttl: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    tracing::info!(worker_id = %worker_id, "heartbeat task starting");
    loop {
        let heartbeat = WorkerHeartbeat::now(&worker_id);
        match serde_json::to_string(&heartbeat) {
            Ok(encoded) => {
                if let Err(e) = store.set_ex(&heartbeat_key(&worker_id), &encoded, ttl).await {
                    tracing::error!(worker_id = %worker_id, error = %e, "failed to send heartbeat");
                } else {
                    tracing::debug!(worker_id = %worker_id, "heartbeat sent");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode heartbeat"),
        }

        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!(worker_id = %worker_id, "heartbeat task stopped");
}
