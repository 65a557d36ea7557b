//! Prometheus scrape endpoint.
//!
//! Stateless: a fresh registry is populated from the store on every scrape,
//! so any controller replica can serve it. Deliberately unauthenticated.

use axum::extract::Extension;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::common::ApiError;
use crate::kernel::monitoring::{HEARTBEAT_KEY_PREFIX, STATS_GLOBAL_KEY, WorkerHeartbeat};
use crate::server::app::AppState;

/// GET `/metrics`.
pub async fn scrape(Extension(state): Extension<AppState>) -> Result<Response, ApiError> {
    let registry = Registry::new();

    let jobs_total = IntGaugeVec::new(
        Opts::new("patchbay_jobs_total", "Job outcomes by scope"),
        &["scope", "name", "status", "error_class"],
    )
    .map_err(internal)?;
    let workers_active = IntGauge::new("patchbay_workers_active", "Workers with a live heartbeat")
        .map_err(internal)?;
    let worker_heartbeat = IntGaugeVec::new(
        Opts::new(
            "patchbay_worker_last_heartbeat",
            "Unix timestamp of each worker's last heartbeat",
        ),
        &["worker"],
    )
    .map_err(internal)?;
    let device_leases = IntGaugeVec::new(
        Opts::new(
            "patchbay_device_leases",
            "Active semaphore leases per device",
        ),
        &["device"],
    )
    .map_err(internal)?;
    let queue_depth = IntGauge::new("patchbay_queue_depth", "Jobs waiting in the ready queue")
        .map_err(internal)?;

    registry.register(Box::new(jobs_total.clone())).map_err(internal)?;
    registry.register(Box::new(workers_active.clone())).map_err(internal)?;
    registry.register(Box::new(worker_heartbeat.clone())).map_err(internal)?;
    registry.register(Box::new(device_leases.clone())).map_err(internal)?;
    registry.register(Box::new(queue_depth.clone())).map_err(internal)?;

    // Counter hashes -> labelled job totals.
    record_scope(&state, &jobs_total, "global", STATS_GLOBAL_KEY, "all").await?;
    for key in state.deps.store.keys_with_prefix("stats:worker:").await? {
        let name = key.trim_start_matches("stats:worker:").to_string();
        record_scope(&state, &jobs_total, "worker", &key, &name).await?;
    }
    for key in state.deps.store.keys_with_prefix("stats:device:").await? {
        let name = key.trim_start_matches("stats:device:").to_string();
        record_scope(&state, &jobs_total, "device", &key, &name).await?;
    }

    // Heartbeats -> liveness gauges.
    let mut active = 0;
    for key in state.deps.store.keys_with_prefix(HEARTBEAT_KEY_PREFIX).await? {
        if let Some(raw) = state.deps.store.get(&key).await? {
            if let Ok(heartbeat) = serde_json::from_str::<WorkerHeartbeat>(&raw) {
                active += 1;
                worker_heartbeat
                    .with_label_values(&[&heartbeat.worker_id])
                    .set(heartbeat.timestamp as i64);
            }
        }
    }
    workers_active.set(active);

    // Lease registry -> per-device occupancy.
    for key in state.deps.store.keys_with_prefix("device_lease:").await? {
        let device = key.trim_start_matches("device_lease:").to_string();
        let count = state.deps.store.lease_count(&key).await?;
        device_leases.with_label_values(&[&device]).set(count as i64);
    }

    queue_depth.set(state.deps.queue.depth().await? as i64);

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(internal)?;
    Ok(([(CONTENT_TYPE, "text/plain; version=0.0.4")], buffer).into_response())
}

async fn record_scope(
    state: &AppState,
    jobs_total: &IntGaugeVec,
    scope: &str,
    key: &str,
    name: &str,
) -> Result<(), ApiError> {
    let stats = state.deps.store.hash_get_all(key).await?;
    for (field, value) in stats {
        let count: i64 = value.parse().unwrap_or(0);
        match field.as_str() {
            "complete" => jobs_total
                .with_label_values(&[scope, name, "success", "none"])
                .set(count),
            "failed" => jobs_total
                .with_label_values(&[scope, name, "failed", "all"])
                .set(count),
            other => {
                if let Some(class) = other.strip_suffix("_failed") {
                    jobs_total
                        .with_label_values(&[scope, name, "failed", class])
                        .set(count);
                }
            }
        }
    }
    Ok(())
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    ApiError::Internal(err.to_string())
}
