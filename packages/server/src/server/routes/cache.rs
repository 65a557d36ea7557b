//! Cache management endpoints.

use std::collections::BTreeMap;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::common::ApiError;
use crate::server::app::AppState;
use crate::server::auth::Principal;

#[derive(Debug, Default, Deserialize)]
pub struct CacheListQuery {
    #[serde(default)]
    pub device: Option<String>,
}

/// GET `/api/cache` - enumerate cache keys, optionally for one device.
pub async fn list_keys(
    Extension(state): Extension<AppState>,
    Query(query): Query<CacheListQuery>,
) -> Result<Json<Value>, ApiError> {
    let keys = state.deps.cache.list_keys(query.device.as_deref()).await;
    Ok(Json(json!({
        "device_filter": query.device,
        "count": keys.len(),
        "keys": keys,
    })))
}

/// GET `/api/cache/stats` - entry counts grouped by device plus the
/// effective configuration.
pub async fn stats(
    Extension(state): Extension<AppState>,
) -> Result<Json<Value>, ApiError> {
    let keys = state.deps.cache.list_keys(None).await;
    let mut per_device: BTreeMap<String, u64> = BTreeMap::new();
    for key in &keys {
        let device = key.split(':').next().unwrap_or(key);
        *per_device.entry(device.to_string()).or_default() += 1;
    }

    let config = state.deps.cache.config();
    Ok(Json(json!({
        "enabled": config.enabled,
        "total_entries": keys.len(),
        "devices_cached": per_device.len(),
        "entries_per_device": per_device,
        "default_ttl": config.default_ttl,
        "max_ttl": config.max_ttl,
        "key_prefix": config.key_prefix,
    })))
}

/// DELETE `/api/cache/{device}` - purge one device's entries.
pub async fn invalidate_device(
    Extension(state): Extension<AppState>,
    Extension(principal): Extension<Principal>,
    Path(device): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.deps.cache.invalidate_device(&device).await;
    tracing::info!(
        device = %device,
        deleted,
        user = principal.user.as_deref().unwrap_or("anonymous"),
        "invalidated device cache"
    );
    Ok(Json(json!({
        "device": device,
        "deleted_count": deleted,
        "message": format!("Invalidated {deleted} cache entries for {device}"),
    })))
}

/// DELETE `/api/cache` - purge everything.
pub async fn clear_all(
    Extension(state): Extension<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.deps.cache.clear_all().await;
    tracing::info!(
        deleted,
        user = principal.user.as_deref().unwrap_or("anonymous"),
        "cleared cache"
    );
    Ok(Json(json!({
        "deleted_count": deleted,
        "message": format!("Cleared {deleted} cache entries"),
    })))
}
