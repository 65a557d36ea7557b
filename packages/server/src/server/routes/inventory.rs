//! Inventory lookups and export.

use std::collections::HashMap;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde_json::{json, Value};

use super::plugin_error;
use crate::common::{ApiError, DeviceConfig};
use crate::server::app::AppState;

/// GET `/api/inventory/{name}` - resolved device config.
pub async fn get_device(
    Extension(state): Extension<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeviceConfig>, ApiError> {
    let device = state
        .inventory
        .get_device_config(&name)
        .await
        .map_err(plugin_error)?;
    Ok(Json(device))
}

/// GET `/api/inventory/export` - all nodes, optionally filtered by
/// `field=value` query pairs. Filterable fields come from the plugin.
pub async fn export(
    Extension(state): Extension<AppState>,
    Query(filters): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let fields = state.inventory.filterable_fields();
    for field in filters.keys() {
        if !fields.contains_key(field.as_str()) {
            let mut known: Vec<&&str> = fields.keys().collect();
            known.sort();
            return Err(ApiError::Validation(format!(
                "unknown filter field '{field}'; filterable fields: {known:?}"
            )));
        }
    }

    let nodes = state
        .inventory
        .list_all_nodes()
        .await
        .map_err(plugin_error)?;
    let nodes: Vec<Value> = nodes
        .into_iter()
        .filter(|node| {
            filters.iter().all(|(field, want)| {
                node.get(field)
                    .map(value_as_text)
                    .map_or(false, |have| have == *want)
            })
        })
        .collect();

    Ok(Json(json!({
        "count": nodes.len(),
        "nodes": nodes,
        "filterable_fields": fields,
    })))
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
