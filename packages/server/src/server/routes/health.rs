//! Health probe.

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::server::app::AppState;

/// GET `/health` - process liveness plus store connectivity.
pub async fn health(Extension(state): Extension<AppState>) -> (StatusCode, Json<Value>) {
    let store = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        state.deps.store.get("health:probe"),
    )
    .await
    {
        Ok(Ok(_)) => json!({"status": "ok"}),
        Ok(Err(e)) => json!({"status": "error", "error": e.to_string()}),
        Err(_) => json!({"status": "error", "error": "store probe timed out"}),
    };

    let healthy = store["status"] == "ok";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "store": store,
        })),
    )
}
