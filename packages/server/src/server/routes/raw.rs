//! Raw execution: explicit host, no inventory lookup.

use axum::extract::{Extension, Path};
use axum::Json;

use super::enqueue_and_maybe_wait;
use crate::common::{ApiError, CredentialSource, ExecutionRequest};
use crate::kernel::jobs::execute_function;
use crate::server::app::AppState;
use crate::server::models::{enqueue_options, JobResponse, RawExecuteRequest};

/// POST `/api/raw/execute/{driver_family}`.
///
/// The caller supplies everything: host, dialect, commands, and either a
/// stored credential id or inline username+password.
pub async fn execute(
    Extension(state): Extension<AppState>,
    Path(driver_family): Path<String>,
    Json(body): Json<RawExecuteRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    if !state.driver_families.contains(&driver_family) {
        return Err(ApiError::Validation(format!(
            "unknown driver family '{driver_family}'; known families: {}",
            state.driver_families.join(", ")
        )));
    }
    if body.commands.is_empty() || body.commands.iter().any(|c| c.trim().is_empty()) {
        return Err(ApiError::Validation("commands must not be empty".to_string()));
    }

    let credential = match (&body.credential_id, &body.username, &body.password) {
        (Some(credential_id), None, None) => CredentialSource::Stored {
            credential_id: credential_id.clone(),
        },
        (None, Some(username), Some(password)) => CredentialSource::Inline {
            username: username.clone(),
            password: password.clone(),
        },
        _ => {
            return Err(ApiError::Validation(
                "must provide either credential_id or username and password".to_string(),
            ))
        }
    };

    let request = ExecutionRequest {
        host: body.host.clone(),
        port: body.port,
        driver: body.driver.clone(),
        commands: body.commands.clone(),
        credential,
        use_cache: body.use_cache,
        cache_refresh: body.cache_refresh,
        cache_ttl: body.cache_ttl,
    };

    tracing::info!(
        host = %body.host,
        driver_family = %driver_family,
        commands = body.commands.len(),
        "raw execute request"
    );

    let job = enqueue_and_maybe_wait(
        &state.deps.queue,
        execute_function(&driver_family),
        serde_json::to_value(&request).map_err(|e| ApiError::Internal(e.to_string()))?,
        enqueue_options(body.timeout, body.retries, body.max_queue_wait),
        body.wait,
    )
    .await?;

    Ok(Json(JobResponse::from_job(&job)))
}
