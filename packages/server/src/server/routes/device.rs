//! Inventory-resolved execution endpoints.

use axum::extract::{Extension, Path};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::{choose_credential, enqueue_and_maybe_wait, plugin_error};
use crate::common::{ApiError, DeviceConfig, ExecutionRequest};
use crate::kernel::jobs::{execute_function, JobStatus};
use crate::parsing::parse_output;
use crate::server::app::AppState;
use crate::server::models::{
    enqueue_options, BatchExecuteRequest, ExecuteCommandRequest, JobResponse,
};

/// POST `/api/device/{name}/execute` - single command via inventory.
pub async fn execute(
    Extension(state): Extension<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ExecuteCommandRequest>,
) -> Result<Response, ApiError> {
    if body.command.trim().is_empty() {
        return Err(ApiError::Validation("command must not be empty".to_string()));
    }
    if body.raw_output && !body.wait {
        return Err(ApiError::Validation(
            "raw_output=true requires wait=true".to_string(),
        ));
    }
    if body.raw_output && body.parse {
        return Err(ApiError::Validation(
            "raw_output and parse are mutually exclusive".to_string(),
        ));
    }

    tracing::info!(device = %name, command = %body.command, "device command request");
    let device = state
        .inventory
        .get_device_config(&name)
        .await
        .map_err(plugin_error)?;
    let credential =
        choose_credential(&body.username, &body.password, &device, state.settings())?;

    let request = ExecutionRequest {
        host: device.host.clone(),
        port: device.port,
        driver: device.driver.clone(),
        commands: vec![body.command.clone()],
        credential,
        use_cache: body.use_cache,
        cache_refresh: body.cache_refresh,
        cache_ttl: body.cache_ttl,
    };

    let job = enqueue_and_maybe_wait(
        &state.deps.queue,
        execute_function(&device.driver_family),
        serde_json::to_value(&request).map_err(|e| ApiError::Internal(e.to_string()))?,
        enqueue_options(body.timeout, body.retries, body.max_queue_wait),
        body.wait,
    )
    .await?;

    let envelope = JobResponse::from_job(&job);
    log_outcome(&name, &envelope);

    if body.wait {
        if body.raw_output {
            let output = envelope.command_output(&body.command).unwrap_or_default();
            return Ok(output.to_string().into_response());
        }
        if body.parse && envelope.status == JobStatus::Complete {
            let raw = envelope.command_output(&body.command).unwrap_or_default();
            let template = state
                .templates
                .resolve(body.template.as_deref(), &device.driver, &body.command)?;
            return Ok(Json(parse_output(raw, &template, body.include_raw)).into_response());
        }
    }

    Ok(Json(envelope).into_response())
}

/// POST `/api/device/{name}/execute_batch` - ordered commands with optional
/// per-command parse directives.
pub async fn execute_batch(
    Extension(state): Extension<AppState>,
    Path(name): Path<String>,
    Json(body): Json<BatchExecuteRequest>,
) -> Result<Response, ApiError> {
    let specs = body.normalized_commands();
    if specs.is_empty() {
        return Err(ApiError::Validation("commands must not be empty".to_string()));
    }
    if specs.iter().any(|spec| spec.command.trim().is_empty()) {
        return Err(ApiError::Validation("commands must not be empty".to_string()));
    }

    let device = state
        .inventory
        .get_device_config(&name)
        .await
        .map_err(plugin_error)?;
    let credential =
        choose_credential(&body.username, &body.password, &device, state.settings())?;

    let commands: Vec<String> = specs.iter().map(|spec| spec.command.clone()).collect();
    let request = ExecutionRequest {
        host: device.host.clone(),
        port: device.port,
        driver: device.driver.clone(),
        commands,
        credential,
        use_cache: body.use_cache,
        cache_refresh: body.cache_refresh,
        cache_ttl: body.cache_ttl,
    };

    let job = enqueue_and_maybe_wait(
        &state.deps.queue,
        execute_function(&device.driver_family),
        serde_json::to_value(&request).map_err(|e| ApiError::Internal(e.to_string()))?,
        enqueue_options(body.timeout, body.retries, body.max_queue_wait),
        body.wait,
    )
    .await?;

    let envelope = JobResponse::from_job(&job);
    log_outcome(&name, &envelope);

    let wants_parsing = specs.iter().any(|spec| spec.parse.unwrap_or(false));
    if body.wait && wants_parsing && envelope.status == JobStatus::Complete {
        return Ok(Json(parse_batch(&state, &device, &envelope, &specs)?).into_response());
    }

    Ok(Json(envelope).into_response())
}

/// Per-command parsing over a completed batch: parsed rows where directed,
/// raw text elsewhere.
fn parse_batch(
    state: &AppState,
    device: &DeviceConfig,
    envelope: &JobResponse,
    specs: &[crate::server::models::CommandSpec],
) -> Result<serde_json::Value, ApiError> {
    let mut data = serde_json::Map::new();
    for spec in specs {
        let raw = envelope.command_output(&spec.command).unwrap_or_default();
        if spec.parse.unwrap_or(false) {
            let template =
                state
                    .templates
                    .resolve(spec.template.as_deref(), &device.driver, &spec.command)?;
            data.insert(
                spec.command.clone(),
                parse_output(raw, &template, spec.include_raw.unwrap_or(false)),
            );
        } else {
            data.insert(spec.command.clone(), json!(raw));
        }
    }

    let mut result = json!({"job_id": envelope.job_id, "data": data});
    if let Some(cache_meta) = envelope.cache_metadata() {
        result["_cache"] = cache_meta.clone();
    }
    Ok(result)
}

fn log_outcome(device: &str, envelope: &JobResponse) {
    match envelope.status {
        JobStatus::Failed => tracing::error!(
            device = %device,
            job_id = %envelope.job_id,
            error = envelope.error.as_deref().unwrap_or("unknown"),
            "device command failed"
        ),
        JobStatus::Complete => tracing::info!(
            device = %device,
            job_id = %envelope.job_id,
            attempts = envelope.attempts,
            "device command complete"
        ),
        _ => {}
    }
}
