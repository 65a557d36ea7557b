//! Job polling.

use axum::extract::{Extension, Path, Query};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::common::{ApiError, ExecutionRequest};
use crate::kernel::jobs::JobStatus;
use crate::parsing::parse_output;
use crate::server::app::AppState;
use crate::server::models::{JobQuery, JobResponse};

/// GET `/api/job/{id}` - poll a job, with optional server-side parsing of a
/// completed result.
pub async fn get_job(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    Query(query): Query<JobQuery>,
) -> Result<Response, ApiError> {
    let id: Uuid = id
        .parse()
        .map_err(|_| ApiError::Validation(format!("'{id}' is not a valid job id")))?;
    let job = state
        .deps
        .queue
        .job(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job '{id}' not found")))?;

    let envelope = JobResponse::from_job(&job);
    if !query.parse {
        return Ok(Json(envelope).into_response());
    }
    if envelope.status != JobStatus::Complete {
        return Ok(Json(envelope).into_response());
    }

    // The payload carries the driver dialect used for template derivation.
    let request: ExecutionRequest = serde_json::from_value(job.payload.clone())
        .map_err(|_| ApiError::Validation("job has no parsable command output".to_string()))?;

    let mut data = serde_json::Map::new();
    for command in &request.commands {
        let raw = envelope.command_output(command).unwrap_or_default();
        let template = state
            .templates
            .resolve(query.template.as_deref(), &request.driver, command)?;
        data.insert(
            command.clone(),
            parse_output(raw, &template, query.include_raw),
        );
    }

    Ok(Json(json!({
        "job_id": envelope.job_id,
        "status": envelope.status,
        "attempts": envelope.attempts,
        "data": data,
    }))
    .into_response())
}
