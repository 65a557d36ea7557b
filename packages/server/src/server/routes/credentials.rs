//! Credential enumeration, routed through the worker's plugin.

use axum::extract::{Extension, Query};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::enqueue_and_maybe_wait;
use crate::common::ApiError;
use crate::kernel::jobs::{EnqueueOptions, JobStatus, FN_LIST_CREDENTIALS};
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsQuery {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for CredentialsQuery {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// GET `/api/credentials` - enqueue a `list_credentials` job and wait for
/// the worker's answer, so the listing reflects the worker's store.
pub async fn list(
    Extension(state): Extension<AppState>,
    Query(query): Query<CredentialsQuery>,
) -> Result<Json<Value>, ApiError> {
    tracing::info!("listing credentials via worker");
    let opts = EnqueueOptions {
        timeout_secs: query.timeout,
        retries: 0,
        ..Default::default()
    };
    let job = enqueue_and_maybe_wait(
        &state.deps.queue,
        FN_LIST_CREDENTIALS.to_string(),
        json!({}),
        opts,
        true,
    )
    .await?;

    match job.status {
        JobStatus::Complete => Ok(Json(job.result.unwrap_or_else(|| json!({})))),
        JobStatus::Failed => Err(ApiError::Internal(format!(
            "failed to list credentials: {}",
            job.error.as_deref().unwrap_or("unknown error")
        ))),
        _ => Err(ApiError::Internal(format!(
            "credential list request timed out after {}s",
            query.timeout
        ))),
    }
}
