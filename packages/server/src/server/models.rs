//! Request and response bodies for the dispatcher API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::ExecutionRequest;
use crate::kernel::jobs::{EnqueueOptions, Job, JobStatus};

// ============================================================================
// Job envelope
// ============================================================================

/// The outer record returned by the job API.
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub job_id: uuid::Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobResponse {
    pub fn from_job(job: &Job) -> Self {
        // Echo the payload as metadata, with inline secrets stripped.
        let metadata = serde_json::from_value::<ExecutionRequest>(job.payload.clone())
            .map(|request| request.redacted())
            .ok();
        Self {
            job_id: job.id,
            status: job.status,
            result: job.result.clone(),
            error: job.error.clone(),
            attempts: job.attempts,
            metadata,
            enqueued_at: job.enqueued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }

    /// Raw output of one command, if the job completed with it.
    pub fn command_output(&self, command: &str) -> Option<&str> {
        self.result
            .as_ref()?
            .get("data")?
            .get(command)?
            .as_str()
    }

    /// The `meta.cache` block, if present.
    pub fn cache_metadata(&self) -> Option<&Value> {
        self.result.as_ref()?.get("meta")?.get("cache")
    }
}

// ============================================================================
// Execute requests
// ============================================================================

/// Body for `POST /api/device/{name}/execute` (single command).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCommandRequest {
    pub command: String,
    #[serde(default)]
    pub wait: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_queue_wait")]
    pub max_queue_wait: u64,
    /// Return the bare command output instead of the envelope. Requires
    /// `wait=true`.
    #[serde(default)]
    pub raw_output: bool,
    #[serde(default)]
    pub parse: bool,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub include_raw: bool,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_refresh: bool,
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    // Optional credential override, gated by `allow_inline_credentials`.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// One command in a batch, with optional per-command parse directives.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub parse: Option<bool>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub include_raw: Option<bool>,
}

/// Batch commands are either plain strings or full specs.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandItem {
    Simple(String),
    Spec(CommandSpec),
}

/// Body for `POST /api/device/{name}/execute_batch`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchExecuteRequest {
    pub commands: Vec<CommandItem>,
    #[serde(default)]
    pub wait: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_queue_wait")]
    pub max_queue_wait: u64,
    #[serde(default)]
    pub parse: bool,
    #[serde(default)]
    pub include_raw: bool,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_refresh: bool,
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl BatchExecuteRequest {
    /// Flatten the mixed command list into specs with the request-level
    /// defaults applied.
    pub fn normalized_commands(&self) -> Vec<CommandSpec> {
        self.commands
            .iter()
            .map(|item| match item {
                CommandItem::Simple(command) => CommandSpec {
                    command: command.clone(),
                    parse: Some(self.parse),
                    template: None,
                    include_raw: Some(self.include_raw),
                },
                CommandItem::Spec(spec) => CommandSpec {
                    command: spec.command.clone(),
                    parse: spec.parse.or(Some(self.parse)),
                    template: spec.template.clone(),
                    include_raw: spec.include_raw.or(Some(self.include_raw)),
                },
            })
            .collect()
    }
}

/// Body for `POST /api/raw/execute/{driver_family}`: explicit host, no
/// inventory. Either `credential_id` or `username`+`password` must be given.
#[derive(Debug, Clone, Deserialize)]
pub struct RawExecuteRequest {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub driver: String,
    pub commands: Vec<String>,
    #[serde(default)]
    pub credential_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub wait: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_queue_wait")]
    pub max_queue_wait: u64,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_refresh: bool,
    #[serde(default)]
    pub cache_ttl: Option<u64>,
}

/// Query parameters for `GET /api/job/{id}`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct JobQuery {
    #[serde(default)]
    pub parse: bool,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub include_raw: bool,
}

pub fn enqueue_options(timeout: u64, retries: u32, max_queue_wait: u64) -> EnqueueOptions {
    EnqueueOptions {
        timeout_secs: timeout,
        retries,
        retry_delay_ms: 1000,
        retry_backoff: true,
        max_queue_wait_secs: max_queue_wait,
    }
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_max_queue_wait() -> u64 {
    300
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_commands_accept_strings_and_specs() {
        let body: BatchExecuteRequest = serde_json::from_value(json!({
            "commands": [
                "show version",
                {"command": "show ip int brief", "parse": true, "template": "custom.tmpl"},
            ],
            "parse": false,
        }))
        .unwrap();

        let normalized = body.normalized_commands();
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].command, "show version");
        assert_eq!(normalized[0].parse, Some(false));
        assert_eq!(normalized[1].parse, Some(true));
        assert_eq!(normalized[1].template.as_deref(), Some("custom.tmpl"));
    }

    #[test]
    fn single_execute_defaults_leave_cache_off() {
        let body: ExecuteCommandRequest =
            serde_json::from_value(json!({"command": "show version"})).unwrap();
        assert!(!body.use_cache);
        assert!(!body.wait);
        assert_eq!(body.timeout, 10);
        assert_eq!(body.retries, 3);
        assert_eq!(body.max_queue_wait, 300);
    }

    #[test]
    fn batch_defaults_turn_cache_on() {
        let body: BatchExecuteRequest =
            serde_json::from_value(json!({"commands": ["show version"]})).unwrap();
        assert!(body.use_cache);
    }

    #[test]
    fn envelope_exposes_command_output() {
        let mut job = Job::new(
            crate::kernel::jobs::FN_EXECUTE_EXEC,
            json!({
                "host": "10.0.0.1",
                "driver": "cisco_ios",
                "commands": ["show version"],
                "credential": {"type": "stored", "credential_id": "lab"},
            }),
            EnqueueOptions::default(),
        );
        job.result = Some(json!({
            "data": {"show version": "IOS XE"},
            "meta": {"cache": {"cache_status": "disabled"}},
        }));
        job.status = JobStatus::Complete;

        let envelope = JobResponse::from_job(&job);
        assert_eq!(envelope.command_output("show version"), Some("IOS XE"));
        assert_eq!(
            envelope.cache_metadata().unwrap()["cache_status"],
            "disabled"
        );
        assert!(envelope.metadata.is_some());
    }
}
