//! Job model for queued command execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    #[default]
    New,
    Queued,
    Active,
    Complete,
    Failed,
    Aborted,
    Aborting,
}

impl JobStatus {
    /// Terminal states carry exactly one of result / error and never
    /// transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed | JobStatus::Aborted)
    }
}

/// The retry knobs a caller configured, stashed while gating inflates them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: bool,
}

/// Per-enqueue knobs, with the same defaults the HTTP surface documents.
#[derive(Debug, Clone, Copy)]
pub struct EnqueueOptions {
    /// Per-attempt deadline, seconds.
    pub timeout_secs: u64,
    /// Transient retry budget (attempt count).
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: bool,
    /// Gating budget: total wall-clock seconds to keep re-attempting lease
    /// acquisition.
    pub max_queue_wait_secs: u64,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            retries: 3,
            retry_delay_ms: 1000,
            retry_backoff: true,
            max_queue_wait_secs: 300,
        }
    }
}

/// The fundamental unit of work.
///
/// Gating state (`gating_started_at`, `gating_attempts`, `original_retry`)
/// is bound to the envelope rather than worker memory, so a job that
/// migrates between workers keeps its budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub function: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: bool,
    pub timeout_secs: u64,
    pub max_queue_wait_secs: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gating_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub gating_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_retry: Option<RetrySettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Job {
    pub fn new(function: impl Into<String>, payload: serde_json::Value, opts: EnqueueOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            function: function.into(),
            payload,
            status: JobStatus::New,
            attempts: 0,
            retries: opts.retries,
            retry_delay_ms: opts.retry_delay_ms,
            retry_backoff: opts.retry_backoff,
            timeout_secs: opts.timeout_secs,
            max_queue_wait_secs: opts.max_queue_wait_secs,
            result: None,
            error: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            gating_started_at: None,
            gating_attempts: 0,
            original_retry: None,
            worker_id: None,
        }
    }

    /// Attempts that reached the device, i.e. total attempts minus the ones
    /// spent waiting on the gate. Transient retry accounting uses this so a
    /// busy device does not burn the caller's retry budget.
    pub fn execution_attempts(&self) -> u32 {
        self.attempts.saturating_sub(self.gating_attempts)
    }

    pub fn current_retry_settings(&self) -> RetrySettings {
        RetrySettings {
            retries: self.retries,
            retry_delay_ms: self.retry_delay_ms,
            retry_backoff: self.retry_backoff,
        }
    }

    pub fn apply_retry_settings(&mut self, settings: RetrySettings) {
        self.retries = settings.retries;
        self.retry_delay_ms = settings.retry_delay_ms;
        self.retry_backoff = settings.retry_backoff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_job() -> Job {
        Job::new(super::super::FN_EXECUTE_EXEC, json!({}), EnqueueOptions::default())
    }

    #[test]
    fn new_job_starts_unattempted() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::New);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.retries, 3);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Aborted.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Active.is_terminal());
        assert!(!JobStatus::Aborting.is_terminal());
    }

    #[test]
    fn execution_attempts_exclude_gating() {
        let mut job = sample_job();
        job.attempts = 7;
        job.gating_attempts = 5;
        assert_eq!(job.execution_attempts(), 2);
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_value(JobStatus::Complete).unwrap(),
            json!("COMPLETE")
        );
        assert_eq!(serde_json::to_value(JobStatus::Queued).unwrap(), json!("QUEUED"));
    }

    #[test]
    fn retry_settings_round_trip() {
        let mut job = sample_job();
        let original = job.current_retry_settings();
        job.retries = 999_999;
        job.retry_backoff = false;
        job.apply_retry_settings(original);
        assert_eq!(job.retries, 3);
        assert!(job.retry_backoff);
    }
}
