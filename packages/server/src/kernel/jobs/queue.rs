//! Store-backed job queue.
//!
//! Job records live at `queue:job:<id>`; ready work sits in the FIFO list
//! `queue:pending` and delayed retries in the sorted set `queue:scheduled`
//! (score = run-at unix time). Claiming promotes due retries, pops the FIFO,
//! and moves the record QUEUED -> ACTIVE while counting the attempt.
//! Terminal records are re-written with a TTL so finished jobs age out of
//! the store on their own.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::{Job, JobStatus};
use crate::kernel::store::{KvStore, StoreError, StoreResult};

const JOB_KEY_PREFIX: &str = "queue:job:";
const PENDING_KEY: &str = "queue:pending";
const SCHEDULED_KEY: &str = "queue:scheduled";

/// How often `wait` re-reads the job record.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct JobQueue {
    store: Arc<dyn KvStore>,
    job_ttl: Duration,
}

impl JobQueue {
    pub fn new(store: Arc<dyn KvStore>, job_ttl: Duration) -> Self {
        Self { store, job_ttl }
    }

    fn job_key(id: &Uuid) -> String {
        format!("{JOB_KEY_PREFIX}{id}")
    }

    async fn save(&self, job: &Job) -> StoreResult<()> {
        let encoded =
            serde_json::to_string(job).map_err(|e| StoreError::Encoding(e.to_string()))?;
        let key = Self::job_key(&job.id);
        if job.status.is_terminal() {
            self.store.set_ex(&key, &encoded, self.job_ttl).await
        } else {
            self.store.set(&key, &encoded).await
        }
    }

    /// Put a new job on the queue. Returns it in QUEUED state.
    pub async fn enqueue(&self, mut job: Job) -> StoreResult<Job> {
        job.status = JobStatus::Queued;
        job.enqueued_at = Utc::now();
        self.save(&job).await?;
        self.store.list_push(PENDING_KEY, &job.id.to_string()).await?;
        tracing::info!(
            job_id = %job.id,
            function = %job.function,
            retries = job.retries,
            "enqueued job"
        );
        Ok(job)
    }

    /// Fetch a job record by id.
    pub async fn job(&self, id: &Uuid) -> StoreResult<Option<Job>> {
        let Some(encoded) = self.store.get(&Self::job_key(id)).await? else {
            return Ok(None);
        };
        let job =
            serde_json::from_str(&encoded).map_err(|e| StoreError::Encoding(e.to_string()))?;
        Ok(Some(job))
    }

    /// Claim the next ready job for `worker_id`, if any.
    ///
    /// Counts the attempt: the claimed record comes back ACTIVE with
    /// `attempts` already incremented.
    pub async fn claim(&self, worker_id: &str) -> StoreResult<Option<Job>> {
        self.promote_due().await?;
        loop {
            let Some(id_text) = self.store.list_pop(PENDING_KEY).await? else {
                return Ok(None);
            };
            let Ok(id) = id_text.parse::<Uuid>() else {
                tracing::warn!(entry = %id_text, "dropping malformed queue entry");
                continue;
            };
            let Some(mut job) = self.job(&id).await? else {
                // Record aged out from under its queue entry.
                continue;
            };
            job.status = JobStatus::Active;
            job.attempts += 1;
            job.started_at = Some(Utc::now());
            job.worker_id = Some(worker_id.to_string());
            self.save(&job).await?;
            return Ok(Some(job));
        }
    }

    /// Put a claimed job back for a later attempt.
    pub async fn requeue(&self, job: &mut Job, delay: Duration) -> StoreResult<()> {
        job.status = JobStatus::Queued;
        job.worker_id = None;
        self.save(job).await?;
        if delay.is_zero() {
            self.store.list_push(PENDING_KEY, &job.id.to_string()).await
        } else {
            let run_at = Utc::now().timestamp_millis() as f64 / 1000.0 + delay.as_secs_f64();
            self.store
                .zset_add(SCHEDULED_KEY, &job.id.to_string(), run_at)
                .await
        }
    }

    /// Record success. Exactly `result` is populated; the record gets a TTL.
    pub async fn complete(&self, job: &mut Job, result: serde_json::Value) -> StoreResult<()> {
        job.status = JobStatus::Complete;
        job.result = Some(result);
        job.error = None;
        job.finished_at = Some(Utc::now());
        self.save(job).await
    }

    /// Record failure. Exactly `error` is populated; the record gets a TTL.
    pub async fn fail(&self, job: &mut Job, error: impl Into<String>) -> StoreResult<()> {
        job.status = JobStatus::Failed;
        job.error = Some(error.into());
        job.result = None;
        job.finished_at = Some(Utc::now());
        self.save(job).await
    }

    /// Block up to `timeout` for the job to reach a terminal state, then
    /// return the freshest record either way. Timing out the wait does not
    /// cancel the job; it keeps running and the caller polls.
    pub async fn wait(&self, id: &Uuid, timeout: Duration) -> StoreResult<Option<Job>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.job(id).await?;
            match &job {
                Some(job) if job.status.is_terminal() => return Ok(Some(job.clone())),
                None => return Ok(None),
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Jobs waiting in the ready FIFO (scheduled retries not included).
    pub async fn depth(&self) -> StoreResult<u64> {
        self.store.list_len(PENDING_KEY).await
    }

    /// Move scheduled jobs whose run-at has passed onto the ready FIFO.
    async fn promote_due(&self) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        for id in self.store.zset_pop_due(SCHEDULED_KEY, now).await? {
            self.store.list_push(PENDING_KEY, &id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{EnqueueOptions, FN_EXECUTE_EXEC};
    use crate::kernel::store::MemoryStore;
    use serde_json::json;

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(MemoryStore::new()), Duration::from_secs(600))
    }

    fn sample_job() -> Job {
        Job::new(FN_EXECUTE_EXEC, json!({"host": "r1"}), EnqueueOptions::default())
    }

    #[tokio::test]
    async fn enqueue_then_fetch() {
        let queue = queue();
        let job = queue.enqueue(sample_job()).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let fetched = queue.job(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.attempts, 0);
    }

    #[tokio::test]
    async fn claim_is_fifo_and_counts_attempts() {
        let queue = queue();
        let first = queue.enqueue(sample_job()).await.unwrap();
        let second = queue.enqueue(sample_job()).await.unwrap();

        let claimed = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Active);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.worker_id.as_deref(), Some("w1"));

        let claimed = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);
        assert!(queue.claim("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requeued_job_is_claimable_after_delay() {
        let queue = queue();
        queue.enqueue(sample_job()).await.unwrap();
        let mut job = queue.claim("w1").await.unwrap().unwrap();

        queue.requeue(&mut job, Duration::from_millis(30)).await.unwrap();
        assert!(queue.claim("w1").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let reclaimed = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn terminal_states_carry_exactly_one_of_result_and_error() {
        let queue = queue();
        queue.enqueue(sample_job()).await.unwrap();
        let mut job = queue.claim("w1").await.unwrap().unwrap();
        queue.complete(&mut job, json!({"data": {}})).await.unwrap();

        let done = queue.job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Complete);
        assert!(done.result.is_some());
        assert!(done.error.is_none());

        queue.enqueue(sample_job()).await.unwrap();
        let mut job = queue.claim("w1").await.unwrap().unwrap();
        queue.fail(&mut job, "connection refused").await.unwrap();

        let failed = queue.job(&job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.result.is_none());
        assert_eq!(failed.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn wait_returns_current_state_on_timeout() {
        let queue = queue();
        let job = queue.enqueue(sample_job()).await.unwrap();

        let seen = queue
            .wait(&job.id, Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.status, JobStatus::Queued);
    }
}
