//! Job worker.
//!
//! Pulls one job at a time from the queue; parallelism comes from running
//! multiple worker processes against the shared store. For each claimed
//! execute-commands job the worker derives the device id, passes the
//! semaphore gate (or hands the gating verdict back to the queue), resolves
//! credentials, opens the driver session, runs the cache-aware command
//! runner, and records the outcome. The lease is released on every exit
//! path. A background task publishes the liveness heartbeat.

pub mod runner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::deps::BrokerDeps;
use super::drivers::{DriverError, DriverRegistry};
use super::jobs::{driver_family_of, Job, JobQueue, FN_LIST_CREDENTIALS};
use super::monitoring::{heartbeat_task, record_job_stats, JobOutcome};
use super::plugins::{CredentialPlugin, PluginError};
use super::retry::{FailureKind, GateOutcome, RetryController, RetryVerdict};
use super::semaphore::DeviceSemaphore;
use super::store::KvStore;
use crate::common::{CredentialSource, ExecutionRequest, SshCredentials};
use crate::kernel::cache::CacheManager;
use crate::kernel::drivers::DeviceTarget;
use crate::Settings;

/// Per-instance worker knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_ttl: Duration,
}

impl WorkerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            worker_id: format!("worker-{}", &suffix[..8]),
            poll_interval: settings.worker_poll_interval(),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs),
            heartbeat_ttl: Duration::from_secs(settings.heartbeat_ttl_secs),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }
}

pub struct Worker {
    settings: Arc<Settings>,
    store: Arc<dyn KvStore>,
    queue: Arc<JobQueue>,
    cache: Arc<CacheManager>,
    credentials: Arc<dyn CredentialPlugin>,
    drivers: Arc<DriverRegistry>,
    retry: RetryController,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        deps: &BrokerDeps,
        credentials: Arc<dyn CredentialPlugin>,
        drivers: Arc<DriverRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            settings: deps.settings.clone(),
            store: deps.store.clone(),
            queue: deps.queue.clone(),
            cache: deps.cache.clone(),
            credentials,
            drivers,
            retry: RetryController::new(deps.settings.gating_retry_interval()),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for graceful shutdown: the worker finishes its current job,
    /// stops the heartbeat, and lets leases expire naturally.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Main loop: claim, process, repeat until shutdown.
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            worker_id = %self.config.worker_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "worker starting"
        );

        let (heartbeat_stop, heartbeat_rx) = tokio::sync::watch::channel(false);
        let heartbeat = tokio::spawn(heartbeat_task(
            self.store.clone(),
            self.config.worker_id.clone(),
            self.config.heartbeat_interval,
            self.config.heartbeat_ttl,
            heartbeat_rx,
        ));

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match self.queue.claim(&self.config.worker_id).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    tracing::error!(error = %e, "failed to claim a job");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        let _ = heartbeat_stop.send(true);
        let _ = heartbeat.await;
        tracing::info!(worker_id = %self.config.worker_id, "worker stopped");
        Ok(())
    }

    /// Run until Ctrl+C.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown_handle();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
        });
        self.run().await
    }

    async fn process(&self, mut job: Job) {
        let started = Instant::now();
        tracing::debug!(
            job_id = %job.id,
            function = %job.function,
            attempt = job.attempts,
            "processing job"
        );

        if let Some(family) = driver_family_of(&job.function).map(str::to_string) {
            self.process_execute(&mut job, &family, started).await;
        } else if job.function == FN_LIST_CREDENTIALS {
            self.process_list_credentials(&mut job, started).await;
        } else {
            let error = format!("unknown job function '{}'", job.function);
            job.retries = job.attempts;
            self.fail_terminal(&mut job, error, "unknown", None, None, started)
                .await;
        }
    }

    async fn process_execute(&self, job: &mut Job, family: &str, started: Instant) {
        let request: ExecutionRequest = match serde_json::from_value(job.payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                job.retries = job.attempts;
                self.fail_terminal(
                    job,
                    format!("invalid payload: {e}"),
                    "unknown",
                    None,
                    None,
                    started,
                )
                .await;
                return;
            }
        };
        let device_id = request.device_id();
        let credential_id = request.credential.credential_id().map(str::to_string);
        let command_summary = Some(summarise_commands(&request.commands));

        let semaphore = DeviceSemaphore::new(
            self.store.clone(),
            device_id.clone(),
            self.settings.max_concurrent_tasks,
            self.settings.lease_ttl(),
        );

        let acquired = match semaphore.acquire_lease(&job.id).await {
            Ok(acquired) => acquired,
            Err(e) => {
                // Store outage while gating: retryable like any other
                // transient failure.
                self.handle_failure(
                    job,
                    FailureKind::Transient,
                    format!("lease store error for {device_id}: {e}"),
                    &device_id,
                    credential_id,
                    command_summary,
                    started,
                )
                .await;
                return;
            }
        };

        match self.retry.on_gate_result(job, acquired, Utc::now()) {
            GateOutcome::Requeue { delay } => {
                tracing::debug!(
                    job_id = %job.id,
                    device = %device_id,
                    gating_attempts = job.gating_attempts,
                    "device busy, requeueing at fixed interval"
                );
                if let Err(e) = self.queue.requeue(job, delay).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to requeue gated job");
                }
                return;
            }
            GateOutcome::Exhausted { waited, attempts } => {
                let error = format!(
                    "gating_exhausted: unable to acquire lease for {device_id} after {:.1}s \
                     over {attempts} attempts (max_queue_wait={}s)",
                    waited.as_secs_f64(),
                    job.max_queue_wait_secs
                );
                self.fail_terminal(job, error, &device_id, credential_id, command_summary, started)
                    .await;
                return;
            }
            GateOutcome::Proceed => {}
        }

        // Lease held from here: release on every exit path.
        let outcome = self.run_under_lease(job, &request, family, &device_id).await;
        semaphore.release_lease(&job.id).await;

        match outcome {
            Ok(result) => {
                if let Err(e) = self.queue.complete(job, result).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to mark job complete");
                }
                tracing::info!(
                    job_id = %job.id,
                    device = %device_id,
                    attempts = job.attempts,
                    elapsed_seconds = started.elapsed().as_secs_f64(),
                    "job complete"
                );
                record_job_stats(
                    &self.store,
                    &JobOutcome {
                        worker_id: self.config.worker_id.clone(),
                        device: device_id,
                        success: true,
                        error: None,
                        duration_seconds: started.elapsed().as_secs_f64(),
                        job_id: job.id.to_string(),
                        credential_id,
                        command: command_summary,
                        attempts: job.attempts,
                    },
                )
                .await;
            }
            Err((kind, error)) => {
                self.handle_failure(
                    job,
                    kind,
                    error,
                    &device_id,
                    credential_id,
                    command_summary,
                    started,
                )
                .await;
            }
        }
    }

    /// Resolve credentials, open the driver session, and run the commands,
    /// all under the per-attempt deadline.
    async fn run_under_lease(
        &self,
        job: &Job,
        request: &ExecutionRequest,
        family: &str,
        device_id: &str,
    ) -> Result<serde_json::Value, (FailureKind, String)> {
        let credentials = match &request.credential {
            CredentialSource::Stored { credential_id } => self
                .credentials
                .get_ssh_credentials(credential_id)
                .await
                .map_err(|e| match e {
                    PluginError::NotFound(msg) => (FailureKind::Permanent, msg),
                    other => (
                        FailureKind::Transient,
                        format!("credential store error: {other}"),
                    ),
                })?,
            CredentialSource::Inline { username, password } => SshCredentials {
                credential_id: "inline".to_string(),
                username: username.clone(),
                password: password.clone(),
            },
        };

        let driver = self.drivers.get(family).ok_or_else(|| {
            (
                FailureKind::Permanent,
                format!(
                    "unknown driver family '{family}'; known families: {}",
                    self.drivers.families().join(", ")
                ),
            )
        })?;

        let target = DeviceTarget {
            host: request.host.clone(),
            port: request.port,
            driver: request.driver.clone(),
            timeout: Duration::from_secs(job.timeout_secs),
        };
        let policy = runner::CachePolicy::from(request);

        let attempt = async {
            let mut session = driver.open(&target, &credentials).await?;
            let outcome = runner::run_commands(
                session.as_mut(),
                device_id,
                &request.commands,
                &self.cache,
                policy,
            )
            .await;
            session.close().await;
            outcome
        };

        match tokio::time::timeout(Duration::from_secs(job.timeout_secs), attempt).await {
            Err(_) => Err((
                FailureKind::Transient,
                format!(
                    "attempt timed out after {}s against {device_id}",
                    job.timeout_secs
                ),
            )),
            Ok(Err(e)) => {
                let kind = match &e {
                    DriverError::Auth(_) => FailureKind::Auth,
                    _ => FailureKind::Transient,
                };
                Err((kind, e.to_string()))
            }
            Ok(Ok((data, cache_meta))) => Ok(json!({
                "data": data,
                "meta": {
                    "cache": cache_meta,
                    "execution": {
                        "device": device_id,
                    },
                },
            })),
        }
    }

    async fn process_list_credentials(&self, job: &mut Job, started: Instant) {
        match self.credentials.list_credentials().await {
            Ok(ids) => {
                let result = json!({"credentials": ids});
                if let Err(e) = self.queue.complete(job, result).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to mark job complete");
                }
                record_job_stats(
                    &self.store,
                    &JobOutcome {
                        worker_id: self.config.worker_id.clone(),
                        device: "credential-store".to_string(),
                        success: true,
                        error: None,
                        duration_seconds: started.elapsed().as_secs_f64(),
                        job_id: job.id.to_string(),
                        credential_id: None,
                        command: None,
                        attempts: job.attempts,
                    },
                )
                .await;
            }
            Err(e) => {
                self.handle_failure(
                    job,
                    FailureKind::Transient,
                    format!("failed to list credentials: {e}"),
                    "credential-store",
                    None,
                    None,
                    started,
                )
                .await;
            }
        }
    }

    /// Apply the retry verdict for a failed attempt: requeue with delay, or
    /// finish the job and count the outcome.
    #[allow(clippy::too_many_arguments)]
    async fn handle_failure(
        &self,
        job: &mut Job,
        kind: FailureKind,
        error: String,
        device: &str,
        credential_id: Option<String>,
        command: Option<String>,
        started: Instant,
    ) {
        match self.retry.on_failure(job, kind) {
            RetryVerdict::Requeue { delay } => {
                tracing::warn!(
                    job_id = %job.id,
                    device = %device,
                    attempt = job.attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "attempt failed, will retry"
                );
                if let Err(e) = self.queue.requeue(job, delay).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to requeue job");
                }
            }
            RetryVerdict::Fail => {
                self.fail_terminal(job, error, device, credential_id, command, started)
                    .await;
            }
        }
    }

    async fn fail_terminal(
        &self,
        job: &mut Job,
        error: String,
        device: &str,
        credential_id: Option<String>,
        command: Option<String>,
        started: Instant,
    ) {
        tracing::error!(
            job_id = %job.id,
            device = %device,
            attempts = job.attempts,
            error = %error,
            "job failed"
        );
        if let Err(e) = self.queue.fail(job, error.clone()).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to mark job failed");
        }
        record_job_stats(
            &self.store,
            &JobOutcome {
                worker_id: self.config.worker_id.clone(),
                device: device.to_string(),
                success: false,
                error: Some(error),
                duration_seconds: started.elapsed().as_secs_f64(),
                job_id: job.id.to_string(),
                credential_id,
                command,
                attempts: job.attempts,
            },
        )
        .await;
    }
}

/// First three commands, comma-joined, for the failure stream.
fn summarise_commands(commands: &[String]) -> String {
    commands
        .iter()
        .take(3)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
