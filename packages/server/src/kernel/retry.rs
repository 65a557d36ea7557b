//! Retry control.
//!
//! Two orthogonal budgets govern a job:
//!
//! - the **gating budget**: total wall-clock time spent re-attempting lease
//!   acquisition, checked at a fixed interval (the device is busy, not the
//!   network);
//! - the **transient budget**: actual execution attempts, with exponential
//!   backoff, restored from the stashed settings once the job passes the gate.
//!
//! Failures classify into kinds, and the controller returns a typed verdict
//! the queue applies - control flow never rides on raised errors.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::jobs::Job;

/// Stand-in retry count while a job is gating: the bail-out is time-based,
/// not attempt-based.
const GATING_RETRY_LIMIT: u32 = 999_999;

/// Exponential backoff cap for transient retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Classification of a failed execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Device lease not acquired. Handled by the gating budget.
    Gating,
    /// Failed login to the device. Never retried.
    Auth,
    /// Explicitly unrecoverable. Never retried.
    Permanent,
    /// Anything else: network, timeout, driver error. Retried with backoff.
    Transient,
}

/// What the worker should do after a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Lease held; original retry settings restored.
    Proceed,
    /// Device busy, budget remains: re-enqueue at the fixed interval.
    Requeue { delay: Duration },
    /// Gating budget exhausted: fail permanently.
    Exhausted { waited: Duration, attempts: u32 },
}

/// What the worker should do after a failed execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryVerdict {
    Requeue { delay: Duration },
    Fail,
}

pub struct RetryController {
    gating_interval: Duration,
}

impl RetryController {
    pub fn new(gating_interval: Duration) -> Self {
        Self { gating_interval }
    }

    /// Apply the result of a lease acquisition attempt to the job.
    ///
    /// On the first gate failure the caller's retry settings are stashed on
    /// the envelope and replaced with fixed-interval, effectively-unlimited
    /// retries; the bail-out compares elapsed wall-clock time against
    /// `max_queue_wait`. Once the gate clears, the stash is restored so
    /// transient failures get the caller's configured behaviour.
    pub fn on_gate_result(&self, job: &mut Job, acquired: bool, now: DateTime<Utc>) -> GateOutcome {
        if acquired {
            if let Some(original) = job.original_retry.take() {
                job.apply_retry_settings(original);
                let waited = job
                    .gating_started_at
                    .take()
                    .map(|started| now.signed_duration_since(started))
                    .unwrap_or_default();
                tracing::info!(
                    job_id = %job.id,
                    gating_attempts = job.gating_attempts,
                    waited_secs = waited.num_milliseconds() as f64 / 1000.0,
                    retries = job.retries,
                    "lease acquired, restored retry settings"
                );
            }
            return GateOutcome::Proceed;
        }

        if job.gating_started_at.is_none() {
            job.gating_started_at = Some(now);
            job.original_retry = Some(job.current_retry_settings());
            job.retries = GATING_RETRY_LIMIT;
            job.retry_delay_ms = self.gating_interval.as_millis() as u64;
            job.retry_backoff = false;
            tracing::info!(
                job_id = %job.id,
                max_queue_wait_secs = job.max_queue_wait_secs,
                "device busy, entering gating retries"
            );
        }
        job.gating_attempts += 1;

        let started = job.gating_started_at.unwrap_or(now);
        let elapsed = now
            .signed_duration_since(started)
            .to_std()
            .unwrap_or_default();
        let budget = Duration::from_secs(job.max_queue_wait_secs);

        if elapsed >= budget {
            // Permanent from here on: no retries remain.
            job.retries = job.attempts;
            tracing::warn!(
                job_id = %job.id,
                gating_attempts = job.gating_attempts,
                waited_secs = elapsed.as_secs_f64(),
                max_queue_wait_secs = job.max_queue_wait_secs,
                "gating budget exhausted"
            );
            return GateOutcome::Exhausted {
                waited: elapsed,
                attempts: job.gating_attempts,
            };
        }

        GateOutcome::Requeue {
            delay: self.gating_interval,
        }
    }

    /// Decide what happens after a failed execution attempt.
    pub fn on_failure(&self, job: &mut Job, kind: FailureKind) -> RetryVerdict {
        match kind {
            FailureKind::Auth | FailureKind::Permanent => {
                // A broken password must not be tried again: collapsing the
                // budget to the attempts already made ends the job here.
                job.retries = job.attempts;
                RetryVerdict::Fail
            }
            FailureKind::Gating => RetryVerdict::Requeue {
                delay: self.gating_interval,
            },
            FailureKind::Transient => {
                if job.retries > job.execution_attempts() {
                    RetryVerdict::Requeue {
                        delay: self.transient_delay(job),
                    }
                } else {
                    RetryVerdict::Fail
                }
            }
        }
    }

    fn transient_delay(&self, job: &Job) -> Duration {
        let base = Duration::from_millis(job.retry_delay_ms);
        if !job.retry_backoff {
            return base;
        }
        let exponent = job.execution_attempts().saturating_sub(1).min(20);
        let delay = base.saturating_mul(1u32 << exponent);
        delay.min(MAX_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{EnqueueOptions, FN_EXECUTE_EXEC};
    use serde_json::json;

    fn job_with(opts: EnqueueOptions) -> Job {
        Job::new(FN_EXECUTE_EXEC, json!({}), opts)
    }

    fn controller() -> RetryController {
        RetryController::new(Duration::from_secs(2))
    }

    #[test]
    fn auth_failure_collapses_the_budget() {
        let mut job = job_with(EnqueueOptions {
            retries: 5,
            ..Default::default()
        });
        job.attempts = 1;

        let verdict = controller().on_failure(&mut job, FailureKind::Auth);
        assert_eq!(verdict, RetryVerdict::Fail);
        assert_eq!(job.retries, 1);
    }

    #[test]
    fn transient_failure_retries_until_budget_spent() {
        let ctrl = controller();
        let mut job = job_with(EnqueueOptions {
            retries: 3,
            retry_backoff: false,
            ..Default::default()
        });

        job.attempts = 1;
        assert!(matches!(
            ctrl.on_failure(&mut job, FailureKind::Transient),
            RetryVerdict::Requeue { .. }
        ));
        job.attempts = 2;
        assert!(matches!(
            ctrl.on_failure(&mut job, FailureKind::Transient),
            RetryVerdict::Requeue { .. }
        ));
        job.attempts = 3;
        assert_eq!(ctrl.on_failure(&mut job, FailureKind::Transient), RetryVerdict::Fail);
    }

    #[test]
    fn backoff_doubles_per_execution_attempt() {
        let ctrl = controller();
        let mut job = job_with(EnqueueOptions {
            retries: 5,
            retry_delay_ms: 100,
            retry_backoff: true,
            ..Default::default()
        });

        job.attempts = 1;
        assert_eq!(
            ctrl.on_failure(&mut job, FailureKind::Transient),
            RetryVerdict::Requeue {
                delay: Duration::from_millis(100)
            }
        );
        job.attempts = 3;
        assert_eq!(
            ctrl.on_failure(&mut job, FailureKind::Transient),
            RetryVerdict::Requeue {
                delay: Duration::from_millis(400)
            }
        );
    }

    #[test]
    fn first_gate_failure_stashes_settings() {
        let ctrl = controller();
        let mut job = job_with(EnqueueOptions::default());
        job.attempts = 1;

        let outcome = ctrl.on_gate_result(&mut job, false, Utc::now());
        assert_eq!(
            outcome,
            GateOutcome::Requeue {
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(job.gating_attempts, 1);
        assert_eq!(job.retries, GATING_RETRY_LIMIT);
        assert!(!job.retry_backoff);
        assert_eq!(
            job.original_retry,
            Some(crate::kernel::jobs::RetrySettings {
                retries: 3,
                retry_delay_ms: 1000,
                retry_backoff: true,
            })
        );
    }

    #[test]
    fn gate_clearing_restores_settings() {
        let ctrl = controller();
        let mut job = job_with(EnqueueOptions::default());
        job.attempts = 1;

        ctrl.on_gate_result(&mut job, false, Utc::now());
        job.attempts = 2;
        let outcome = ctrl.on_gate_result(&mut job, true, Utc::now());

        assert_eq!(outcome, GateOutcome::Proceed);
        assert_eq!(job.retries, 3);
        assert!(job.retry_backoff);
        assert!(job.original_retry.is_none());
        assert_eq!(job.gating_attempts, 1);
    }

    #[test]
    fn gating_budget_exhausts_on_elapsed_time() {
        let ctrl = controller();
        let mut job = job_with(EnqueueOptions {
            max_queue_wait_secs: 5,
            ..Default::default()
        });
        job.attempts = 1;

        let start = Utc::now();
        assert!(matches!(
            ctrl.on_gate_result(&mut job, false, start),
            GateOutcome::Requeue { .. }
        ));

        job.attempts = 2;
        let later = start + chrono::Duration::seconds(6);
        let outcome = ctrl.on_gate_result(&mut job, false, later);
        assert!(matches!(outcome, GateOutcome::Exhausted { .. }));
        assert_eq!(job.retries, job.attempts);
    }

    #[test]
    fn zero_queue_wait_exhausts_immediately() {
        let ctrl = controller();
        let mut job = job_with(EnqueueOptions {
            max_queue_wait_secs: 0,
            ..Default::default()
        });
        job.attempts = 1;

        let outcome = ctrl.on_gate_result(&mut job, false, Utc::now());
        assert!(matches!(outcome, GateOutcome::Exhausted { .. }));
    }

    #[test]
    fn gating_does_not_burn_the_transient_budget() {
        let ctrl = controller();
        let mut job = job_with(EnqueueOptions {
            retries: 3,
            retry_backoff: false,
            ..Default::default()
        });

        // Five gating attempts before the gate clears.
        for attempt in 1..=5 {
            job.attempts = attempt;
            ctrl.on_gate_result(&mut job, false, Utc::now());
        }
        job.attempts = 6;
        assert_eq!(ctrl.on_gate_result(&mut job, true, Utc::now()), GateOutcome::Proceed);

        // First execution failure still has the full budget ahead of it.
        assert!(matches!(
            ctrl.on_failure(&mut job, FailureKind::Transient),
            RetryVerdict::Requeue { .. }
        ));
    }
}
