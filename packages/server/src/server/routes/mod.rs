//! Route handlers.

pub mod cache;
pub mod credentials;
pub mod device;
pub mod health;
pub mod inventory;
pub mod job;
pub mod metrics;
pub mod monitoring;
pub mod raw;

use std::time::Duration;

use crate::common::{ApiError, CredentialSource, DeviceConfig};
use crate::kernel::jobs::{EnqueueOptions, Job, JobQueue};
use crate::kernel::plugins::PluginError;
use crate::Settings;

pub(crate) fn plugin_error(err: PluginError) -> ApiError {
    match err {
        PluginError::NotFound(msg) => ApiError::NotFound(msg),
        PluginError::Validation(msg) => ApiError::Validation(msg),
        PluginError::Backend(msg) => ApiError::Internal(msg),
    }
}

/// Enqueue a job and, when asked, block up to the request timeout for its
/// completion. The envelope comes back either way; timing out the wait does
/// not cancel the job.
pub(crate) async fn enqueue_and_maybe_wait(
    queue: &JobQueue,
    function: String,
    payload: serde_json::Value,
    opts: EnqueueOptions,
    wait: bool,
) -> Result<Job, ApiError> {
    let job = Job::new(function, payload, opts);
    let job = queue.enqueue(job).await?;
    if !wait {
        return Ok(job);
    }
    let waited = queue
        .wait(&job.id, Duration::from_secs(opts.timeout_secs))
        .await?;
    Ok(waited.unwrap_or(job))
}

/// Pick between the device's stored credential and a caller-supplied inline
/// override. Inline overrides need both halves and the config gate.
pub(crate) fn choose_credential(
    username: &Option<String>,
    password: &Option<String>,
    device: &DeviceConfig,
    settings: &Settings,
) -> Result<CredentialSource, ApiError> {
    match (username, password) {
        (Some(username), Some(password)) => {
            if !settings.allow_inline_credentials {
                return Err(ApiError::Validation(
                    "inline credentials are disabled (allow_inline_credentials=false)".to_string(),
                ));
            }
            Ok(CredentialSource::Inline {
                username: username.clone(),
                password: password.clone(),
            })
        }
        (None, None) => Ok(CredentialSource::Stored {
            credential_id: device.credential_id.clone(),
        }),
        _ => Err(ApiError::Validation(
            "inline credentials require both username and password".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceConfig {
        DeviceConfig {
            driver_family: "exec".into(),
            driver: "cisco_ios".into(),
            host: "10.0.0.1".into(),
            port: 22,
            credential_id: "lab".into(),
        }
    }

    #[test]
    fn stored_credential_is_the_default() {
        let settings = Settings::default();
        let credential = choose_credential(&None, &None, &device(), &settings).unwrap();
        assert_eq!(
            credential,
            CredentialSource::Stored {
                credential_id: "lab".into()
            }
        );
    }

    #[test]
    fn inline_needs_both_halves() {
        let settings = Settings {
            allow_inline_credentials: true,
            ..Settings::default()
        };
        assert!(choose_credential(&Some("u".into()), &None, &device(), &settings).is_err());
        assert!(choose_credential(&None, &Some("p".into()), &device(), &settings).is_err());
        assert!(
            choose_credential(&Some("u".into()), &Some("p".into()), &device(), &settings).is_ok()
        );
    }

    #[test]
    fn inline_is_gated_by_config() {
        let settings = Settings::default();
        let err = choose_credential(&Some("u".into()), &Some("p".into()), &device(), &settings)
            .unwrap_err();
        assert!(err.to_string().contains("allow_inline_credentials"));
    }
}
