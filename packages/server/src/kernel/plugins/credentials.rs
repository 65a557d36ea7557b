//! Credential store plugins.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{CredentialPlugin, PluginError};
use crate::common::SshCredentials;
use crate::Settings;

#[derive(Debug, Clone, Deserialize)]
struct CredentialEntry {
    username: String,
    password: String,
}

// ============================================================================
// YAML file credential store
// ============================================================================

/// Settings scope: `plugin_yaml_credential_file` in config,
/// `PATCHBAY_WORKER_PLUGIN_YAML_CREDENTIAL_FILE` in the worker environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YamlCredentialSettings {
    pub credential_file: String,
}

impl Default for YamlCredentialSettings {
    fn default() -> Self {
        Self {
            credential_file: "credentials.yml".to_string(),
        }
    }
}

/// File-backed credential store:
///
/// ```yaml
/// lab:
///   username: netops
///   password: hunter2
/// ```
#[derive(Debug)]
pub struct YamlCredentialPlugin {
    path: PathBuf,
    data: RwLock<Option<HashMap<String, CredentialEntry>>>,
}

impl YamlCredentialPlugin {
    pub fn new(plugin_settings: YamlCredentialSettings, main_settings: &Settings) -> Self {
        let path = PathBuf::from(&main_settings.project_root).join(plugin_settings.credential_file);
        Self {
            path,
            data: RwLock::new(None),
        }
    }

    async fn load(&self) -> Result<HashMap<String, CredentialEntry>, PluginError> {
        if let Some(data) = self.data.read().await.as_ref() {
            return Ok(data.clone());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            PluginError::Validation(format!(
                "credential file not readable: {}: {e}\n\
                 create it or point plugin_yaml_credential_file elsewhere",
                self.path.display()
            ))
        })?;
        let parsed: HashMap<String, CredentialEntry> =
            serde_yaml::from_str(&text).map_err(|e| {
                PluginError::Validation(format!(
                    "invalid YAML in credential file {}: {e}",
                    self.path.display()
                ))
            })?;
        *self.data.write().await = Some(parsed.clone());
        Ok(parsed)
    }
}

#[async_trait]
impl CredentialPlugin for YamlCredentialPlugin {
    fn name(&self) -> &'static str {
        "yaml"
    }

    async fn validate(&self) -> Result<(), PluginError> {
        let data = self.load().await?;
        tracing::info!(
            path = %self.path.display(),
            credentials = data.len(),
            "yaml credential store loaded"
        );
        Ok(())
    }

    async fn get_ssh_credentials(
        &self,
        credential_id: &str,
    ) -> Result<SshCredentials, PluginError> {
        let data = self.load().await?;
        let entry = data.get(credential_id).ok_or_else(|| {
            let mut available: Vec<&String> = data.keys().collect();
            available.sort();
            PluginError::NotFound(format!(
                "credential '{credential_id}' not found in {}; available: {available:?}",
                self.path.display()
            ))
        })?;
        Ok(SshCredentials {
            credential_id: credential_id.to_string(),
            username: entry.username.clone(),
            password: entry.password.clone(),
        })
    }

    async fn list_credentials(&self) -> Result<Vec<String>, PluginError> {
        let data = self.load().await?;
        let mut ids: Vec<String> = data.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// Static credential store (inline in the main configuration)
// ============================================================================

/// Settings scope: a `plugin_static_credentials` mapping in the config YAML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StaticCredentialSettings {
    credentials: HashMap<String, CredentialEntry>,
}

#[derive(Debug)]
pub struct StaticCredentialPlugin {
    credentials: HashMap<String, CredentialEntry>,
}

impl StaticCredentialPlugin {
    /// Build directly from id -> (username, password) pairs.
    pub fn new(entries: HashMap<String, (String, String)>) -> Self {
        Self {
            credentials: entries
                .into_iter()
                .map(|(id, (username, password))| (id, CredentialEntry { username, password }))
                .collect(),
        }
    }

    pub fn from_settings(settings: StaticCredentialSettings) -> Self {
        Self {
            credentials: settings.credentials,
        }
    }
}

#[async_trait]
impl CredentialPlugin for StaticCredentialPlugin {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn validate(&self) -> Result<(), PluginError> {
        if self.credentials.is_empty() {
            return Err(PluginError::Validation(
                "static credential store is empty; add a plugin_static_credentials mapping".into(),
            ));
        }
        Ok(())
    }

    async fn get_ssh_credentials(
        &self,
        credential_id: &str,
    ) -> Result<SshCredentials, PluginError> {
        let entry = self.credentials.get(credential_id).ok_or_else(|| {
            PluginError::NotFound(format!(
                "credential '{credential_id}' not found in static store"
            ))
        })?;
        Ok(SshCredentials {
            credential_id: credential_id.to_string(),
            username: entry.username.clone(),
            password: entry.password.clone(),
        })
    }

    async fn list_credentials(&self) -> Result<Vec<String>, PluginError> {
        let mut ids: Vec<String> = self.credentials.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
