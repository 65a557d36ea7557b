//! Pluggable inventory and credential sources.
//!
//! Two slots, each satisfied by exactly one plugin named in configuration.
//! The registry is a compile-time table: an unknown name is a startup error
//! that enumerates the valid names. Each plugin pulls its own settings from
//! the shared configuration surface under a `plugin_<name>_` prefix and must
//! pass `validate()` (connectivity / file-exists) before the process serves
//! traffic.

mod credentials;
mod inventory;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::common::{DeviceConfig, SshCredentials};
use crate::Settings;

pub use credentials::{StaticCredentialPlugin, YamlCredentialPlugin};
pub use inventory::{StaticInventoryPlugin, YamlInventoryPlugin};

pub const INVENTORY_PLUGIN_NAMES: &[&str] = &["yaml", "static"];
pub const CREDENTIAL_PLUGIN_NAMES: &[&str] = &["yaml", "static"];

#[derive(Debug, Error)]
pub enum PluginError {
    /// Device or credential id unknown to the source.
    #[error("{0}")]
    NotFound(String),
    /// Bad plugin configuration or source file.
    #[error("{0}")]
    Validation(String),
    /// The backing source failed at runtime.
    #[error("{0}")]
    Backend(String),
}

/// One inventory source: resolves device names to connection records.
#[async_trait]
pub trait InventoryPlugin: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Startup check with an actionable failure message.
    async fn validate(&self) -> Result<(), PluginError>;

    async fn get_device_config(&self, device_name: &str) -> Result<DeviceConfig, PluginError>;

    /// Every record the source knows, as loosely-typed rows for export.
    async fn list_all_nodes(&self) -> Result<Vec<serde_json::Value>, PluginError>;

    /// Fields export queries may filter on, with descriptions. Part of the
    /// plugin interface so the export endpoint never has to probe for
    /// conversion helpers.
    fn filterable_fields(&self) -> BTreeMap<&'static str, &'static str>;
}

/// One credential source: resolves credential ids to SSH credentials.
#[async_trait]
pub trait CredentialPlugin: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    async fn validate(&self) -> Result<(), PluginError>;

    async fn get_ssh_credentials(&self, credential_id: &str)
        -> Result<SshCredentials, PluginError>;

    /// Ids only, never the secrets.
    async fn list_credentials(&self) -> Result<Vec<String>, PluginError>;
}

/// Build the configured inventory plugin and run its validation. Fatal on
/// unknown names and on validation failures.
pub async fn init_inventory_plugin(settings: &Settings) -> Result<Arc<dyn InventoryPlugin>> {
    let name = settings.inventory_plugin.as_str();
    let plugin: Arc<dyn InventoryPlugin> = match name {
        "yaml" => {
            let scope = settings
                .plugin_scope("yaml")
                .deserialize()
                .context("bad plugin_yaml_* inventory settings")?;
            Arc::new(YamlInventoryPlugin::new(scope, settings))
        }
        "static" => {
            let scope = settings
                .plugin_scope("static")
                .deserialize()
                .context("bad plugin_static_* inventory settings")?;
            Arc::new(StaticInventoryPlugin::from_settings(scope))
        }
        other => bail!(
            "unknown inventory plugin '{other}'; valid plugins: {}",
            INVENTORY_PLUGIN_NAMES.join(", ")
        ),
    };
    plugin
        .validate()
        .await
        .with_context(|| format!("inventory plugin '{name}' failed validation"))?;
    tracing::info!(plugin = name, "inventory plugin validated");
    Ok(plugin)
}

/// Build the configured credential plugin and run its validation.
pub async fn init_credential_plugin(settings: &Settings) -> Result<Arc<dyn CredentialPlugin>> {
    let name = settings.credential_plugin.as_str();
    let plugin: Arc<dyn CredentialPlugin> = match name {
        "yaml" => {
            let scope = settings
                .plugin_scope("yaml")
                .deserialize()
                .context("bad plugin_yaml_* credential settings")?;
            Arc::new(YamlCredentialPlugin::new(scope, settings))
        }
        "static" => {
            let scope = settings
                .plugin_scope("static")
                .deserialize()
                .context("bad plugin_static_* credential settings")?;
            Arc::new(StaticCredentialPlugin::from_settings(scope))
        }
        other => bail!(
            "unknown credential plugin '{other}'; valid plugins: {}",
            CREDENTIAL_PLUGIN_NAMES.join(", ")
        ),
    };
    plugin
        .validate()
        .await
        .with_context(|| format!("credential plugin '{name}' failed validation"))?;
    tracing::info!(plugin = name, "credential plugin validated");
    Ok(plugin)
}
