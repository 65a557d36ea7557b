//! Inventory plugins.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use super::{InventoryPlugin, PluginError};
use crate::common::DeviceConfig;
use crate::Settings;

// ============================================================================
// YAML file inventory
// ============================================================================

/// Settings scope: `plugin_yaml_inventory_file` in config,
/// `PATCHBAY_PLUGIN_YAML_INVENTORY_FILE` in the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YamlInventorySettings {
    pub inventory_file: String,
}

impl Default for YamlInventorySettings {
    fn default() -> Self {
        Self {
            inventory_file: "inventory.yml".to_string(),
        }
    }
}

/// File-backed inventory:
///
/// ```yaml
/// router1:
///   driver_family: exec
///   driver: cisco_ios
///   host: 10.0.0.1
///   port: 22
///   credential_id: lab
/// ```
#[derive(Debug)]
pub struct YamlInventoryPlugin {
    path: PathBuf,
    data: RwLock<Option<HashMap<String, DeviceConfig>>>,
}

impl YamlInventoryPlugin {
    pub fn new(plugin_settings: YamlInventorySettings, main_settings: &Settings) -> Self {
        let path = PathBuf::from(&main_settings.project_root).join(plugin_settings.inventory_file);
        Self {
            path,
            data: RwLock::new(None),
        }
    }

    async fn load(&self) -> Result<HashMap<String, DeviceConfig>, PluginError> {
        if let Some(data) = self.data.read().await.as_ref() {
            return Ok(data.clone());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            PluginError::Validation(format!(
                "inventory file not readable: {}: {e}\n\
                 create it or point plugin_yaml_inventory_file elsewhere",
                self.path.display()
            ))
        })?;
        let parsed: HashMap<String, DeviceConfig> =
            serde_yaml::from_str(&text).map_err(|e| {
                PluginError::Validation(format!(
                    "invalid YAML in inventory file {}: {e}",
                    self.path.display()
                ))
            })?;
        *self.data.write().await = Some(parsed.clone());
        Ok(parsed)
    }
}

#[async_trait]
impl InventoryPlugin for YamlInventoryPlugin {
    fn name(&self) -> &'static str {
        "yaml"
    }

    async fn validate(&self) -> Result<(), PluginError> {
        let data = self.load().await?;
        tracing::info!(
            path = %self.path.display(),
            devices = data.len(),
            "yaml inventory loaded"
        );
        Ok(())
    }

    async fn get_device_config(&self, device_name: &str) -> Result<DeviceConfig, PluginError> {
        let data = self.load().await?;
        data.get(device_name).cloned().ok_or_else(|| {
            PluginError::NotFound(format!(
                "device '{device_name}' not found in {}",
                self.path.display()
            ))
        })
    }

    async fn list_all_nodes(&self) -> Result<Vec<serde_json::Value>, PluginError> {
        let data = self.load().await?;
        let mut names: Vec<&String> = data.keys().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| node_record(name, &data[name]))
            .collect())
    }

    fn filterable_fields(&self) -> BTreeMap<&'static str, &'static str> {
        standard_filterable_fields()
    }
}

// ============================================================================
// Static inventory (devices inline in the main configuration)
// ============================================================================

/// Settings scope: a `plugin_static_devices` mapping in the config YAML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StaticInventorySettings {
    pub devices: HashMap<String, DeviceConfig>,
}

#[derive(Debug)]
pub struct StaticInventoryPlugin {
    devices: HashMap<String, DeviceConfig>,
}

impl StaticInventoryPlugin {
    pub fn new(devices: HashMap<String, DeviceConfig>) -> Self {
        Self { devices }
    }

    pub fn from_settings(settings: StaticInventorySettings) -> Self {
        Self::new(settings.devices)
    }
}

#[async_trait]
impl InventoryPlugin for StaticInventoryPlugin {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn validate(&self) -> Result<(), PluginError> {
        if self.devices.is_empty() {
            return Err(PluginError::Validation(
                "static inventory has no devices; add a plugin_static_devices mapping".into(),
            ));
        }
        Ok(())
    }

    async fn get_device_config(&self, device_name: &str) -> Result<DeviceConfig, PluginError> {
        self.devices.get(device_name).cloned().ok_or_else(|| {
            PluginError::NotFound(format!("device '{device_name}' not found in static inventory"))
        })
    }

    async fn list_all_nodes(&self) -> Result<Vec<serde_json::Value>, PluginError> {
        let mut names: Vec<&String> = self.devices.keys().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| node_record(name, &self.devices[name]))
            .collect())
    }

    fn filterable_fields(&self) -> BTreeMap<&'static str, &'static str> {
        standard_filterable_fields()
    }
}

fn node_record(name: &str, config: &DeviceConfig) -> serde_json::Value {
    json!({
        "name": name,
        "driver_family": config.driver_family,
        "driver": config.driver,
        "host": config.host,
        "port": config.port,
        "credential_id": config.credential_id,
    })
}

fn standard_filterable_fields() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("name", "Device name (inventory key)"),
        ("host", "IP address or hostname"),
        ("driver_family", "Driver family (exec or shell)"),
        ("driver", "Driver dialect (cisco_ios, arista_eos, ...)"),
        ("credential_id", "Credential reference"),
        ("port", "SSH port number"),
    ])
}
