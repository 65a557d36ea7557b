//! Flat key/value view over the three configuration sources.
//!
//! Each source is folded into a single lowercase-keyed map; later sources win.
//! Scalar strings coming from the environment are parsed leniently so that
//! `"8020"` and `"true"` coerce into typed fields during deserialization.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Merged configuration map, before it is shaped into typed settings.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    values: BTreeMap<String, Value>,
}

impl RawConfig {
    /// Load and merge all sources for the given env prefix.
    ///
    /// The YAML file path comes from `<PREFIX>CONFIG_FILE` (default
    /// `patchbay_config.yaml`), the env-file from `<PREFIX>ENV_FILE`
    /// (default `.env`). Missing files are fine; they contribute nothing.
    pub fn load(env_prefix: &str) -> Result<Self> {
        let config_file = std::env::var(format!("{env_prefix}CONFIG_FILE"))
            .unwrap_or_else(|_| "patchbay_config.yaml".to_string());
        let env_file = std::env::var(format!("{env_prefix}ENV_FILE"))
            .unwrap_or_else(|_| ".env".to_string());

        let mut config = Self::default();
        config.merge_yaml_file(Path::new(&config_file))?;
        config.merge_env_file(Path::new(&env_file), env_prefix)?;
        config.merge_process_env(env_prefix);
        Ok(config)
    }

    /// Deserialize the merged map into a typed settings struct.
    ///
    /// Unknown keys (plugin-scoped entries among them) are ignored; missing
    /// keys fall back to the struct's defaults.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        let object = Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        serde_json::from_value(object).context("invalid configuration")
    }

    /// Extract the scope for one plugin: every `plugin_<name>_<field>` key,
    /// with the prefix stripped down to `<field>`.
    pub fn plugin_scope(&self, plugin_name: &str) -> RawConfig {
        let prefix = format!("plugin_{}_", plugin_name.to_lowercase());
        let values = self
            .values
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&prefix)
                    .map(|field| (field.to_string(), v.clone()))
            })
            .collect();
        RawConfig { values }
    }

    /// Insert a single value (highest precedence wins, so callers merge in
    /// source order).
    pub fn insert(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_lowercase(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&key.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn merge_yaml_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no YAML config file, skipping");
            return Ok(());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&text)
            .with_context(|| format!("invalid YAML in config file {}", path.display()))?;
        if let serde_yaml::Value::Mapping(mapping) = doc {
            for (key, value) in mapping {
                if let serde_yaml::Value::String(key) = key {
                    self.insert(&key, serde_json::to_value(value)?);
                }
            }
        }
        tracing::info!(path = %path.display(), "loaded YAML configuration");
        Ok(())
    }

    fn merge_env_file(&mut self, path: &Path, env_prefix: &str) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        for item in dotenvy::from_path_iter(path)
            .with_context(|| format!("failed to read env file {}", path.display()))?
        {
            let (key, value) = item?;
            if let Some(stripped) = strip_prefix_case_insensitive(&key, env_prefix) {
                self.insert(&stripped, parse_scalar(&value));
            }
        }
        Ok(())
    }

    fn merge_process_env(&mut self, env_prefix: &str) {
        for (key, value) in std::env::vars() {
            if let Some(stripped) = strip_prefix_case_insensitive(&key, env_prefix) {
                self.insert(&stripped, parse_scalar(&value));
            }
        }
    }
}

fn strip_prefix_case_insensitive(key: &str, prefix: &str) -> Option<String> {
    if key.len() >= prefix.len() && key[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(key[prefix.len()..].to_lowercase())
    } else {
        None
    }
}

/// Parse an environment string leniently: numbers, bools, and JSON/YAML
/// collections come through typed; everything else stays a string.
fn parse_scalar(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::String(text.to_string());
    }
    match serde_yaml::from_str::<serde_yaml::Value>(text) {
        Ok(parsed) => serde_json::to_value(parsed).unwrap_or_else(|_| Value::String(text.into())),
        Err(_) => Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_parsing_coerces_types() {
        assert_eq!(parse_scalar("8020"), Value::from(8020));
        assert_eq!(parse_scalar("true"), Value::from(true));
        assert_eq!(parse_scalar("0.0.0.0"), Value::from("0.0.0.0"));
        assert_eq!(
            parse_scalar("[\"X-API-Key\"]"),
            Value::Array(vec![Value::from("X-API-Key")])
        );
    }

    #[test]
    fn later_sources_override_earlier_ones() {
        let mut config = RawConfig::default();
        config.insert("port", Value::from(8020));
        config.insert("PORT", Value::from(9000));
        assert_eq!(config.get("port"), Some(&Value::from(9000)));
    }

    #[test]
    fn plugin_scope_strips_prefix() {
        let mut config = RawConfig::default();
        config.insert("plugin_yaml_inventory_file", Value::from("devices.yml"));
        config.insert("inventory_plugin", Value::from("yaml"));

        let scope = config.plugin_scope("yaml");
        assert_eq!(scope.get("inventory_file"), Some(&Value::from("devices.yml")));
        assert!(scope.get("inventory_plugin").is_none());
    }

    #[test]
    fn prefix_stripping_is_case_insensitive() {
        assert_eq!(
            strip_prefix_case_insensitive("PATCHBAY_PORT", "PATCHBAY_"),
            Some("port".to_string())
        );
        assert_eq!(strip_prefix_case_insensitive("OTHER_PORT", "PATCHBAY_"), None);
    }
}
