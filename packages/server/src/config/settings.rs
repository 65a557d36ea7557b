//! Typed broker settings.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::RawConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// Single-process store for development and tests. Implies the embedded
    /// worker, since a separate worker process could not see it.
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    None,
    ApiKey,
    Jwt,
    /// API key first, JWT as fallback.
    Hybrid,
}

/// Broker configuration, shared by the server and worker binaries.
///
/// Deserialized from the merged configuration map; every field has a default
/// so a bare process comes up with lab-friendly values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Server bind
    pub host: String,
    pub port: u16,
    pub log_level: String,

    // Shared store
    pub redis_url: String,
    pub store_backend: StoreBackend,
    /// Run the worker loop inside the server process. Forced on when the
    /// memory backend is selected.
    pub embedded_worker: bool,

    // API auth
    pub auth_mode: AuthMode,
    pub api_key_headers: Vec<String>,
    /// Entries of the form `key:user`.
    pub api_keys: Vec<String>,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub allowed_users: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub allowed_user_regex: Vec<String>,
    pub allow_inline_credentials: bool,

    // Result cache
    pub cache_enabled: bool,
    pub cache_key_prefix: String,
    pub cache_default_ttl: u64,
    pub cache_max_ttl: u64,

    // Device semaphore
    pub lease_ttl_secs: u64,
    pub max_concurrent_tasks: usize,
    /// Fixed interval between lease acquisition retries. The device is busy,
    /// not the network, so this does not back off.
    pub gating_retry_interval_ms: u64,

    // Queue / worker
    pub job_ttl_secs: u64,
    pub worker_poll_interval_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_ttl_secs: u64,

    // Plugins
    pub inventory_plugin: String,
    pub credential_plugin: String,
    /// Base directory for plugin file paths (inventory/credential YAML).
    pub project_root: String,

    // Output parsing
    pub template_dir: String,

    /// The merged raw configuration, kept around so plugin scopes can be
    /// carved out of the same surface.
    #[serde(skip)]
    pub raw: RawConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8020,
            log_level: "info".to_string(),
            redis_url: "redis://localhost:6379/0".to_string(),
            store_backend: StoreBackend::Redis,
            embedded_worker: false,
            auth_mode: AuthMode::None,
            api_key_headers: vec!["X-API-Key".to_string()],
            api_keys: Vec::new(),
            jwt_secret: String::new(),
            jwt_issuer: "patchbay".to_string(),
            allowed_users: Vec::new(),
            allowed_domains: Vec::new(),
            allowed_user_regex: Vec::new(),
            allow_inline_credentials: false,
            cache_enabled: true,
            cache_key_prefix: "cache".to_string(),
            cache_default_ttl: 300,
            cache_max_ttl: 3600,
            lease_ttl_secs: 120,
            max_concurrent_tasks: 1,
            gating_retry_interval_ms: 2000,
            job_ttl_secs: 600,
            worker_poll_interval_ms: 1000,
            heartbeat_interval_secs: 30,
            heartbeat_ttl_secs: 60,
            inventory_plugin: "yaml".to_string(),
            credential_plugin: "yaml".to_string(),
            project_root: ".".to_string(),
            template_dir: "templates".to_string(),
            raw: RawConfig::default(),
        }
    }
}

impl Settings {
    /// Load controller settings (`PATCHBAY_` prefix).
    pub fn load() -> Result<Self> {
        Self::load_with_prefix(super::CONTROLLER_ENV_PREFIX)
    }

    /// Load worker settings (`PATCHBAY_WORKER_` prefix).
    pub fn load_worker() -> Result<Self> {
        Self::load_with_prefix(super::WORKER_ENV_PREFIX)
    }

    fn load_with_prefix(prefix: &str) -> Result<Self> {
        let raw = RawConfig::load(prefix)?;
        let mut settings: Settings = raw.deserialize()?;
        settings.raw = raw;
        settings.validate()?;
        Ok(settings)
    }

    /// Structural validation that should stop the process before it serves
    /// traffic. Plugin validation happens separately, once plugins are built.
    pub fn validate(&self) -> Result<()> {
        self.api_key_users()?;
        if matches!(self.auth_mode, AuthMode::Jwt | AuthMode::Hybrid) && self.jwt_secret.is_empty()
        {
            bail!("auth_mode '{:?}' requires jwt_secret to be set", self.auth_mode);
        }
        if self.max_concurrent_tasks == 0 {
            bail!("max_concurrent_tasks must be at least 1");
        }
        Ok(())
    }

    /// Parse the `key:user` entries into a lookup map.
    pub fn api_key_users(&self) -> Result<HashMap<String, String>> {
        let mut users = HashMap::new();
        for entry in &self.api_keys {
            match entry.split_once(':') {
                Some((key, user)) if !key.is_empty() && !user.is_empty() => {
                    users.insert(key.to_string(), user.to_string());
                }
                _ => bail!("api_keys entries must be 'key:user', got '{entry}'"),
            }
        }
        Ok(users)
    }

    /// Settings scope for a named plugin, prefix already stripped.
    pub fn plugin_scope(&self, plugin_name: &str) -> RawConfig {
        self.raw.plugin_scope(plugin_name)
    }

    pub fn lease_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn gating_retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.gating_retry_interval_ms)
    }

    pub fn job_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.job_ttl_secs)
    }

    pub fn worker_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.worker_poll_interval_ms)
    }
}
