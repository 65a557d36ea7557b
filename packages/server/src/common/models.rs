//! Execution request payloads and result metadata.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// How the worker obtains SSH credentials for an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    /// Resolve through the credential plugin by id.
    Stored { credential_id: String },
    /// Caller-supplied credentials, gated by `allow_inline_credentials`.
    Inline { username: String, password: String },
}

impl CredentialSource {
    pub fn credential_id(&self) -> Option<&str> {
        match self {
            CredentialSource::Stored { credential_id } => Some(credential_id),
            CredentialSource::Inline { .. } => None,
        }
    }
}

/// Resolved SSH credentials, as produced by a credential plugin.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    pub credential_id: String,
    pub username: String,
    pub password: String,
}

/// A device record resolved from inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub driver_family: String,
    pub driver: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub credential_id: String,
}

/// The serialised payload of an execute-commands job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Driver dialect, opaque to the core (e.g. `cisco_ios`).
    pub driver: String,
    /// Ordered, non-empty list of commands.
    pub commands: Vec<String>,
    pub credential: CredentialSource,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_refresh: bool,
    /// Optional TTL override, capped at the configured maximum.
    #[serde(default)]
    pub cache_ttl: Option<u64>,
}

impl ExecutionRequest {
    /// The semaphore identity for this request.
    pub fn device_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Payload view safe to echo back in job envelopes: inline passwords are
    /// stripped, everything else passes through.
    pub fn redacted(&self) -> serde_json::Value {
        let credential = match &self.credential {
            CredentialSource::Stored { credential_id } => {
                json!({"type": "stored", "credential_id": credential_id})
            }
            CredentialSource::Inline { username, .. } => {
                json!({"type": "inline", "username": username})
            }
        };
        json!({
            "host": self.host,
            "port": self.port,
            "driver": self.driver,
            "commands": self.commands,
            "credential": credential,
            "use_cache": self.use_cache,
            "cache_refresh": self.cache_refresh,
            "cache_ttl": self.cache_ttl,
        })
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

/// Per-command cache detail attached to execution results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandCacheInfo {
    pub cache_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl CommandCacheInfo {
    pub fn miss() -> Self {
        Self {
            cache_status: "miss".to_string(),
            cached_at: None,
            age_seconds: None,
            ttl: None,
        }
    }
}

/// Aggregate cache metadata for an execution: `hit` when every command hit,
/// `miss` when every command missed, `partial` for a mix, `disabled` when the
/// cache was off for this run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheMetadata {
    pub cache_status: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub commands: IndexMap<String, CommandCacheInfo>,
}

impl CacheMetadata {
    pub fn disabled() -> Self {
        Self {
            cache_status: "disabled".to_string(),
            commands: IndexMap::new(),
        }
    }

    /// Fold per-command statuses into the aggregate.
    pub fn aggregate(commands: IndexMap<String, CommandCacheInfo>) -> Self {
        let hits = commands
            .values()
            .filter(|info| info.cache_status == "hit")
            .count();
        let cache_status = if hits == 0 {
            "miss"
        } else if hits == commands.len() {
            "hit"
        } else {
            "partial"
        };
        Self {
            cache_status: cache_status.to_string(),
            commands,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_source_round_trips_tagged() {
        let stored: CredentialSource =
            serde_json::from_value(json!({"type": "stored", "credential_id": "lab"})).unwrap();
        assert_eq!(stored.credential_id(), Some("lab"));

        let inline: CredentialSource =
            serde_json::from_value(json!({"type": "inline", "username": "u", "password": "p"}))
                .unwrap();
        assert_eq!(inline.credential_id(), None);
    }

    #[test]
    fn device_id_is_host_port() {
        let request: ExecutionRequest = serde_json::from_value(json!({
            "host": "10.0.0.1",
            "driver": "cisco_ios",
            "commands": ["show version"],
            "credential": {"type": "stored", "credential_id": "lab"},
        }))
        .unwrap();
        assert_eq!(request.device_id(), "10.0.0.1:22");
        assert!(request.use_cache);
        assert!(!request.cache_refresh);
    }

    #[test]
    fn redacted_payload_strips_inline_password() {
        let request = ExecutionRequest {
            host: "10.0.0.1".into(),
            port: 22,
            driver: "cisco_ios".into(),
            commands: vec!["show version".into()],
            credential: CredentialSource::Inline {
                username: "u".into(),
                password: "hunter2".into(),
            },
            use_cache: false,
            cache_refresh: false,
            cache_ttl: None,
        };
        let redacted = serde_json::to_string(&request.redacted()).unwrap();
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains("\"username\":\"u\""));
    }

    #[test]
    fn aggregate_all_hits_is_hit() {
        let mut commands = IndexMap::new();
        commands.insert(
            "show a".to_string(),
            CommandCacheInfo {
                cache_status: "hit".into(),
                cached_at: None,
                age_seconds: Some(1.0),
                ttl: Some(300),
            },
        );
        assert_eq!(CacheMetadata::aggregate(commands).cache_status, "hit");
    }

    #[test]
    fn aggregate_mixed_is_partial() {
        let mut commands = IndexMap::new();
        commands.insert(
            "show a".to_string(),
            CommandCacheInfo {
                cache_status: "hit".into(),
                cached_at: None,
                age_seconds: None,
                ttl: None,
            },
        );
        commands.insert("show b".to_string(), CommandCacheInfo::miss());
        assert_eq!(CacheMetadata::aggregate(commands).cache_status, "partial");
    }

    #[test]
    fn aggregate_all_misses_is_miss() {
        let mut commands = IndexMap::new();
        commands.insert("show a".to_string(), CommandCacheInfo::miss());
        assert_eq!(CacheMetadata::aggregate(commands).cache_status, "miss");
    }
}
