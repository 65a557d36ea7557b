//! Layered configuration.
//!
//! Precedence (highest to lowest): process environment > env-file > YAML file
//! > defaults. The controller reads env vars prefixed `PATCHBAY_`, the worker
//! `PATCHBAY_WORKER_`. Plugin settings live in the same surface under
//! `plugin_<name>_<field>` keys and are handed to plugins with the prefix
//! stripped, so they can never collide with the main settings.

mod raw;
mod settings;

pub use raw::RawConfig;
pub use settings::{AuthMode, Settings, StoreBackend};

/// Env var prefix for the controller process.
pub const CONTROLLER_ENV_PREFIX: &str = "PATCHBAY_";

/// Env var prefix for the worker process.
pub const WORKER_ENV_PREFIX: &str = "PATCHBAY_WORKER_";
