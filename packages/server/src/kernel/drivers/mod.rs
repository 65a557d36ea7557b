//! Device drivers.
//!
//! The core treats the driver family and dialect as opaque strings: the
//! family picks an entry in the static registry, the dialect is interpreted
//! by the driver itself. Two families ship - `exec` runs each command on its
//! own SSH exec channel, `shell` drives an interactive shell with prompt
//! matching - plus a scriptable fake for tests and single-process demos.

mod exec;
pub mod fake;
mod shell;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::common::SshCredentials;

pub use exec::Ssh2ExecDriver;
pub use fake::FakeDriver;
pub use shell::Ssh2ShellDriver;

#[derive(Debug, Error)]
pub enum DriverError {
    /// Device rejected the credentials. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Could not reach or negotiate with the device.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Dialect or option the driver does not support.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Failure while running a command on an open session.
    #[error("command failed: {0}")]
    Command(String),
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub host: String,
    pub port: u16,
    /// Driver dialect, e.g. `cisco_ios`. Opaque to the core.
    pub driver: String,
    /// Best-effort deadline applied inside the transport; the worker runs a
    /// supervising timer on top of it.
    pub timeout: Duration,
}

impl DeviceTarget {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// An open session against one device. Commands run in submitted order.
#[async_trait]
pub trait DeviceSession: Send + std::fmt::Debug {
    async fn send_command(&mut self, command: &str) -> Result<String, DriverError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait DeviceDriver: Send + Sync {
    async fn open(
        &self,
        target: &DeviceTarget,
        credentials: &SshCredentials,
    ) -> Result<Box<dyn DeviceSession>, DriverError>;
}

/// Compile-time table of driver families. Unknown family names fail at
/// dispatch with the valid names enumerated.
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DeviceDriver>>,
}

impl DriverRegistry {
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// The registry the shipped binaries use.
    pub fn builtin() -> Self {
        Self::empty()
            .with_driver("exec", Arc::new(Ssh2ExecDriver))
            .with_driver("shell", Arc::new(Ssh2ShellDriver))
    }

    pub fn with_driver(mut self, family: &str, driver: Arc<dyn DeviceDriver>) -> Self {
        self.drivers.insert(family.to_string(), driver);
        self
    }

    pub fn get(&self, family: &str) -> Option<Arc<dyn DeviceDriver>> {
        self.drivers.get(family).cloned()
    }

    pub fn families(&self) -> Vec<String> {
        let mut families: Vec<String> = self.drivers.keys().cloned().collect();
        families.sort();
        families
    }
}
