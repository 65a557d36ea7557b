//! Scriptable in-memory driver.
//!
//! Stands in for a real device in the test suites and single-process demos:
//! responses, auth failures, connect failures, and artificial latency are all
//! configured per host.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{DeviceDriver, DeviceSession, DeviceTarget, DriverError};
use crate::common::SshCredentials;

#[derive(Debug, Default)]
pub struct FakeDriver {
    responses: Mutex<HashMap<(String, String), String>>,
    auth_failures: Mutex<HashSet<String>>,
    connect_failures: Mutex<HashMap<String, usize>>,
    command_delays: Mutex<HashMap<String, Duration>>,
    opened: AtomicUsize,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fix the output of `command` on `host`. Unscripted commands echo a
    /// deterministic placeholder.
    pub fn set_response(&self, host: &str, command: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert((host.to_string(), command.to_string()), output.to_string());
    }

    /// Every connection to `host` fails authentication.
    pub fn fail_auth(&self, host: &str) {
        self.auth_failures.lock().unwrap().insert(host.to_string());
    }

    /// The next `count` connection attempts to `host` are refused.
    pub fn fail_connects(&self, host: &str, count: usize) {
        self.connect_failures
            .lock()
            .unwrap()
            .insert(host.to_string(), count);
    }

    /// Every command on `host` takes at least `delay`.
    pub fn set_command_delay(&self, host: &str, delay: Duration) {
        self.command_delays
            .lock()
            .unwrap()
            .insert(host.to_string(), delay);
    }

    /// Successful session opens so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceDriver for Arc<FakeDriver> {
    async fn open(
        &self,
        target: &DeviceTarget,
        _credentials: &SshCredentials,
    ) -> Result<Box<dyn DeviceSession>, DriverError> {
        if self.auth_failures.lock().unwrap().contains(&target.host) {
            return Err(DriverError::Auth(format!(
                "{}: permission denied (password)",
                target.endpoint()
            )));
        }
        {
            let mut failures = self.connect_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&target.host) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DriverError::Connect(format!(
                        "{}: connection refused",
                        target.endpoint()
                    )));
                }
            }
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .command_delays
            .lock()
            .unwrap()
            .get(&target.host)
            .copied()
            .unwrap_or_default();
        Ok(Box::new(FakeSession {
            driver: self.clone(),
            host: target.host.clone(),
            delay,
        }))
    }
}

#[derive(Debug)]
struct FakeSession {
    driver: Arc<FakeDriver>,
    host: String,
    delay: Duration,
}

#[async_trait]
impl DeviceSession for FakeSession {
    async fn send_command(&mut self, command: &str) -> Result<String, DriverError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self
            .driver
            .responses
            .lock()
            .unwrap()
            .get(&(self.host.clone(), command.to_string()))
            .cloned();
        Ok(scripted.unwrap_or_else(|| format!("output of '{command}' from {}", self.host)))
    }

    async fn close(&mut self) {}
}
