//! Exec-channel driver.
//!
//! Opens one SSH exec channel per command, which suits devices whose CLI
//! tolerates non-interactive execution. libssh2 calls are blocking, so every
//! operation hops onto the blocking pool; the session itself travels inside
//! an `Arc<Mutex<..>>` between hops.

use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{DeviceDriver, DeviceSession, DeviceTarget, DriverError};
use crate::common::SshCredentials;

pub struct Ssh2ExecDriver;

#[async_trait]
impl DeviceDriver for Ssh2ExecDriver {
    async fn open(
        &self,
        target: &DeviceTarget,
        credentials: &SshCredentials,
    ) -> Result<Box<dyn DeviceSession>, DriverError> {
        let target = target.clone();
        let credentials = credentials.clone();
        let session = tokio::task::spawn_blocking(move || connect(&target, &credentials))
            .await
            .map_err(|e| DriverError::Connect(format!("connect task failed: {e}")))??;
        Ok(Box::new(ExecSession {
            session: Arc::new(Mutex::new(Some(session))),
        }))
    }
}

struct ExecSession {
    session: Arc<Mutex<Option<ssh2::Session>>>,
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession").finish_non_exhaustive()
    }
}

#[async_trait]
impl DeviceSession for ExecSession {
    async fn send_command(&mut self, command: &str) -> Result<String, DriverError> {
        let session = self.session.clone();
        let command = command.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = session.lock().unwrap();
            let session = guard
                .as_ref()
                .ok_or_else(|| DriverError::Command("session already closed".into()))?;
            run_exec(session, &command)
        })
        .await
        .map_err(|e| DriverError::Command(format!("exec task failed: {e}")))?
    }

    async fn close(&mut self) {
        let session = self.session.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Some(session) = session.lock().unwrap().take() {
                let _ = session.disconnect(None, "closing", None);
            }
        })
        .await;
    }
}

pub(super) fn connect(
    target: &DeviceTarget,
    credentials: &SshCredentials,
) -> Result<ssh2::Session, DriverError> {
    let endpoint = target.endpoint();
    let tcp = TcpStream::connect(&endpoint)
        .map_err(|e| DriverError::Connect(format!("{endpoint}: {e}")))?;

    let mut session = ssh2::Session::new()
        .map_err(|e| DriverError::Connect(format!("{endpoint}: {e}")))?;
    session.set_timeout(target.timeout.as_millis().min(u32::MAX as u128) as u32);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| DriverError::Connect(format!("{endpoint}: handshake: {e}")))?;

    session
        .userauth_password(&credentials.username, &credentials.password)
        .map_err(|e| DriverError::Auth(format!("{endpoint}: {e}")))?;
    if !session.authenticated() {
        return Err(DriverError::Auth(format!("{endpoint}: password rejected")));
    }
    Ok(session)
}

fn run_exec(session: &ssh2::Session, command: &str) -> Result<String, DriverError> {
    let mut channel = session
        .channel_session()
        .map_err(|e| DriverError::Command(format!("channel: {e}")))?;
    channel
        .exec(command)
        .map_err(|e| DriverError::Command(format!("exec '{command}': {e}")))?;

    let mut output = String::new();
    channel
        .read_to_string(&mut output)
        .map_err(|e| DriverError::Command(format!("read '{command}': {e}")))?;
    let _ = channel.wait_close();
    Ok(output.trim().to_string())
}
