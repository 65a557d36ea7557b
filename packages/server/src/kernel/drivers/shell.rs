//! Interactive-shell driver.
//!
//! Keeps one shell channel open for the whole job and matches the device
//! prompt between commands, which is what most network operating systems
//! expect. Reuses the exec driver's connection setup; only the channel
//! handling differs.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regex::Regex;

use super::{exec, DeviceDriver, DeviceSession, DeviceTarget, DriverError};
use crate::common::SshCredentials;

/// Matches the trailing CLI prompt of the usual network dialects
/// (`Router>`, `Router#`, `host$`).
const PROMPT_PATTERN: &str = r"[>#\$]\s*$";

pub struct Ssh2ShellDriver;

#[async_trait]
impl DeviceDriver for Ssh2ShellDriver {
    async fn open(
        &self,
        target: &DeviceTarget,
        credentials: &SshCredentials,
    ) -> Result<Box<dyn DeviceSession>, DriverError> {
        let target = target.clone();
        let credentials = credentials.clone();
        let shell = tokio::task::spawn_blocking(move || open_shell(&target, &credentials))
            .await
            .map_err(|e| DriverError::Connect(format!("connect task failed: {e}")))??;
        Ok(Box::new(ShellSession {
            inner: Arc::new(Mutex::new(Some(shell))),
        }))
    }
}

struct Shell {
    session: ssh2::Session,
    channel: ssh2::Channel,
    prompt: Regex,
}

struct ShellSession {
    inner: Arc<Mutex<Option<Shell>>>,
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession").finish_non_exhaustive()
    }
}

#[async_trait]
impl DeviceSession for ShellSession {
    async fn send_command(&mut self, command: &str) -> Result<String, DriverError> {
        let inner = self.inner.clone();
        let command = command.to_string();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().unwrap();
            let shell = guard
                .as_mut()
                .ok_or_else(|| DriverError::Command("session already closed".into()))?;
            run_shell_command(shell, &command)
        })
        .await
        .map_err(|e| DriverError::Command(format!("shell task failed: {e}")))?
    }

    async fn close(&mut self) {
        let inner = self.inner.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Some(mut shell) = inner.lock().unwrap().take() {
                let _ = shell.channel.send_eof();
                let _ = shell.channel.close();
                let _ = shell.session.disconnect(None, "closing", None);
            }
        })
        .await;
    }
}

fn open_shell(target: &DeviceTarget, credentials: &SshCredentials) -> Result<Shell, DriverError> {
    let session = exec::connect(target, credentials)?;
    let mut channel = session
        .channel_session()
        .map_err(|e| DriverError::Connect(format!("channel: {e}")))?;
    channel
        .request_pty("vt100", None, None)
        .map_err(|e| DriverError::Connect(format!("pty: {e}")))?;
    channel
        .shell()
        .map_err(|e| DriverError::Connect(format!("shell: {e}")))?;

    let prompt = Regex::new(PROMPT_PATTERN).expect("prompt pattern is valid");
    let mut shell = Shell {
        session,
        channel,
        prompt,
    };
    // Drain the login banner up to the first prompt.
    read_until_prompt(&mut shell)?;
    Ok(shell)
}

fn run_shell_command(shell: &mut Shell, command: &str) -> Result<String, DriverError> {
    shell
        .channel
        .write_all(format!("{command}\n").as_bytes())
        .map_err(|e| DriverError::Command(format!("write '{command}': {e}")))?;
    shell
        .channel
        .flush()
        .map_err(|e| DriverError::Command(format!("flush '{command}': {e}")))?;

    let raw = read_until_prompt(shell)?;
    Ok(strip_echo_and_prompt(&raw, command))
}

fn read_until_prompt(shell: &mut Shell) -> Result<String, DriverError> {
    let mut collected = String::new();
    let mut buf = [0u8; 4096];
    loop {
        let read = shell
            .channel
            .read(&mut buf)
            .map_err(|e| DriverError::Command(format!("read: {e}")))?;
        if read == 0 {
            return Ok(collected);
        }
        collected.push_str(&String::from_utf8_lossy(&buf[..read]));
        if shell.prompt.is_match(collected.trim_end_matches(['\r', ' '])) {
            return Ok(collected);
        }
    }
}

/// Drop the echoed command at the start and the prompt line at the end.
fn strip_echo_and_prompt(raw: &str, command: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();
    if lines
        .first()
        .map_or(false, |line| line.trim_end().ends_with(command))
    {
        lines.remove(0);
    }
    if lines
        .last()
        .map_or(false, |line| Regex::new(PROMPT_PATTERN).unwrap().is_match(line))
    {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_and_prompt_are_stripped() {
        let raw = "show version\r\nIOS XE, Version 16.12\r\nrouter1#";
        assert_eq!(strip_echo_and_prompt(raw, "show version"), "IOS XE, Version 16.12");
    }

    #[test]
    fn output_without_echo_is_kept_whole() {
        let raw = "line one\nline two\nswitch>";
        assert_eq!(strip_echo_and_prompt(raw, "show clock"), "line one\nline two");
    }

    #[test]
    fn prompt_pattern_matches_common_prompts() {
        let prompt = Regex::new(PROMPT_PATTERN).unwrap();
        assert!(prompt.is_match("router1#"));
        assert!(prompt.is_match("switch>"));
        assert!(prompt.is_match("host$ "));
        assert!(!prompt.is_match("mid-output line"));
    }
}
