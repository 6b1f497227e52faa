//! Remote command transport shared by executors.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::SshSettings;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to start transport process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Command on {host} timed out after {seconds}s")]
    Timeout { host: String, seconds: u64 },
}

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a command on a remote host
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput, TransportError>;
}

/// SSH connection options
#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    /// SSH user (optional, uses system default if not specified)
    user: Option<String>,
    /// SSH port (optional, defaults to 22)
    port: Option<u16>,
    /// Path to identity file (private key)
    identity_file: Option<PathBuf>,
    /// Additional SSH arguments
    extra_args: Vec<String>,
    command_timeout: Option<Duration>,
}

impl SshConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn from_settings(settings: &SshSettings, command_timeout: Duration) -> Self {
        let mut config = Self::new().with_command_timeout(command_timeout);
        if let Some(user) = &settings.user {
            config = config.with_user(user.clone());
        }
        if let Some(port) = settings.port {
            config = config.with_port(port);
        }
        if let Some(identity) = &settings.identity_file {
            config = config.with_identity_file(identity.clone());
        }
        for arg in &settings.extra_args {
            config = config.with_extra_arg(arg.clone());
        }
        config
    }

    /// user@host if user is specified
    fn host_string(&self, host: &str) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }

    /// Arguments passed to the `ssh` binary
    pub fn ssh_args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(self.host_string(host));
        args.push(command.to_string());
        args
    }
}

/// Shells out to the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn name(&self) -> &str {
        "ssh"
    }

    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput, TransportError> {
        debug!(host = %host, command = %command, "Running remote command over ssh");

        let mut child = Command::new("ssh");
        child
            .args(self.config.ssh_args(host, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.config.command_timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.output())
                .await
                .map_err(|_| TransportError::Timeout {
                    host: host.to_string(),
                    seconds: timeout.as_secs(),
                })??,
            None => child.output().await?,
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
