//! `ssh`-backed device connection.
//!
//! Every command spawns the system `ssh` client in batch mode. The connection
//! keeps two flags: whether the reachability probe already succeeded, and
//! whether the device is considered working. A failed probe or an ssh-level
//! failure (exit status 255) marks the device as not working, so later runs
//! skip it until the inventory is reloaded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ConnectionError, DeviceConnection, RemoteOutput};

/// Exit status ssh uses for its own failures (auth, DNS, refused, ...).
const SSH_ERROR_EXIT: i32 = 255;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SshParams {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub identity_file: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub is_working: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
}

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    "root".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    300
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

pub struct SshConnection {
    params: SshParams,
    is_working: AtomicBool,
    connected: Mutex<bool>,
}

impl SshConnection {
    pub fn new(params: SshParams) -> Self {
        let is_working = AtomicBool::new(params.is_working);
        Self {
            params,
            is_working,
            connected: Mutex::new(false),
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.params.username, self.params.host)
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.params.connect_timeout_seconds.max(1)),
            "-p".to_string(),
            self.params.port.to_string(),
        ];
        if let Some(identity) = &self.params.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args
    }

    async fn run_ssh(&self, remote_command: &str) -> Result<Output, ConnectionError> {
        let mut command = Command::new(&self.params.ssh_binary);
        command
            .args(self.base_args())
            .arg(self.destination())
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout = Duration::from_secs(self.params.command_timeout_seconds.max(1));
        debug!(destination = %self.destination(), command = %remote_command, "Running remote command.");
        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ConnectionError::Transport(format!(
                "Failed to spawn {}: {e}",
                self.params.ssh_binary
            ))),
            Err(_) => Err(ConnectionError::Transport(format!(
                "Command timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    fn mark_not_working(&self) {
        self.is_working.store(false, Ordering::SeqCst);
    }
}

/// Turns a finished ssh process into a [`RemoteOutput`].
fn into_remote_output(output: Output, raise_on_nonzero: bool) -> Result<RemoteOutput, ConnectionError> {
    let exit_code = output.status.code().unwrap_or(-1);
    classify_exit(
        exit_code,
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
        raise_on_nonzero,
    )
}

fn classify_exit(
    exit_code: i32,
    stdout: String,
    stderr: String,
    raise_on_nonzero: bool,
) -> Result<RemoteOutput, ConnectionError> {
    if exit_code == SSH_ERROR_EXIT {
        return Err(ConnectionError::Transport(format!(
            "ssh failed: {}",
            stderr.trim()
        )));
    }
    if exit_code != 0 && raise_on_nonzero {
        let output = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(ConnectionError::NonZeroExit { exit_code, output });
    }
    Ok(RemoteOutput {
        stdout,
        stderr,
        exit_code,
    })
}

#[async_trait]
impl DeviceConnection for SshConnection {
    fn enabled(&self) -> bool {
        self.params.enabled
    }

    fn is_working(&self) -> bool {
        self.is_working.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        let mut connected = self.connected.lock().await;
        if *connected {
            return Ok(());
        }

        let probe = self
            .run_ssh("true")
            .await
            .and_then(|output| into_remote_output(output, true));
        match probe {
            Ok(_) => {
                *connected = true;
                self.is_working.store(true, Ordering::SeqCst);
                info!(destination = %self.destination(), "Connection established.");
                Ok(())
            }
            Err(e) => {
                self.mark_not_working();
                warn!(destination = %self.destination(), error = %e, "Connection probe failed.");
                Err(ConnectionError::Transport(format!(
                    "Connection probe to {} failed: {e}",
                    self.destination()
                )))
            }
        }
    }

    async fn exec_command(
        &self,
        command: &str,
        raise_on_nonzero: bool,
    ) -> Result<RemoteOutput, ConnectionError> {
        let output = self.run_ssh(command).await?;
        let result = into_remote_output(output, raise_on_nonzero);
        if let Err(ConnectionError::Transport(_)) = &result {
            self.mark_not_working();
        }
        result
    }
}
