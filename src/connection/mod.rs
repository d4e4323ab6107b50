//! Remote command gateway used by checks.
//!
//! The device registry and the transport live outside this crate; checks only
//! see the two traits below. `inventory` and `ssh` provide a static registry
//! and an `ssh`-backed connection so the binary can run on its own.

pub mod inventory;
pub mod ssh;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("No connection configured for device {0}")]
    NotFound(Uuid),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Command exited with status {exit_code}: {output}")]
    NonZeroExit { exit_code: i32, output: String },
    #[error("Registry error: {0}")]
    Registry(String),
}

/// Raw result of a remote command. Consumed once by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A configured, reusable command channel to one device.
#[async_trait]
pub trait DeviceConnection: Send + Sync {
    fn enabled(&self) -> bool;

    fn is_working(&self) -> bool;

    /// Opens the channel. Calling it on an open channel is a no-op.
    async fn connect(&self) -> Result<(), ConnectionError>;

    async fn exec_command(
        &self,
        command: &str,
        raise_on_nonzero: bool,
    ) -> Result<RemoteOutput, ConnectionError>;
}

/// Looks up the connection configured for a device.
///
/// Implementations return [`ConnectionError::NotFound`] when the device has
/// no connection record; any other error is a registry failure.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn find_connection(
        &self,
        device_id: Uuid,
    ) -> Result<Arc<dyn DeviceConnection>, ConnectionError>;
}
