use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::ssh::{SshConnection, SshParams};
use super::{ConnectionError, ConnectionRegistry, DeviceConnection};
use crate::check::CheckTarget;
use crate::settings::SettingsError;

/// One `[[devices]]` entry of the config file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeviceEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub connection: Option<SshParams>,
}

impl DeviceEntry {
    pub fn target(&self) -> CheckTarget {
        CheckTarget {
            device_id: self.id,
            organization_id: self.organization_id,
            name: self.name.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct InventoryFile {
    #[serde(default)]
    devices: Vec<DeviceEntry>,
}

/// Device registry backed by a fixed list of devices.
///
/// Connections are built once, so the `is_working` flag an [`SshConnection`]
/// flips after a transport failure survives across runs.
pub struct StaticRegistry {
    devices: Vec<DeviceEntry>,
    connections: HashMap<Uuid, Arc<SshConnection>>,
}

impl StaticRegistry {
    pub fn from_entries(devices: Vec<DeviceEntry>) -> Self {
        let connections = devices
            .iter()
            .filter_map(|device| {
                device
                    .connection
                    .clone()
                    .map(|params| (device.id, Arc::new(SshConnection::new(params))))
            })
            .collect();
        Self {
            devices,
            connections,
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
        let file: InventoryFile =
            toml::from_str(contents).map_err(|source| SettingsError::Parse {
                path: "<inline>".to_string(),
                source,
            })?;
        Ok(Self::from_entries(file.devices))
    }

    /// Reads the `[[devices]]` tables of the config file. Other keys are ignored.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: InventoryFile =
            toml::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        let registry = Self::from_entries(file.devices);
        info!(
            devices = registry.devices.len(),
            with_connection = registry.connections.len(),
            "Loaded device inventory."
        );
        Ok(registry)
    }

    pub fn targets(&self) -> Vec<CheckTarget> {
        self.devices.iter().map(DeviceEntry::target).collect()
    }

    pub fn target(&self, device_id: Uuid) -> Option<CheckTarget> {
        self.devices
            .iter()
            .find(|device| device.id == device_id)
            .map(DeviceEntry::target)
    }
}

#[async_trait]
impl ConnectionRegistry for StaticRegistry {
    async fn find_connection(
        &self,
        device_id: Uuid,
    ) -> Result<Arc<dyn DeviceConnection>, ConnectionError> {
        self.connections
            .get(&device_id)
            .map(|connection| Arc::clone(connection) as Arc<dyn DeviceConnection>)
            .ok_or(ConnectionError::NotFound(device_id))
    }
}
