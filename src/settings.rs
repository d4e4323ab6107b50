use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::check::IPERF_CHECK_TYPE;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(String),
    #[error("IPERF_SERVERS is not a valid JSON object: {0}")]
    ServersJson(#[from] serde_json::Error),
    #[error("Unknown iperf mode: {0}")]
    UnknownMode(String),
    #[error("Organization {0} has an empty iperf server list")]
    EmptyServerList(Uuid),
    #[error("Invalid iperf server address: {0:?}")]
    InvalidServerAddress(String),
    #[error("Check type {0:?} is not in the check class table")]
    CheckNotRegistered(String),
}

/// Measurement mode passed to iperf3. Only TCP is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IperfMode {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for IperfMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IperfMode::Tcp => write!(f, "tcp"),
            IperfMode::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for IperfMode {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(IperfMode::Tcp),
            "udp" => Ok(IperfMode::Udp),
            other => Err(SettingsError::UnknownMode(other.to_string())),
        }
    }
}

/// One row of the registered check-class table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckClass {
    pub check_type: String,
    pub label: String,
}

/// Process-wide check configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct CheckSettings {
    /// Organization id -> ordered candidate iperf servers.
    pub iperf_servers: HashMap<Uuid, Vec<String>>,
    /// Create iperf checks automatically for every known device.
    pub auto_iperf: bool,
    pub iperf_mode: IperfMode,
    pub check_classes: Vec<CheckClass>,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialCheckSettings {
    iperf_servers: Option<HashMap<Uuid, Vec<String>>>,
    auto_iperf: Option<bool>,
    iperf_mode: Option<IperfMode>,
    check_classes: Option<Vec<CheckClass>>,
}

/// Environment overrides. `IPERF_SERVERS` carries a JSON object.
#[derive(Deserialize, Default, Debug)]
struct EnvOverrides {
    iperf_servers: Option<String>,
    auto_iperf: Option<bool>,
    iperf_mode: Option<String>,
}

fn default_check_classes() -> Vec<CheckClass> {
    [
        ("ping", "Ping"),
        ("config_applied", "Configuration Applied"),
        (IPERF_CHECK_TYPE, "Iperf"),
    ]
    .into_iter()
    .map(|(check_type, label)| CheckClass {
        check_type: check_type.to_string(),
        label: label.to_string(),
    })
    .collect()
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            iperf_servers: HashMap::new(),
            auto_iperf: false,
            iperf_mode: IperfMode::Tcp,
            check_classes: default_check_classes(),
        }
    }
}

impl CheckSettings {
    /// Loads settings from an optional TOML file, then applies environment
    /// overrides (`IPERF_SERVERS`, `AUTO_IPERF`, `IPERF_MODE`).
    pub fn load(config_path: Option<&Path>) -> Result<Self, SettingsError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path).map_err(|source| SettingsError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                parse_partial(&contents, &path.display().to_string())?
            }
            Some(path) => {
                warn!(path = %path.display(), "Config file not found, using defaults.");
                PartialCheckSettings::default()
            }
            None => PartialCheckSettings::default(),
        };

        let env_config: EnvOverrides =
            envy::from_env().map_err(|e| SettingsError::Env(e.to_string()))?;

        let settings = Self::merge(file_config, env_config)?;
        info!(
            organizations = settings.iperf_servers.len(),
            auto_iperf = settings.auto_iperf,
            mode = %settings.iperf_mode,
            "Loaded check settings."
        );
        Ok(settings)
    }

    /// Builds settings from TOML text alone, without looking at the environment.
    pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
        let file_config = parse_partial(contents, "<inline>")?;
        Self::merge(file_config, EnvOverrides::default())
    }

    fn merge(file: PartialCheckSettings, env: EnvOverrides) -> Result<Self, SettingsError> {
        let defaults = Self::default();

        let env_servers = match env.iperf_servers {
            Some(raw) => Some(serde_json::from_str::<HashMap<Uuid, Vec<String>>>(&raw)?),
            None => None,
        };
        let env_mode = env.iperf_mode.as_deref().map(IperfMode::from_str).transpose()?;

        let settings = CheckSettings {
            iperf_servers: env_servers
                .or(file.iperf_servers)
                .unwrap_or(defaults.iperf_servers),
            auto_iperf: env.auto_iperf.or(file.auto_iperf).unwrap_or(defaults.auto_iperf),
            iperf_mode: env_mode.or(file.iperf_mode).unwrap_or(defaults.iperf_mode),
            check_classes: file.check_classes.unwrap_or(defaults.check_classes),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        for (organization_id, servers) in &self.iperf_servers {
            if servers.is_empty() {
                return Err(SettingsError::EmptyServerList(*organization_id));
            }
            if let Some(bad) = servers.iter().find(|s| !is_valid_server_address(s)) {
                return Err(SettingsError::InvalidServerAddress(bad.clone()));
            }
        }
        if !self.is_registered(IPERF_CHECK_TYPE) {
            return Err(SettingsError::CheckNotRegistered(IPERF_CHECK_TYPE.to_string()));
        }
        Ok(())
    }

    pub fn is_registered(&self, check_type: &str) -> bool {
        self.check_classes.iter().any(|c| c.check_type == check_type)
    }

    /// First configured server for the organization, if any.
    pub fn iperf_server_for(&self, organization_id: &Uuid) -> Option<&str> {
        self.iperf_servers
            .get(organization_id)
            .and_then(|servers| servers.first())
            .map(String::as_str)
    }
}

fn parse_partial(contents: &str, path: &str) -> Result<PartialCheckSettings, SettingsError> {
    toml::from_str(contents).map_err(|source| SettingsError::Parse {
        path: path.to_string(),
        source,
    })
}

/// Server addresses end up on a command line, so only hostname and IP
/// literal characters are accepted, and never a leading dash.
pub fn is_valid_server_address(address: &str) -> bool {
    !address.is_empty()
        && address.len() <= 253
        && !address.starts_with('-')
        && address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_'))
}
