//! Bridge configuration, read from `$LIGHTBRIDGE_HOME/config.json`

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lightbridge_proto::{DeviceConfig, DeviceProfile, Registry, products};

use crate::manager::Settings;
use crate::topics::Topics;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHome,
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unique_id {0:?} is configured more than once")]
    DuplicateUniqueId(String),
    #[error("address {0:?} is configured more than once")]
    DuplicateAddress(String),
    #[error("timing.{0} must be greater than zero")]
    ZeroTiming(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Extra products, matched before the built-in ones
    #[serde(default)]
    pub products: Vec<DeviceProfile>,
    #[serde(default)]
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
        }
    }
}

fn default_topic_root() -> String {
    "home/lights".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "lightbridge".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_keep_alive_interval_ms() -> u64 {
    2_000
}

/// `$LIGHTBRIDGE_HOME`, or `~/.lightbridge`
pub fn lightbridge_home() -> Result<PathBuf, ConfigError> {
    if let Some(home) = std::env::var_os("LIGHTBRIDGE_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".lightbridge"))
        .ok_or(ConfigError::NoHome)
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(lightbridge_home()?.join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroTiming("connect_timeout_ms"));
        }
        if self.timing.keep_alive_interval_ms == 0 {
            return Err(ConfigError::ZeroTiming("keep_alive_interval_ms"));
        }
        let mut ids = HashSet::new();
        let mut addresses = HashSet::new();
        for device in &self.devices {
            if !ids.insert(device.unique_id.as_str()) {
                return Err(ConfigError::DuplicateUniqueId(device.unique_id.clone()));
            }
            if !addresses.insert(device.address.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateAddress(device.address.clone()));
            }
        }
        Ok(())
    }

    /// Configured products first, then the built-in table
    pub fn registry(&self) -> Registry {
        let mut all = self.products.clone();
        all.extend(products::builtin());
        Registry::new(all, self.devices.clone())
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.topic_root, &self.discovery_prefix)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            connect_timeout: Duration::from_millis(self.timing.connect_timeout_ms),
            keep_alive_interval: Duration::from_millis(self.timing.keep_alive_interval_ms),
        }
    }
}
