//! Configuration loading and validation

use anyhow::Result;
use iotbridge_driver::MqttSettings;
use iotbridge_store::StoreBackend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub mqtt: MqttSettings,
    /// Protocol name to driver kind
    #[serde(default = "default_drivers")]
    pub drivers: BTreeMap<String, DriverKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            store: StoreConfig::default(),
            mqtt: MqttSettings::default(),
            drivers: default_drivers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Database file, used by the sqlite backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./devices.db")
}

/// Driver implementation bound to a protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Mock,
    Zigbee,
}

fn default_drivers() -> BTreeMap<String, DriverKind> {
    BTreeMap::from([
        ("mock".to_string(), DriverKind::Mock),
        ("zigbee".to_string(), DriverKind::Zigbee),
        ("zwave".to_string(), DriverKind::Mock),
    ])
}

impl Config {
    /// Run everything in memory against simulated hardware
    pub fn into_demo(mut self) -> Self {
        self.store.backend = StoreBackend::Memory;
        self.mqtt.enabled = false;
        for kind in self.drivers.values_mut() {
            *kind = DriverKind::Mock;
        }
        self
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
