//! Configuration module

use serde::Deserialize;

use crate::models::{DeviceIdentity, DeviceSettings};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ups: UpsConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

#[derive(Debug, Deserialize)]
pub struct UpsConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// UPS name on the server, empty to use the first one listed
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            name: String::new(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            state_path: default_state_path(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3493
}

fn default_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_state_path() -> String {
    "data/device_state.json".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("NUTPOLL").separator("__"))
            .build()?;

        Self::from_settings(settings)
    }

    /// A malformed value is an error naming its key, never a silent fallback
    fn from_settings(settings: config::Config) -> anyhow::Result<Self> {
        settings
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))
    }

    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            ip: self.ups.host.clone(),
            port: self.ups.port,
            username: self.ups.username.clone(),
            password: self.ups.password.clone(),
            ups_name: self.ups.name.clone(),
            interval: self.ups.interval_secs,
            timeout: self.ups.timeout_secs,
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            id: self.device.id.clone(),
            name: self.device.name.clone(),
        }
    }
}
