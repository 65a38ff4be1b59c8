//! # Bridge Configuration
//!
//! The bridge reads one TOML file holding the broker settings, the discovery options and
//! the list of devices to expose:
//!
//! ```toml
//! [broker]
//! ha_broker_host = "localhost"
//! ha_broker_port = 1883
//!
//! [discovery]
//! prefix = "homeassistant"
//! topic_base = "miraie"
//!
//! [[devices]]
//! id = "living-room"
//! friendly_name = "Living Room AC"
//! ```
//!
//! Missing sections fall back to defaults so a file with only `[[devices]]` entries is
//! enough to start.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::device::{Device, DeviceStatus};
use crate::discovery::DEFAULT_DISCOVERY_PREFIX;

const CONFIG_DIR: &str = "miraie-ha-bridge";
const CONFIG_FILE: &str = "config.toml";

/// rumqttc rejects keep-alive intervals below this
const MIN_KEEP_ALIVE_SECS: u64 = 5;

const DEFAULT_CONFIG: &str = r#"# miraie-ha-bridge configuration

[broker]
ha_broker_host = "localhost"
ha_broker_port = 1883
use_ssl = false
ha_broker_username = ""
ha_broker_password = ""
use_clean_session = true
keep_alive_secs = 30
reconnect_delay_ms = 5000

[discovery]
prefix = "homeassistant"
topic_base = "miraie"

# One entry per air conditioner. Topics default to {topic_base}/{id}/...
# The status table is published as-is until the device reports something else;
# without onlineStatus the device is announced as offline.
# [[devices]]
# id = "living-room"
# friendly_name = "Living Room AC"
# status = { onlineStatus = true }
"#;

/// Broker connection parameters, consumed once at connect time
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerSettings {
    pub ha_broker_host: String,
    pub ha_broker_port: u16,
    pub use_ssl: bool,
    pub ha_broker_username: String,
    pub ha_broker_password: String,
    pub use_clean_session: bool,
    pub keep_alive_secs: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            ha_broker_host: "localhost".to_string(),
            ha_broker_port: 1883,
            use_ssl: false,
            ha_broker_username: String::new(),
            ha_broker_password: String::new(),
            use_clean_session: true,
            keep_alive_secs: 30,
            reconnect_delay_ms: 5000,
        }
    }
}

impl BrokerSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl fmt::Display for BrokerSettings {
    /// Formats as "user@host:port"; the password never shows up in logs
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            self.ha_broker_username, self.ha_broker_host, self.ha_broker_port
        )
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Discovery prefix the hub listens on
    pub prefix: String,
    /// Root for derived device topics
    pub topic_base: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            topic_base: "miraie".to_string(),
        }
    }
}

/// One `[[devices]]` entry. Topics left out are derived from `topic_base`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct DeviceConfig {
    pub id: String,
    pub friendly_name: Option<String>,
    pub command_topic: Option<String>,
    pub action_topic: Option<String>,
    pub status_topic: Option<String>,
    pub availability_topic: Option<String>,
    /// Status published until the device reports something else
    #[serde(default)]
    pub status: DeviceStatus,
}

impl DeviceConfig {
    pub fn to_device(&self, topic_base: &str) -> Device {
        let name = self.friendly_name.clone().unwrap_or_else(|| self.id.clone());
        let mut device = Device::with_default_topics(self.id.clone(), name, topic_base);

        if let Some(topic) = &self.command_topic {
            device.command_topic = topic.clone();
        }
        if let Some(topic) = &self.action_topic {
            device.action_topic = topic.clone();
        }
        if let Some(topic) = &self.status_topic {
            device.status_topic = topic.clone();
        }
        if let Some(topic) = &self.availability_topic {
            device.availability_topic = topic.clone();
        }
        device.status = self.status.clone();
        device
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerSettings,
    pub discovery: DiscoverySettings,
    pub devices: Vec<DeviceConfig>,
}

impl AppConfig {
    /// `<config dir>/miraie-ha-bridge/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| eyre!("Could not determine the user config directory"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Writes the commented default config if nothing exists at `path`
    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            debug!("Config file present at {}", path.display());
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        tokio::fs::write(path, DEFAULT_CONFIG)
            .await
            .map_err(|e| eyre!("Failed to write default config: {}", e))?;

        info!("Default config written to {}", path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::parse(&content)?;
        info!(
            "Loaded config from {} ({} devices)",
            path.display(),
            config.devices.len()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.broker.ha_broker_host.trim().is_empty() {
            return Err(eyre!("broker.ha_broker_host must not be empty"));
        }
        for (idx, device) in self.devices.iter().enumerate() {
            if device.id.trim().is_empty() {
                return Err(eyre!("devices[{}] has an empty id", idx));
            }
        }
        Ok(())
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices
            .iter()
            .map(|d| d.to_device(&self.discovery.topic_base))
            .collect()
    }
}
