//! Device descriptors and their reported status.
//!
//! A [`Device`] carries the four topics the bridge works with and the last status the
//! device reported. [`DeviceStatus`] keeps the raw JSON object so fields the bridge does
//! not interpret survive a publish unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Power state as reported in the `ps` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "on",
            PowerState::Off => "off",
        }
    }
}

impl FromStr for PowerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(PowerState::On),
            "off" => Ok(PowerState::Off),
            other => Err(format!("unknown power state: {}", other)),
        }
    }
}

/// Operating mode as reported in the `acmd` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcMode {
    Cool,
    Dry,
    Fan,
    Auto,
}

impl AcMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcMode::Cool => "cool",
            AcMode::Dry => "dry",
            AcMode::Fan => "fan",
            AcMode::Auto => "auto",
        }
    }
}

impl FromStr for AcMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cool" => Ok(AcMode::Cool),
            "dry" => Ok(AcMode::Dry),
            "fan" => Ok(AcMode::Fan),
            "auto" => Ok(AcMode::Auto),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Last status reported by a device.
///
/// Stored as the JSON object the device sent, in insertion order. The well-known keys
/// get typed accessors; everything else is reachable through [`DeviceStatus::get`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceStatus(Map<String, Value>);

impl DeviceStatus {
    pub const POWER_KEY: &'static str = "ps";
    pub const MODE_KEY: &'static str = "acmd";
    pub const ONLINE_KEY: &'static str = "onlineStatus";

    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed power state, `None` when absent or not a known value
    pub fn power(&self) -> Option<PowerState> {
        self.get_str(Self::POWER_KEY)?.parse().ok()
    }

    /// Parsed operating mode, `None` when absent or not a known value
    pub fn mode(&self) -> Option<AcMode> {
        self.get_str(Self::MODE_KEY)?.parse().ok()
    }

    /// Whether the device reports itself as reachable.
    ///
    /// Boolean `true` and the string `"true"` count as online. Any other value, or a
    /// missing field, counts as offline.
    pub fn is_online(&self) -> bool {
        match self.0.get(Self::ONLINE_KEY) {
            Some(Value::Bool(online)) => *online,
            Some(Value::String(online)) => online == "true",
            _ => false,
        }
    }

    pub fn set_power(&mut self, power: PowerState) {
        self.insert(Self::POWER_KEY, power.as_str());
    }

    pub fn set_mode(&mut self, mode: AcMode) {
        self.insert(Self::MODE_KEY, mode.as_str());
    }

    pub fn set_online(&mut self, online: bool) {
        self.insert(Self::ONLINE_KEY, online);
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serializes the full status object, unknown fields included
    pub fn to_json(&self) -> String {
        // A map with string keys always serializes
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl From<Map<String, Value>> for DeviceStatus {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A climate-control device exposed to the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub friendly_name: String,
    pub command_topic: String,
    pub action_topic: String,
    pub status_topic: String,
    pub availability_topic: String,
    pub status: DeviceStatus,
}

impl Device {
    /// Creates a device whose topics live under `{topic_base}/{id}/`
    pub fn with_default_topics(
        id: impl Into<String>,
        friendly_name: impl Into<String>,
        topic_base: &str,
    ) -> Self {
        let id = id.into();
        let base = format!("{}/{}", topic_base.trim_end_matches('/'), id);
        Self {
            command_topic: format!("{}/command", base),
            action_topic: format!("{}/action", base),
            status_topic: format!("{}/status", base),
            availability_topic: format!("{}/availability", base),
            friendly_name: friendly_name.into(),
            status: DeviceStatus::new(),
            id,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.friendly_name, self.id)
    }
}
