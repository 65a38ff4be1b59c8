//! Home Assistant MQTT discovery announcements.
//!
//! Each device is announced as one `climate` entity whose action, mode and attributes
//! are read from the topics the bridge publishes to.
//!
//! Reference: https://www.home-assistant.io/integrations/climate.mqtt/

use serde_json::json;

use crate::device::Device;
use crate::mqtt::OutboundMessage;
use crate::translator::{PAYLOAD_OFFLINE, PAYLOAD_ONLINE};

pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

pub const DEVICE_MANUFACTURER: &str = "Panasonic";
pub const DEVICE_MODEL: &str = "MirAIe AC";

/// Project version from Cargo.toml for device metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hub modes offered for every unit
const CLIMATE_MODES: [&str; 5] = ["off", "cool", "dry", "fan_only", "auto"];

/// Maps the raw status object to a hub mode
const MODE_STATE_TEMPLATE: &str = "{% if value_json.ps == 'off' %}off\
{% elif value_json.acmd == 'fan' %}fan_only\
{% else %}{{ value_json.acmd }}{% endif %}";

/// Produces the discovery announcement for one device.
pub trait DiscoveryGenerator: Send + 'static {
    fn generate(&self, device: &Device) -> OutboundMessage;
}

/// Announces devices as Home Assistant `climate` entities
#[derive(Debug, Clone)]
pub struct ClimateDiscovery {
    prefix: String,
}

impl ClimateDiscovery {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Format: {prefix}/climate/{object_id}/config
    pub fn topic(&self, device: &Device) -> String {
        format!(
            "{}/climate/{}/config",
            self.prefix.trim_end_matches('/'),
            object_id(&device.id)
        )
    }
}

impl Default for ClimateDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_PREFIX)
    }
}

impl DiscoveryGenerator for ClimateDiscovery {
    fn generate(&self, device: &Device) -> OutboundMessage {
        let object_id = object_id(&device.id);
        let payload = json!({
            "name": device.friendly_name,
            "unique_id": format!("miraie_{}", object_id),
            "modes": CLIMATE_MODES,
            "action_topic": device.action_topic,
            "mode_state_topic": device.status_topic,
            "mode_state_template": MODE_STATE_TEMPLATE,
            "mode_command_topic": device.command_topic,
            "json_attributes_topic": device.status_topic,
            "availability_topic": device.availability_topic,
            "payload_available": PAYLOAD_ONLINE,
            "payload_not_available": PAYLOAD_OFFLINE,
            "device": {
                "identifiers": [object_id],
                "name": device.friendly_name,
                "manufacturer": DEVICE_MANUFACTURER,
                "model": DEVICE_MODEL,
                "sw_version": VERSION,
            },
        });

        OutboundMessage::new(self.topic(device), payload.to_string())
    }
}

/// Hub object ids only allow `[a-zA-Z0-9_-]`
fn object_id(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}
