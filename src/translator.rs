//! Pure mapping from a device's status to the messages the hub consumes.

use std::fmt;

use crate::device::{AcMode, Device, DeviceStatus, PowerState};
use crate::mqtt::OutboundMessage;

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

/// What the unit is currently doing, as shown by the hub's climate card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HvacAction {
    Off,
    Cooling,
    Drying,
    Fan,
    Idle,
}

impl HvacAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HvacAction::Off => "off",
            HvacAction::Cooling => "cooling",
            HvacAction::Drying => "drying",
            HvacAction::Fan => "fan",
            HvacAction::Idle => "idle",
        }
    }
}

impl fmt::Display for HvacAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Power off wins over any mode; unknown or missing modes are idle.
pub fn derive_action(status: &DeviceStatus) -> HvacAction {
    if status.power() == Some(PowerState::Off) {
        return HvacAction::Off;
    }

    match status.mode() {
        Some(AcMode::Cool) => HvacAction::Cooling,
        Some(AcMode::Dry) => HvacAction::Drying,
        Some(AcMode::Fan) => HvacAction::Fan,
        _ => HvacAction::Idle,
    }
}

/// Action message followed by the full status snapshot
pub fn derive_state_messages(device: &Device) -> [OutboundMessage; 2] {
    [
        OutboundMessage::new(
            device.action_topic.as_str(),
            derive_action(&device.status).as_str(),
        ),
        OutboundMessage::new(device.status_topic.as_str(), device.status.to_json()),
    ]
}

pub fn derive_availability_message(device: &Device) -> [OutboundMessage; 1] {
    let payload = if device.status.is_online() {
        PAYLOAD_ONLINE
    } else {
        PAYLOAD_OFFLINE
    };
    [OutboundMessage::new(
        device.availability_topic.as_str(),
        payload,
    )]
}
