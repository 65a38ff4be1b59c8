//! Republishes the state of MirAIe air conditioners to a Home Assistant MQTT broker.

pub mod bridge;
pub mod config;
pub mod device;
pub mod discovery;
pub mod mqtt;
pub mod translator;
