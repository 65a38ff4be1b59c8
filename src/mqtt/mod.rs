//! # MQTT Integration Module
//!
//! Broker-facing plumbing for the bridge:
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Connect options handed to the transport
//! ├── message.rs       - Outbound messages and inbound commands
//! ├── transport.rs     - Transport contract and its typed events
//! └── mqtt_handler.rs  - rumqttc-backed transport
//! ```
//!
//! The bridge controller only sees [`TransportClient`]; the rumqttc event loop runs in
//! its own task and reports back through [`TransportEvent`]s.

pub mod config;
pub mod message;
pub mod mqtt_handler;
pub mod transport;

pub use config::ConnectOptions;
pub use message::{InboundCommand, OutboundMessage};
pub use mqtt_handler::RumqttTransport;
pub use transport::{TransportClient, TransportError, TransportEvent};
