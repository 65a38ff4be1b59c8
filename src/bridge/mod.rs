//! Bridge between the devices and the hub's broker.
//!
//! [`controller`] holds the session state machine and the publish discipline,
//! [`handle`] runs it in a tokio task and exposes a channel-based API to the rest of the
//! application.

pub mod controller;
pub mod error;
pub mod handle;

pub use controller::{
    Bridge, BridgeState, CommandCallback, ConnectProgress, Connected, Connecting, Disconnected,
    PublishReporter, Unconnected, CLIENT_ID_PREFIX, DELIVERY_QOS,
};
pub use error::BridgeError;
pub use handle::{BridgeHandle, BridgeRequest};
