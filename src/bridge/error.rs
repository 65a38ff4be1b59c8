//! Error definitions for the bridge module

use thiserror::Error;

use crate::mqtt::TransportError;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The transport refused a request
    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),

    /// Communication with the bridge task failed
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The bridge task ended abnormally
    #[error("Task error: {0}")]
    TaskError(String),
}
