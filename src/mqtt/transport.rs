//! Broker transport contract.
//!
//! The bridge talks to the broker only through [`TransportClient`]. Every method returns
//! as soon as the request is queued; progress is reported back as [`TransportEvent`]s on
//! the channel handed to [`TransportClient::connect`].

use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::ConnectOptions;

/// Events a transport delivers to its owner, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Broker accepted the session (fires again after every reconnect)
    Connected { session_present: bool },
    /// A publish arrived on a subscribed topic
    MessageReceived { topic: String, payload: String },
    /// Broker confirmed a publish
    PublishCompleted { packet_id: u16 },
    /// Connection attempt or session failed; the transport keeps retrying
    ConnectionError(String),
    /// Session closed after a disconnect request
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Client error: {0}")]
    ClientError(#[from] rumqttc::ClientError),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Transport already connected")]
    AlreadyConnected,

    #[error("Channel error: {0}")]
    ChannelError(String),
}

/// Connect/subscribe/publish/disconnect primitives of a broker client.
///
/// Implementations must not block: requests are queued and their outcome is reported
/// asynchronously through [`TransportEvent`]s.
pub trait TransportClient: Send + 'static {
    /// Starts establishing a session; `events` receives everything that happens on it
    fn connect(
        &mut self,
        options: ConnectOptions,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError>;

    /// Issues one subscribe request covering all `topics`
    fn subscribe(&mut self, topics: &[String], qos: QoS) -> Result<(), TransportError>;

    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Background task driving the session, if the transport runs one.
    ///
    /// Awaiting it after `disconnect` lets queued publishes flush before shutdown.
    fn take_event_loop(&mut self) -> Option<JoinHandle<()>> {
        None
    }
}
