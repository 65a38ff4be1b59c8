//! Bridge controller with a statum state machine for the broker session
//!
//! Owns the device list, the command topics derived from it and the transport. All
//! methods return as soon as the request is handed to the transport; progress comes
//! back as [`TransportEvent`]s which the owner feeds into `handle_event`.
//!
//! # State Machine
//!
//! ```text
//! Unconnected ──► Connecting ──► Connected ──► Disconnected
//!                     │              ▲  │           ▲
//!                     │              └──┘           │
//!                     │           (reconnect)       │
//!                     └─────────────────────────────┘
//! ```
//!
//! On every `Connected` event the bridge announces each device through the discovery
//! generator and only then subscribes to the command topics.

use rand::distributions::Alphanumeric;
use rand::Rng;
use rumqttc::QoS;
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::error::BridgeError;
use crate::config::BrokerSettings;
use crate::device::Device;
use crate::discovery::DiscoveryGenerator;
use crate::mqtt::{ConnectOptions, OutboundMessage, TransportClient, TransportError, TransportEvent};
use crate::translator::{derive_availability_message, derive_state_messages};

/// QoS for every publish and subscribe
pub const DELIVERY_QOS: QoS = QoS::ExactlyOnce;

pub const CLIENT_ID_PREFIX: &str = "miraie-ha-bridge-";

const EVENT_CAPACITY: usize = 100;

/// Receives `(topic, payload)` of every inbound message, untouched
pub type CommandCallback = Box<dyn FnMut(&str, &str) + Send>;

/// Told about every publish the transport refused
pub type PublishReporter = Box<dyn Fn(&OutboundMessage, &TransportError) + Send>;

#[state]
#[derive(Debug, Clone)]
pub enum BridgeState {
    Unconnected,  // Devices known, no network activity yet
    Connecting,   // Transport is establishing the session
    Connected,    // Discovery published, command topics subscribed
    Disconnected, // Session torn down, instance is spent
}

#[machine]
pub struct Bridge<S: BridgeState> {
    devices: Vec<Device>,
    command_topics: Vec<String>,
    client_id: String,
    on_command: Option<CommandCallback>,
    transport: Box<dyn TransportClient>,
    discovery: Box<dyn DiscoveryGenerator>,
    reporter: PublishReporter,
    in_flight: usize,
}

/// Result of feeding an event to a bridge that is still connecting
pub enum ConnectProgress {
    Pending(Bridge<Connecting>),
    Ready(Bridge<Connected>),
}

impl<S: BridgeState> Bridge<S> {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn command_topics(&self) -> &[String] {
        &self.command_topics
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Publishes handed to the transport that the broker has not confirmed yet
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Forwards an inbound message to the command callback, if one is registered
    pub fn on_message_received(&mut self, topic: &str, payload: &str) {
        match self.on_command.as_mut() {
            Some(callback) => {
                debug!("Command received on {}", topic);
                callback(topic, payload);
            }
            None => debug!("No command handler, ignoring message on {}", topic),
        }
    }

    /// Hands one message to the transport. Failures go to the reporter and are not retried.
    fn publish(&mut self, message: &OutboundMessage) {
        match self
            .transport
            .publish(&message.topic, &message.payload, DELIVERY_QOS, false)
        {
            Ok(()) => {
                self.in_flight += 1;
                debug!("Published {}", message);
            }
            Err(e) => (self.reporter)(message, &e),
        }
    }

    /// Discovery for every device, then a single subscribe for all command topics
    fn announce(&mut self) {
        let announcements: Vec<OutboundMessage> = self
            .devices
            .iter()
            .map(|device| self.discovery.generate(device))
            .collect();

        info!("Publishing discovery for {} devices", announcements.len());
        for announcement in &announcements {
            self.publish(announcement);
        }

        match self.transport.subscribe(&self.command_topics, DELIVERY_QOS) {
            Ok(()) => info!("Subscribed to {} command topics", self.command_topics.len()),
            Err(e) => error!("Failed to subscribe to command topics: {}", e),
        }
    }

    /// Handles events that do not change the lifecycle
    fn observe(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::PublishCompleted { packet_id } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                debug!("Publish {} completed, {} in flight", packet_id, self.in_flight);
            }
            TransportEvent::ConnectionError(e) => warn!("Broker connection error: {}", e),
            TransportEvent::Disconnected => info!("Broker session closed"),
            TransportEvent::Connected { .. } | TransportEvent::MessageReceived { .. } => {}
        }
    }

    fn disconnect_transport(&mut self) {
        info!("Disconnecting bridge {}", self.client_id);
        if let Err(e) = self.transport.disconnect() {
            warn!("Disconnect request failed: {}", e);
        }
    }
}

impl Bridge<Unconnected> {
    /// Sets up a bridge for `devices`. No network activity happens here.
    pub fn create(
        devices: Vec<Device>,
        on_command: Option<CommandCallback>,
        transport: Box<dyn TransportClient>,
        discovery: Box<dyn DiscoveryGenerator>,
    ) -> Self {
        let command_topics = devices.iter().map(|d| d.command_topic.clone()).collect();
        let client_id = generate_client_id();
        info!(
            "Initializing bridge {} for {} devices",
            client_id,
            devices.len()
        );

        Self::new(
            devices,
            command_topics,
            client_id,
            on_command,
            transport,
            discovery,
            Box::new(log_publish_failure),
            0,
        )
    }

    /// Replaces the default reporter, which logs failed publishes
    pub fn with_publish_reporter(mut self, reporter: PublishReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn connect_options(&self, settings: &BrokerSettings) -> ConnectOptions {
        let non_empty = |s: &String| Some(s.clone()).filter(|s| !s.is_empty());
        ConnectOptions {
            host: settings.ha_broker_host.clone(),
            port: settings.ha_broker_port,
            client_id: self.client_id.clone(),
            use_tls: settings.use_ssl,
            username: non_empty(&settings.ha_broker_username),
            password: non_empty(&settings.ha_broker_password),
            clean_session: settings.use_clean_session,
            keep_alive: settings.keep_alive(),
            reconnect_delay: settings.reconnect_delay(),
        }
    }

    /// Asks the transport to open a session and returns the channel its events arrive on.
    ///
    /// Returns right away; the bridge stays `Connecting` until a `Connected` event is
    /// handled.
    pub fn connect(
        mut self,
        settings: &BrokerSettings,
    ) -> Result<(Bridge<Connecting>, mpsc::Receiver<TransportEvent>), BridgeError> {
        let options = self.connect_options(settings);
        info!("Connecting bridge to {}", settings);

        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        self.transport.connect(options, event_tx)?;
        Ok((self.transition(), event_rx))
    }
}

impl Bridge<Connecting> {
    /// First successful connection: announce devices and subscribe
    pub fn on_connected(mut self) -> Bridge<Connected> {
        info!("Broker connected, bridge {} is live", self.client_id);
        self.announce();
        self.transition()
    }

    pub fn handle_event(mut self, event: TransportEvent) -> ConnectProgress {
        match event {
            TransportEvent::Connected { .. } => ConnectProgress::Ready(self.on_connected()),
            TransportEvent::MessageReceived { topic, payload } => {
                self.on_message_received(&topic, &payload);
                ConnectProgress::Pending(self)
            }
            other => {
                self.observe(&other);
                ConnectProgress::Pending(self)
            }
        }
    }

    pub fn disconnect(mut self) -> Bridge<Disconnected> {
        self.disconnect_transport();
        self.transition()
    }
}

impl Bridge<Connected> {
    /// Session re-established by the transport: announce again
    pub fn on_connected(&mut self) {
        info!("Broker reconnected, announcing devices again");
        self.announce();
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { .. } => self.on_connected(),
            TransportEvent::MessageReceived { topic, payload } => {
                self.on_message_received(&topic, &payload)
            }
            other => self.observe(&other),
        }
    }

    /// Publishes the action and the status snapshot of `device` as it is right now.
    ///
    /// Each message is submitted on its own; a failure on the first does not stop the
    /// second.
    pub fn publish_state(&mut self, device: &Device) {
        for message in derive_state_messages(device) {
            self.publish(&message);
        }
    }

    pub fn publish_connection_status(&mut self, device: &Device) {
        for message in derive_availability_message(device) {
            self.publish(&message);
        }
    }

    pub fn disconnect(mut self) -> Bridge<Disconnected> {
        self.disconnect_transport();
        self.transition()
    }
}

impl Bridge<Disconnected> {
    /// Waits up to `grace` for the transport to finish tearing down the session
    pub async fn closed(mut self, grace: Duration) {
        let Some(task) = self.transport.take_event_loop() else {
            return;
        };
        match tokio::time::timeout(grace, task).await {
            Ok(Ok(())) => debug!("Transport closed"),
            Ok(Err(e)) => error!("Transport task failed: {}", e),
            Err(_) => warn!("Transport did not close within {:?}", grace),
        }
    }
}

fn log_publish_failure(message: &OutboundMessage, error: &TransportError) {
    error!("Error publishing message to {}: {}", message.topic, error);
}

/// Unique enough to keep broker sessions apart; not a secret
fn generate_client_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}{}", CLIENT_ID_PREFIX, suffix)
}
