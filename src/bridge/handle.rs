//! Bridge Handle - runs a bridge controller in a tokio task
//!
//! The task is the only owner of the controller. Callers reach it through
//! [`BridgeHandle`] requests; inbound commands come back on the receiver returned by
//! [`BridgeHandle::spawn`].
//!
//! ```text
//! Caller ─[BridgeRequest]─► Bridge task ─► TransportClient ─► Broker
//!   ▲                          │   ▲
//!   └────[InboundCommand]──────┘   └──[TransportEvent]── event loop
//! ```

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::controller::{Bridge, CommandCallback, ConnectProgress, Connected, Connecting, Disconnected};
use super::error::BridgeError;
use crate::config::BrokerSettings;
use crate::device::Device;
use crate::discovery::DiscoveryGenerator;
use crate::mqtt::{InboundCommand, TransportClient, TransportEvent};

const REQUEST_CAPACITY: usize = 100;

/// How long shutdown waits for unconfirmed publishes, and then for the transport to close
const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// Work the bridge task performs on behalf of the caller
#[derive(Debug)]
pub enum BridgeRequest {
    PublishState(Device),
    PublishConnectionStatus(Device),
    Shutdown,
}

#[derive(Debug)]
pub struct BridgeHandle {
    client_id: String,
    requests: mpsc::Sender<BridgeRequest>,
    task_handle: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Creates a bridge for `devices`, connects it and spawns the task driving it.
    ///
    /// Must be called from within a tokio runtime. Requests sent before the broker
    /// accepts the session are queued and published right after discovery.
    ///
    /// Every inbound command is delivered; the command channel is unbounded, so the
    /// caller is expected to keep draining it.
    pub fn spawn(
        devices: Vec<Device>,
        transport: Box<dyn TransportClient>,
        discovery: Box<dyn DiscoveryGenerator>,
        settings: &BrokerSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundCommand>), BridgeError> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let on_command: CommandCallback = Box::new(move |topic, payload| {
            if command_tx
                .send(InboundCommand::from_topic(topic, payload))
                .is_err()
            {
                debug!("Command receiver dropped, ignoring message on {}", topic);
            }
        });

        let bridge = Bridge::create(devices, Some(on_command), transport, discovery);
        let client_id = bridge.client_id().to_string();
        let (bridge, events) = bridge.connect(settings)?;

        let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let task_name = client_id.clone();
        let task_handle = tokio::spawn(async move {
            info!("Spawning bridge task: {}", task_name);
            let disconnected = run(bridge, events, request_rx).await;
            disconnected.closed(CLOSE_GRACE).await;
            info!("Bridge task finished: {}", task_name);
        });

        Ok((
            Self {
                client_id,
                requests: request_tx,
                task_handle: Some(task_handle),
            },
            command_rx,
        ))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Publishes the action and status of `device` as passed in
    pub async fn publish_state(&self, device: Device) -> Result<(), BridgeError> {
        self.send(BridgeRequest::PublishState(device)).await
    }

    /// Publishes the availability of `device` as passed in
    pub async fn publish_connection_status(&self, device: Device) -> Result<(), BridgeError> {
        self.send(BridgeRequest::PublishConnectionStatus(device)).await
    }

    async fn send(&self, request: BridgeRequest) -> Result<(), BridgeError> {
        self.requests
            .send(request)
            .await
            .map_err(|e| BridgeError::ChannelError(format!("Bridge task is gone: {}", e)))
    }

    /// Processes every request sent so far, waits for the broker to confirm the
    /// resulting publishes, disconnects and waits for the task to end
    pub async fn shutdown(mut self) -> Result<(), BridgeError> {
        debug!("Sending shutdown signal to bridge: {}", self.client_id);
        if self.requests.send(BridgeRequest::Shutdown).await.is_err() {
            warn!("Bridge task already terminated: {}", self.client_id);
        }

        match self.task_handle.take() {
            Some(handle) => handle.await.map_err(|e| {
                error!("Bridge task panicked: {} - {}", self.client_id, e);
                BridgeError::TaskError(format!("Bridge task panicked: {}", e))
            }),
            None => Ok(()),
        }
    }
}

/// Drives the controller until shutdown and returns it disconnected
async fn run(
    mut bridge: Bridge<Connecting>,
    mut events: mpsc::Receiver<TransportEvent>,
    mut requests: mpsc::Receiver<BridgeRequest>,
) -> Bridge<Disconnected> {
    let mut pending = Vec::new();

    let mut bridge = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => match bridge.handle_event(event) {
                    ConnectProgress::Pending(still_connecting) => bridge = still_connecting,
                    ConnectProgress::Ready(connected) => break connected,
                },
                None => {
                    warn!("Transport events closed before the broker accepted the session");
                    return bridge.disconnect();
                }
            },
            request = requests.recv() => match request {
                Some(BridgeRequest::Shutdown) | None => {
                    if !pending.is_empty() {
                        warn!("Shutting down before connecting, dropping {} requests", pending.len());
                    }
                    return bridge.disconnect();
                }
                Some(request) => {
                    debug!("Queueing {:?} until connected", request);
                    pending.push(request);
                }
            },
        }
    };

    for request in pending.drain(..) {
        apply(&mut bridge, request);
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => bridge.handle_event(event),
                None => {
                    warn!("Transport events closed, stopping bridge");
                    break;
                }
            },
            request = requests.recv() => match request {
                Some(BridgeRequest::Shutdown) | None => {
                    drain(&mut bridge, &mut events, CLOSE_GRACE).await;
                    break;
                }
                Some(request) => apply(&mut bridge, request),
            },
        }
    }

    bridge.disconnect()
}

/// Keeps handling events until every publish is confirmed or `grace` runs out.
///
/// A QoS 2 publish is only released by the broker once its handshake completes, so
/// disconnecting earlier can lose it.
async fn drain(
    bridge: &mut Bridge<Connected>,
    events: &mut mpsc::Receiver<TransportEvent>,
    grace: Duration,
) {
    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);

    while bridge.in_flight() > 0 {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => bridge.handle_event(event),
                None => break,
            },
            _ = &mut deadline => {
                warn!(
                    "Disconnecting with {} publishes still unconfirmed",
                    bridge.in_flight()
                );
                break;
            }
        }
    }
}

fn apply(bridge: &mut Bridge<Connected>, request: BridgeRequest) {
    match request {
        BridgeRequest::PublishState(device) => bridge.publish_state(&device),
        BridgeRequest::PublishConnectionStatus(device) => bridge.publish_connection_status(&device),
        BridgeRequest::Shutdown => {}
    }
}
