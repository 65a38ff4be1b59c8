use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter, Transport,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ConnectOptions;
use super::transport::{TransportClient, TransportError, TransportEvent};

/// Capacity of the rumqttc request queue
const REQUEST_CAPACITY: usize = 100;

/// [`TransportClient`] backed by a rumqttc `AsyncClient`.
///
/// `connect` spawns a tokio task that polls the rumqttc event loop and turns its events
/// into [`TransportEvent`]s. A failed poll is reported and retried after the configured
/// reconnect delay until a disconnect is requested.
pub struct RumqttTransport {
    client: Option<AsyncClient>,
    closing: CancellationToken,
    event_loop: Option<JoinHandle<()>>,
}

impl RumqttTransport {
    pub fn new() -> Self {
        Self {
            client: None,
            closing: CancellationToken::new(),
            event_loop: None,
        }
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::NotConnected)
    }

    fn mqtt_options(options: &ConnectOptions) -> MqttOptions {
        let mut mqtt_options =
            MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port);
        mqtt_options
            .set_keep_alive(options.keep_alive)
            .set_clean_session(options.clean_session);

        if let Some(user) = options.username.as_ref().filter(|u| !u.is_empty()) {
            mqtt_options.set_credentials(user.clone(), options.password.clone().unwrap_or_default());
        }
        if options.use_tls {
            mqtt_options.set_transport(Transport::tls_with_default_config());
        }
        mqtt_options
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        events: mpsc::Sender<TransportEvent>,
        closing: CancellationToken,
        reconnect_delay: Duration,
    ) {
        loop {
            let event = match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("MQTT session established");
                    Some(TransportEvent::Connected {
                        session_present: ack.session_present,
                    })
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    Some(TransportEvent::MessageReceived {
                        topic: publish.topic,
                        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                    })
                }
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    Some(TransportEvent::PublishCompleted {
                        packet_id: comp.pkid,
                    })
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("MQTT disconnect sent");
                    let _ = events.send(TransportEvent::Disconnected).await;
                    break;
                }
                Ok(_) => None,
                Err(e) => {
                    if closing.is_cancelled() {
                        debug!("Event loop stopped while closing: {}", e);
                        let _ = events.send(TransportEvent::Disconnected).await;
                        break;
                    }

                    warn!("MQTT connection error: {}", e);
                    if events
                        .send(TransportEvent::ConnectionError(e.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }

                    tokio::select! {
                        _ = closing.cancelled() => {
                            let _ = events.send(TransportEvent::Disconnected).await;
                            break;
                        }
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                    None
                }
            };

            if let Some(event) = event {
                // Keep polling after the owner is gone while a disconnect is flushing
                if events.send(event).await.is_err() && !closing.is_cancelled() {
                    debug!("Event receiver dropped, stopping MQTT event loop");
                    break;
                }
            }
        }
    }
}

impl Default for RumqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportClient for RumqttTransport {
    fn connect(
        &mut self,
        options: ConnectOptions,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        if self.client.is_some() {
            return Err(TransportError::AlreadyConnected);
        }
        info!("Connecting to {} as {}", options, options.client_id);

        let (client, event_loop) = AsyncClient::new(Self::mqtt_options(&options), REQUEST_CAPACITY);

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            events,
            self.closing.clone(),
            options.reconnect_delay,
        ));

        self.client = Some(client);
        self.event_loop = Some(handle);
        Ok(())
    }

    fn subscribe(&mut self, topics: &[String], qos: QoS) -> Result<(), TransportError> {
        if topics.is_empty() {
            debug!("No topics to subscribe to");
            return Ok(());
        }
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), qos));
        self.client()?.try_subscribe_many(filters)?;
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client()?
            .try_publish(topic, qos, retain, payload.as_bytes().to_vec())?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.closing.cancel();
        let client = self.client()?;
        if let Err(e) = client.try_disconnect() {
            error!("Failed to queue MQTT disconnect: {}", e);
            if let Some(handle) = self.event_loop.take() {
                handle.abort();
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn take_event_loop(&mut self) -> Option<JoinHandle<()>> {
        self.event_loop.take()
    }
}
