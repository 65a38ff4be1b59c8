#![allow(dead_code)]

pub mod broker;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use miraie_ha_bridge::device::{AcMode, Device, PowerState};
use miraie_ha_bridge::mqtt::{ConnectOptions, TransportClient, TransportError, TransportEvent};
use rumqttc::QoS;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(ConnectOptions),
    Subscribe {
        topics: Vec<String>,
        qos: QoS,
    },
    Publish {
        topic: String,
        payload: String,
        qos: QoS,
        retain: bool,
    },
    Disconnect,
}

/// Shared view into what a [`RecordingTransport`] was asked to do.
///
/// Accepted publishes are confirmed right away with a `PublishCompleted` event unless
/// [`Recorder::hold_confirmations`] was called.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    events: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    failing_topics: Arc<Mutex<HashSet<String>>>,
    holding: Arc<AtomicBool>,
    next_packet_id: Arc<AtomicU16>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish { topic, payload, .. } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_publishes_to(&self, topic: &str) {
        self.failing_topics.lock().unwrap().insert(topic.to_string());
    }

    /// Stops confirming publishes; confirm them later with [`Recorder::complete`]
    pub fn hold_confirmations(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    pub async fn complete(&self, count: u16) {
        for _ in 0..count {
            let packet_id = self.next_packet_id();
            self.emit(TransportEvent::PublishCompleted { packet_id }).await;
        }
    }

    fn next_packet_id(&self) -> u16 {
        self.next_packet_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn confirm(&self) {
        if self.holding.load(Ordering::SeqCst) {
            return;
        }
        let packet_id = self.next_packet_id();
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.try_send(TransportEvent::PublishCompleted { packet_id });
        }
    }

    /// Delivers `event` as if the broker connection produced it
    pub async fn emit(&self, event: TransportEvent) {
        let sender = self
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("transport not connected");
        sender.send(event).await.expect("bridge dropped its events");
    }

    /// Polls until `done` holds for the recorded calls, panicking after two seconds
    pub async fn wait_for(&self, done: impl Fn(&[Call]) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !done(&self.calls()) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out, calls so far: {:#?}",
                self.calls()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub struct RecordingTransport {
    recorder: Recorder,
}

impl RecordingTransport {
    pub fn new() -> (Self, Recorder) {
        let recorder = Recorder::default();
        (
            Self {
                recorder: recorder.clone(),
            },
            recorder,
        )
    }

    fn record(&self, call: Call) {
        self.recorder.calls.lock().unwrap().push(call);
    }
}

impl TransportClient for RecordingTransport {
    fn connect(
        &mut self,
        options: ConnectOptions,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        self.record(Call::Connect(options));
        *self.recorder.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn subscribe(&mut self, topics: &[String], qos: QoS) -> Result<(), TransportError> {
        self.record(Call::Subscribe {
            topics: topics.to_vec(),
            qos,
        });
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.recorder.failing_topics.lock().unwrap().contains(topic) {
            return Err(TransportError::NotConnected);
        }
        self.record(Call::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos,
            retain,
        });
        self.recorder.confirm();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.record(Call::Disconnect);
        Ok(())
    }
}

pub fn device(id: &str) -> Device {
    let mut device = Device::with_default_topics(id, format!("AC {}", id), "miraie");
    device.status.set_power(PowerState::On);
    device.status.set_mode(AcMode::Cool);
    device.status.set_online(true);
    device
}

pub fn is_subscribe(call: &Call) -> bool {
    matches!(call, Call::Subscribe { .. })
}
