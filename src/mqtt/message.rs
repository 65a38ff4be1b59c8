use chrono::{DateTime, Local};
use std::fmt;

/// A single message the bridge hands to the transport.
///
/// Produced fresh for every publish call and dropped once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} <- {}", self.topic, preview(&self.payload))
    }
}

/// A message received on one of the command topics, stamped on arrival
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Local>,
}

impl InboundCommand {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        InboundCommand {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }
}

impl fmt::Display for InboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}: {}",
            self.received_at.naive_local(),
            self.topic,
            preview(&self.payload)
        )
    }
}

fn preview(payload: &str) -> &str {
    match payload.char_indices().nth(64) {
        Some((idx, _)) => &payload[..idx],
        None => payload,
    }
}
