//! Outbound message types and the scheduled publish plan

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Payload published to the attach and detach topics
pub const BINDING_PAYLOAD: &str = "{}";

/// Kind of outbound message the session publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Telemetry event, published to `events`
    Event,
    /// Device state, published to `state`
    State,
}

impl MessageType {
    /// Topic suffix under `/devices/{id}/`
    pub fn subtopic(&self) -> &'static str {
        match self {
            MessageType::Event => "events",
            MessageType::State => "state",
        }
    }

    /// Fixed pause after each publish
    pub fn pacing(&self) -> Duration {
        match self {
            MessageType::Event => Duration::from_millis(5000),
            MessageType::State => Duration::from_millis(15000),
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(MessageType::Event),
            "state" => Ok(MessageType::State),
            other => Err(format!("unknown message type '{other}'")),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Event => f.write_str("event"),
            MessageType::State => f.write_str("state"),
        }
    }
}

/// Immutable publish plan handed to the session loop
#[derive(Debug, Clone, PartialEq)]
pub struct PublishSchedule {
    pub message_type: MessageType,
    pub count: u32,
    /// Seconds to keep listening after the last publish
    pub wait_time_secs: u64,
}

impl PublishSchedule {
    pub fn new(message_type: MessageType, count: u32, wait_time_secs: u64) -> Self {
        Self {
            message_type,
            count,
            wait_time_secs,
        }
    }

    pub fn per_message_interval(&self) -> Duration {
        self.message_type.pacing()
    }

    /// Payload for the `index`-th message (1-based)
    pub fn payload(registry_id: &str, device_id: &str, index: u32) -> String {
        format!("{registry_id}/{device_id}-payload-{index}")
    }
}
