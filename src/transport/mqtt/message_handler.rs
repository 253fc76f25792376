//! Pure message routing and inbound dispatch for MQTT events
//!
//! Routing decisions are pure functions over rumqttc events. The forwarder is
//! the session's single, swappable dispatch target for inbound messages.

use crate::transport::InboundHandler;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    granted: suback
                        .return_codes
                        .iter()
                        .map(|code| matches!(code, SubscribeReasonCode::Success(_)))
                        .collect(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Decode an inbound payload as UTF-8 text (pure function)
    pub fn decode_payload(payload: &[u8]) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(payload)
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker sent a disconnect
    Disconnected,
    /// Our own disconnect request went out
    DisconnectSent,
    /// Subscription confirmed, one flag per requested filter
    SubscriptionConfirmed { packet_id: u16, granted: Vec<bool> },
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Holds the current inbound dispatch target
#[derive(Default)]
pub struct InboundForwarder {
    handler: Option<Arc<dyn InboundHandler>>,
}

impl InboundForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new handler, returning whether one was already installed
    pub fn set_handler(&mut self, handler: Arc<dyn InboundHandler>) -> bool {
        self.handler.replace(handler).is_some()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Hand an inbound message to the installed handler
    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        match &self.handler {
            Some(handler) => handler.on_message(topic, payload),
            None => {
                warn!(topic = %topic, "No inbound handler installed - message dropped");
            }
        }
    }

    pub fn notify_connection_lost(&self, reason: &str) {
        if let Some(handler) = &self.handler {
            handler.on_connection_lost(reason);
        } else {
            debug!("Connection lost with no handler installed: {}", reason);
        }
    }
}
