//! Inbound config/command subscriptions and dispatch
//!
//! The transport invokes the installed handler from its own event loop task,
//! so consumers must be `Send + Sync` and must not assume they run in step
//! with the session loop.

use crate::error::{SessionError, SessionResult};
use crate::protocol::TopicBuilder;
use crate::transport::mqtt::MessageHandler;
use crate::transport::{InboundHandler, SessionTransport};
use rumqttc::QoS;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Application-level sink for decoded inbound messages
pub trait MessageConsumer: Send + Sync {
    fn consume(&self, topic: &str, payload: &str);
}

/// Consumer that only logs what arrives
#[derive(Debug, Default, Clone)]
pub struct LoggingConsumer;

impl MessageConsumer for LoggingConsumer {
    fn consume(&self, topic: &str, payload: &str) {
        info!(topic = %topic, payload = %payload, "Received message");
    }
}

/// Decodes payloads as UTF-8 and passes them to a consumer
pub struct DispatchHandler {
    device_id: String,
    consumer: Arc<dyn MessageConsumer>,
}

impl DispatchHandler {
    pub fn new(device_id: impl Into<String>, consumer: Arc<dyn MessageConsumer>) -> Self {
        Self {
            device_id: device_id.into(),
            consumer,
        }
    }
}

impl InboundHandler for DispatchHandler {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        match MessageHandler::decode_payload(payload) {
            Ok(text) => self.consumer.consume(topic, text),
            Err(e) => {
                warn!(
                    device_id = %self.device_id,
                    topic = %topic,
                    bytes = payload.len(),
                    "Dropping inbound message with invalid UTF-8 payload: {}",
                    e
                );
            }
        }
    }

    fn on_connection_lost(&self, reason: &str) {
        debug!(device_id = %self.device_id, "Connection lost: {}", reason);
    }
}

/// Subscribes a device's config and command topics and installs dispatch
pub struct InboundListener;

impl InboundListener {
    pub async fn attach_callback<T>(
        transport: &mut T,
        device_id: &str,
        consumer: Arc<dyn MessageConsumer>,
    ) -> SessionResult<()>
    where
        T: SessionTransport + ?Sized,
    {
        // Handler goes in before the subscriptions
        transport
            .set_handler(Arc::new(DispatchHandler::new(device_id, consumer)))
            .await;

        for topic in [
            TopicBuilder::build_config_topic(device_id),
            TopicBuilder::build_commands_topic(device_id),
        ] {
            transport
                .subscribe(&topic, QoS::AtLeastOnce)
                .await
                .map_err(|e| SessionError::subscribe(&topic, e))?;
        }

        info!(device_id = %device_id, "Inbound listener attached");
        Ok(())
    }
}
