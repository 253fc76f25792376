//! Transport layer for the broker session
//!
//! This module provides the transport abstraction the session loop drives and
//! the rumqttc-backed MQTT implementation.

use crate::auth::Credential;
use rumqttc::QoS;
use std::sync::Arc;

pub mod mqtt;

pub use mqtt::{ConnectionState, MqttError};

/// Callback target for inbound traffic.
///
/// Invoked from the transport's own event loop task, concurrently with
/// whatever the session loop is doing.
pub trait InboundHandler: Send + Sync {
    /// A message arrived on a subscribed topic
    fn on_message(&self, topic: &str, payload: &[u8]);

    /// The connection dropped without the client asking for it
    fn on_connection_lost(&self, _reason: &str) {}
}

/// Transport trait for one authenticated broker session
///
/// This trait provides an abstraction over the MQTT connection to enable
/// dependency injection and testing of the session loop.
#[async_trait::async_trait]
pub trait SessionTransport: Send + Sync {
    /// Connect using the credential's token as the password
    async fn connect(&mut self, credential: &Credential) -> Result<(), MqttError>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Publish a payload; fails unless connected
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), MqttError>;

    /// Subscribe to a topic filter; fails unless connected
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    /// Disconnect from the broker. A no-op when not connected.
    async fn disconnect(&mut self) -> Result<(), MqttError>;

    /// Release every resource held by the transport. Idempotent.
    async fn close(&mut self) -> Result<(), MqttError>;

    /// Replace the inbound dispatch target
    async fn set_handler(&self, handler: Arc<dyn InboundHandler>);
}
