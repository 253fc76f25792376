//! Pure connection state management for the MQTT session
//!
//! This module contains pure functions for connection state management,
//! error classification and option construction.

use crate::auth::Credential;
use crate::config::BrokerSection;
use crate::protocol::{SessionIdentity, PLACEHOLDER_USERNAME};
use rumqttc::{ConnectReturnCode, ConnectionError, MqttOptions, Transport};
use std::time::Duration;
use thiserror::Error;

/// Connection state for the MQTT session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Not connected, with the reason
    Disconnected(String),
    /// Connect attempt in flight
    Connecting,
    /// ConnAck received, ready for operations
    Connected,
    /// Connect failed with a non-retryable error
    Failed(String),
}

impl ConnectionState {
    pub fn initial() -> Self {
        ConnectionState::Disconnected("Not connected".to_string())
    }
}

/// Per-attempt connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectSettings {
    pub keep_alive: Duration,
    /// How long a single attempt waits for ConnAck
    pub connect_timeout: Duration,
    /// Wrap the socket in TLS. Only disabled for local test brokers.
    pub use_tls: bool,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            use_tls: true,
        }
    }
}

impl From<&BrokerSection> for ConnectSettings {
    fn from(broker: &BrokerSection) -> Self {
        Self {
            keep_alive: Duration::from_secs(broker.keep_alive_secs),
            connect_timeout: Duration::from_secs(broker.connect_timeout_secs),
            use_tls: true,
        }
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Server unreachable: {0}")]
    ServerUnreachable(String),
    #[error("Connection refused by broker: {0}")]
    ConnectionRefused(String),
    #[error("TLS failure: {0}")]
    Tls(String),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Transport already closed")]
    Closed,
}

impl MqttError {
    /// Whether a connect attempt failing with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MqttError::ConnectionLost(_) | MqttError::ServerUnreachable(_)
        )
    }
}

/// Map a rumqttc connection error onto the retryable/fatal taxonomy
pub fn classify_connection_error(error: ConnectionError) -> MqttError {
    match error {
        ConnectionError::Io(e) => MqttError::ServerUnreachable(e.to_string()),
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => {
            MqttError::ServerUnreachable(error.to_string())
        }
        ConnectionError::MqttState(e) => MqttError::ConnectionLost(e.to_string()),
        ConnectionError::ConnectionRefused(code) => refused(code),
        ConnectionError::Tls(e) => MqttError::Tls(e.to_string()),
        other => MqttError::ConnectionFailedStr(other.to_string()),
    }
}

/// Non-success ConnAck codes are never retried
pub fn refused(code: ConnectReturnCode) -> MqttError {
    MqttError::ConnectionRefused(format!("{code:?}"))
}

/// Pure function to configure MQTT options for one connect attempt.
///
/// rumqttc's v4 client speaks protocol level 4 (MQTT 3.1.1) only, and its
/// rustls backend negotiates TLS 1.2 or 1.3, never anything older.
pub fn configure_mqtt_options(
    identity: &SessionIdentity,
    settings: &ConnectSettings,
    credential: &Credential,
) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(identity.client_id.clone(), identity.host.clone(), identity.port);

    if settings.use_tls {
        mqtt_options.set_transport(Transport::tls_with_default_config());
    }

    // The username is ignored by the broker; the password carries the bearer token
    mqtt_options.set_credentials(PLACEHOLDER_USERNAME, credential.token());
    mqtt_options.set_keep_alive(settings.keep_alive);
    mqtt_options.set_clean_session(true);

    mqtt_options
}
