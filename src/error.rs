//! Fatal error taxonomy for a device session
//!
//! Every variant here aborts the session. Recoverable conditions (inbound
//! payloads that fail to decode, retryable connect failures still inside the
//! backoff budget) are logged where they happen and never reach this type.

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::transport::MqttError;
use thiserror::Error;

/// Main error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid authentication algorithm: {0}")]
    AuthAlgorithmInvalid(String),

    #[error("Could not connect within backoff budget: {elapsed_ms}ms slept over {attempts} attempts")]
    ConnectionTimeoutExceeded { elapsed_ms: u64, attempts: u32 },

    #[error("Connection failed: {0}")]
    Connect(#[source] MqttError),

    #[error("Publish to {topic} failed: {source}")]
    PublishFailure {
        topic: String,
        #[source]
        source: MqttError,
    },

    #[error("Subscribe to {topic} failed: {source}")]
    SubscribeFailure {
        topic: String,
        #[source]
        source: MqttError,
    },

    #[error("Token minting failed: {0}")]
    TokenMint(#[from] AuthError),

    #[error("Configuration error: {0}")]
    Config(ConfigError),

    #[error("Session cancelled")]
    Cancelled,
}

impl From<ConfigError> for SessionError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::InvalidAlgorithm(selector) => SessionError::AuthAlgorithmInvalid(selector),
            other => SessionError::Config(other),
        }
    }
}

impl SessionError {
    pub fn publish(topic: impl Into<String>, source: MqttError) -> Self {
        SessionError::PublishFailure {
            topic: topic.into(),
            source,
        }
    }

    pub fn subscribe(topic: impl Into<String>, source: MqttError) -> Self {
        SessionError::SubscribeFailure {
            topic: topic.into(),
            source,
        }
    }
}

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;
