//! MQTT 3.1.1 transport session
//!
//! This module separates pure functions from I/O operations for better
//! testability:
//!
//! - [`connection`] - connection state, errors and option construction
//! - [`message_handler`] - event routing and inbound dispatch
//! - [`client`] - impure I/O and event loop coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use iotlink::auth::{AuthAlgorithm, Credential};
//! use iotlink::protocol::SessionIdentity;
//! use iotlink::transport::mqtt::{ConnectSettings, MqttSession};
//! use iotlink::transport::SessionTransport;
//!
//! # tokio_test::block_on(async {
//! let identity = SessionIdentity {
//!     client_id: "projects/p/locations/r/registries/reg/devices/dev".to_string(),
//!     session_id: "dev".to_string(),
//!     host: "mqtt.googleapis.com".to_string(),
//!     port: 8883,
//!     algorithm: AuthAlgorithm::Es256,
//! };
//! let mut session = MqttSession::new(identity, ConnectSettings::default());
//! let credential = Credential::new("signed-token", tokio::time::Instant::now());
//! session.connect(&credential).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttSession;
pub use connection::{ConnectSettings, ConnectionState, MqttError};
pub use message_handler::{EventRoute, InboundForwarder, MessageHandler};
