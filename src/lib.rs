//! iotlink - long-lived MQTT session client for telemetry devices and gateways
//!
//! A device (or a gateway fronting one bound device) keeps an authenticated TLS
//! session with the broker, publishes on a fixed schedule, refreshes its bearer
//! token before it expires and listens for config and command pushes.
//!
//! # Overview
//!
//! - [`session::SessionLoop`] orchestrates one run: backoff connect, attach,
//!   listener install, paced publishing with token refresh, final wait, teardown
//! - [`transport::SessionTransport`] is the broker seam; [`transport::mqtt::MqttSession`]
//!   is the rumqttc implementation
//! - [`auth::JwtTokenProvider`] mints RS256/ES256 device tokens
//!
//! # Quick Start
//!
//! ```no_run
//! use iotlink::auth::{AuthAlgorithm, JwtTokenProvider};
//! use iotlink::config::DeviceConfig;
//! use iotlink::protocol::SessionIdentity;
//! use iotlink::session::SessionLoop;
//! use iotlink::transport::mqtt::{ConnectSettings, MqttSession};
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::load_from_file(Path::new("iotlink.toml"))?;
//! let tokens = JwtTokenProvider::from_key_file(
//!     config.device.project_id.clone(),
//!     &config.auth.private_key_file,
//!     AuthAlgorithm::Es256,
//!     config.auth.token_exp_minutes,
//! )?;
//! let transport = MqttSession::new(
//!     SessionIdentity::from_config(&config)?,
//!     ConnectSettings::from(&config.broker),
//! );
//!
//! let report = SessionLoop::new(transport, Arc::new(tokens), &config, CancellationToken::new())?
//!     .run()
//!     .await?;
//! println!("published {} messages", report.published);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ConfigOverrides, DeviceConfig};
pub use error::{SessionError, SessionResult};
pub use protocol::*;
pub use session::{SessionLoop, SessionPhase, SessionReport};
pub use transport::mqtt::MqttSession;
