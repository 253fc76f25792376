//! Session identity derived from configuration

use super::topics::TopicBuilder;
use crate::auth::AuthAlgorithm;
use crate::config::{ConfigError, DeviceConfig};

/// Who the broker session authenticates as and where it connects.
///
/// Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionIdentity {
    /// Full client identifier (`projects/.../devices/{id}`)
    pub client_id: String,
    /// Device or gateway id the client identifier ends with
    pub session_id: String,
    pub host: String,
    pub port: u16,
    pub algorithm: AuthAlgorithm,
}

impl SessionIdentity {
    pub fn from_config(config: &DeviceConfig) -> Result<Self, ConfigError> {
        let session_id = config.session_id().to_string();
        Ok(Self {
            client_id: TopicBuilder::build_client_id(
                &config.device.project_id,
                &config.device.cloud_region,
                &config.device.registry_id,
                &session_id,
            ),
            session_id,
            host: config.broker.host.clone(),
            port: config.broker.port,
            algorithm: config.auth_algorithm()?,
        })
    }

    /// `ssl://{host}:{port}`
    pub fn endpoint(&self) -> String {
        TopicBuilder::build_endpoint(&self.host, self.port)
    }
}
