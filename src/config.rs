//! Device configuration system
//!
//! Loads the broker, identity, credential and publish settings from a TOML file.
//! The CLI layer may override individual fields before validation runs.

use crate::auth::AuthAlgorithm;
use crate::protocol::MessageType;
use crate::session::backoff::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main device configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    pub device: DeviceSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// Broker endpoint section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// MQTT bridge hostname
    #[serde(default = "default_host")]
    pub host: String,
    /// MQTT bridge port (TLS only)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Time allowed for a single connect attempt to receive its ConnAck
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_host() -> String {
    "mqtt.googleapis.com".to_string()
}

fn default_port() -> u16 {
    8883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

/// Device identity section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    pub project_id: String,
    #[serde(default = "default_region")]
    pub cloud_region: String,
    pub registry_id: String,
    pub device_id: String,
    /// When set, the session runs as this gateway on behalf of `device_id`
    #[serde(default)]
    pub gateway_id: Option<String>,
}

fn default_region() -> String {
    "asia-east1".to_string()
}

/// Credential section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSection {
    /// PEM encoded private key used to sign bearer tokens
    pub private_key_file: PathBuf,
    /// Signing algorithm selector: "RS256" or "ES256"
    pub algorithm: String,
    /// Minutes a token stays valid before the session refreshes it
    #[serde(default = "default_token_exp_minutes")]
    pub token_exp_minutes: u64,
}

fn default_token_exp_minutes() -> u64 {
    20
}

/// Publish schedule section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    /// "event" for telemetry, "state" for device state
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default = "default_num_messages")]
    pub num_messages: u32,
    /// Seconds to keep listening for commands after the last publish
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: u64,
    /// Payload sent by the one-shot gateway command
    #[serde(default = "default_telemetry_data")]
    pub telemetry_data: String,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            message_type: default_message_type(),
            num_messages: default_num_messages(),
            wait_time_secs: default_wait_time(),
            telemetry_data: default_telemetry_data(),
        }
    }
}

fn default_message_type() -> String {
    "event".to_string()
}

fn default_num_messages() -> u32 {
    100
}

fn default_wait_time() -> u64 {
    120
}

fn default_telemetry_data() -> String {
    "Specify with --telemetry-data".to_string()
}

/// How the session reconnects after minting a fresh token
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefreshReconnect {
    /// Fresh backoff sequence with reset state
    #[default]
    Backoff,
    /// One direct attempt, failure is fatal
    Single,
}

/// Session behaviour section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionSection {
    #[serde(default)]
    pub refresh_reconnect: RefreshReconnect,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid identifier for {field}: '{value}'")]
    InvalidIdentifier { field: &'static str, value: String },
    #[error("Invalid algorithm {0}. Should be one of 'RS256' or 'ES256'.")]
    InvalidAlgorithm(String),
    #[error("Invalid message type '{0}'. Should be one of 'event' or 'state'.")]
    InvalidMessageType(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse without validating
    pub fn read_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse without validating, so CLI overrides can be applied first
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validate every field the session relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("project_id", &self.device.project_id)?;
        validate_identifier("cloud_region", &self.device.cloud_region)?;
        validate_identifier("registry_id", &self.device.registry_id)?;
        validate_identifier("device_id", &self.device.device_id)?;
        if let Some(gateway_id) = &self.device.gateway_id {
            validate_identifier("gateway_id", gateway_id)?;
        }

        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be greater than 0".to_string(),
            ));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        self.auth_algorithm()?;
        self.message_type()?;

        if self.auth.token_exp_minutes == 0 {
            return Err(ConfigError::InvalidConfig(
                "auth.token_exp_minutes must be greater than 0".to_string(),
            ));
        }

        self.session
            .backoff
            .validate()
            .map_err(ConfigError::InvalidConfig)?;

        Ok(())
    }

    /// Parsed signing algorithm
    pub fn auth_algorithm(&self) -> Result<AuthAlgorithm, ConfigError> {
        self.auth
            .algorithm
            .parse()
            .map_err(|_| ConfigError::InvalidAlgorithm(self.auth.algorithm.clone()))
    }

    /// Parsed message type
    pub fn message_type(&self) -> Result<MessageType, ConfigError> {
        self.publish
            .message_type
            .parse()
            .map_err(|_| ConfigError::InvalidMessageType(self.publish.message_type.clone()))
    }

    /// Identity the broker session authenticates as: the gateway if present, else the device
    pub fn session_id(&self) -> &str {
        self.device
            .gateway_id
            .as_deref()
            .unwrap_or(&self.device.device_id)
    }

    /// Whether the session fronts a bound device through a gateway
    pub fn is_gateway(&self) -> bool {
        self.device.gateway_id.is_some()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
project_id = "blue-jet-123"
registry_id = "my-registry"
device_id = "my-device"

[auth]
private_key_file = "rsa_private.pem"
algorithm = "RS256"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Field overrides supplied on the command line; `None` keeps the file value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub project_id: Option<String>,
    pub cloud_region: Option<String>,
    pub registry_id: Option<String>,
    pub device_id: Option<String>,
    pub gateway_id: Option<String>,
    pub private_key_file: Option<PathBuf>,
    pub algorithm: Option<String>,
    pub token_exp_minutes: Option<u64>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub message_type: Option<String>,
    pub num_messages: Option<u32>,
    pub wait_time_secs: Option<u64>,
    pub telemetry_data: Option<String>,
}

impl ConfigOverrides {
    /// Overwrite every field that was supplied
    pub fn apply(&self, config: &mut DeviceConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut config.device.project_id, &self.project_id);
        set(&mut config.device.cloud_region, &self.cloud_region);
        set(&mut config.device.registry_id, &self.registry_id);
        set(&mut config.device.device_id, &self.device_id);
        if self.gateway_id.is_some() {
            config.device.gateway_id = self.gateway_id.clone();
        }
        set(&mut config.auth.private_key_file, &self.private_key_file);
        set(&mut config.auth.algorithm, &self.algorithm);
        set(&mut config.auth.token_exp_minutes, &self.token_exp_minutes);
        set(&mut config.broker.host, &self.host);
        set(&mut config.broker.port, &self.port);
        set(&mut config.publish.message_type, &self.message_type);
        set(&mut config.publish.num_messages, &self.num_messages);
        set(&mut config.publish.wait_time_secs, &self.wait_time_secs);
        set(&mut config.publish.telemetry_data, &self.telemetry_data);
    }

    /// Build a configuration from flags alone, when no file is present
    pub fn into_config(self) -> Result<DeviceConfig, ConfigError> {
        fn required<T>(value: &Option<T>, flag: &str) -> Result<(), ConfigError> {
            match value {
                Some(_) => Ok(()),
                None => Err(ConfigError::InvalidConfig(format!(
                    "{flag} is required when no config file is found"
                ))),
            }
        }

        required(&self.project_id, "--project-id")?;
        required(&self.registry_id, "--registry-id")?;
        required(&self.device_id, "--device-id")?;
        required(&self.private_key_file, "--private-key-file")?;
        required(&self.algorithm, "--algorithm")?;

        let mut config = DeviceConfig {
            broker: BrokerSection::default(),
            device: DeviceSection {
                project_id: String::new(),
                cloud_region: default_region(),
                registry_id: String::new(),
                device_id: String::new(),
                gateway_id: None,
            },
            auth: AuthSection {
                private_key_file: PathBuf::new(),
                algorithm: String::new(),
                token_exp_minutes: default_token_exp_minutes(),
            },
            publish: PublishSection::default(),
            session: SessionSection::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }
}

/// Identifiers end up inside topic paths, so reject empty values and topic metacharacters
fn validate_identifier(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let has_reserved = value.chars().any(|c| matches!(c, '/' | '+' | '#'));
    if value.trim().is_empty() || has_reserved {
        return Err(ConfigError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
