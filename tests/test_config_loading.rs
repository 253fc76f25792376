//! Configuration loading and validation tests
//!
//! Exercises file loading, defaults, validation and command-line overrides
//! through the public API only.

use iotlink::config::{ConfigError, ConfigOverrides, DeviceConfig, RefreshReconnect};
use iotlink::protocol::SessionIdentity;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[broker]
host = "mqtt.example.com"
port = 443

[device]
project_id = "blue-jet-123"
cloud_region = "europe-west1"
registry_id = "my-registry"
device_id = "my-device"
gateway_id = "my-gateway"

[auth]
private_key_file = "ec_private.pem"
algorithm = "ES256"
token_exp_minutes = 60

[publish]
message_type = "state"
num_messages = 5
wait_time_secs = 30
"#,
    );

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.host, "mqtt.example.com");
    assert_eq!(config.broker.port, 443);
    assert_eq!(config.device.cloud_region, "europe-west1");
    assert_eq!(config.device.gateway_id.as_deref(), Some("my-gateway"));
    assert_eq!(config.auth.private_key_file, PathBuf::from("ec_private.pem"));
    assert_eq!(config.auth.token_exp_minutes, 60);
    assert_eq!(config.publish.num_messages, 5);
    assert_eq!(config.publish.wait_time_secs, 30);
    assert!(config.is_gateway());
    assert_eq!(config.session_id(), "my-gateway");
}

#[test]
fn test_minimal_config_gets_defaults() {
    let temp_file = write_config(
        r#"
[device]
project_id = "p"
registry_id = "r"
device_id = "d"

[auth]
private_key_file = "rsa_private.pem"
algorithm = "RS256"
"#,
    );

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.host, "mqtt.googleapis.com");
    assert_eq!(config.broker.port, 8883);
    assert_eq!(config.device.cloud_region, "asia-east1");
    assert_eq!(config.auth.token_exp_minutes, 20);
    assert_eq!(config.publish.message_type, "event");
    assert_eq!(config.publish.num_messages, 100);
    assert_eq!(config.publish.wait_time_secs, 120);
    assert_eq!(config.session.refresh_reconnect, RefreshReconnect::Backoff);
    assert_eq!(config.session.backoff.initial_interval_ms, 500);
    assert_eq!(config.session.backoff.max_interval_ms, 6000);
    assert_eq!(config.session.backoff.max_total_ms, 900_000);
    assert_eq!(config.session_id(), "d");
}

#[test]
fn test_session_section_overrides_backoff() {
    let temp_file = write_config(
        r#"
[device]
project_id = "p"
registry_id = "r"
device_id = "d"

[auth]
private_key_file = "k.pem"
algorithm = "RS256"

[session]
refresh_reconnect = "single"

[session.backoff]
initial_interval_ms = 250
max_total_ms = 10000
"#,
    );

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.session.refresh_reconnect, RefreshReconnect::Single);
    assert_eq!(config.session.backoff.initial_interval_ms, 250);
    assert_eq!(config.session.backoff.max_interval_ms, 6000);
    assert_eq!(config.session.backoff.max_total_ms, 10000);
}

#[test]
fn test_missing_file_is_read_error() {
    let result = DeviceConfig::load_from_file(Path::new("/nonexistent/iotlink.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[device\nproject_id = ");
    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_required_section_fails() {
    let temp_file = write_config(
        r#"
[device]
project_id = "p"
registry_id = "r"
device_id = "d"
"#,
    );
    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_unknown_algorithm_rejected() {
    let temp_file = write_config(
        r#"
[device]
project_id = "p"
registry_id = "r"
device_id = "d"

[auth]
private_key_file = "k.pem"
algorithm = "HS256"
"#,
    );

    match DeviceConfig::load_from_file(temp_file.path()) {
        Err(ConfigError::InvalidAlgorithm(value)) => assert_eq!(value, "HS256"),
        other => panic!("expected InvalidAlgorithm, got {other:?}"),
    }
}

#[test]
fn test_unknown_message_type_rejected() {
    let temp_file = write_config(
        r#"
[device]
project_id = "p"
registry_id = "r"
device_id = "d"

[auth]
private_key_file = "k.pem"
algorithm = "ES256"

[publish]
message_type = "telemetry"
"#,
    );

    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidMessageType(_))));
}

#[test]
fn test_identifier_with_topic_wildcard_rejected() {
    let temp_file = write_config(
        r#"
[device]
project_id = "p"
registry_id = "r"
device_id = "sensor/#"

[auth]
private_key_file = "k.pem"
algorithm = "ES256"
"#,
    );

    match DeviceConfig::load_from_file(temp_file.path()) {
        Err(ConfigError::InvalidIdentifier { field, .. }) => assert_eq!(field, "device_id"),
        other => panic!("expected InvalidIdentifier, got {other:?}"),
    }
}

#[test]
fn test_read_without_validation_allows_override_fix() {
    let temp_file = write_config(
        r#"
[device]
project_id = "p"
registry_id = "r"
device_id = "d"

[auth]
private_key_file = "k.pem"
algorithm = "bogus"
"#,
    );

    let mut config = DeviceConfig::read_from_file(temp_file.path()).unwrap();
    assert!(config.validate().is_err());

    let overrides = ConfigOverrides {
        algorithm: Some("RS256".to_string()),
        num_messages: Some(3),
        ..Default::default()
    };
    overrides.apply(&mut config);

    assert!(config.validate().is_ok());
    assert_eq!(config.publish.num_messages, 3);
}

#[test]
fn test_flags_only_configuration() {
    let overrides = ConfigOverrides {
        project_id: Some("blue-jet-123".to_string()),
        registry_id: Some("my-registry".to_string()),
        device_id: Some("my-device".to_string()),
        gateway_id: Some("my-gateway".to_string()),
        private_key_file: Some(PathBuf::from("ec_private.pem")),
        algorithm: Some("ES256".to_string()),
        ..Default::default()
    };

    let config = overrides.into_config().unwrap();
    assert!(config.validate().is_ok());

    let identity = SessionIdentity::from_config(&config).unwrap();
    assert_eq!(
        identity.client_id,
        "projects/blue-jet-123/locations/asia-east1/registries/my-registry/devices/my-gateway"
    );
    assert_eq!(identity.session_id, "my-gateway");
}

#[test]
fn test_flags_only_requires_identity() {
    let overrides = ConfigOverrides {
        project_id: Some("p".to_string()),
        ..Default::default()
    };

    match overrides.into_config() {
        Err(ConfigError::InvalidConfig(message)) => assert!(message.contains("--registry-id")),
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
}
