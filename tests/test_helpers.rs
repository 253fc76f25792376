//! Test helpers and utilities for integration tests

use iotlink::config::DeviceConfig;
use iotlink::session::{MessageConsumer, SessionLoop};
use iotlink::testing::mocks::{MockTokenProvider, MockTransport};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Minimal direct-device configuration
#[allow(dead_code)]
pub const DEVICE_TOML: &str = r#"
[device]
project_id = "blue-jet-123"
registry_id = "my-registry"
device_id = "my-device"

[auth]
private_key_file = "tests/fixtures/ec_private.pem"
algorithm = "ES256"
"#;

/// Create a test configuration for integration tests
#[allow(dead_code)]
pub fn test_config() -> DeviceConfig {
    DeviceConfig::from_toml_str(DEVICE_TOML).expect("test config should parse")
}

/// Same device, fronted by gateway `my-gateway`
#[allow(dead_code)]
pub fn gateway_config() -> DeviceConfig {
    let mut config = test_config();
    config.device.gateway_id = Some("my-gateway".to_string());
    config
}

/// Everything a session-loop test needs to observe a run
#[allow(dead_code)]
pub struct Harness {
    pub session: SessionLoop<MockTransport>,
    pub transport: MockTransport,
    pub tokens: MockTokenProvider,
    pub cancel: CancellationToken,
}

#[allow(dead_code)]
pub fn harness(config: &DeviceConfig, transport: MockTransport) -> Harness {
    let tokens = MockTokenProvider::new();
    let cancel = CancellationToken::new();
    let session = SessionLoop::new(
        transport.clone(),
        Arc::new(tokens.clone()),
        config,
        cancel.clone(),
    )
    .expect("session should build");

    Harness {
        session,
        transport,
        tokens,
        cancel,
    }
}

/// Consumer that keeps every decoded message
#[allow(dead_code)]
#[derive(Default)]
pub struct CollectingConsumer {
    messages: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl CollectingConsumer {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl MessageConsumer for CollectingConsumer {
    fn consume(&self, topic: &str, payload: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
    }
}
