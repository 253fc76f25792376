//! Topic and identity construction
//!
//! Every path here is reproduced exactly as the broker expects it; none of them
//! are canonicalized or rewritten.

use super::messages::MessageType;

/// Username sent with every connect. The broker ignores it, but the password
/// field (which carries the bearer token) is only transmitted when it is set.
pub const PLACEHOLDER_USERNAME: &str = "unused";

/// Broker-side construction functions for topics and identities
pub struct TopicBuilder;

impl TopicBuilder {
    /// Gateway error stream: `/devices/{gateway_id}/errors`
    pub fn build_error_topic(gateway_id: &str) -> String {
        format!("/devices/{gateway_id}/errors")
    }

    /// Device attach: `/devices/{device_id}/attach`
    pub fn build_attach_topic(device_id: &str) -> String {
        format!("/devices/{device_id}/attach")
    }

    /// Device detach: `/devices/{device_id}/detach`
    pub fn build_detach_topic(device_id: &str) -> String {
        format!("/devices/{device_id}/detach")
    }

    /// Outbound telemetry or state: `/devices/{device_id}/{events|state}`
    pub fn build_publish_topic(device_id: &str, message_type: MessageType) -> String {
        format!("/devices/{device_id}/{}", message_type.subtopic())
    }

    /// Inbound commands (wildcard): `/devices/{device_id}/commands/#`
    pub fn build_commands_topic(device_id: &str) -> String {
        format!("/devices/{device_id}/commands/#")
    }

    /// Inbound config: `/devices/{device_id}/config`
    pub fn build_config_topic(device_id: &str) -> String {
        format!("/devices/{device_id}/config")
    }

    /// Client identifier: `projects/{project}/locations/{region}/registries/{registry}/devices/{id}`
    pub fn build_client_id(project_id: &str, region: &str, registry_id: &str, id: &str) -> String {
        format!("projects/{project_id}/locations/{region}/registries/{registry_id}/devices/{id}")
    }

    /// Connection endpoint string: `ssl://{host}:{port}`
    pub fn build_endpoint(host: &str, port: u16) -> String {
        format!("ssl://{host}:{port}")
    }
}
