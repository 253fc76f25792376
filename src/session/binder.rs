//! Gateway attach/detach control messages

use crate::error::{SessionError, SessionResult};
use crate::protocol::{TopicBuilder, BINDING_PAYLOAD};
use crate::transport::SessionTransport;
use rumqttc::QoS;
use tokio::time::Instant;
use tracing::info;

/// A device currently attached to the gateway session
#[derive(Debug, Clone, PartialEq)]
pub struct BoundDeviceBinding {
    pub device_id: String,
    pub bound_at: Instant,
}

/// Issues attach/detach control messages for a bound device
pub struct IdentityBinder;

impl IdentityBinder {
    /// Publish `{}` to the device's attach topic with qos 1
    pub async fn attach<T>(transport: &T, device_id: &str) -> SessionResult<BoundDeviceBinding>
    where
        T: SessionTransport + ?Sized,
    {
        let topic = TopicBuilder::build_attach_topic(device_id);
        transport
            .publish(&topic, BINDING_PAYLOAD.as_bytes().to_vec(), QoS::AtLeastOnce)
            .await
            .map_err(|e| SessionError::publish(&topic, e))?;

        info!(device_id = %device_id, "Attached bound device");
        Ok(BoundDeviceBinding {
            device_id: device_id.to_string(),
            bound_at: Instant::now(),
        })
    }

    /// Publish `{}` to the device's detach topic, consuming the binding
    pub async fn detach<T>(transport: &T, binding: BoundDeviceBinding) -> SessionResult<()>
    where
        T: SessionTransport + ?Sized,
    {
        let topic = TopicBuilder::build_detach_topic(&binding.device_id);
        transport
            .publish(&topic, BINDING_PAYLOAD.as_bytes().to_vec(), QoS::AtLeastOnce)
            .await
            .map_err(|e| SessionError::publish(&topic, e))?;

        info!(
            device_id = %binding.device_id,
            bound_for_ms = binding.bound_at.elapsed().as_millis() as u64,
            "Detached bound device"
        );
        Ok(())
    }
}
