//! One-shot gateway flows
//!
//! Both flows run as the gateway on behalf of `device_id` and release the
//! transport on every exit path, detaching first whenever an attach happened.

use super::backoff::BackoffConnector;
use super::binder::{BoundDeviceBinding, IdentityBinder};
use super::listener::{InboundListener, MessageConsumer};
use super::session_loop::drain;
use crate::auth::TokenProvider;
use crate::config::{ConfigError, DeviceConfig};
use crate::error::{SessionError, SessionResult};
use crate::protocol::{SessionIdentity, TopicBuilder};
use crate::transport::SessionTransport;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

/// Connect as the gateway, publish `telemetry_data` once for the bound device, leave
pub async fn send_data_from_bound_device<T>(
    transport: &mut T,
    tokens: &dyn TokenProvider,
    config: &DeviceConfig,
    cancel: &CancellationToken,
) -> SessionResult<()>
where
    T: SessionTransport + ?Sized,
{
    let identity = gateway_identity(config)?;
    let message_type = config.message_type()?;
    let device_id = config.device.device_id.as_str();
    let span = crate::session_span!(client_id = %identity.client_id, device_id = %device_id);

    async {
        let mut binding = None;
        let outcome = async {
            connect_and_attach(&mut *transport, tokens, config, &identity, cancel, &mut binding)
                .await?;

            let topic = TopicBuilder::build_publish_topic(device_id, message_type);
            transport
                .publish(
                    &topic,
                    config.publish.telemetry_data.as_bytes().to_vec(),
                    QoS::AtLeastOnce,
                )
                .await
                .map_err(|e| SessionError::publish(&topic, e))?;
            info!(topic = %topic, "Sent telemetry on behalf of bound device");
            Ok::<(), SessionError>(())
        }
        .await;

        let drained = drain(&mut *transport, binding).await;
        outcome.and(drained)
    }
    .instrument(span)
    .await
}

/// Connect as the gateway, listen for the bound device's config and commands
/// for `wait_time_secs`, then leave
pub async fn listen_for_config_messages<T>(
    transport: &mut T,
    tokens: &dyn TokenProvider,
    config: &DeviceConfig,
    consumer: Arc<dyn MessageConsumer>,
    cancel: &CancellationToken,
) -> SessionResult<()>
where
    T: SessionTransport + ?Sized,
{
    let identity = gateway_identity(config)?;
    let device_id = config.device.device_id.as_str();
    let span = crate::session_span!(client_id = %identity.client_id, device_id = %device_id);

    async {
        let mut binding = None;
        let outcome = async {
            connect_and_attach(&mut *transport, tokens, config, &identity, cancel, &mut binding)
                .await?;
            InboundListener::attach_callback(&mut *transport, device_id, consumer).await?;

            info!(
                wait_time_secs = config.publish.wait_time_secs,
                "Listening for config messages"
            );
            for _ in 0..config.publish.wait_time_secs {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Cancellation requested, stopping listener");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
            Ok::<(), SessionError>(())
        }
        .await;

        let drained = drain(&mut *transport, binding).await;
        outcome.and(drained)
    }
    .instrument(span)
    .await
}

fn gateway_identity(config: &DeviceConfig) -> SessionResult<SessionIdentity> {
    if !config.is_gateway() {
        return Err(ConfigError::InvalidConfig(
            "gateway commands require device.gateway_id".to_string(),
        )
        .into());
    }
    Ok(SessionIdentity::from_config(config)?)
}

async fn connect_and_attach<T>(
    transport: &mut T,
    tokens: &dyn TokenProvider,
    config: &DeviceConfig,
    identity: &SessionIdentity,
    cancel: &CancellationToken,
    binding: &mut Option<BoundDeviceBinding>,
) -> SessionResult<()>
where
    T: SessionTransport + ?Sized,
{
    let credential = tokens.mint()?;
    BackoffConnector::new(config.session.backoff.clone())
        .connect(transport, &credential, cancel)
        .await?;

    let error_topic = TopicBuilder::build_error_topic(&identity.session_id);
    transport
        .subscribe(&error_topic, QoS::AtMostOnce)
        .await
        .map_err(|e| SessionError::subscribe(&error_topic, e))?;

    *binding = Some(IdentityBinder::attach(&*transport, &config.device.device_id).await?);
    Ok(())
}
