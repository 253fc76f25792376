//! The session orchestrator
//!
//! Establishes the broker session under backoff, binds the bound device when
//! running as a gateway, installs the inbound listener, runs the paced publish
//! loop with token refresh, idles for late inbound traffic, and tears down.
//!
//! Teardown (detach, disconnect, close) runs on every exit path, including
//! errors and cancellation.

use super::backoff::BackoffConnector;
use super::binder::{BoundDeviceBinding, IdentityBinder};
use super::listener::{InboundListener, LoggingConsumer, MessageConsumer};
use crate::auth::{Credential, TokenProvider};
use crate::config::{DeviceConfig, RefreshReconnect};
use crate::error::{SessionError, SessionResult};
use crate::protocol::{PublishSchedule, SessionIdentity, TopicBuilder};
use crate::transport::SessionTransport;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Idle wait granularity after the last publish
const WAIT_TICK: Duration = Duration::from_secs(1);

/// Lifecycle phases of one session run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    Connecting,
    Bound,
    Publishing,
    Waiting,
    Draining,
    Closed,
}

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub published: u32,
    pub token_refreshes: u32,
    /// The run stopped early because the cancellation token fired
    pub cancelled: bool,
    pub final_phase: SessionPhase,
}

/// Drives one device or gateway session from connect to close
pub struct SessionLoop<T: SessionTransport> {
    transport: T,
    tokens: Arc<dyn TokenProvider>,
    identity: SessionIdentity,
    /// Device the payloads are published for and the listener watches
    device_id: String,
    registry_id: String,
    gateway: bool,
    schedule: PublishSchedule,
    token_exp_minutes: u64,
    connector: BackoffConnector,
    refresh_reconnect: RefreshReconnect,
    consumer: Arc<dyn MessageConsumer>,
    cancel: CancellationToken,
    phase: SessionPhase,
    credential: Option<Credential>,
    binding: Option<BoundDeviceBinding>,
    published: u32,
    token_refreshes: u32,
    cancelled: bool,
}

impl<T: SessionTransport> SessionLoop<T> {
    /// Build a loop from validated configuration.
    ///
    /// Fails with `AuthAlgorithmInvalid` for an unknown selector, before any
    /// network activity.
    pub fn new(
        transport: T,
        tokens: Arc<dyn TokenProvider>,
        config: &DeviceConfig,
        cancel: CancellationToken,
    ) -> SessionResult<Self> {
        let identity = SessionIdentity::from_config(config)?;
        let schedule = PublishSchedule::new(
            config.message_type()?,
            config.publish.num_messages,
            config.publish.wait_time_secs,
        );

        Ok(Self {
            transport,
            tokens,
            identity,
            device_id: config.device.device_id.clone(),
            registry_id: config.device.registry_id.clone(),
            gateway: config.is_gateway(),
            schedule,
            token_exp_minutes: config.auth.token_exp_minutes,
            connector: BackoffConnector::new(config.session.backoff.clone()),
            refresh_reconnect: config.session.refresh_reconnect,
            consumer: Arc::new(LoggingConsumer),
            cancel,
            phase: SessionPhase::Init,
            credential: None,
            binding: None,
            published: 0,
            token_refreshes: 0,
            cancelled: false,
        })
    }

    /// Replace the default logging consumer for inbound messages
    pub fn with_consumer(mut self, consumer: Arc<dyn MessageConsumer>) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Run the whole lifecycle and release the transport
    pub async fn run(mut self) -> SessionResult<SessionReport> {
        let span = crate::session_span!(
            client_id = %self.identity.client_id,
            device_id = %self.device_id,
            gateway = self.gateway,
        );

        async move {
            let outcome = self.establish_and_publish().await;
            if let Err(e) = &outcome {
                debug!("Session aborted: {}", e);
            }
            let teardown = self.teardown().await;

            outcome?;
            teardown?;

            let report = SessionReport {
                published: self.published,
                token_refreshes: self.token_refreshes,
                cancelled: self.cancelled,
                final_phase: self.phase,
            };
            info!(
                published = report.published,
                token_refreshes = report.token_refreshes,
                cancelled = report.cancelled,
                "Session finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn establish_and_publish(&mut self) -> SessionResult<()> {
        self.phase = SessionPhase::Connecting;
        let credential = self.tokens.mint()?;
        self.connector
            .connect(&mut self.transport, &credential, &self.cancel)
            .await?;
        self.credential = Some(credential);

        self.bind().await?;
        self.phase = SessionPhase::Bound;

        self.install_listener().await?;
        self.phase = SessionPhase::Publishing;
        self.publish_scheduled().await?;

        self.phase = SessionPhase::Waiting;
        if !self.cancelled {
            self.wait_for_inbound().await;
        }
        Ok(())
    }

    /// Subscribe the session's error stream, then attach the bound device
    async fn bind(&mut self) -> SessionResult<()> {
        let error_topic = TopicBuilder::build_error_topic(&self.identity.session_id);
        self.transport
            .subscribe(&error_topic, QoS::AtMostOnce)
            .await
            .map_err(|e| SessionError::subscribe(&error_topic, e))?;

        if self.gateway {
            self.binding = Some(IdentityBinder::attach(&self.transport, &self.device_id).await?);
        }
        Ok(())
    }

    async fn install_listener(&mut self) -> SessionResult<()> {
        InboundListener::attach_callback(
            &mut self.transport,
            &self.device_id,
            self.consumer.clone(),
        )
        .await
    }

    async fn publish_scheduled(&mut self) -> SessionResult<()> {
        let topic = TopicBuilder::build_publish_topic(&self.device_id, self.schedule.message_type);
        let pacing = self.schedule.per_message_interval();

        for index in 1..=self.schedule.count {
            if self.cancel.is_cancelled() {
                self.cancelled = true;
                break;
            }

            self.refresh_if_due().await?;

            let payload = PublishSchedule::payload(&self.registry_id, &self.device_id, index);
            info!(
                "Publishing message {}/{}: '{}'",
                index, self.schedule.count, payload
            );
            self.transport
                .publish(&topic, payload.into_bytes(), QoS::AtLeastOnce)
                .await
                .map_err(|e| SessionError::publish(&topic, e))?;
            self.published += 1;

            if !self.pause(pacing).await {
                break;
            }
        }
        Ok(())
    }

    /// Mint a new credential and reconnect once the current one is due
    async fn refresh_if_due(&mut self) -> SessionResult<()> {
        let due = self
            .credential
            .as_ref()
            .map_or(true, |credential| credential.needs_refresh(self.token_exp_minutes));
        if !due {
            return Ok(());
        }

        let age_secs = self
            .credential
            .as_ref()
            .map(|credential| credential.age().as_secs())
            .unwrap_or_default();
        info!(age_secs, "Refreshing token");

        let credential = self.tokens.mint()?;
        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect before token refresh failed: {}", e);
        }

        match self.refresh_reconnect {
            RefreshReconnect::Backoff => {
                self.connector
                    .connect(&mut self.transport, &credential, &self.cancel)
                    .await?;
            }
            RefreshReconnect::Single => {
                self.transport
                    .connect(&credential)
                    .await
                    .map_err(SessionError::Connect)?;
            }
        }
        self.credential = Some(credential);
        self.token_refreshes += 1;

        // The broker forgets subscriptions and bindings with the old connection
        self.bind().await?;
        self.install_listener().await?;
        Ok(())
    }

    async fn wait_for_inbound(&mut self) {
        debug!(
            wait_time_secs = self.schedule.wait_time_secs,
            "Waiting for inbound messages"
        );
        for _ in 0..self.schedule.wait_time_secs {
            if !self.pause(WAIT_TICK).await {
                break;
            }
        }
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&mut self, duration: Duration) -> bool {
        let cancel = self.cancel.clone();
        let completed = tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        };
        if !completed {
            info!("Cancellation requested, draining session");
            self.cancelled = true;
        }
        completed
    }

    async fn teardown(&mut self) -> SessionResult<()> {
        self.phase = SessionPhase::Draining;
        let result = drain(&mut self.transport, self.binding.take()).await;
        self.phase = SessionPhase::Closed;
        result
    }
}

/// Detach (if bound and still connected), disconnect if connected, then always close.
///
/// Only a failed detach is reported; disconnect and close failures are logged.
pub(crate) async fn drain<T>(
    transport: &mut T,
    binding: Option<BoundDeviceBinding>,
) -> SessionResult<()>
where
    T: SessionTransport + ?Sized,
{
    let mut detach_result = Ok(());

    if let Some(binding) = binding {
        if transport.is_connected() {
            detach_result = IdentityBinder::detach(&*transport, binding).await;
            if let Err(e) = &detach_result {
                warn!("Detach failed: {}", e);
            }
        } else {
            warn!(device_id = %binding.device_id, "Not connected, skipping detach");
        }
    }

    if transport.is_connected() {
        if let Err(e) = transport.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
    }

    if let Err(e) = transport.close().await {
        warn!("Closing transport failed: {}", e);
    }
    detach_result
}
