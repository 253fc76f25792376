//! Impure I/O operations for the MQTT session
//!
//! This module owns the rumqttc client and event loop: connect attempts,
//! the background event loop task, and teardown.

use super::connection::{
    classify_connection_error, configure_mqtt_options, refused, ConnectSettings, ConnectionState,
    MqttError,
};
use super::message_handler::{EventRoute, InboundForwarder, MessageHandler};
use crate::auth::Credential;
use crate::protocol::SessionIdentity;
use crate::transport::{InboundHandler, SessionTransport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Grace period for the event loop task to flush our Disconnect packet
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// One authenticated broker session over TLS
pub struct MqttSession {
    identity: SessionIdentity,
    settings: ConnectSettings,
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    forwarder: Arc<Mutex<InboundForwarder>>,
    closed: bool,
}

impl MqttSession {
    pub fn new(identity: SessionIdentity, settings: ConnectSettings) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::initial());
        Self {
            identity,
            settings,
            client: None,
            event_loop_handle: None,
            state_tx,
            state_rx,
            forwarder: Arc::new(Mutex::new(InboundForwarder::new())),
            closed: false,
        }
    }

    /// Poll the fresh event loop until the broker answers our Connect
    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), MqttError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(refused(ack.code))
                    };
                }
                Ok(event) => {
                    debug!(target: "mqtt_transport", "Pre-ConnAck event: {:?}", event);
                }
                Err(e) => return Err(classify_connection_error(e)),
            }
        }
    }

    /// Drive the connected event loop until our own disconnect or a lost connection
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        forwarder: Arc<Mutex<InboundForwarder>>,
        session_id: String,
    ) {
        info!("Starting MQTT event loop for session: {}", session_id);

        loop {
            let event = match event_loop.poll().await {
                Ok(event) => event,
                Err(e) => {
                    let reason = classify_connection_error(e).to_string();
                    if *state_tx.borrow() == ConnectionState::Connected {
                        warn!(session_id = %session_id, "Connection lost: {}", reason);
                        let _ = state_tx.send(ConnectionState::Disconnected(reason.clone()));
                        forwarder.lock().await.notify_connection_lost(&reason);
                    }
                    break;
                }
            };

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::MessageReceived { topic, payload } => {
                    debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                    forwarder.lock().await.dispatch(&topic, &payload);
                }
                EventRoute::Disconnected => {
                    let reason = "Broker closed the connection".to_string();
                    warn!(session_id = %session_id, "{}", reason);
                    let _ = state_tx.send(ConnectionState::Disconnected(reason.clone()));
                    forwarder.lock().await.notify_connection_lost(&reason);
                    break;
                }
                EventRoute::DisconnectSent => {
                    debug!(target: "mqtt_transport", "Disconnect flushed to broker");
                    break;
                }
                EventRoute::SubscriptionConfirmed { packet_id, granted } => {
                    if granted.iter().all(|ok| *ok) {
                        debug!(target: "mqtt_transport", "Subscription {} confirmed", packet_id);
                    } else {
                        warn!(packet_id, "Broker rejected a subscription filter");
                    }
                }
                EventRoute::InfrastructureEvent(event_str) => {
                    debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                }
                EventRoute::ConnectionAcknowledged | EventRoute::OutgoingEvent => {}
            }
        }

        info!("MQTT event loop stopped for session: {}", session_id);
    }

    fn stop_event_loop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }

    /// Check connection state before operations
    fn connected_client(&self) -> Result<&AsyncClient, MqttError> {
        if self.closed {
            return Err(MqttError::Closed);
        }
        let state = self.state_rx.borrow().clone();
        match &self.client {
            Some(client) if state == ConnectionState::Connected => Ok(client),
            _ => Err(MqttError::NotConnected { state }),
        }
    }
}

#[async_trait]
impl SessionTransport for MqttSession {
    async fn connect(&mut self, credential: &Credential) -> Result<(), MqttError> {
        if self.closed {
            return Err(MqttError::Closed);
        }

        // A reconnect after token refresh replaces the previous client wholesale
        self.stop_event_loop();
        self.client = None;

        let _ = self.state_tx.send(ConnectionState::Connecting);
        info!(
            client_id = %self.identity.client_id,
            endpoint = %self.identity.endpoint(),
            "Connecting to MQTT broker"
        );

        let options = configure_mqtt_options(&self.identity, &self.settings, credential);
        let (client, mut event_loop) = AsyncClient::new(options, 10);

        let span = crate::mqtt_span!(
            operation = "connect",
            session_id = %self.identity.session_id
        );
        let attempt = tokio::time::timeout(
            self.settings.connect_timeout,
            Self::wait_for_connack(&mut event_loop).instrument(span),
        )
        .await
        .unwrap_or_else(|_| {
            Err(MqttError::ServerUnreachable(
                "ConnAck timeout - no connection confirmation received".to_string(),
            ))
        });

        if let Err(e) = attempt {
            let next_state = if e.is_retryable() {
                ConnectionState::Disconnected(e.to_string())
            } else {
                ConnectionState::Failed(e.to_string())
            };
            let _ = self.state_tx.send(next_state);
            return Err(e);
        }

        let _ = self.state_tx.send(ConnectionState::Connected);
        self.event_loop_handle = Some(tokio::spawn(Self::run_event_loop(
            event_loop,
            self.state_tx.clone(),
            self.forwarder.clone(),
            self.identity.session_id.clone(),
        )));
        self.client = Some(client);

        info!(session_id = %self.identity.session_id, "Connected to MQTT broker");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed && *self.state_rx.borrow() == ConnectionState::Connected
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), MqttError> {
        let client = self.connected_client()?;
        client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", "Published to {} with {:?}", topic, qos);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        let client = self.connected_client()?;
        client.subscribe(topic, qos).await.map_err(|e| {
            MqttError::SubscriptionFailed(format!("Failed to subscribe to {topic}: {e}").into())
        })?;

        info!("Subscribed to: {}", topic);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        if !self.is_connected() {
            debug!("Disconnect requested while not connected - nothing to do");
            return Ok(());
        }

        if let Some(client) = &self.client {
            if let Err(e) = client.disconnect().await {
                error!("Failed to request MQTT disconnect: {}", e);
            }
        }

        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    handle.abort();
                }
                _ => {}
            }
        }

        let _ = self
            .state_tx
            .send(ConnectionState::Disconnected("Client disconnected".to_string()));
        info!(session_id = %self.identity.session_id, "MQTT session disconnected");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MqttError> {
        if self.closed {
            return Ok(());
        }
        self.stop_event_loop();
        self.client = None;
        self.closed = true;
        let _ = self
            .state_tx
            .send(ConnectionState::Disconnected("Closed".to_string()));
        debug!(session_id = %self.identity.session_id, "MQTT session closed");
        Ok(())
    }

    async fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        let replaced = self.forwarder.lock().await.set_handler(handler);
        if replaced {
            debug!("Replaced inbound handler");
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // Drop can't await a graceful disconnect; only stop the background task
        self.stop_event_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthAlgorithm;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    /// Local broker stand-in: answers each CONNECT with an accepted ConnAck and
    /// reports the raw CONNECT bytes. With `hold_open` it keeps the socket until
    /// the client leaves; otherwise it drops it right after the ConnAck.
    async fn spawn_broker(
        accepts: usize,
        hold_open: bool,
    ) -> (u16, mpsc::UnboundedReceiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for _ in 0..accepts {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 1024];
                let n = socket.read(&mut buf).await.unwrap();
                let _ = tx.send(buf[..n].to_vec());
                socket.write_all(&CONNACK_ACCEPTED).await.unwrap();
                if hold_open {
                    while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
                }
            }
        });

        (port, rx)
    }

    #[derive(Default)]
    struct LossCounter {
        lost: AtomicUsize,
    }

    impl InboundHandler for LossCounter {
        fn on_message(&self, _topic: &str, _payload: &[u8]) {}

        fn on_connection_lost(&self, _reason: &str) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }

    fn local_identity(port: u16) -> SessionIdentity {
        SessionIdentity {
            client_id: "projects/p/locations/r/registries/reg/devices/dev".to_string(),
            session_id: "dev".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            algorithm: AuthAlgorithm::Es256,
        }
    }

    fn plain_settings() -> ConnectSettings {
        ConnectSettings {
            keep_alive: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            use_tls: false,
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let session = MqttSession::new(local_identity(1883), plain_settings());
        assert_eq!(session.connection_state(), ConnectionState::initial());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_publish_and_subscribe_fail_without_connection() {
        let mut session = MqttSession::new(local_identity(1883), plain_settings());

        let publish = session
            .publish("/devices/dev/events", b"x".to_vec(), QoS::AtLeastOnce)
            .await;
        assert!(matches!(publish, Err(MqttError::NotConnected { .. })));

        let subscribe = session
            .subscribe("/devices/dev/errors", QoS::AtMostOnce)
            .await;
        assert!(matches!(subscribe, Err(MqttError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let mut session = MqttSession::new(local_identity(1883), plain_settings());
        assert!(session.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut session = MqttSession::new(local_identity(1883), plain_settings());
        assert!(session.close().await.is_ok());
        assert!(session.close().await.is_ok());

        let credential = Credential::new("token", Instant::now());
        assert!(matches!(
            session.connect(&credential).await,
            Err(MqttError::Closed)
        ));
        assert!(matches!(
            session
                .publish("/devices/dev/events", Vec::new(), QoS::AtLeastOnce)
                .await,
            Err(MqttError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_retryable() {
        // Bind then drop a listener to find a port nothing is listening on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut session = MqttSession::new(local_identity(port), plain_settings());
        let credential = Credential::new("token", Instant::now());

        let err = session.connect(&credential).await.unwrap_err();
        assert!(err.is_retryable(), "expected retryable error, got {err}");
        assert!(matches!(
            session.connection_state(),
            ConnectionState::Disconnected(_)
        ));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_broker_drop_marks_disconnected_and_notifies() {
        let (port, _connects) = spawn_broker(1, false).await;
        let mut session = MqttSession::new(local_identity(port), plain_settings());
        let handler = Arc::new(LossCounter::default());
        session.set_handler(handler.clone()).await;

        session
            .connect(&Credential::new("token-1", Instant::now()))
            .await
            .unwrap();

        eventually("connection loss", || handler.lost.load(Ordering::SeqCst) > 0).await;
        eventually("event loop exit", || {
            session
                .event_loop_handle
                .as_ref()
                .map_or(true, |handle| handle.is_finished())
        })
        .await;

        assert_eq!(handler.lost.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.connection_state(),
            ConnectionState::Disconnected(_)
        ));
        assert!(!session.is_connected());

        let publish = session
            .publish("/devices/dev/events", b"late".to_vec(), QoS::AtLeastOnce)
            .await;
        assert!(matches!(publish, Err(MqttError::NotConnected { .. })));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_then_reconnect_with_new_token() {
        let (port, mut connects) = spawn_broker(2, true).await;
        let mut session = MqttSession::new(local_identity(port), plain_settings());
        let handler = Arc::new(LossCounter::default());
        session.set_handler(handler.clone()).await;

        session
            .connect(&Credential::new("token-1", Instant::now()))
            .await
            .unwrap();
        assert!(session.is_connected());

        session.disconnect().await.unwrap();
        assert!(!session.is_connected());

        session
            .connect(&Credential::new("token-2", Instant::now()))
            .await
            .unwrap();
        assert!(session.is_connected());
        session
            .publish("/devices/dev/events", b"after refresh".to_vec(), QoS::AtMostOnce)
            .await
            .unwrap();

        let first = connects.recv().await.unwrap();
        let second = connects.recv().await.unwrap();
        let carries = |packet: &[u8], token: &[u8]| packet.windows(token.len()).any(|w| w == token);
        assert!(carries(&first, b"token-1"));
        assert!(carries(&second, b"token-2"));

        // Our own disconnect is not a lost connection
        assert_eq!(handler.lost.load(Ordering::SeqCst), 0);

        session.disconnect().await.unwrap();
        session.close().await.unwrap();
    }
}
