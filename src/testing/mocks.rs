//! Mock implementations for testing
//!
//! Provides a scripted `SessionTransport` and a counting `TokenProvider` so the
//! session loop can be exercised without a broker or key material.

use crate::auth::{AuthError, Credential, TokenProvider};
use crate::transport::{ConnectionState, InboundHandler, MqttError, SessionTransport};
use async_trait::async_trait;
use rumqttc::QoS;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

/// One operation observed by the mock, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOp {
    /// Connect attempt with the password (bearer token) it carried
    Connect { password: String },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
    },
    Subscribe { topic: String, qos: QoS },
    Disconnect,
    Close,
}

/// Scripted result for the next connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Succeed,
    /// Retryable: server unreachable
    Unreachable,
    /// Retryable: connection lost during handshake
    Lost,
    /// Fatal: broker refused the credentials
    Refused,
}

#[derive(Default)]
struct MockState {
    ops: Vec<(Instant, TransportOp)>,
    connect_outcomes: VecDeque<ConnectOutcome>,
    publish_calls: usize,
    fail_publish_at: Option<usize>,
    handler: Option<Arc<dyn InboundHandler>>,
    handler_installs: usize,
    state: Option<ConnectionState>,
    rejected: usize,
}

/// Mock transport for testing.
///
/// Clones share state, so a test keeps one handle while the session owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that starts out connected
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.lock().state = Some(ConnectionState::Connected);
        transport
    }

    /// Queue connect outcomes; once drained every attempt succeeds
    pub fn with_connect_outcomes(self, outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        self.lock().connect_outcomes.extend(outcomes);
        self
    }

    /// Make the `n`-th publish call (1-based, counting every topic) fail
    pub fn fail_publish_at(self, n: usize) -> Self {
        self.lock().fail_publish_at = Some(n);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, op: TransportOp) {
        self.lock().ops.push((Instant::now(), op));
    }

    pub fn ops(&self) -> Vec<TransportOp> {
        self.lock().ops.iter().map(|(_, op)| op.clone()).collect()
    }

    /// Operations with the (virtual) instant each happened
    pub fn timed_ops(&self) -> Vec<(Instant, TransportOp)> {
        self.lock().ops.clone()
    }

    /// Successful publishes as `(topic, payload)`
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::Publish { topic, payload, .. } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn published_to(&self, topic: &str) -> usize {
        self.published().iter().filter(|(t, _)| t == topic).count()
    }

    pub fn connect_passwords(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::Connect { password } => Some(password),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &TransportOp) -> usize {
        self.ops().iter().filter(|op| *op == wanted).count()
    }

    /// Publish/subscribe calls refused because the mock was not connected
    pub fn rejected_calls(&self) -> usize {
        self.lock().rejected
    }

    pub fn handler_installs(&self) -> usize {
        self.lock().handler_installs
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate an inbound message. Returns false when no handler is installed.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        let handler = self.lock().handler.clone();
        match handler {
            Some(handler) => {
                handler.on_message(topic, payload);
                true
            }
            None => false,
        }
    }

    /// Simulate the broker dropping the connection
    pub fn drop_connection(&self, reason: &str) {
        let handler = {
            let mut state = self.lock();
            state.state = Some(ConnectionState::Disconnected(reason.to_string()));
            state.handler.clone()
        };
        if let Some(handler) = handler {
            handler.on_connection_lost(reason);
        }
    }

    fn check_connected(&self) -> Result<(), MqttError> {
        if self.is_closed() {
            return Err(MqttError::Closed);
        }
        let mut state = self.lock();
        match &state.state {
            Some(ConnectionState::Connected) => Ok(()),
            other => {
                let current = other.clone().unwrap_or_else(ConnectionState::initial);
                state.rejected += 1;
                Err(MqttError::NotConnected { state: current })
            }
        }
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn connect(&mut self, credential: &Credential) -> Result<(), MqttError> {
        if self.is_closed() {
            return Err(MqttError::Closed);
        }
        self.record(TransportOp::Connect {
            password: credential.token().to_string(),
        });

        let mut state = self.lock();
        let outcome = state
            .connect_outcomes
            .pop_front()
            .unwrap_or(ConnectOutcome::Succeed);

        let result = match outcome {
            ConnectOutcome::Succeed => Ok(()),
            ConnectOutcome::Unreachable => Err(MqttError::ServerUnreachable(
                "mock: connection refused".to_string(),
            )),
            ConnectOutcome::Lost => Err(MqttError::ConnectionLost("mock: reset".to_string())),
            ConnectOutcome::Refused => Err(MqttError::ConnectionRefused(
                "mock: NotAuthorized".to_string(),
            )),
        };

        state.state = Some(match &result {
            Ok(()) => ConnectionState::Connected,
            Err(e) if e.is_retryable() => ConnectionState::Disconnected(e.to_string()),
            Err(e) => ConnectionState::Failed(e.to_string()),
        });
        result
    }

    fn is_connected(&self) -> bool {
        !self.is_closed() && self.lock().state == Some(ConnectionState::Connected)
    }

    fn connection_state(&self) -> ConnectionState {
        self.lock()
            .state
            .clone()
            .unwrap_or_else(ConnectionState::initial)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), MqttError> {
        self.check_connected()?;

        let should_fail = {
            let mut state = self.lock();
            state.publish_calls += 1;
            state.fail_publish_at == Some(state.publish_calls)
        };
        if should_fail {
            return Err(MqttError::PublishFailed(
                format!("mock: publish to {topic} failed").into(),
            ));
        }

        self.record(TransportOp::Publish {
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.check_connected()?;
        self.record(TransportOp::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.record(TransportOp::Disconnect);
        self.lock().state = Some(ConnectionState::Disconnected(
            "Client disconnected".to_string(),
        ));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MqttError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.record(TransportOp::Close);
        let mut state = self.lock();
        state.state = Some(ConnectionState::Disconnected("Closed".to_string()));
        state.handler = None;
        Ok(())
    }

    async fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        let mut state = self.lock();
        state.handler = Some(handler);
        state.handler_installs += 1;
    }
}

/// Token provider minting `token-1`, `token-2`, ... stamped with the current instant
#[derive(Clone, Default)]
pub struct MockTokenProvider {
    minted: Arc<AtomicU32>,
    fail: Arc<AtomicBool>,
}

impl MockTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `mint` call fail
    pub fn fail_from_now(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn minted(&self) -> u32 {
        self.minted.load(Ordering::SeqCst)
    }
}

impl TokenProvider for MockTokenProvider {
    fn mint(&self) -> Result<Credential, AuthError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthError::Signing("mock signing failure".to_string()));
        }
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Credential::new(format!("token-{n}"), Instant::now()))
    }
}
