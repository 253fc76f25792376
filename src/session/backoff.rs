//! Bounded exponential backoff around the transport connect
//!
//! The policy is pure data; `BackoffState` computes the sleep sequence and
//! `BackoffConnector` drives a transport through it.

use crate::auth::Credential;
use crate::error::{SessionError, SessionResult};
use crate::transport::{ConnectionState, SessionTransport};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Backoff constants, overridable through `[session.backoff]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffPolicy {
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
    /// Total sleep budget across one connect sequence
    #[serde(default = "default_max_total")]
    pub max_total_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_interval() -> u64 {
    500
}

fn default_max_interval() -> u64 {
    6000
}

fn default_max_total() -> u64 {
    900_000
}

fn default_multiplier() -> f64 {
    1.5
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            max_total_ms: default_max_total(),
            multiplier: default_multiplier(),
        }
    }
}

impl BackoffPolicy {
    /// Validate backoff configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_interval_ms == 0 {
            return Err("session.backoff.initial_interval_ms must be greater than 0".to_string());
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(
                "session.backoff.max_interval_ms must be >= initial_interval_ms".to_string(),
            );
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("session.backoff.multiplier must be a finite value >= 1.0".to_string());
        }
        Ok(())
    }
}

/// Mutable state of one connect sequence. Created fresh for every sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffState {
    pub current_interval_ms: u64,
    pub total_elapsed_ms: u64,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_total_ms: u64,
    pub multiplier: f64,
}

impl BackoffState {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            current_interval_ms: policy.initial_interval_ms.min(policy.max_interval_ms),
            total_elapsed_ms: 0,
            initial_interval_ms: policy.initial_interval_ms,
            max_interval_ms: policy.max_interval_ms,
            max_total_ms: policy.max_total_ms,
            multiplier: policy.multiplier,
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.total_elapsed_ms >= self.max_total_ms
    }

    /// Consume the next sleep, or `None` once the total budget is spent.
    ///
    /// The final sleep is clipped to the remaining budget so cumulative sleep
    /// never exceeds `max_total_ms`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.budget_exhausted() {
            return None;
        }
        let remaining = self.max_total_ms - self.total_elapsed_ms;
        let delay = self.current_interval_ms.min(remaining);
        self.total_elapsed_ms += delay;
        self.current_interval_ms = self.grow(self.current_interval_ms);
        Some(Duration::from_millis(delay))
    }

    // Whole milliseconds; fractional products truncate
    fn grow(&self, interval_ms: u64) -> u64 {
        let next = (interval_ms as f64 * self.multiplier) as u64;
        next.max(interval_ms).min(self.max_interval_ms)
    }
}

/// Wraps `SessionTransport::connect` with bounded exponential retry
#[derive(Debug, Clone)]
pub struct BackoffConnector {
    policy: BackoffPolicy,
}

impl BackoffConnector {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    /// Run one fresh connect sequence.
    ///
    /// Retryable failures sleep and retry while budget remains. A fatal
    /// failure, an exhausted budget or cancellation ends the sequence.
    pub async fn connect<T>(
        &self,
        transport: &mut T,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> SessionResult<ConnectionState>
    where
        T: SessionTransport + ?Sized,
    {
        let mut state = BackoffState::new(&self.policy);
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            attempts += 1;
            let error = match transport.connect(credential).await {
                Ok(()) => {
                    info!(attempts, "Connected after backoff sequence");
                    return Ok(ConnectionState::Connected);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(attempts, "Non-retryable connect failure: {}", e);
                    return Err(SessionError::Connect(e));
                }
                Err(e) => e,
            };

            let Some(delay) = state.next_delay() else {
                warn!(
                    attempts,
                    elapsed_ms = state.total_elapsed_ms,
                    "Backoff budget exhausted: {}",
                    error
                );
                return Err(SessionError::ConnectionTimeoutExceeded {
                    elapsed_ms: state.total_elapsed_ms,
                    attempts,
                });
            };

            warn!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                elapsed_ms = state.total_elapsed_ms,
                "Connect failed, retrying: {}",
                error
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cancellation requested during connect backoff");
                    return Err(SessionError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
