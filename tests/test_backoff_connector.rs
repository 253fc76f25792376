//! Connect retry behaviour on paused time

use iotlink::auth::{Credential, TokenProvider};
use iotlink::error::SessionError;
use iotlink::session::{BackoffConnector, BackoffPolicy};
use iotlink::testing::mocks::{ConnectOutcome, MockTokenProvider, MockTransport, TransportOp};
use iotlink::transport::{ConnectionState, MqttError, SessionTransport};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn credential() -> Credential {
    MockTokenProvider::new().mint().unwrap()
}

fn connect_offsets(transport: &MockTransport, started: Instant) -> Vec<u64> {
    transport
        .timed_ops()
        .into_iter()
        .filter(|(_, op)| matches!(op, TransportOp::Connect { .. }))
        .map(|(at, _)| (at - started).as_millis() as u64)
        .collect()
}

fn small_policy() -> BackoffPolicy {
    BackoffPolicy {
        initial_interval_ms: 100,
        max_interval_ms: 200,
        max_total_ms: 1000,
        multiplier: 1.5,
    }
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_connected() {
    let mut transport = MockTransport::new().with_connect_outcomes([
        ConnectOutcome::Unreachable,
        ConnectOutcome::Lost,
        ConnectOutcome::Unreachable,
    ]);
    let connector = BackoffConnector::new(BackoffPolicy::default());
    let started = Instant::now();

    let state = connector
        .connect(&mut transport, &credential(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(state, ConnectionState::Connected);
    assert!(transport.is_connected());
    assert_eq!(connect_offsets(&transport, started), vec![0, 500, 1250, 2375]);
}

#[tokio::test(start_paused = true)]
async fn test_refused_is_not_retried() {
    let mut transport =
        MockTransport::new().with_connect_outcomes([ConnectOutcome::Refused]);
    let connector = BackoffConnector::new(BackoffPolicy::default());

    let result = connector
        .connect(&mut transport, &credential(), &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(SessionError::Connect(MqttError::ConnectionRefused(_)))
    ));
    assert_eq!(transport.connect_passwords().len(), 1);
    assert!(matches!(
        transport.connection_state(),
        ConnectionState::Failed(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_budget_exhaustion_reports_elapsed_and_attempts() {
    let mut transport =
        MockTransport::new().with_connect_outcomes([ConnectOutcome::Unreachable; 10]);
    let connector = BackoffConnector::new(small_policy());
    let started = Instant::now();

    let result = connector
        .connect(&mut transport, &credential(), &CancellationToken::new())
        .await;

    match result {
        Err(SessionError::ConnectionTimeoutExceeded {
            elapsed_ms,
            attempts,
        }) => {
            assert_eq!(elapsed_ms, 1000);
            assert_eq!(attempts, 7);
        }
        other => panic!("expected ConnectionTimeoutExceeded, got {other:?}"),
    }
    // 100, 150, 200, 200, 200, then 150 clipped to the budget
    assert_eq!(
        connect_offsets(&transport, started),
        vec![0, 100, 250, 450, 650, 850, 1000]
    );
    assert_eq!(started.elapsed(), Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_each_sequence_starts_fresh() {
    let mut transport = MockTransport::new().with_connect_outcomes([
        ConnectOutcome::Unreachable,
        ConnectOutcome::Unreachable,
        ConnectOutcome::Succeed,
        ConnectOutcome::Unreachable,
        ConnectOutcome::Succeed,
    ]);
    let connector = BackoffConnector::new(BackoffPolicy::default());
    let cancel = CancellationToken::new();
    let started = Instant::now();

    connector
        .connect(&mut transport, &credential(), &cancel)
        .await
        .unwrap();
    connector
        .connect(&mut transport, &credential(), &cancel)
        .await
        .unwrap();

    // Second sequence waits the initial interval again
    assert_eq!(
        connect_offsets(&transport, started),
        vec![0, 500, 1250, 1250, 1750]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_sleep() {
    let mut transport =
        MockTransport::new().with_connect_outcomes([ConnectOutcome::Unreachable; 20]);
    let connector = BackoffConnector::new(BackoffPolicy::default());
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = connector
        .connect(&mut transport, &credential(), &cancel)
        .await;

    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(transport.connect_passwords().len(), 2);
    assert_eq!(started.elapsed(), Duration::from_millis(700));
}

#[tokio::test]
async fn test_already_cancelled_makes_no_attempt() {
    let mut transport = MockTransport::new();
    let connector = BackoffConnector::new(BackoffPolicy::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = connector
        .connect(&mut transport, &credential(), &cancel)
        .await;

    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert!(transport.ops().is_empty());
}
