use std::time::Duration;

use strata_client::reconnect::ConnectionState;
use strata_client::signaling::{CLOSE_NORMAL, InboundFrame};

use crate::integration::init_tracing;
use crate::integration::reconnect_tests::test_transport;
use crate::utils::eventually;

#[tokio::test(start_paused = true)]
async fn test_connect_becomes_healthy() {
    init_tracing();

    let mut t = test_transport([]);
    t.transport.connect().await.expect("connect failed");

    assert!(t.transport.is_healthy());
    assert_eq!(*t.transport.state().borrow(), ConnectionState::Healthy);
    assert_eq!(t.connector.tokens(), vec!["token-1"]);

    t.connector
        .push_latest(InboundFrame::Text(r#"{"type":"call.created"}"#.to_string()));
    assert_eq!(
        t.frames.recv().await,
        Some(InboundFrame::Text(r#"{"type":"call.created"}"#.to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_reconnects() {
    init_tracing();

    let mut t = test_transport([]);
    t.transport.connect().await.unwrap();
    let first_generation = t.transport.generation();

    t.connector.close_latest(1006);
    assert!(matches!(
        t.frames.recv().await,
        Some(InboundFrame::Closed { code: 1006, .. })
    ));

    assert!(eventually(10_000, || t.connector.opened() == 2).await);
    assert!(eventually(1_000, || t.transport.is_healthy()).await);
    assert!(t.transport.generation() > first_generation);
    assert_eq!(t.transport.consecutive_failures(), 0);
    // The cached token is reused.
    assert_eq!(t.tokens.loads(), 1);
    assert_eq!(t.connector.tokens(), vec!["token-1", "token-1"]);

    // The grace period expired while already healthy again.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(*t.transport.state().borrow(), ConnectionState::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_normal_close_is_terminal() {
    init_tracing();

    let t = test_transport([]);
    t.transport.connect().await.unwrap();

    t.connector.close_latest(CLOSE_NORMAL);

    let mut state = t.transport.state();
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(t.connector.opened(), 1);
    assert!(!t.transport.is_healthy());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_reconnecting() {
    init_tracing();

    let t = test_transport([]);
    t.transport.connect().await.unwrap();
    let channel = t.connector.latest_channel().unwrap();

    t.transport.disconnect().await;

    assert_eq!(*t.transport.state().borrow(), ConnectionState::Disconnected);
    assert_eq!(channel.close_frame().map(|(code, _)| code), Some(CLOSE_NORMAL));

    t.connector.close_latest(1006);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(t.connector.opened(), 1);
    assert!(t.transport.send(bytes::Bytes::from_static(b"x")).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_server_times_out() {
    init_tracing();

    let t = test_transport([crate::utils::Outcome::Unreachable; 20]);

    let result = t.transport.connect().await;

    assert!(matches!(
        result,
        Err(strata_client::ClientError::Timeout(_))
    ));
    assert!(t.connector.attempts() > 1);
    assert_eq!(t.connector.opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_connect_keeps_pending_attempt() {
    init_tracing();

    let t = test_transport([
        crate::utils::Outcome::Unreachable,
        crate::utils::Outcome::Hang,
    ]);

    let result = t.transport.connect().await;
    assert!(matches!(
        result,
        Err(strata_client::ClientError::Timeout(_))
    ));
    assert_eq!(t.connector.attempts(), 2);

    // The hanging reconnect still owns the attempt.
    let again = t.transport.connect().await;
    assert!(matches!(
        again,
        Err(strata_client::ClientError::InvalidState(_))
    ));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(t.connector.attempts(), 2);
    assert_eq!(t.connector.opened(), 0);
}
