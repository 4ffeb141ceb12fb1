use std::time::Duration;

use strata_client::reconnect::ConnectionState;
use strata_client::signaling::CLOSE_NORMAL;

use crate::integration::init_tracing;
use crate::integration::reconnect_tests::test_transport;
use crate::utils::eventually;

#[tokio::test(start_paused = true)]
async fn test_pings_are_sent() {
    init_tracing();

    let t = test_transport([]);
    t.transport.connect().await.unwrap();
    let channel = t.connector.latest_channel().unwrap();

    tokio::time::sleep(Duration::from_secs(26)).await;

    assert!(channel.sent().iter().any(|frame| frame.as_ref() == b"ping"));
    assert!(t.transport.is_healthy());
}

#[tokio::test(start_paused = true)]
async fn test_silent_connection_is_replaced() {
    init_tracing();

    let t = test_transport([]);
    t.transport.connect().await.unwrap();
    let first = t.connector.latest_channel().unwrap();

    assert!(eventually(60_000, || t.connector.opened() == 2).await);

    assert_eq!(first.close_frame().map(|(code, _)| code), Some(CLOSE_NORMAL));
    assert!(eventually(1_000, || t.transport.is_healthy()).await);
}

#[tokio::test(start_paused = true)]
async fn test_offline_then_online() {
    init_tracing();

    let t = test_transport([]);
    t.transport.connect().await.unwrap();

    t.transport.set_online(false);
    assert!(!t.transport.is_healthy());
    assert_eq!(*t.transport.state().borrow(), ConnectionState::Unhealthy);

    t.transport.set_online(true);
    let mut state = t.transport.state();
    state
        .wait_for(|s| *s == ConnectionState::Healthy)
        .await
        .unwrap();
    assert_eq!(t.connector.opened(), 2);
}
