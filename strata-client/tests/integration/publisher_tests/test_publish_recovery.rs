use strata_client::layers::TrackPublishOptions;
use strata_client::rtc::{
    IceConnectionState, LocalTrack, PeerConnection, SignalingState, TrackSettings,
};
use strata_core::model::{
    ErrorCode, IceRestart, PeerType, SfuError, SfuEvent, TrackKind, TrackType,
    WebsocketReconnectStrategy,
};

use crate::integration::init_tracing;
use crate::integration::publisher_tests::test_publisher;
use crate::utils::{MockFailure, Observed, eventually};

fn mic() -> std::sync::Arc<LocalTrack> {
    LocalTrack::new("mic", TrackKind::Audio, TrackSettings::default())
}

#[tokio::test]
async fn test_sfu_ice_restart_renegotiates() {
    init_tracing();

    let (ts, publisher, pc) = test_publisher().await;
    publisher
        .publish(mic(), TrackType::Audio, TrackPublishOptions::default())
        .await
        .expect("publish failed");
    assert!(eventually(1000, || pc.remote_sdp().is_some()).await);

    ts.sfu.push_event(SfuEvent::IceRestart(IceRestart {
        peer_type: PeerType::Subscriber,
    }));
    ts.sfu.push_event(SfuEvent::IceRestart(IceRestart {
        peer_type: PeerType::Publisher,
    }));

    assert!(eventually(1000, || ts.rpc.count("SetPublisher") == 2).await);
    assert_eq!(pc.offers(), vec![false, true]);
    assert_eq!(pc.signaling_state(), SignalingState::Stable);
}

#[tokio::test]
async fn test_ice_failure_renegotiates() {
    init_tracing();

    let (ts, publisher, pc) = test_publisher().await;
    publisher
        .publish(mic(), TrackType::Audio, TrackPublishOptions::default())
        .await
        .expect("publish failed");
    assert!(eventually(1000, || pc.remote_sdp().is_some()).await);

    pc.set_ice_state(IceConnectionState::Failed);

    assert!(eventually(1000, || pc.offers() == vec![false, true]).await);
    assert!(eventually(1000, || ts.rpc.count("SetPublisher") == 2).await);
    assert!(!ts.observer.contains(&Observed::Reconnect(WebsocketReconnectStrategy::Rejoin)));
}

#[tokio::test]
async fn test_rejected_offer_is_rolled_back() {
    init_tracing();

    let (ts, publisher, pc) = test_publisher().await;
    ts.rpc.fail_next(
        "SetPublisher",
        MockFailure::Sfu(SfuError::new(ErrorCode::ParticipantSignalLost, "signal lost")),
    );

    publisher
        .publish(mic(), TrackType::Audio, TrackPublishOptions::default())
        .await
        .expect("publish failed");

    assert!(
        eventually(1000, || ts
            .observer
            .contains(&Observed::Reconnect(WebsocketReconnectStrategy::Fast)))
        .await
    );
    assert_eq!(ts.rpc.count("SetPublisher"), 1);
    assert_eq!(pc.rollbacks(), 1);
    assert_eq!(pc.signaling_state(), SignalingState::Stable);
    assert!(pc.remote_sdp().is_none());

    // The next ICE failure can restart since nothing is left in flight.
    pc.set_ice_state(IceConnectionState::Failed);

    assert!(eventually(1000, || ts.rpc.count("SetPublisher") == 2).await);
    assert!(eventually(1000, || pc.remote_sdp().is_some()).await);
    assert_eq!(pc.offers(), vec![false, true]);
    assert_eq!(pc.rollbacks(), 1);
}

#[tokio::test]
async fn test_unreachable_sfu_asks_for_rejoin() {
    init_tracing();

    let (ts, publisher, pc) = test_publisher().await;
    ts.rpc.fail_next(
        "SetPublisher",
        MockFailure::Sfu(SfuError::new(ErrorCode::InternalServerError, "boom")),
    );

    publisher
        .publish(mic(), TrackType::Audio, TrackPublishOptions::default())
        .await
        .expect("publish failed");

    assert!(
        eventually(1000, || ts
            .observer
            .contains(&Observed::Reconnect(WebsocketReconnectStrategy::Rejoin)))
        .await
    );
    assert_eq!(pc.signaling_state(), SignalingState::Stable);
}

#[tokio::test]
async fn test_rejected_answer_restarts_ice() {
    init_tracing();

    let (ts, publisher, pc) = test_publisher().await;
    pc.reject_remote_descriptions();

    publisher
        .publish(mic(), TrackType::Audio, TrackPublishOptions::default())
        .await
        .expect("publish failed");

    // The first offer and the ICE restart that follows it are both rolled back.
    assert!(eventually(1000, || pc.rollbacks() == 2).await);
    assert_eq!(pc.offers(), vec![false, true]);
    assert_eq!(ts.rpc.count("SetPublisher"), 2);
    assert_eq!(pc.signaling_state(), SignalingState::Stable);
    assert!(
        eventually(1000, || ts
            .observer
            .contains(&Observed::Reconnect(WebsocketReconnectStrategy::Rejoin)))
        .await
    );
}
