use std::sync::Arc;

use strata_client::config::SessionConfig;
use strata_client::error::ClientError;
use strata_client::layers::TrackPublishOptions;
use strata_client::rtc::{LocalTrack, MediaTrack, Publisher, TrackSettings};
use strata_core::model::{TrackKind, TrackType};

use crate::integration::publisher_tests::test_publisher;
use crate::integration::{default_publish_options, init_tracing, joined_session};
use crate::utils::MockPeerFactory;

#[tokio::test]
async fn test_ended_track_is_rejected() {
    init_tracing();

    let (ts, publisher, pc) = test_publisher().await;
    let mic = LocalTrack::new("mic", TrackKind::Audio, TrackSettings::default());
    mic.stop();

    let err = publisher
        .publish(mic, TrackType::Audio, TrackPublishOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::ResourceUnavailable(_)));
    assert!(pc.transceivers().is_empty());
    assert_eq!(ts.rpc.count("UpdateMuteStates"), 0);
}

#[tokio::test]
async fn test_kind_mismatch_is_rejected() {
    init_tracing();

    let (_ts, publisher, pc) = test_publisher().await;
    let mic = LocalTrack::new("mic", TrackKind::Audio, TrackSettings::default());

    let err = publisher
        .publish(mic, TrackType::ScreenShare, TrackPublishOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::InvalidState(_)));
    assert!(pc.transceivers().is_empty());
}

#[tokio::test]
async fn test_missing_publish_options_are_rejected() {
    init_tracing();

    let ts = joined_session(SessionConfig::default()).await;
    let factory = Arc::new(MockPeerFactory::default());
    let options = default_publish_options()
        .into_iter()
        .filter(|o| o.track_type == TrackType::Audio)
        .collect();
    let publisher = Publisher::new(ts.peer_params(factory.clone()), options)
        .await
        .unwrap();

    let cam = LocalTrack::new("cam", TrackKind::Video, TrackSettings::default());
    let err = publisher
        .publish(cam.clone(), TrackType::Video, TrackPublishOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::ResourceUnavailable(_)));
    assert!(cam.is_live());
    assert!(factory.connection(0).transceivers().is_empty());
}

#[tokio::test]
async fn test_disposed_publisher_rejects_publish() {
    init_tracing();

    let (_ts, publisher, pc) = test_publisher().await;
    publisher.dispose().await;
    assert!(pc.is_closed());

    let mic = LocalTrack::new("mic", TrackKind::Audio, TrackSettings::default());
    let err = publisher
        .publish(mic, TrackType::Audio, TrackPublishOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));
}
