use std::time::Duration;

use strata_client::config::{RtcConfig, SessionConfig};
use strata_client::layers::TrackPublishOptions;
use strata_client::rtc::{LocalTrack, TrackSettings};
use strata_core::model::{
    IceRestart, IceServerConfig, PeerType, SfuEvent, TrackKind, TrackType,
};

use crate::integration::publisher_tests::test_publisher;
use crate::integration::{init_tracing, joined_session};
use crate::utils::{RpcCall, eventually};

fn mic() -> std::sync::Arc<LocalTrack> {
    LocalTrack::new("mic", TrackKind::Audio, TrackSettings::default())
}

#[tokio::test]
async fn test_migration_restarts_ice_on_new_session() {
    init_tracing();

    let (ts, publisher, pc) = test_publisher().await;
    publisher
        .publish(mic(), TrackType::Audio, TrackPublishOptions::default())
        .await
        .expect("publish failed");
    assert!(eventually(1000, || pc.remote_sdp().is_some()).await);

    let target = joined_session(SessionConfig::default()).await;
    let rtc_config = RtcConfig {
        ice_servers: vec![IceServerConfig {
            urls: vec!["turn:turn.example.com:3478".to_string()],
            username: Some("user".to_string()),
            credential: Some("secret".to_string()),
        }],
    };
    publisher
        .migrate_to(target.session.clone(), &rtc_config)
        .await
        .expect("migration failed");

    let configurations = pc.configurations();
    assert_eq!(configurations.len(), 2);
    assert_eq!(
        configurations[1].ice_servers[0].urls,
        vec!["turn:turn.example.com:3478".to_string()]
    );
    assert_eq!(pc.offers(), vec![false, true]);

    assert_eq!(ts.rpc.count("SetPublisher"), 1);
    assert_eq!(target.rpc.count("SetPublisher"), 1);
    let RpcCall::SetPublisher(request) = &target.rpc.calls_to("SetPublisher")[0] else {
        unreachable!()
    };
    assert_eq!(request.session_id, target.session.session_id());
    assert_eq!(request.tracks[0].track_id, "mic");

    // Restart requests now come from the new SFU only.
    ts.sfu.push_event(SfuEvent::IceRestart(IceRestart {
        peer_type: PeerType::Publisher,
    }));
    target.sfu.push_event(SfuEvent::IceRestart(IceRestart {
        peer_type: PeerType::Publisher,
    }));
    assert!(eventually(1000, || target.rpc.count("SetPublisher") == 2).await);
    assert_eq!(ts.rpc.count("SetPublisher"), 1);
}

#[tokio::test]
async fn test_migration_without_tracks_skips_negotiation() {
    init_tracing();

    let (_ts, publisher, pc) = test_publisher().await;
    let target = joined_session(SessionConfig::default()).await;

    publisher
        .migrate_to(target.session.clone(), &RtcConfig::default())
        .await
        .expect("migration failed");

    assert_eq!(pc.configurations().len(), 2);
    assert!(pc.offers().is_empty());
    assert_eq!(target.rpc.count("SetPublisher"), 0);
}

#[tokio::test]
async fn test_restart_during_negotiation_is_skipped() {
    init_tracing();

    let (ts, publisher, pc) = test_publisher().await;
    let gate = ts.rpc.hold("SetPublisher");

    publisher
        .publish(mic(), TrackType::Audio, TrackPublishOptions::default())
        .await
        .expect("publish failed");
    assert!(eventually(1000, || ts.rpc.count("SetPublisher") == 1).await);

    // The offer is still waiting for its answer.
    publisher.restart_ice().await.expect("restart failed");
    publisher.restart_ice().await.expect("restart failed");
    assert_eq!(pc.offers(), vec![false]);

    gate.add_permits(1);
    assert!(eventually(1000, || pc.remote_sdp().is_some()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(ts.rpc.count("SetPublisher"), 1);
    assert_eq!(pc.offers(), vec![false]);
}
