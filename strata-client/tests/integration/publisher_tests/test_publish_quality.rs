use strata_client::layers::TrackPublishOptions;
use strata_client::rtc::{LocalTrack, TrackSettings, Transceiver};
use strata_core::model::{
    ChangePublishQuality, SfuEvent, TrackKind, TrackType, VideoLayerSetting, VideoSender,
};

use crate::integration::init_tracing;
use crate::integration::publisher_tests::test_publisher;
use crate::utils::{Observed, RpcCall, eventually};

fn setting(name: &str, active: bool) -> VideoLayerSetting {
    VideoLayerSetting {
        name: name.to_string(),
        active,
        max_bitrate: 0,
        scale_resolution_down_by: 0.0,
        max_framerate: 0,
        scalability_mode: String::new(),
    }
}

fn camera() -> std::sync::Arc<LocalTrack> {
    LocalTrack::new(
        "cam",
        TrackKind::Video,
        TrackSettings {
            width: Some(1280),
            height: Some(720),
        },
    )
}

#[tokio::test]
async fn test_publish_video_announces_simulcast_layers() {
    init_tracing();

    let (ts, publisher, pc) = test_publisher().await;
    publisher
        .publish(camera(), TrackType::Video, TrackPublishOptions::default())
        .await
        .expect("publish failed");

    assert!(eventually(1000, || ts.rpc.count("SetPublisher") == 1).await);
    let RpcCall::SetPublisher(request) = &ts.rpc.calls_to("SetPublisher")[0] else {
        unreachable!()
    };
    let track = &request.tracks[0];
    assert_eq!(track.track_type, TrackType::Video);
    assert!(!track.dtx);
    let rids: Vec<&str> = track.layers.iter().map(|l| l.rid.as_str()).collect();
    assert_eq!(rids, vec!["q", "h", "f"]);
    assert_eq!(track.layers[2].video_dimension.width, 1280);
    assert_eq!(track.layers[2].bitrate, 1_200_000);

    let transceiver = &pc.transceivers()[0];
    let encodings: Vec<Option<String>> = transceiver.parameters().into_iter().map(|e| e.rid).collect();
    assert_eq!(
        encodings,
        vec![Some("q".to_string()), Some("h".to_string()), Some("f".to_string())]
    );
    assert_eq!(transceiver.codecs()[0].name(), "vp8");

    assert!(ts.observer.contains(&Observed::LayersUpdated {
        track_type: TrackType::Video,
        rids: vec!["q".to_string(), "h".to_string(), "f".to_string()],
    }));
}

#[tokio::test]
async fn test_change_publish_quality_updates_encodings() {
    init_tracing();

    let (ts, publisher, pc) = test_publisher().await;
    publisher
        .publish(camera(), TrackType::Video, TrackPublishOptions::default())
        .await
        .unwrap();
    assert!(eventually(1000, || ts.rpc.count("SetPublisher") == 1).await);

    let mut full = setting("f", false);
    full.max_bitrate = 900_000;
    let mut quarter = setting("q", true);
    quarter.max_bitrate = 150_000;
    ts.sfu
        .push_event(SfuEvent::ChangePublishQuality(ChangePublishQuality {
            video_senders: vec![VideoSender {
                track_type: TrackType::Video,
                publish_option_id: 2,
                layers: vec![quarter, setting("h", false), full],
            }],
        }));

    let transceiver = pc.transceivers()[0].clone();
    assert!(
        eventually(1000, || {
            let active: Vec<bool> = transceiver.parameters().iter().map(|e| e.active).collect();
            active == vec![true, false, false]
        })
        .await
    );
    assert_eq!(transceiver.parameters()[0].max_bitrate, Some(150_000));
}

#[tokio::test]
async fn test_small_capture_drops_layers() {
    init_tracing();

    let (ts, publisher, _pc) = test_publisher().await;
    let small = LocalTrack::new(
        "small-cam",
        TrackKind::Video,
        TrackSettings {
            width: Some(480),
            height: Some(270),
        },
    );
    publisher
        .publish(small, TrackType::Video, TrackPublishOptions::default())
        .await
        .unwrap();

    assert!(eventually(1000, || ts.rpc.count("SetPublisher") == 1).await);
    let RpcCall::SetPublisher(request) = &ts.rpc.calls_to("SetPublisher")[0] else {
        unreachable!()
    };
    let rids: Vec<&str> = request.tracks[0].layers.iter().map(|l| l.rid.as_str()).collect();
    assert_eq!(rids, vec!["q", "h"]);
}
