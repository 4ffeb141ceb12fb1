use std::sync::Arc;

use strata_client::rtc::{LocalTrack, MediaTrack, TrackSettings};
use strata_core::model::{
    ParticipantJoined, ParticipantLeft, SfuEvent, TrackKind, TrackType, TrackUnpublished,
};

use crate::integration::subscriber_tests::test_subscriber;
use crate::integration::{init_tracing, participant};
use crate::utils::{Observed, eventually};

fn remote(id: &str, kind: TrackKind) -> Arc<LocalTrack> {
    LocalTrack::new(id, kind, TrackSettings::default())
}

#[tokio::test]
async fn test_orphan_track_is_adopted() {
    init_tracing();

    let t = test_subscriber().await;
    let pc = t.factory.connection(0);
    let alice = participant("alice");
    let track = remote("alice-audio", TrackKind::Audio);

    pc.emit_track("prefix-alice:TRACK_TYPE_AUDIO", track.clone());
    assert!(eventually(1000, || t.registry.orphan_count() == 1).await);
    assert!(t.ts.observer.seen().is_empty());

    t.ts.sfu.push_event(SfuEvent::ParticipantJoined(ParticipantJoined {
        participant: alice.clone(),
    }));

    let attached = Observed::Attached {
        session_id: alice.session_id,
        track_type: TrackType::Audio,
        track_id: "alice-audio".to_string(),
    };
    assert!(eventually(1000, || t.ts.observer.contains(&attached)).await);
    assert_eq!(t.registry.orphan_count(), 0);
    assert!(t.registry.stream(alice.session_id, TrackType::Audio).is_some());
}

#[tokio::test]
async fn test_participant_left_detaches_tracks() {
    init_tracing();

    let t = test_subscriber().await;
    let pc = t.factory.connection(0);
    let bob = participant("bob");
    t.ts.sfu.push_event(SfuEvent::ParticipantJoined(ParticipantJoined {
        participant: bob.clone(),
    }));
    assert!(eventually(1000, || t.registry.get(bob.session_id).is_some()).await);

    let video = remote("bob-video", TrackKind::Video);
    pc.emit_track("prefix-bob:TRACK_TYPE_VIDEO", video.clone());
    assert!(
        eventually(1000, || t
            .registry
            .stream(bob.session_id, TrackType::Video)
            .is_some())
        .await
    );

    t.ts.sfu.push_event(SfuEvent::ParticipantLeft(ParticipantLeft {
        participant: bob.clone(),
    }));

    let detached = Observed::Detached {
        session_id: bob.session_id,
        track_type: TrackType::Video,
        track_id: "bob-video".to_string(),
    };
    assert!(eventually(1000, || t.ts.observer.contains(&detached)).await);
    assert!(!video.is_live());
    assert!(t.registry.get(bob.session_id).is_none());
}

#[tokio::test]
async fn test_track_unpublished_releases_stream() {
    init_tracing();

    let t = test_subscriber().await;
    let pc = t.factory.connection(0);
    let carol = participant("carol");
    t.ts.sfu.push_event(SfuEvent::ParticipantJoined(ParticipantJoined {
        participant: carol.clone(),
    }));
    assert!(eventually(1000, || t.registry.get(carol.session_id).is_some()).await);

    let audio = remote("carol-audio", TrackKind::Audio);
    let screen = remote("carol-screen", TrackKind::Video);
    pc.emit_track("prefix-carol:TRACK_TYPE_AUDIO", audio.clone());
    pc.emit_track("prefix-carol:TRACK_TYPE_SCREEN_SHARE", screen.clone());
    assert!(
        eventually(1000, || t
            .registry
            .stream(carol.session_id, TrackType::ScreenShare)
            .is_some())
        .await
    );

    t.ts.sfu.push_event(SfuEvent::TrackUnpublished(TrackUnpublished {
        user_id: carol.user_id.clone(),
        session_id: carol.session_id,
        track_type: TrackType::ScreenShare,
    }));

    assert!(eventually(1000, || !screen.is_live()).await);
    assert!(audio.is_live());
    assert!(t.registry.stream(carol.session_id, TrackType::Audio).is_some());
    assert!(t.registry.stream(carol.session_id, TrackType::ScreenShare).is_none());
}

#[tokio::test]
async fn test_malformed_stream_id_is_ignored() {
    init_tracing();

    let t = test_subscriber().await;
    let pc = t.factory.connection(0);

    pc.emit_track("no-separator", remote("x", TrackKind::Audio));
    pc.emit_track("prefix-dave:TRACK_TYPE_HOLOGRAM", remote("y", TrackKind::Video));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(t.registry.orphan_count(), 0);
    assert!(t.ts.observer.seen().is_empty());
}
