//! Integration tests for strata-client.
//!
//! Tests are organized by component:
//! - `signaling_tests` - join, RPC delivery and keepalive on the control session
//! - `publisher_tests` - publishing tracks and reacting to quality changes
//! - `subscriber_tests` - answering offers, routing remote tracks, migration
//! - `reconnect_tests` - the self-healing coordinator connection
//! - `transport_tests` - HTTP RPC and WebSocket channels against a loopback axum server

pub mod publisher_tests;
pub mod subscriber_tests;
pub mod transport_tests;

use std::sync::Arc;
use tracing::Level;

use strata_client::config::{PeerConfig, RtcConfig, SessionConfig};
use strata_client::participants::ParticipantRegistry;
use strata_client::rtc::PeerParams;
use strata_client::signaling::{SessionParams, SignalingSession};
use strata_core::model::{
    ClientDetails, Codec, JoinRequest, JoinResponse, ParticipantInfo, PublishOption, SessionId,
    SfuEvent, SfuRequest, TrackType, VideoDimension,
};

use crate::utils::{MockPeerFactory, MockRpc, MockSfu, RecordingObserver, eventually};

/// Initialize tracing for tests (call once per test).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A signaling session wired to in-memory stand-ins.
pub struct TestSession {
    pub sfu: MockSfu,
    pub rpc: Arc<MockRpc>,
    pub observer: Arc<RecordingObserver>,
    pub session: SignalingSession,
}

impl TestSession {
    /// Peer parameters sharing this session, observer and a fresh registry.
    pub fn peer_params(&self, factory: Arc<MockPeerFactory>) -> PeerParams {
        PeerParams {
            session: self.session.clone(),
            factory,
            rtc_config: RtcConfig::default(),
            config: PeerConfig::default(),
            observer: self.observer.clone(),
            registry: Arc::new(ParticipantRegistry::new()),
        }
    }
}

pub fn join_request(session_id: SessionId) -> JoinRequest {
    JoinRequest {
        token: "sfu-token".to_string(),
        session_id,
        subscriber_sdp: String::new(),
        fast_reconnect: false,
        client_details: ClientDetails::default(),
        subscriptions: Vec::new(),
    }
}

pub fn join_response(publish_options: Vec<PublishOption>) -> JoinResponse {
    JoinResponse {
        participants: Vec::new(),
        publish_options,
        reconnected: false,
        fast_reconnect_deadline_seconds: 30,
    }
}

/// Opus for audio, 720p VP8 for video.
pub fn default_publish_options() -> Vec<PublishOption> {
    let mut audio = PublishOption::new(1, TrackType::Audio);
    audio.codec = Some(Codec::named("opus", 48_000));

    let mut video = PublishOption::new(2, TrackType::Video);
    video.codec = Some(Codec::named("vp8", 90_000));
    video.bitrate = 1_200_000;
    video.fps = 30;
    video.video_dimension = Some(VideoDimension::new(1280, 720));

    vec![audio, video]
}

pub fn participant(name: &str) -> ParticipantInfo {
    ParticipantInfo {
        user_id: format!("user-{name}"),
        session_id: SessionId::new(),
        name: name.to_string(),
        track_lookup_prefix: format!("prefix-{name}"),
        published_tracks: Vec::new(),
    }
}

/// Opens a session over a mock channel and completes the join handshake.
pub async fn joined_session(config: SessionConfig) -> TestSession {
    let session = open_session(config);
    let joining = {
        let session = session.session.clone();
        tokio::spawn(async move {
            let request = join_request(session.session_id());
            session.join(request).await
        })
    };

    assert!(
        eventually(1000, || session
            .sfu
            .has_request(|r| matches!(r, SfuRequest::Join(_))))
        .await,
        "Join request was never sent"
    );
    session
        .sfu
        .push_event(SfuEvent::JoinResponse(join_response(default_publish_options())));
    joining
        .await
        .expect("join task panicked")
        .expect("join failed");
    session
}

/// Opens a session over a mock channel without joining.
pub fn open_session(config: SessionConfig) -> TestSession {
    let (sfu, channel, inbound) = MockSfu::new();
    let rpc = Arc::new(MockRpc::default());
    let observer = RecordingObserver::new();
    let params = SessionParams {
        edge_url: "wss://sfu.test/ws".to_string(),
        session_id: SessionId::new(),
        config,
    };
    let session =
        SignalingSession::with_channel(params, channel, inbound, rpc.clone(), observer.clone());
    TestSession {
        sfu,
        rpc,
        observer,
        session,
    }
}
