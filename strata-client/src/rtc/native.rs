//! webrtc-rs backed implementation of the peer connection seam.

use crate::config::RtcConfig;
use crate::error::{ClientError, Result};
use crate::rtc::peer::{
    CodecCapability, EncodingParameters, IceConnectionState, PeerConnection,
    PeerConnectionFactory, PeerConnectionState, PeerEvent, RemoteTrack, SdpType,
    SessionDescription, SignalingState, Transceiver, TransceiverDirection, TransceiverInit,
};
use crate::rtc::track::{LocalTrack, MediaTrack, TrackSettings, TrackState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strata_core::model::TrackKind;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{
    MIME_TYPE_AV1, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9, MediaEngine,
};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::{RTCPFeedback, RTCRtpEncodingParameters, RTCRtpTransceiverInit};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Creates webrtc-rs peer connections with the default codecs and interceptors.
pub struct WebRtcPeerFactory {
    api: API,
}

impl WebRtcPeerFactory {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        config: &RtcConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>> {
        let pc = Arc::new(self.api.new_peer_connection(rtc_configuration(config)).await?);
        install_callbacks(&pc, events);
        debug!("Created webrtc peer connection");
        Ok(Arc::new(NativePeerConnection { pc }))
    }
}

fn rtc_configuration(config: &RtcConfig) -> RTCConfiguration {
    let ice_servers = config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();
    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

fn install_callbacks(pc: &Arc<RTCPeerConnection>, events: mpsc::UnboundedSender<PeerEvent>) {
    let tx = events.clone();
    pc.on_negotiation_needed(Box::new(move || {
        let _ = tx.send(PeerEvent::NegotiationNeeded);
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                let _ = tx.send(PeerEvent::IceCandidate(None));
                return;
            };
            let Ok(json_candidate) = candidate.to_json() else {
                return;
            };
            let Ok(str_candidate) = serde_json::to_string(&json_candidate) else {
                return;
            };
            let _ = tx.send(PeerEvent::IceCandidate(Some(str_candidate)));
        })
    }));

    let tx = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        trace!(?state, "webrtc ICE connection state");
        let _ = tx.send(PeerEvent::IceConnectionStateChange(state.into()));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        info!("Peer Connection State changed: {:?}", state);
        let _ = tx.send(PeerEvent::ConnectionStateChange(state.into()));
        Box::pin(async {})
    }));

    let tx = events;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let stream_id = track.stream_id().to_string();
            debug!(%stream_id, track_id = %track.id(), "Remote track received");
            let _ = tx.send(PeerEvent::Track(RemoteTrack {
                stream_id,
                track: Arc::new(NativeRemoteTrack::new(track)),
            }));
            Box::pin(async {})
        },
    ));
}

pub struct NativePeerConnection {
    pc: Arc<RTCPeerConnection>,
}

impl NativePeerConnection {
    /// The underlying webrtc-rs connection, for stats and media plumbing.
    pub fn inner(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

fn to_description(desc: RTCSessionDescription) -> SessionDescription {
    match desc.sdp_type {
        RTCSdpType::Offer => SessionDescription::offer(desc.sdp),
        _ => SessionDescription::answer(desc.sdp),
    }
}

fn from_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let desc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(desc)
}

#[async_trait]
impl PeerConnection for NativePeerConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        Ok(to_description(self.pc.create_offer(Some(options)).await?))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(to_description(self.pc.create_answer(None).await?))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(from_description(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(from_description(desc)?)
            .await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let Some(pending) = self.pc.pending_local_description().await else {
            return Ok(());
        };
        let mut desc = RTCSessionDescription::default();
        desc.sdp_type = RTCSdpType::Rollback;
        desc.sdp = pending.sdp;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<()> {
        let candidate: RTCIceCandidateInit = serde_json::from_str(candidate)
            .map_err(|e| ClientError::Negotiation(format!("malformed ICE candidate: {e}")))?;
        self.pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn add_transceiver(
        &self,
        track: Arc<dyn MediaTrack>,
        init: TransceiverInit,
    ) -> Result<Arc<dyn Transceiver>> {
        let rtc_init = RTCRtpTransceiverInit {
            direction: init.direction.into(),
            send_encodings: init
                .send_encodings
                .iter()
                .map(|encoding| RTCRtpEncodingParameters {
                    rid: encoding.rid.as_deref().unwrap_or_default().into(),
                    ..Default::default()
                })
                .collect(),
        };
        let sample_track = track
            .as_any()
            .downcast_ref::<LocalTrack>()
            .and_then(LocalTrack::sample_track);
        let transceiver = match sample_track {
            Some(sample_track) => {
                let local: Arc<dyn TrackLocal + Send + Sync> = sample_track;
                self.pc
                    .add_transceiver_from_track(local, Some(rtc_init))
                    .await?
            }
            None => {
                self.pc
                    .add_transceiver_from_kind(codec_type(track.kind()), Some(rtc_init))
                    .await?
            }
        };
        Ok(Arc::new(NativeTransceiver {
            transceiver,
            direction: init.direction,
            track: Mutex::new(Some(track)),
            encodings: Mutex::new(init.send_encodings),
        }))
    }

    async fn set_configuration(&self, config: &RtcConfig) -> Result<()> {
        self.pc.set_configuration(rtc_configuration(config)).await?;
        Ok(())
    }

    fn codec_capabilities(&self, kind: TrackKind) -> Vec<CodecCapability> {
        default_capabilities(kind)
    }

    fn signaling_state(&self) -> SignalingState {
        self.pc.signaling_state().into()
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.pc.ice_connection_state().into()
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.pc.connection_state().into()
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

fn codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

/// The codecs `register_default_codecs` makes available.
fn default_capabilities(kind: TrackKind) -> Vec<CodecCapability> {
    let cap = |mime: &str, clock_rate, channels, fmtp: &str| CodecCapability {
        mime_type: mime.to_string(),
        clock_rate,
        channels,
        sdp_fmtp_line: fmtp.to_string(),
    };
    match kind {
        TrackKind::Audio => vec![cap(MIME_TYPE_OPUS, 48_000, 2, "minptime=10;useinbandfec=1")],
        TrackKind::Video => vec![
            cap(MIME_TYPE_VP8, 90_000, 0, ""),
            cap(MIME_TYPE_VP9, 90_000, 0, "profile-id=0"),
            cap(
                MIME_TYPE_H264,
                90_000,
                0,
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
            ),
            cap(MIME_TYPE_AV1, 90_000, 0, "profile-id=0"),
        ],
    }
}

/// RTCP feedback `register_default_codecs` attaches to every video codec.
fn video_rtcp_feedback() -> Vec<RTCPFeedback> {
    [("goog-remb", ""), ("ccm", "fir"), ("nack", ""), ("nack", "pli")]
        .into_iter()
        .map(|(typ, parameter)| RTCPFeedback {
            typ: typ.to_string(),
            parameter: parameter.to_string(),
        })
        .collect()
}

impl From<CodecCapability> for RTCRtpCodecParameters {
    fn from(codec: CodecCapability) -> Self {
        let rtcp_feedback = if codec.mime_type.starts_with("video/") {
            video_rtcp_feedback()
        } else {
            Vec::new()
        };
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: codec.mime_type,
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                sdp_fmtp_line: codec.sdp_fmtp_line,
                rtcp_feedback,
            },
            // Resolved against the media engine when the offer is built.
            payload_type: 0,
            ..Default::default()
        }
    }
}

/// Sender-side view of a webrtc-rs transceiver.
///
/// webrtc-rs 0.17 ignores `send_encodings` and exposes no per-encoding controls, so the
/// encoding plan is kept here and reflected back to the session. The sender always carries a
/// single encoding.
struct NativeTransceiver {
    transceiver: Arc<RTCRtpTransceiver>,
    direction: TransceiverDirection,
    track: Mutex<Option<Arc<dyn MediaTrack>>>,
    encodings: Mutex<Vec<EncodingParameters>>,
}

#[async_trait]
impl Transceiver for NativeTransceiver {
    fn mid(&self) -> Option<String> {
        self.transceiver.mid().map(|mid| mid.to_string())
    }

    fn direction(&self) -> TransceiverDirection {
        self.direction
    }

    fn track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.track.lock().clone()
    }

    async fn replace_track(&self, track: Option<Arc<dyn MediaTrack>>) -> Result<()> {
        let local = track
            .as_ref()
            .and_then(|t| t.as_any().downcast_ref::<LocalTrack>())
            .and_then(LocalTrack::sample_track)
            .map(|sample| sample as Arc<dyn TrackLocal + Send + Sync>);
        let sender = self.transceiver.sender().await;
        sender.replace_track(local).await?;
        *self.track.lock() = track;
        Ok(())
    }

    fn parameters(&self) -> Vec<EncodingParameters> {
        self.encodings.lock().clone()
    }

    async fn set_parameters(&self, encodings: Vec<EncodingParameters>) -> Result<()> {
        trace!(count = encodings.len(), "Storing sender encodings");
        *self.encodings.lock() = encodings;
        Ok(())
    }

    async fn set_codec_preferences(&self, codecs: Vec<CodecCapability>) -> Result<()> {
        let codecs = codecs.into_iter().map(RTCRtpCodecParameters::from).collect();
        self.transceiver.set_codec_preferences(codecs).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.transceiver.stop().await?;
        Ok(())
    }
}

/// A track received from the SFU.
pub struct NativeRemoteTrack {
    track: Arc<TrackRemote>,
    kind: TrackKind,
    enabled: AtomicBool,
    ended: AtomicBool,
}

impl NativeRemoteTrack {
    fn new(track: Arc<TrackRemote>) -> Self {
        let kind = match track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        };
        Self {
            track,
            kind,
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
        }
    }

    /// The webrtc-rs track to read RTP from.
    pub fn remote(&self) -> &Arc<TrackRemote> {
        &self.track
    }
}

impl fmt::Debug for NativeRemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRemoteTrack")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("state", &self.ready_state())
            .finish()
    }
}

impl MediaTrack for NativeRemoteTrack {
    fn id(&self) -> String {
        self.track.id().to_string()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn settings(&self) -> TrackSettings {
        TrackSettings::default()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn ready_state(&self) -> TrackState {
        if self.ended.load(Ordering::SeqCst) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    fn stop(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<TransceiverDirection> for RTCRtpTransceiverDirection {
    fn from(direction: TransceiverDirection) -> Self {
        match direction {
            TransceiverDirection::SendOnly => RTCRtpTransceiverDirection::Sendonly,
            TransceiverDirection::RecvOnly => RTCRtpTransceiverDirection::Recvonly,
            TransceiverDirection::SendRecv => RTCRtpTransceiverDirection::Sendrecv,
            TransceiverDirection::Inactive => RTCRtpTransceiverDirection::Inactive,
        }
    }
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }
}

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
            _ => IceConnectionState::New,
        }
    }
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
            _ => PeerConnectionState::New,
        }
    }
}
