use crate::config::RtcConfig;
use crate::error::Result;
use crate::layers::{AudioLayer, OptimalLayer};
use crate::rtc::MediaTrack;
use async_trait::async_trait;
use std::sync::Arc;
use strata_core::model::TrackKind;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendOnly,
    RecvOnly,
    SendRecv,
    Inactive,
}

/// Runtime parameters of one sender encoding.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncodingParameters {
    pub rid: Option<String>,
    pub active: bool,
    pub max_bitrate: Option<u32>,
    pub max_framerate: Option<u32>,
    pub scale_resolution_down_by: Option<f64>,
    pub scalability_mode: Option<String>,
}

impl From<&OptimalLayer> for EncodingParameters {
    fn from(layer: &OptimalLayer) -> Self {
        Self {
            rid: Some(layer.rid.clone()),
            active: layer.active,
            max_bitrate: Some(layer.max_bitrate),
            max_framerate: Some(layer.max_framerate),
            scale_resolution_down_by: layer.scale_resolution_down_by,
            scalability_mode: layer.scalability_mode.clone(),
        }
    }
}

impl From<&AudioLayer> for EncodingParameters {
    fn from(layer: &AudioLayer) -> Self {
        Self {
            active: true,
            max_bitrate: Some(layer.max_bitrate),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransceiverInit {
    pub direction: TransceiverDirection,
    pub send_encodings: Vec<EncodingParameters>,
}

/// A codec the local engine can send or receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecCapability {
    /// e.g. `video/VP8`.
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

impl CodecCapability {
    /// Lowercased codec name without the media prefix.
    pub fn name(&self) -> String {
        self.mime_type
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.mime_type)
            .to_lowercase()
    }
}

/// Media received on a subscriber connection.
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub stream_id: String,
    pub track: Arc<dyn MediaTrack>,
}

/// Callbacks raised by a peer connection, delivered in order on one channel.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    NegotiationNeeded,
    /// JSON `RTCIceCandidateInit`; `None` marks the end of gathering.
    IceCandidate(Option<String>),
    IceConnectionStateChange(IceConnectionState),
    ConnectionStateChange(PeerConnectionState),
    Track(RemoteTrack),
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Discards a pending local offer, returning signaling to `Stable`.
    async fn rollback(&self) -> Result<()>;

    /// Applies a trickled candidate in its JSON `RTCIceCandidateInit` form.
    async fn add_ice_candidate(&self, candidate: &str) -> Result<()>;

    async fn add_transceiver(
        &self,
        track: Arc<dyn MediaTrack>,
        init: TransceiverInit,
    ) -> Result<Arc<dyn Transceiver>>;

    async fn set_configuration(&self, config: &RtcConfig) -> Result<()>;

    fn codec_capabilities(&self, kind: TrackKind) -> Vec<CodecCapability>;

    fn signaling_state(&self) -> SignalingState;

    fn ice_connection_state(&self) -> IceConnectionState;

    fn connection_state(&self) -> PeerConnectionState;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Transceiver: Send + Sync {
    fn mid(&self) -> Option<String>;

    fn direction(&self) -> TransceiverDirection;

    fn track(&self) -> Option<Arc<dyn MediaTrack>>;

    async fn replace_track(&self, track: Option<Arc<dyn MediaTrack>>) -> Result<()>;

    fn parameters(&self) -> Vec<EncodingParameters>;

    async fn set_parameters(&self, encodings: Vec<EncodingParameters>) -> Result<()>;

    async fn set_codec_preferences(&self, codecs: Vec<CodecCapability>) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Builds peer connections whose callbacks are forwarded to `events`.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        config: &RtcConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>>;
}

/// Orders `capabilities` so `preferred` comes first, dropping `remove` entirely.
pub fn codec_preferences(
    capabilities: &[CodecCapability],
    preferred: &str,
    remove: Option<&str>,
) -> Vec<CodecCapability> {
    let (mut front, rest): (Vec<_>, Vec<_>) = capabilities
        .iter()
        .filter(|c| remove.is_none_or(|r| !c.name().eq_ignore_ascii_case(r)))
        .cloned()
        .partition(|c| c.name().eq_ignore_ascii_case(preferred));
    front.extend(rest);
    front
}
