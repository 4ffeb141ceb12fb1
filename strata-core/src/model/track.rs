use serde::{Deserialize, Serialize};
use std::fmt;

/// Mutually exclusive categories of published media.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum TrackType {
    Audio,
    Video,
    ScreenShare,
    ScreenShareAudio,
}

impl TrackType {
    pub const ALL: [TrackType; 4] = [
        TrackType::Audio,
        TrackType::Video,
        TrackType::ScreenShare,
        TrackType::ScreenShareAudio,
    ];

    /// Name used inside remote stream ids (`<prefix>:TRACK_TYPE_VIDEO`).
    pub fn as_raw(&self) -> &'static str {
        match self {
            TrackType::Audio => "TRACK_TYPE_AUDIO",
            TrackType::Video => "TRACK_TYPE_VIDEO",
            TrackType::ScreenShare => "TRACK_TYPE_SCREEN_SHARE",
            TrackType::ScreenShareAudio => "TRACK_TYPE_SCREEN_SHARE_AUDIO",
        }
    }

    pub fn from_raw(raw: &str) -> Option<Self> {
        TrackType::ALL.into_iter().find(|t| t.as_raw() == raw)
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            TrackType::Audio | TrackType::ScreenShareAudio => TrackKind::Audio,
            TrackType::Video | TrackType::ScreenShare => TrackKind::Video,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == TrackKind::Audio
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_raw())
    }
}

/// Media kind as seen by the peer connection.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Media type as written on an SDP `m=` line.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq)]
pub enum PeerType {
    Publisher,
    Subscriber,
}

impl fmt::Display for PeerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerType::Publisher => f.write_str("publisher"),
            PeerType::Subscriber => f.write_str("subscriber"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq)]
pub struct VideoDimension {
    pub width: u32,
    pub height: u32,
}

impl VideoDimension {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq)]
pub enum VideoQuality {
    Low,
    Mid,
    High,
}

/// A layer as announced to the SFU.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VideoLayer {
    pub rid: String,
    pub bitrate: u32,
    pub fps: u32,
    pub quality: VideoQuality,
    pub video_dimension: VideoDimension,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Codec {
    /// Lowercase codec name without the media prefix, e.g. `vp8`, `opus`.
    pub name: String,
    pub clock_rate: u32,
    pub fmtp: String,
    pub payload_type: u8,
}

impl Codec {
    pub fn named(name: &str, clock_rate: u32) -> Self {
        Self {
            name: name.to_lowercase(),
            clock_rate,
            fmtp: String::new(),
            payload_type: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub enum AudioBitrateProfile {
    #[default]
    VoiceStandard,
    VoiceHighQuality,
    MusicHighQuality,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AudioBitrate {
    pub profile: AudioBitrateProfile,
    pub bitrate: u32,
}

/// SFU-provided encoding recipe for one track type.
///
/// Zero/`None` fields fall back to the planner defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PublishOption {
    pub id: i32,
    pub track_type: TrackType,
    pub codec: Option<Codec>,
    pub bitrate: u32,
    pub fps: u32,
    pub max_spatial_layers: u32,
    pub max_temporal_layers: u32,
    pub video_dimension: Option<VideoDimension>,
    pub use_single_layer: bool,
    pub audio_bitrate_profiles: Vec<AudioBitrate>,
}

impl PublishOption {
    pub fn new(id: i32, track_type: TrackType) -> Self {
        Self {
            id,
            track_type,
            codec: None,
            bitrate: 0,
            fps: 0,
            max_spatial_layers: 0,
            max_temporal_layers: 0,
            video_dimension: None,
            use_single_layer: false,
            audio_bitrate_profiles: Vec::new(),
        }
    }
}

/// Track metadata announced alongside a publisher offer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrackInfo {
    pub track_id: String,
    pub track_type: TrackType,
    pub layers: Vec<VideoLayer>,
    pub mid: String,
    pub stereo: bool,
    pub dtx: bool,
    pub red: bool,
    pub muted: bool,
    pub codec: Option<Codec>,
    pub publish_option_id: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct MuteState {
    pub track_type: TrackType,
    pub muted: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrackSubscriptionDetails {
    pub user_id: String,
    pub session_id: crate::model::SessionId,
    pub track_type: TrackType,
    pub dimension: Option<VideoDimension>,
}
