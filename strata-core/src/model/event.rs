use crate::model::{
    ConnectionQualityInfo, GoAwayReason, IceTrickle, ParticipantInfo, PeerType, PublishOption,
    SessionId, SfuError, TrackType, WebsocketReconnectStrategy,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriberOffer {
    pub ice_restart: bool,
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherAnswer {
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceRestart {
    pub peer_type: PeerType,
}

/// Encoding settings the SFU wants for one rid (or the sole SVC layer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoLayerSetting {
    pub name: String,
    pub active: bool,
    pub max_bitrate: u32,
    pub scale_resolution_down_by: f64,
    pub max_framerate: u32,
    pub scalability_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoSender {
    pub track_type: TrackType,
    pub publish_option_id: i32,
    pub layers: Vec<VideoLayerSetting>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangePublishQuality {
    pub video_senders: Vec<VideoSender>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackPublished {
    pub user_id: String,
    pub session_id: SessionId,
    pub track_type: TrackType,
    pub participant: Option<ParticipantInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackUnpublished {
    pub user_id: String,
    pub session_id: SessionId,
    pub track_type: TrackType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantJoined {
    pub participant: ParticipantInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantLeft {
    pub participant: ParticipantInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionQualityChanged {
    pub updates: Vec<ConnectionQualityInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinResponse {
    pub participants: Vec<ParticipantInfo>,
    pub publish_options: Vec<PublishOption>,
    pub reconnected: bool,
    pub fast_reconnect_deadline_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckResponse {
    pub participant_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEvent {
    pub error: SfuError,
    pub reconnect_strategy: WebsocketReconnectStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoAway {
    pub reason: GoAwayReason,
}

/// Events pushed by the SFU. Exactly one payload per instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SfuEvent {
    SubscriberOffer(SubscriberOffer),
    PublisherAnswer(PublisherAnswer),
    IceTrickle(IceTrickle),
    IceRestart(IceRestart),
    ChangePublishQuality(ChangePublishQuality),
    TrackPublished(TrackPublished),
    TrackUnpublished(TrackUnpublished),
    ParticipantJoined(ParticipantJoined),
    ParticipantLeft(ParticipantLeft),
    ConnectionQualityChanged(ConnectionQualityChanged),
    JoinResponse(JoinResponse),
    HealthCheckResponse(HealthCheckResponse),
    Error(ErrorEvent),
    GoAway(GoAway),
    ParticipantMigrationComplete,
}

/// Discriminator of [`SfuEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventKind {
    SubscriberOffer,
    PublisherAnswer,
    IceTrickle,
    IceRestart,
    ChangePublishQuality,
    TrackPublished,
    TrackUnpublished,
    ParticipantJoined,
    ParticipantLeft,
    ConnectionQualityChanged,
    JoinResponse,
    HealthCheckResponse,
    Error,
    GoAway,
    ParticipantMigrationComplete,
}

impl SfuEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SfuEvent::SubscriberOffer(_) => EventKind::SubscriberOffer,
            SfuEvent::PublisherAnswer(_) => EventKind::PublisherAnswer,
            SfuEvent::IceTrickle(_) => EventKind::IceTrickle,
            SfuEvent::IceRestart(_) => EventKind::IceRestart,
            SfuEvent::ChangePublishQuality(_) => EventKind::ChangePublishQuality,
            SfuEvent::TrackPublished(_) => EventKind::TrackPublished,
            SfuEvent::TrackUnpublished(_) => EventKind::TrackUnpublished,
            SfuEvent::ParticipantJoined(_) => EventKind::ParticipantJoined,
            SfuEvent::ParticipantLeft(_) => EventKind::ParticipantLeft,
            SfuEvent::ConnectionQualityChanged(_) => EventKind::ConnectionQualityChanged,
            SfuEvent::JoinResponse(_) => EventKind::JoinResponse,
            SfuEvent::HealthCheckResponse(_) => EventKind::HealthCheckResponse,
            SfuEvent::Error(_) => EventKind::Error,
            SfuEvent::GoAway(_) => EventKind::GoAway,
            SfuEvent::ParticipantMigrationComplete => EventKind::ParticipantMigrationComplete,
        }
    }
}
