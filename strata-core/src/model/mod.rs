mod error;
mod event;
mod participant;
mod rpc;
mod session;
mod signaling;
mod track;

pub use error::{ErrorCode, GoAwayReason, SfuError, WebsocketReconnectStrategy};
pub use event::{
    ChangePublishQuality, ConnectionQualityChanged, ErrorEvent, EventKind, GoAway,
    HealthCheckResponse, IceRestart, JoinResponse, ParticipantJoined, ParticipantLeft,
    PublisherAnswer, SfuEvent, SubscriberOffer, TrackPublished, TrackUnpublished, VideoLayerSetting,
    VideoSender,
};
pub use participant::{ConnectionQuality, ConnectionQualityInfo, ParticipantInfo};
pub use rpc::{
    IceRestartRequest, IceRestartResponse, IceTrickleResponse, SendAnswerRequest,
    SendAnswerResponse, SetPublisherRequest, SetPublisherResponse, SfuResponse,
    UpdateMuteStatesRequest, UpdateMuteStatesResponse, UpdateSubscriptionsRequest,
    UpdateSubscriptionsResponse,
};
pub use session::SessionId;
pub use signaling::{
    ClientDetails, HealthCheckRequest, IceServerConfig, IceTrickle, JoinRequest, LeaveCallRequest,
    SfuRequest, SignalFrame,
};
pub use track::{
    AudioBitrate, AudioBitrateProfile, Codec, MuteState, PeerType, PublishOption, TrackInfo,
    TrackKind, TrackSubscriptionDetails, TrackType, VideoDimension, VideoLayer, VideoQuality,
};
