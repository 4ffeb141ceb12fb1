use crate::model::{MuteState, PeerType, SessionId, SfuError, TrackInfo, TrackSubscriptionDetails};
use serde::{Deserialize, Serialize};

/// Responses that may carry an embedded application error.
pub trait SfuResponse {
    fn error(&self) -> Option<&SfuError>;

    fn into_error(self) -> Option<SfuError>;
}

macro_rules! sfu_response {
    ($($ty:ident),* $(,)?) => {
        $(
            impl SfuResponse for $ty {
                fn error(&self) -> Option<&SfuError> {
                    self.error.as_ref()
                }

                fn into_error(self) -> Option<SfuError> {
                    self.error
                }
            }
        )*
    };
}

sfu_response!(
    SetPublisherResponse,
    SendAnswerResponse,
    IceTrickleResponse,
    UpdateMuteStatesResponse,
    UpdateSubscriptionsResponse,
    IceRestartResponse,
);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetPublisherRequest {
    pub session_id: SessionId,
    pub sdp: String,
    pub tracks: Vec<TrackInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SetPublisherResponse {
    pub sdp: String,
    pub session_id: Option<SessionId>,
    pub ice_restart: bool,
    pub error: Option<SfuError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendAnswerRequest {
    pub session_id: SessionId,
    pub peer_type: PeerType,
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SendAnswerResponse {
    pub error: Option<SfuError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IceTrickleResponse {
    pub error: Option<SfuError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateMuteStatesRequest {
    pub session_id: SessionId,
    pub mute_states: Vec<MuteState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UpdateMuteStatesResponse {
    pub error: Option<SfuError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateSubscriptionsRequest {
    pub session_id: SessionId,
    pub tracks: Vec<TrackSubscriptionDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UpdateSubscriptionsResponse {
    pub error: Option<SfuError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceRestartRequest {
    pub session_id: SessionId,
    pub peer_type: PeerType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IceRestartResponse {
    pub error: Option<SfuError>,
}
