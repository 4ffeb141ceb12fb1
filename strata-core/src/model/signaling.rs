use crate::model::{PeerType, SessionId, SfuEvent, TrackSubscriptionDetails};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// A trickled ICE candidate; `ice_candidate` is the JSON form of `RTCIceCandidateInit`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceTrickle {
    pub peer_type: PeerType,
    pub ice_candidate: String,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientDetails {
    pub sdk: String,
    pub version: String,
    pub os: String,
}

impl Default for ClientDetails {
    fn default() -> Self {
        Self {
            sdk: "strata".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinRequest {
    pub token: String,
    pub session_id: SessionId,
    pub subscriber_sdp: String,
    pub fast_reconnect: bool,
    pub client_details: ClientDetails,
    pub subscriptions: Vec<TrackSubscriptionDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaveCallRequest {
    pub session_id: SessionId,
    pub reason: String,
}

/// Requests carried on the control channel itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SfuRequest {
    Join(JoinRequest),
    HealthCheck(HealthCheckRequest),
    LeaveCall(LeaveCallRequest),
}

/// One message on the control channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SignalFrame {
    Request(SfuRequest),
    Event(SfuEvent),
}
