use crate::model::{SessionId, TrackType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ParticipantInfo {
    pub user_id: String,
    pub session_id: SessionId,
    pub name: String,
    /// Prefix of the remote stream ids carrying this participant's media.
    pub track_lookup_prefix: String,
    pub published_tracks: Vec<TrackType>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ConnectionQuality {
    Unspecified,
    Poor,
    Good,
    Excellent,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectionQualityInfo {
    pub user_id: String,
    pub session_id: SessionId,
    pub connection_quality: ConnectionQuality,
}
