use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ErrorCode {
    Unspecified,
    PublishTrackNotFound,
    PublishTracksMismatch,
    PublishTrackOutOfOrder,
    PublishTrackVideoLayerNotFound,
    LiveEnded,
    ParticipantNotFound,
    ParticipantMigratingOut,
    ParticipantMigrationFailed,
    ParticipantMigrating,
    ParticipantReconnectFailed,
    ParticipantMediaTransportFailure,
    ParticipantSignalLost,
    CallNotFound,
    RequestValidationFailed,
    Unauthenticated,
    PermissionDenied,
    TooManyRequests,
    InternalServerError,
    SfuShuttingDown,
    SfuFull,
}

/// Application error object embedded in an otherwise successful response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SfuError {
    pub code: ErrorCode,
    pub message: String,
    pub should_retry: bool,
}

impl SfuError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            should_retry: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.should_retry = true;
        self
    }
}

impl fmt::Display for SfuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// How the orchestration layer should recover a broken session.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub enum WebsocketReconnectStrategy {
    #[default]
    Unspecified,
    Disconnect,
    Fast,
    Rejoin,
    Migrate,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq)]
pub enum GoAwayReason {
    Unspecified,
    ShuttingDown,
    Rebalance,
}
