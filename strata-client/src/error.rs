use strata_core::CodecError;
use strata_core::model::{ErrorCode, SfuError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("sfu error: {0}")]
    Sfu(SfuError),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("session closed")]
    SessionClosed,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("retry handler aborted due to value change")]
    RetryAborted,

    #[error("reached maximum amount of retries ({attempts} attempts): {source}")]
    RetryLimitReached {
        attempts: u32,
        #[source]
        source: Box<ClientError>,
    },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Whether an automatic retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_)
            | ClientError::WebSocket(_)
            | ClientError::Http(_)
            | ClientError::Timeout(_) => true,
            ClientError::Sfu(err) => err.should_retry,
            _ => false,
        }
    }

    pub fn sfu_code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Sfu(err) => Some(err.code),
            ClientError::RetryLimitReached { source, .. } => source.sfu_code(),
            _ => None,
        }
    }

    pub fn is_token_expired(&self) -> bool {
        matches!(self, ClientError::Authentication(_))
    }
}
