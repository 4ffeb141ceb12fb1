//! Wire codec for the control channel.
//!
//! Every binary message holds one postcard-encoded [`SignalFrame`]. Text messages carry the
//! same schema as JSON and are accepted on the decode path.

use crate::model::SignalFrame;
use postcard::{from_bytes, to_allocvec};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("binary frame: {0}")]
    Binary(#[from] postcard::Error),
    #[error("json frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty frame")]
    Empty,
}

pub fn encode_frame(frame: &SignalFrame) -> Result<Vec<u8>, CodecError> {
    Ok(to_allocvec(frame)?)
}

pub fn decode_frame(bytes: &[u8]) -> Result<SignalFrame, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(from_bytes(bytes)?)
}

pub fn encode_frame_json(frame: &SignalFrame) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode_frame_json(text: &str) -> Result<SignalFrame, CodecError> {
    if text.trim().is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(serde_json::from_str(text)?)
}
