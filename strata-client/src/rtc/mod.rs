pub(crate) mod base;
pub mod native;
pub mod peer;
pub mod publisher;
pub mod subscriber;
pub mod track;

pub use base::PeerParams;
pub use native::{NativePeerConnection, NativeRemoteTrack, WebRtcPeerFactory};
pub use peer::{
    CodecCapability, EncodingParameters, IceConnectionState, PeerConnection,
    PeerConnectionFactory, PeerConnectionState, PeerEvent, RemoteTrack, SdpType,
    SessionDescription, SignalingState, Transceiver, TransceiverDirection, TransceiverInit,
    codec_preferences,
};
pub use publisher::Publisher;
pub use subscriber::Subscriber;
pub use track::{LocalTrack, MediaTrack, TrackSettings, TrackState};
