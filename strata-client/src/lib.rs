pub mod concurrency;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod layers;
pub mod observer;
pub mod participants;
pub mod reconnect;
pub mod retry;
pub mod rtc;
pub mod sdp;
pub mod signaling;

pub use concurrency::{TagLock, TransitionGuard};
pub use config::{PeerConfig, ReconnectConfig, RtcConfig, SessionConfig, SimulcastThresholds};
pub use dispatcher::{EventDispatcher, Subscription};
pub use error::{ClientError, Result};
pub use observer::{NoopObserver, SessionObserver};
pub use participants::ParticipantRegistry;
pub use reconnect::{
    ConnectionState, CoordinatorConnector, ReconnectingTransport, StaticToken, TokenProvider,
};
pub use retry::{RetryError, RetryOptions, retry, retry_interval};
pub use rtc::{LocalTrack, MediaTrack, PeerParams, Publisher, Subscriber, WebRtcPeerFactory};
pub use signaling::{SessionParams, SignalingSession};
