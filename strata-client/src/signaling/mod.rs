pub mod channel;
pub mod ice_buffer;
pub mod rpc;
pub mod session;

pub use channel::{
    CLOSE_NORMAL, CLOSE_UNHEALTHY, InboundFrame, SignalChannel, SignalConnector, WsConnector,
};
pub use ice_buffer::IceCandidateBuffer;
pub use rpc::{HttpSignalRpc, SignalRpc, check_response};
pub use session::{ChannelStatus, SessionParams, SignalingSession};
