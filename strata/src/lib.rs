pub use strata_core::model::{PeerType, SessionId, TrackType};

pub mod model {
    pub use strata_core::model::*;
}

pub mod codec {
    pub use strata_core::codec::*;
}

#[cfg(feature = "client")]
pub mod client {
    pub use strata_client::*;
}
