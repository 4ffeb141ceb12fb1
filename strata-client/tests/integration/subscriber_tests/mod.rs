pub mod test_remote_tracks;

use std::sync::Arc;

use strata_client::config::SessionConfig;
use strata_client::participants::ParticipantRegistry;
use strata_client::rtc::Subscriber;
use strata_core::model::{SfuEvent, SubscriberOffer};

use crate::integration::{TestSession, joined_session};
use crate::utils::MockPeerFactory;

pub const STEREO_OFFER: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;stereo=1;useinbandfec=1\r\n";

pub struct TestSubscriber {
    pub ts: TestSession,
    pub subscriber: Arc<Subscriber>,
    pub factory: Arc<MockPeerFactory>,
    pub registry: Arc<ParticipantRegistry>,
}

/// A joined session with a subscriber on a mock peer connection.
pub async fn test_subscriber() -> TestSubscriber {
    let ts = joined_session(SessionConfig::default()).await;
    let factory = Arc::new(MockPeerFactory::default());
    let params = ts.peer_params(factory.clone());
    let registry = params.registry.clone();
    let subscriber = Subscriber::new(params)
        .await
        .expect("Failed to create subscriber");
    TestSubscriber {
        ts,
        subscriber: Arc::new(subscriber),
        factory,
        registry,
    }
}

pub fn offer(sdp: &str) -> SfuEvent {
    SfuEvent::SubscriberOffer(SubscriberOffer {
        ice_restart: false,
        sdp: sdp.to_string(),
    })
}
