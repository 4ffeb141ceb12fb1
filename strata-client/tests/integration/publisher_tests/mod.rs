pub mod test_publish_migration;
pub mod test_publish_quality;
pub mod test_publish_recovery;
pub mod test_publish_rejections;

use std::sync::Arc;

use strata_client::config::SessionConfig;
use strata_client::rtc::Publisher;

use crate::integration::{TestSession, default_publish_options, joined_session};
use crate::utils::{MockPeerConnection, MockPeerFactory};

/// A joined session with a publisher on a mock peer connection.
pub async fn test_publisher() -> (TestSession, Publisher, Arc<MockPeerConnection>) {
    let ts = joined_session(SessionConfig::default()).await;
    let factory = Arc::new(MockPeerFactory::default());
    let publisher = Publisher::new(ts.peer_params(factory.clone()), default_publish_options())
        .await
        .expect("Failed to create publisher");
    let pc = factory.connection(0);
    (ts, publisher, pc)
}
