use strata_client::config::SessionConfig;
use strata_client::error::ClientError;
use strata_core::model::{ErrorCode, SfuError};

use crate::integration::{init_tracing, joined_session};
use crate::utils::MockFailure;

#[tokio::test(start_paused = true)]
async fn test_retryable_failures_are_retried() {
    init_tracing();

    let ts = joined_session(SessionConfig::default()).await;
    ts.rpc.fail_next("SendAnswer", MockFailure::Transport);
    ts.rpc.fail_next(
        "SendAnswer",
        MockFailure::Sfu(SfuError::new(ErrorCode::InternalServerError, "busy").retryable()),
    );

    ts.session
        .send_subscriber_answer("v=0\r\n".to_string())
        .await
        .expect("answer should succeed on the third attempt");
    assert_eq!(ts.rpc.count("SendAnswer"), 3);
}

#[tokio::test]
async fn test_non_retryable_error_surfaces_code() {
    init_tracing();

    let ts = joined_session(SessionConfig::default()).await;
    ts.rpc.fail_next(
        "IceTrickle",
        MockFailure::Sfu(SfuError::new(ErrorCode::ParticipantSignalLost, "gone")),
    );

    let err = ts
        .session
        .send_ice_candidate(strata_core::PeerType::Subscriber, "{}".to_string())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Sfu(_)));
    assert_eq!(err.sfu_code(), Some(ErrorCode::ParticipantSignalLost));
    assert_eq!(ts.rpc.count("IceTrickle"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_limit() {
    init_tracing();

    let config = SessionConfig {
        rpc_max_retries: 2,
        ..SessionConfig::default()
    };
    let ts = joined_session(config).await;
    for _ in 0..3 {
        ts.rpc.fail_next("UpdateSubscriptions", MockFailure::Transport);
    }

    let err = ts.session.update_subscriptions(Vec::new()).await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::RetryLimitReached { attempts: 3, .. }
    ));
    assert_eq!(ts.rpc.count("UpdateSubscriptions"), 3);
}
