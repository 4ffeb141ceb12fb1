use crate::dispatcher::{EventDispatcher, Subscription};
use crate::layers::OptimalLayer;
use crate::rtc::MediaTrack;
use async_trait::async_trait;
use std::sync::Arc;
use strata_core::model::{
    ErrorEvent, EventKind, GoAwayReason, SessionId, SfuEvent, TrackType,
    WebsocketReconnectStrategy,
};
use tracing::{info, warn};

/// Notifications surfaced to the embedding call layer.
///
/// Every method defaults to a no-op.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    /// A remote participant's media became available.
    async fn on_track_attached(
        &self,
        _session_id: SessionId,
        _track_type: TrackType,
        _track: Arc<dyn MediaTrack>,
    ) {
    }

    async fn on_track_detached(
        &self,
        _session_id: SessionId,
        _track_type: TrackType,
        _track: Arc<dyn MediaTrack>,
    ) {
    }

    /// The encoding plan of a local track changed.
    async fn on_layers_updated(&self, _track_type: TrackType, _layers: &[OptimalLayer]) {}

    async fn on_mute_state_changed(&self, _track_type: TrackType, _muted: bool) {}

    /// Local recovery gave up; the call layer should reconnect with `strategy`.
    async fn on_reconnect_needed(&self, _strategy: WebsocketReconnectStrategy, _reason: &str) {}

    async fn on_go_away(&self, _reason: GoAwayReason) {}

    async fn on_sfu_error(&self, _error: &ErrorEvent) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Surfaces go-away and SFU error events from `dispatcher` to `observer`.
pub(crate) fn forward_lifecycle_events(
    dispatcher: &EventDispatcher,
    observer: Arc<dyn SessionObserver>,
) -> Vec<Subscription> {
    let go_away = {
        let observer = observer.clone();
        dispatcher.subscribe(EventKind::GoAway, move |event| {
            if let SfuEvent::GoAway(go_away) = event {
                info!(reason = ?go_away.reason, "SFU requested migration");
                let observer = observer.clone();
                let reason = go_away.reason;
                tokio::spawn(async move { observer.on_go_away(reason).await });
            }
            Ok(())
        })
    };

    let error = dispatcher.subscribe(EventKind::Error, move |event| {
        if let SfuEvent::Error(error) = event {
            warn!(
                code = ?error.error.code,
                strategy = ?error.reconnect_strategy,
                "SFU reported an error: {}",
                error.error.message
            );
            let observer = observer.clone();
            let error = error.clone();
            tokio::spawn(async move {
                observer.on_sfu_error(&error).await;
                if error.reconnect_strategy != WebsocketReconnectStrategy::Unspecified {
                    observer
                        .on_reconnect_needed(error.reconnect_strategy, &error.error.message)
                        .await;
                }
            });
        }
        Ok(())
    });

    vec![go_away, error]
}
