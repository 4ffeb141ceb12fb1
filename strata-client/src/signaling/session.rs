use crate::config::SessionConfig;
use crate::dispatcher::{EventDispatcher, Subscription};
use crate::error::{ClientError, Result};
use crate::observer::{SessionObserver, forward_lifecycle_events};
use crate::retry::{RetryOptions, retry};
use crate::signaling::channel::{
    CLOSE_NORMAL, CLOSE_UNHEALTHY, InboundFrame, SignalChannel, SignalConnector,
};
use crate::signaling::ice_buffer::IceCandidateBuffer;
use crate::signaling::rpc::{SignalRpc, check_response};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::{Arc, Weak};
use strata_core::codec::{decode_frame, decode_frame_json, encode_frame};
use strata_core::model::{
    EventKind, HealthCheckRequest, IceRestartRequest, IceTrickle, JoinRequest, JoinResponse,
    LeaveCallRequest, MuteState, PeerType, SendAnswerRequest, SessionId, SetPublisherRequest,
    SetPublisherResponse, SfuEvent, SfuRequest, SfuResponse, SignalFrame, TrackInfo,
    TrackSubscriptionDetails, UpdateMuteStatesRequest, UpdateSubscriptionsRequest,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where to reach one SFU and who we are there.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub edge_url: String,
    pub session_id: SessionId,
    pub config: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Open,
    Closed { code: u16, reason: String },
}

struct SessionInner {
    session_id: SessionId,
    edge_url: String,
    config: SessionConfig,
    dispatcher: Arc<EventDispatcher>,
    ice_buffer: Arc<IceCandidateBuffer>,
    channel: RwLock<Option<Arc<dyn SignalChannel>>>,
    rpc: Arc<dyn SignalRpc>,
    closed: CancellationToken,
    joined: watch::Sender<Option<JoinResponse>>,
    status: watch::Sender<ChannelStatus>,
    last_message_at: Mutex<Instant>,
    reader: Mutex<Option<JoinHandle<()>>>,
    lifecycle: Mutex<Vec<Subscription>>,
}

/// The control session with one SFU.
///
/// Owns the control channel, its event dispatcher and the trickled-candidate buffer. Migration
/// replaces the whole session rather than mutating it.
#[derive(Clone)]
pub struct SignalingSession {
    inner: Arc<SessionInner>,
}

impl SignalingSession {
    pub async fn connect(
        params: SessionParams,
        connector: &dyn SignalConnector,
        rpc: Arc<dyn SignalRpc>,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self> {
        let (channel, inbound) = connector.connect(&params.edge_url).await?;
        info!(session_id = %params.session_id, edge = %params.edge_url, "Signaling session connected");
        Ok(Self::with_channel(params, channel, inbound, rpc, observer))
    }

    /// Wraps an already open channel.
    pub fn with_channel(
        params: SessionParams,
        channel: Arc<dyn SignalChannel>,
        inbound: mpsc::UnboundedReceiver<InboundFrame>,
        rpc: Arc<dyn SignalRpc>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new());
        let lifecycle = forward_lifecycle_events(&dispatcher, observer);

        let inner = Arc::new(SessionInner {
            session_id: params.session_id,
            edge_url: params.edge_url,
            config: params.config,
            dispatcher,
            ice_buffer: Arc::new(IceCandidateBuffer::new()),
            channel: RwLock::new(Some(channel)),
            rpc,
            closed: CancellationToken::new(),
            joined: watch::Sender::new(None),
            status: watch::Sender::new(ChannelStatus::Open),
            last_message_at: Mutex::new(Instant::now()),
            reader: Mutex::new(None),
            lifecycle: Mutex::new(lifecycle),
        });

        let reader = tokio::spawn(read_loop(Arc::downgrade(&inner), inbound));
        *inner.reader.lock() = Some(reader);
        Self { inner }
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn edge_url(&self) -> &str {
        &self.inner.edge_url
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.inner.dispatcher
    }

    pub fn ice_buffer(&self) -> &Arc<IceCandidateBuffer> {
        &self.inner.ice_buffer
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub fn join_response(&self) -> Option<JoinResponse> {
        self.inner.joined.borrow().clone()
    }

    /// Sends the join request and waits for the SFU's answer.
    ///
    /// On success the keepalive starts and queued RPCs are released.
    pub async fn join(&self, request: JoinRequest) -> Result<JoinResponse> {
        let inner = &self.inner;
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let subscription = inner
            .dispatcher
            .subscribe(EventKind::JoinResponse, move |event| {
                if let SfuEvent::JoinResponse(response) = event
                    && let Some(tx) = tx.lock().take()
                {
                    let _ = tx.send(response.clone());
                }
                Ok(())
            });

        let result = async {
            inner.send_request(SfuRequest::Join(request)).await?;
            tokio::select! {
                _ = inner.closed.cancelled() => Err(ClientError::SessionClosed),
                response = tokio::time::timeout(inner.config.join_timeout, rx) => match response {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(_)) => Err(ClientError::SessionClosed),
                    Err(_) => Err(ClientError::Timeout(format!(
                        "no join response after {:?}",
                        inner.config.join_timeout
                    ))),
                },
            }
        }
        .await;
        subscription.unsubscribe();

        let response = result?;
        inner.touch();
        inner.joined.send_replace(Some(response.clone()));
        self.start_keepalive();
        info!(
            session_id = %inner.session_id,
            participants = response.participants.len(),
            reconnected = response.reconnected,
            "Joined SFU"
        );
        Ok(response)
    }

    fn start_keepalive(&self) {
        let weak = Arc::downgrade(&self.inner);
        let closed = self.inner.closed.clone();
        let period = self.inner.config.keepalive_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };

                let silence = inner.last_message_at.lock().elapsed();
                if silence > inner.config.unhealthy_timeout {
                    warn!(
                        session_id = %inner.session_id,
                        silence_ms = silence.as_millis() as u64,
                        "SFU stopped responding, closing signal channel"
                    );
                    SignalingSession { inner }
                        .close(CLOSE_UNHEALTHY, "SFU health check timed out")
                        .await;
                    break;
                }

                let request = SfuRequest::HealthCheck(HealthCheckRequest {
                    session_id: inner.session_id,
                });
                if let Err(e) = inner.send_request(request).await {
                    warn!("Failed to send health check: {e}");
                }
            }
        });
    }

    async fn call<R, F, Fut>(&self, method: &'static str, f: F) -> Result<R>
    where
        R: SfuResponse,
        F: Fn(Arc<dyn SignalRpc>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let inner = &self.inner;
        let work = async {
            inner.wait_joined().await?;
            let closed = inner.closed.clone();
            let options = RetryOptions::new(inner.config.rpc_max_retries)
                .with_is_retryable(|e: &ClientError| e.is_retryable())
                .with_did_value_change(move || closed.is_cancelled());
            retry(
                || {
                    let response = f(inner.rpc.clone());
                    async move { check_response(response.await?) }
                },
                options,
            )
            .await
            .map_err(ClientError::from)
        };

        let result = tokio::select! {
            _ = inner.closed.cancelled() => Err(ClientError::SessionClosed),
            result = work => result,
        };
        if let Err(e) = &result {
            debug!(method, "RPC failed: {e}");
            if inner.closed.is_cancelled() {
                return Err(ClientError::SessionClosed);
            }
        }
        result
    }

    pub async fn set_publisher_description(
        &self,
        sdp: String,
        tracks: Vec<TrackInfo>,
    ) -> Result<SetPublisherResponse> {
        let request = SetPublisherRequest {
            session_id: self.session_id(),
            sdp,
            tracks,
        };
        self.call("SetPublisher", move |rpc| {
            let request = request.clone();
            async move { rpc.set_publisher(request).await }
        })
        .await
    }

    pub async fn send_subscriber_answer(&self, sdp: String) -> Result<()> {
        let request = SendAnswerRequest {
            session_id: self.session_id(),
            peer_type: PeerType::Subscriber,
            sdp,
        };
        self.call("SendAnswer", move |rpc| {
            let request = request.clone();
            async move { rpc.send_answer(request).await }
        })
        .await
        .map(|_| ())
    }

    pub async fn send_ice_candidate(&self, peer_type: PeerType, candidate: String) -> Result<()> {
        let request = IceTrickle {
            peer_type,
            ice_candidate: candidate,
            session_id: self.session_id(),
        };
        self.call("IceTrickle", move |rpc| {
            let request = request.clone();
            async move { rpc.ice_trickle(request).await }
        })
        .await
        .map(|_| ())
    }

    pub async fn update_mute_states(&self, mute_states: Vec<MuteState>) -> Result<()> {
        let request = UpdateMuteStatesRequest {
            session_id: self.session_id(),
            mute_states,
        };
        self.call("UpdateMuteStates", move |rpc| {
            let request = request.clone();
            async move { rpc.update_mute_states(request).await }
        })
        .await
        .map(|_| ())
    }

    pub async fn update_subscriptions(&self, tracks: Vec<TrackSubscriptionDetails>) -> Result<()> {
        let request = UpdateSubscriptionsRequest {
            session_id: self.session_id(),
            tracks,
        };
        self.call("UpdateSubscriptions", move |rpc| {
            let request = request.clone();
            async move { rpc.update_subscriptions(request).await }
        })
        .await
        .map(|_| ())
    }

    /// Asks the SFU to send a fresh ICE-restart offer for `peer_type`.
    pub async fn ice_restart(&self, peer_type: PeerType) -> Result<()> {
        let request = IceRestartRequest {
            session_id: self.session_id(),
            peer_type,
        };
        self.call("IceRestart", move |rpc| {
            let request = request.clone();
            async move { rpc.ice_restart(request).await }
        })
        .await
        .map(|_| ())
    }

    /// Resolves once the SFU confirms a migration completed.
    pub async fn wait_for_migration_complete(&self) -> Result<()> {
        let inner = &self.inner;
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let subscription = inner.dispatcher.subscribe(
            EventKind::ParticipantMigrationComplete,
            move |_| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
                Ok(())
            },
        );

        let result = tokio::select! {
            _ = inner.closed.cancelled() => Err(ClientError::SessionClosed),
            done = tokio::time::timeout(inner.config.migration_timeout, rx) => match done {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(ClientError::SessionClosed),
                Err(_) => Err(ClientError::Timeout("migration did not complete".to_string())),
            },
        };
        subscription.unsubscribe();
        result
    }

    /// Announces departure, then closes normally.
    pub async fn leave_and_close(&self, reason: &str) {
        if !self.is_closed() {
            let request = SfuRequest::LeaveCall(LeaveCallRequest {
                session_id: self.session_id(),
                reason: reason.to_string(),
            });
            if let Err(e) = self.inner.send_request(request).await {
                debug!("Failed to send leave request: {e}");
            }
        }
        self.close(CLOSE_NORMAL, reason).await;
    }

    /// Tears the session down. Outstanding and future RPCs fail with `SessionClosed`.
    pub async fn close(&self, code: u16, reason: &str) {
        let inner = &self.inner;
        if inner.closed.is_cancelled() {
            return;
        }
        inner.closed.cancel();
        debug!(session_id = %inner.session_id, code, reason, "Closing signaling session");

        for subscription in inner.lifecycle.lock().drain(..) {
            subscription.unsubscribe();
        }
        inner.dispatcher.unsubscribe_all(None);
        inner.ice_buffer.close();

        let channel = inner.channel.write().take();
        if let Some(channel) = channel
            && let Err(e) = channel.close(code, reason).await
        {
            warn!("Failed to close signal channel: {e}");
        }
        inner.status.send_replace(ChannelStatus::Closed {
            code,
            reason: reason.to_string(),
        });

        if let Some(reader) = inner.reader.lock().take() {
            reader.abort();
        }
    }
}

impl SessionInner {
    fn touch(&self) {
        *self.last_message_at.lock() = Instant::now();
    }

    fn route(&self, event: SfuEvent) {
        self.touch();
        if let SfuEvent::IceTrickle(candidate) = &event {
            self.ice_buffer.push(candidate.clone());
        }
        self.dispatcher.dispatch(&event);
    }

    async fn send_request(&self, request: SfuRequest) -> Result<()> {
        let channel = self
            .channel
            .read()
            .clone()
            .ok_or(ClientError::SessionClosed)?;
        let frame = encode_frame(&SignalFrame::Request(request))?;
        channel.send(Bytes::from(frame)).await
    }

    async fn wait_joined(&self) -> Result<()> {
        let mut joined = self.joined.subscribe();
        joined
            .wait_for(|response| response.is_some())
            .await
            .map(|_| ())
            .map_err(|_| ClientError::SessionClosed)
    }
}

async fn read_loop(inner: Weak<SessionInner>, mut inbound: mpsc::UnboundedReceiver<InboundFrame>) {
    while let Some(frame) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let decoded = match frame {
            InboundFrame::Binary(data) => decode_frame(&data),
            InboundFrame::Text(text) => decode_frame_json(&text),
            InboundFrame::Closed { code, reason } => {
                info!(code, %reason, "Signal channel closed");
                inner.status.send_replace(ChannelStatus::Closed { code, reason });
                return;
            }
        };
        match decoded {
            Ok(SignalFrame::Event(event)) => inner.route(event),
            Ok(SignalFrame::Request(request)) => {
                warn!(?request, "Ignoring request frame received from the SFU")
            }
            Err(e) => warn!("Dropping undecodable signal frame: {e}"),
        }
    }
}

