//! Self-healing connection to the coordinator.

use crate::config::ReconnectConfig;
use crate::error::{ClientError, Result};
use crate::retry::retry_interval;
use crate::signaling::{CLOSE_NORMAL, InboundFrame, SignalChannel, SignalConnector};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Coordinator error code for an expired token.
pub const TOKEN_EXPIRED_CODE: i64 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Healthy,
    Unhealthy,
    Disconnected,
}

/// Supplies and refreshes the auth token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn load_token(&self) -> Result<String>;

    /// A static provider returns the same token forever, so reloading it is pointless.
    fn is_static(&self) -> bool {
        false
    }
}

/// A fixed token that cannot be refreshed.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn load_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }

    fn is_static(&self) -> bool {
        true
    }
}

/// Opens authenticated connections.
///
/// `open` resolves only once the server has accepted the connection. Token rejection is
/// reported as [`ClientError::Authentication`].
#[async_trait]
pub trait Connect: Send + Sync {
    async fn open(
        &self,
        token: &str,
    ) -> Result<(Arc<dyn SignalChannel>, mpsc::UnboundedReceiver<InboundFrame>)>;

    /// Frame sent every ping interval.
    fn ping(&self) -> Bytes;
}

struct TransportInner {
    connector: Arc<dyn Connect>,
    tokens: Arc<dyn TokenProvider>,
    config: ReconnectConfig,
    frames: mpsc::UnboundedSender<InboundFrame>,
    state: watch::Sender<ConnectionState>,
    token: Mutex<Option<String>>,
    channel: RwLock<Option<Arc<dyn SignalChannel>>>,
    /// Bumped whenever a connection is replaced; frames and timers of older ones are ignored.
    generation: AtomicU64,
    consecutive_failures: AtomicU32,
    healthy: AtomicBool,
    connecting: AtomicBool,
    disconnected: AtomicBool,
    last_event: Mutex<Instant>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A connection that reconnects itself with randomized backoff.
///
/// Frames from every successive connection are delivered on the receiver returned by
/// [`ReconnectingTransport::new`], in arrival order.
pub struct ReconnectingTransport {
    inner: Arc<TransportInner>,
}

impl ReconnectingTransport {
    pub fn new(
        connector: Arc<dyn Connect>,
        tokens: Arc<dyn TokenProvider>,
        config: ReconnectConfig,
    ) -> (Self, mpsc::UnboundedReceiver<InboundFrame>) {
        let (frames, frames_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(TransportInner {
            connector,
            tokens,
            config,
            frames,
            state: watch::Sender::new(ConnectionState::Disconnected),
            token: Mutex::new(None),
            channel: RwLock::new(None),
            generation: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            healthy: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            disconnected: AtomicBool::new(true),
            last_event: Mutex::new(Instant::now()),
            tasks: Mutex::new(Vec::new()),
        });
        (Self { inner }, frames_rx)
    }

    /// Connects and waits up to `initial_connect_timeout` for a healthy connection.
    ///
    /// Transient failures keep retrying in the background while this waits.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.connecting.load(Ordering::SeqCst) {
            return Err(ClientError::InvalidState(
                "a connection attempt is already in progress".to_string(),
            ));
        }
        inner.disconnected.store(false, Ordering::SeqCst);
        inner.state.send_replace(ConnectionState::Connecting);

        match inner.open(false).await {
            Ok(()) => {
                inner.consecutive_failures.store(0, Ordering::SeqCst);
                info!("Coordinator connection established");
            }
            Err(e) => {
                inner.healthy.store(false, Ordering::SeqCst);
                let failures = inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if e.is_token_expired() && !inner.tokens.is_static() {
                    warn!(failures, "Connection rejected the token, refreshing it");
                    inner.schedule_reconnect(Some(Duration::ZERO), true);
                } else if e.is_retryable() {
                    warn!(failures, "Connection failed, will retry: {e}");
                    inner.schedule_reconnect(None, false);
                } else {
                    return Err(e);
                }
            }
        }

        self.wait_for_healthy(inner.config.initial_connect_timeout)
            .await
    }

    /// Waits until the connection is healthy, failing after `timeout`.
    pub async fn wait_for_healthy(&self, timeout: Duration) -> Result<()> {
        let mut state = self.inner.state.subscribe();
        let reached = tokio::time::timeout(
            timeout,
            state.wait_for(|s| matches!(s, ConnectionState::Healthy | ConnectionState::Disconnected)),
        )
        .await;
        match reached {
            Ok(Ok(s)) if *s == ConnectionState::Healthy => Ok(()),
            Ok(_) => Err(ClientError::SessionClosed),
            Err(_) => Err(ClientError::Timeout(
                "initial connection could not be established".to_string(),
            )),
        }
    }

    /// Closes the connection for good. Pending reconnects and timers are dropped.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        info!(generation = inner.generation(), "Closing the coordinator connection");
        inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.connecting.store(false, Ordering::SeqCst);
        inner.disconnected.store(true, Ordering::SeqCst);
        inner.stop_tasks();
        inner.healthy.store(false, Ordering::SeqCst);
        inner.state.send_replace(ConnectionState::Disconnected);

        let channel = inner.channel.write().take();
        if let Some(channel) = channel
            && let Err(e) = channel
                .close(CLOSE_NORMAL, "Manually closed connection by calling disconnect()")
                .await
        {
            debug!("Close on an already broken connection: {e}");
        }
    }

    /// Reports a change in network reachability.
    ///
    /// Going offline publishes the unhealthy state at once; coming back online reconnects
    /// almost immediately if the connection is not healthy.
    pub fn set_online(&self, online: bool) {
        if online {
            let healthy = self.inner.healthy.load(Ordering::SeqCst);
            debug!(healthy, "Network back online");
            if !healthy {
                self.inner
                    .schedule_reconnect(Some(self.inner.config.online_retry_interval), false);
            }
        } else {
            debug!("Network went offline");
            self.inner.set_health(false, true);
        }
    }

    pub async fn send(&self, frame: Bytes) -> Result<()> {
        let channel = self.inner.channel.read().clone();
        match channel {
            Some(channel) => channel.send(frame).await,
            None => Err(ClientError::Transport("not connected".to_string())),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.healthy.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation()
    }
}

impl Drop for ReconnectingTransport {
    fn drop(&mut self) {
        self.inner.disconnected.store(true, Ordering::SeqCst);
        self.inner.stop_tasks();
    }
}

impl TransportInner {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation && !self.disconnected.load(Ordering::SeqCst)
    }

    fn stop_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    async fn token(&self, refresh: bool) -> Result<String> {
        let cached = self.token.lock().clone();
        if let Some(token) = cached
            && !refresh
        {
            return Ok(token);
        }
        let token = self.tokens.load_token().await?;
        *self.token.lock() = Some(token.clone());
        Ok(token)
    }

    /// Opens a new connection and makes it the current generation.
    async fn open(self: &Arc<Self>, refresh_token: bool) -> Result<()> {
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("Ignoring open, already connecting");
            return Ok(());
        }
        let opened = self.open_current(refresh_token).await;
        self.connecting.store(false, Ordering::SeqCst);
        opened
    }

    async fn open_current(self: &Arc<Self>, refresh_token: bool) -> Result<()> {
        let token = self.token(refresh_token).await?;
        let (channel, inbound) = self.connector.open(&token).await?;
        if self.disconnected.load(Ordering::SeqCst) {
            let _ = channel.close(CLOSE_NORMAL, "disconnected while connecting").await;
            return Err(ClientError::SessionClosed);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "Connection opened");
        *self.channel.write() = Some(channel);
        *self.last_event.lock() = Instant::now();

        self.stop_tasks();
        let weak = Arc::downgrade(self);
        let tasks = vec![
            tokio::spawn(read_loop(weak.clone(), generation, inbound)),
            tokio::spawn(ping_loop(weak.clone(), generation)),
            tokio::spawn(connection_check(weak, generation)),
        ];
        self.tasks.lock().extend(tasks);

        self.set_health(true, false);
        Ok(())
    }

    /// Publishes health changes. An unhealthy transition is held back by the grace period
    /// unless `immediately` is set, and dropped if health recovers meanwhile.
    fn set_health(self: &Arc<Self>, healthy: bool, immediately: bool) {
        if self.healthy.swap(healthy, Ordering::SeqCst) == healthy {
            return;
        }
        if healthy || immediately {
            let state = if healthy {
                ConnectionState::Healthy
            } else {
                ConnectionState::Unhealthy
            };
            self.state.send_replace(state);
            return;
        }

        let grace = self.config.unhealthy_grace;
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.healthy.load(Ordering::SeqCst) && !inner.disconnected.load(Ordering::SeqCst)
            {
                inner.state.send_replace(ConnectionState::Unhealthy);
            }
        });
    }

    fn schedule_reconnect(self: &Arc<Self>, interval: Option<Duration>, refresh_token: bool) {
        let weak = Arc::downgrade(self);
        tokio::spawn(reconnect(weak, interval, refresh_token));
    }

    fn on_failure(self: &Arc<Self>, generation: u64, reason: &str) {
        if !self.is_current(generation) {
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(generation, failures, "Connection lost: {reason}");
        self.set_health(false, false);
        self.schedule_reconnect(None, false);
    }
}

async fn reconnect(weak: Weak<TransportInner>, mut interval: Option<Duration>, mut refresh_token: bool) {
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.connecting.load(Ordering::SeqCst) || inner.healthy.load(Ordering::SeqCst) {
            debug!("Reconnect skipped, already connecting or healthy");
            return;
        }

        let delay = interval
            .take()
            .unwrap_or_else(|| retry_interval(inner.consecutive_failures.load(Ordering::SeqCst)));
        drop(inner);
        tokio::time::sleep(delay).await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.connecting.load(Ordering::SeqCst) || inner.healthy.load(Ordering::SeqCst) {
            return;
        }
        if inner.disconnected.load(Ordering::SeqCst) {
            debug!("Reconnect abandoned, transport was disconnected");
            return;
        }

        inner.generation.fetch_add(1, Ordering::SeqCst);
        let stale = inner.channel.write().take();
        if let Some(stale) = stale {
            let _ = stale.close(CLOSE_NORMAL, "replaced by reconnect").await;
        }

        info!(delay_ms = delay.as_millis() as u64, refresh_token, "Reconnecting");
        match inner.open(refresh_token).await {
            Ok(()) => {
                inner.consecutive_failures.store(0, Ordering::SeqCst);
                info!(generation = inner.generation(), "Reconnected");
                return;
            }
            Err(e) => {
                inner.set_health(false, false);
                let failures = inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                refresh_token = e.is_token_expired();
                if refresh_token && inner.tokens.is_static() {
                    error!(failures, "Token expired and cannot be refreshed, giving up");
                    inner.disconnected.store(true, Ordering::SeqCst);
                    inner.state.send_replace(ConnectionState::Disconnected);
                    return;
                }
                if refresh_token {
                    warn!(failures, "Token expired during reconnect, reloading it");
                    interval = Some(Duration::ZERO);
                } else {
                    warn!(failures, "Reconnect failed: {e}");
                }
            }
        }
    }
}

async fn read_loop(
    weak: Weak<TransportInner>,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<InboundFrame>,
) {
    while let Some(frame) = inbound.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.is_current(generation) {
            return;
        }
        *inner.last_event.lock() = Instant::now();

        if let InboundFrame::Closed { code, reason } = &frame {
            if *code == CLOSE_NORMAL {
                info!(generation, %reason, "Connection closed normally");
                inner.healthy.store(false, Ordering::SeqCst);
                inner.disconnected.store(true, Ordering::SeqCst);
                inner.state.send_replace(ConnectionState::Disconnected);
            } else {
                inner.on_failure(generation, &format!("closed with code {code}: {reason}"));
            }
            let _ = inner.frames.send(frame);
            return;
        }
        if inner.frames.send(frame).is_err() {
            return;
        }
    }
    if let Some(inner) = weak.upgrade() {
        inner.on_failure(generation, "inbound stream ended");
    }
}

async fn ping_loop(weak: Weak<TransportInner>, generation: u64) {
    let Some(period) = weak.upgrade().map(|inner| inner.config.ping_interval) else {
        return;
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.is_current(generation) {
            return;
        }
        let channel = inner.channel.read().clone();
        if let Some(channel) = channel
            && let Err(e) = channel.send(inner.connector.ping()).await
        {
            debug!(generation, "Ping failed: {e}");
        }
    }
}

/// Fails the connection once nothing has been received for `connection_check_timeout`.
async fn connection_check(weak: Weak<TransportInner>, generation: u64) {
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let timeout = inner.config.connection_check_timeout;
        let deadline = *inner.last_event.lock() + timeout;
        drop(inner);
        tokio::time::sleep_until(deadline).await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.is_current(generation) {
            return;
        }
        if inner.last_event.lock().elapsed() >= timeout {
            warn!(generation, "No traffic within the connection check timeout");
            inner.on_failure(generation, "connection check timed out");
            return;
        }
    }
}

/// JSON WebSocket coordinator endpoint.
///
/// Sends the token as the first message and treats the first reply as the verdict:
/// `connection.ok` accepts, `connection.error` rejects.
pub struct CoordinatorConnector {
    url: String,
    client_id: String,
    connector: Arc<dyn SignalConnector>,
    handshake_timeout: Duration,
}

impl CoordinatorConnector {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>, connector: Arc<dyn SignalConnector>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            connector,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

fn handshake_verdict(frame: &InboundFrame) -> Result<()> {
    let text = match frame {
        InboundFrame::Text(text) => text.as_str(),
        InboundFrame::Binary(data) => std::str::from_utf8(data)
            .map_err(|_| ClientError::Transport("non-utf8 handshake reply".to_string()))?,
        InboundFrame::Closed { code, reason } => {
            return Err(ClientError::Transport(format!(
                "closed during handshake with code {code}: {reason}"
            )));
        }
    };
    let reply: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ClientError::Transport(format!("malformed handshake reply: {e}")))?;
    match reply.get("type").and_then(|t| t.as_str()) {
        Some("connection.ok") => Ok(()),
        Some("connection.error") => {
            let code = reply
                .pointer("/error/code")
                .and_then(|c| c.as_i64())
                .unwrap_or_default();
            let message = reply
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("connection rejected")
                .to_string();
            if code == TOKEN_EXPIRED_CODE {
                Err(ClientError::Authentication(message))
            } else {
                Err(ClientError::ResourceUnavailable(message))
            }
        }
        other => Err(ClientError::Transport(format!(
            "unexpected handshake reply type {other:?}"
        ))),
    }
}

#[async_trait]
impl Connect for CoordinatorConnector {
    async fn open(
        &self,
        token: &str,
    ) -> Result<(Arc<dyn SignalChannel>, mpsc::UnboundedReceiver<InboundFrame>)> {
        let (channel, mut inbound) = self.connector.connect(&self.url).await?;
        let auth = json!({ "token": token, "client_id": self.client_id });
        channel.send(Bytes::from(auth.to_string())).await?;

        let first = tokio::time::timeout(self.handshake_timeout, inbound.recv())
            .await
            .map_err(|_| ClientError::Timeout("coordinator handshake".to_string()))?
            .ok_or_else(|| ClientError::Transport("closed during handshake".to_string()))?;
        if let Err(e) = handshake_verdict(&first) {
            let _ = channel.close(CLOSE_NORMAL, "handshake rejected").await;
            return Err(e);
        }

        let (forward, frames) = mpsc::unbounded_channel();
        let _ = forward.send(first);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                if forward.send(frame).is_err() {
                    break;
                }
            }
        });
        Ok((channel, frames))
    }

    fn ping(&self) -> Bytes {
        let ping = json!([{ "type": "health.check", "client_id": self.client_id }]);
        Bytes::from(ping.to_string())
    }
}
