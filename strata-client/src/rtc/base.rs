//! Behaviour shared by the publisher and subscriber peer sessions.

use crate::config::{PeerConfig, RtcConfig};
use crate::dispatcher::Subscription;
use crate::error::{ClientError, Result};
use crate::observer::SessionObserver;
use crate::participants::ParticipantRegistry;
use crate::rtc::peer::{
    IceConnectionState, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
};
use crate::signaling::SignalingSession;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use strata_core::model::{
    ErrorCode, EventKind, PeerType, SessionId, SfuEvent, WebsocketReconnectStrategy,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything a peer session needs at construction.
#[derive(Clone)]
pub struct PeerParams {
    pub session: SignalingSession,
    pub factory: Arc<dyn PeerConnectionFactory>,
    pub rtc_config: RtcConfig,
    pub config: PeerConfig,
    pub observer: Arc<dyn SessionObserver>,
    pub registry: Arc<ParticipantRegistry>,
}

/// Input of a peer session's event loop.
pub(crate) enum PeerInput {
    Pc { generation: u64, event: PeerEvent },
    Sfu(SfuEvent),
}

/// Creates a peer connection whose callbacks reach `input` tagged with `generation`.
pub(crate) async fn open_peer_connection(
    factory: &dyn PeerConnectionFactory,
    config: &RtcConfig,
    generation: u64,
    input: mpsc::UnboundedSender<PeerInput>,
) -> Result<Arc<dyn PeerConnection>> {
    let (events, mut events_rx) = mpsc::unbounded_channel();
    let pc = factory.create(config, events).await?;
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if input.send(PeerInput::Pc { generation, event }).is_err() {
                break;
            }
        }
    });
    Ok(pc)
}

pub(crate) struct PeerCore {
    pub(crate) peer_type: PeerType,
    pub(crate) config: PeerConfig,
    pub(crate) observer: Arc<dyn SessionObserver>,
    pub(crate) registry: Arc<ParticipantRegistry>,
    pub(crate) factory: Arc<dyn PeerConnectionFactory>,
    pub(crate) input: mpsc::UnboundedSender<PeerInput>,
    pub(crate) ice_restarting: AtomicBool,
    pc: RwLock<Arc<dyn PeerConnection>>,
    generation: AtomicU64,
    session: RwLock<SignalingSession>,
    sfu_events: &'static [EventKind],
    disposed: AtomicBool,
    restart_timer: Mutex<Option<JoinHandle<()>>>,
    candidates: Mutex<Option<(u64, SessionId, JoinHandle<()>)>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl PeerCore {
    pub(crate) fn new(
        peer_type: PeerType,
        params: &PeerParams,
        pc: Arc<dyn PeerConnection>,
        input: mpsc::UnboundedSender<PeerInput>,
        sfu_events: &'static [EventKind],
    ) -> Self {
        let core = Self {
            peer_type,
            config: params.config.clone(),
            observer: params.observer.clone(),
            registry: params.registry.clone(),
            factory: params.factory.clone(),
            input,
            ice_restarting: AtomicBool::new(false),
            pc: RwLock::new(pc),
            generation: AtomicU64::new(0),
            session: RwLock::new(params.session.clone()),
            sfu_events,
            disposed: AtomicBool::new(false),
            restart_timer: Mutex::new(None),
            candidates: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        };
        core.listen();
        core
    }

    pub(crate) fn pc(&self) -> Arc<dyn PeerConnection> {
        self.pc.read().clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Installs `pc` as the current connection and returns the one it replaced.
    pub(crate) fn swap_pc(&self, pc: Arc<dyn PeerConnection>, generation: u64) -> Arc<dyn PeerConnection> {
        let mut current = self.pc.write();
        self.generation.store(generation, Ordering::SeqCst);
        std::mem::replace(&mut *current, pc)
    }

    pub(crate) fn session(&self) -> SignalingSession {
        self.session.read().clone()
    }

    /// Points the peer at a new signaling session and moves the SFU listeners over.
    pub(crate) fn set_session(&self, session: SignalingSession) {
        *self.session.write() = session;
        self.listen();
    }

    fn listen(&self) {
        let session = self.session();
        let mut subscriptions = self.subscriptions.lock();
        for subscription in subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        for kind in self.sfu_events {
            let input = self.input.clone();
            subscriptions.push(session.dispatcher().subscribe(*kind, move |event| {
                input
                    .send(PeerInput::Sfu(event.clone()))
                    .map_err(|_| anyhow::anyhow!("peer session is gone"))
            }));
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        let pc = self.pc();
        matches!(
            pc.ice_connection_state(),
            IceConnectionState::Connected | IceConnectionState::Completed
        ) && pc.connection_state() == PeerConnectionState::Connected
    }

    /// Applies the SFU's trickled candidates for this role, backlog first.
    ///
    /// Only valid once a remote description is set. Repeated calls for the same connection and
    /// session keep the running applier.
    pub(crate) fn attach_trickled_candidates(&self) {
        let generation = self.generation();
        let session = self.session();
        let session_id = session.session_id();

        let mut slot = self.candidates.lock();
        if let Some((current_generation, current_session, handle)) = slot.as_ref()
            && *current_generation == generation
            && *current_session == session_id
            && !handle.is_finished()
        {
            return;
        }

        let pc = self.pc();
        let peer_type = self.peer_type;
        let mut candidates = session.ice_buffer().subscribe(peer_type);
        let handle = tokio::spawn(async move {
            while let Some(candidate) = candidates.recv().await {
                if let Err(e) = pc.add_ice_candidate(&candidate.ice_candidate).await {
                    warn!(peer = %peer_type, "Failed to add trickled ICE candidate: {e}");
                }
            }
        });
        if let Some((_, _, previous)) = slot.replace((generation, session_id, handle)) {
            previous.abort();
        }
    }

    /// Trickles a local candidate to the SFU.
    pub(crate) fn send_local_candidate(&self, candidate: Option<String>) {
        let Some(candidate) = candidate else {
            debug!(peer = %self.peer_type, "ICE gathering complete");
            return;
        };
        let session = self.session();
        let peer_type = self.peer_type;
        tokio::spawn(async move {
            if let Err(e) = session.send_ice_candidate(peer_type, candidate).await {
                warn!(peer = %peer_type, "Failed to trickle ICE candidate: {e}");
            }
        });
    }

    fn cancel_restart_timer(&self) {
        if let Some(timer) = self.restart_timer.lock().take() {
            timer.abort();
        }
    }

    /// Stops timers and listeners and closes the connection. Idempotent.
    pub(crate) async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_restart_timer();
        if let Some((_, _, applier)) = self.candidates.lock().take() {
            applier.abort();
        }
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
        if let Err(e) = self.pc().close().await {
            warn!(peer = %self.peer_type, "Failed to close peer connection: {e}");
        }
        info!(peer = %self.peer_type, "Peer session disposed");
    }
}

/// A peer session able to restart ICE.
#[async_trait]
pub(crate) trait IceRestarter: Send + Sync + 'static {
    fn core(&self) -> &PeerCore;

    async fn restart_ice(&self) -> Result<()>;
}

/// Restarts ICE in the background; a failure asks the observer to reconnect.
pub(crate) fn try_restart_ice<P: IceRestarter>(peer: &Arc<P>) {
    let peer = Arc::clone(peer);
    tokio::spawn(async move {
        let Err(e) = peer.restart_ice().await else {
            return;
        };
        request_reconnect(peer.core(), &e, "ICE restart failed").await;
    });
}

/// A lost signal channel can be resumed; anything else needs a fresh join.
pub(crate) fn reconnect_strategy(e: &ClientError) -> WebsocketReconnectStrategy {
    if e.sfu_code() == Some(ErrorCode::ParticipantSignalLost) {
        WebsocketReconnectStrategy::Fast
    } else {
        WebsocketReconnectStrategy::Rejoin
    }
}

/// Asks the observer to reconnect after `e` left the peer unusable.
pub(crate) async fn request_reconnect(core: &PeerCore, e: &ClientError, what: &str) {
    if core.is_disposed() {
        return;
    }
    let strategy = reconnect_strategy(e);
    error!(peer = %core.peer_type, ?strategy, "{what}: {e}");
    let reason = format!("{} {what}", core.peer_type);
    core.observer.on_reconnect_needed(strategy, &reason).await;
}

fn schedule_ice_restart<P: IceRestarter>(peer: &Arc<P>) {
    let core = peer.core();
    let delay = core.config.ice_restart_delay;
    let weak = Arc::downgrade(peer);
    let timer = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(peer) = weak.upgrade() else {
            return;
        };
        let state = peer.core().pc().ice_connection_state();
        if matches!(state, IceConnectionState::Disconnected | IceConnectionState::Failed) {
            try_restart_ice(&peer);
        } else {
            debug!(peer = %peer.core().peer_type, ?state, "ICE recovered on its own");
        }
    });
    if let Some(previous) = core.restart_timer.lock().replace(timer) {
        previous.abort();
    }
}

pub(crate) fn on_ice_connection_state<P: IceRestarter>(peer: &Arc<P>, state: IceConnectionState) {
    let core = peer.core();
    debug!(peer = %core.peer_type, ?state, "ICE connection state changed");
    match state {
        IceConnectionState::Connected | IceConnectionState::Completed => {
            core.cancel_restart_timer()
        }
        IceConnectionState::Failed if !core.ice_restarting.load(Ordering::SeqCst) => {
            try_restart_ice(peer)
        }
        IceConnectionState::Disconnected if !core.ice_restarting.load(Ordering::SeqCst) => {
            schedule_ice_restart(peer)
        }
        _ => {}
    }
}

pub(crate) async fn on_connection_state<P: IceRestarter>(peer: &Arc<P>, state: PeerConnectionState) {
    let core = peer.core();
    debug!(peer = %core.peer_type, ?state, "Peer connection state changed");
    match state {
        PeerConnectionState::Failed => {
            warn!(peer = %core.peer_type, "Peer connection failed");
            core.observer
                .on_reconnect_needed(WebsocketReconnectStrategy::Rejoin, "peer connection failed")
                .await;
        }
        PeerConnectionState::Connected => core.cancel_restart_timer(),
        PeerConnectionState::Disconnected if !core.ice_restarting.load(Ordering::SeqCst) => {
            schedule_ice_restart(peer)
        }
        _ => {}
    }
}
