use crate::config::RtcConfig;
use crate::error::{ClientError, Result};
use crate::participants::{OrphanedTrack, RemoteStream};
use crate::rtc::base::{
    IceRestarter, PeerCore, PeerInput, PeerParams, on_connection_state, on_ice_connection_state,
    open_peer_connection, try_restart_ice,
};
use crate::rtc::peer::{
    PeerConnection, PeerConnectionState, PeerEvent, RemoteTrack, SessionDescription,
    SignalingState,
};
use crate::sdp::enable_stereo;
use crate::signaling::SignalingSession;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use strata_core::model::{
    EventKind, ParticipantInfo, PeerType, SessionId, SfuEvent, SubscriberOffer, TrackType,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const SUBSCRIBER_EVENTS: &[EventKind] = &[
    EventKind::SubscriberOffer,
    EventKind::IceRestart,
    EventKind::ParticipantJoined,
    EventKind::ParticipantLeft,
    EventKind::TrackPublished,
    EventKind::TrackUnpublished,
];

/// The connection being replaced, kept open until its successor connects.
struct Migration {
    previous: Arc<dyn PeerConnection>,
    done: oneshot::Sender<()>,
}

struct SubscriberInner {
    core: PeerCore,
    migration: Mutex<Option<Migration>>,
}

/// The inbound peer connection. The SFU makes the offers; this side answers.
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

impl Subscriber {
    pub async fn new(params: PeerParams) -> Result<Self> {
        let (input, input_rx) = mpsc::unbounded_channel();
        let pc = open_peer_connection(
            params.factory.as_ref(),
            &params.rtc_config,
            0,
            input.clone(),
        )
        .await?;
        let core = PeerCore::new(PeerType::Subscriber, &params, pc, input, SUBSCRIBER_EVENTS);
        let inner = Arc::new(SubscriberInner {
            core,
            migration: Mutex::new(None),
        });
        tokio::spawn(SubscriberInner::run(Arc::downgrade(&inner), input_rx));
        Ok(Self { inner })
    }

    /// Asks the SFU for an ICE-restart offer.
    pub async fn restart_ice(&self) -> Result<()> {
        self.inner.restart_ice().await
    }

    /// Moves to a new SFU.
    ///
    /// With subscribed media a second connection is built next to the current one, and the old
    /// connection is closed only once the new one reports connected. Without media this is a
    /// plain ICE restart on the existing connection.
    pub async fn migrate_to(&self, session: SignalingSession, rtc_config: &RtcConfig) -> Result<()> {
        self.inner.migrate_to(session, rtc_config).await
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.core.is_healthy()
    }

    pub async fn dispose(&self) {
        let migration = self.inner.migration.lock().take();
        if let Some(migration) = migration
            && let Err(e) = migration.previous.close().await
        {
            warn!("Failed to close replaced subscriber connection: {e}");
        }
        self.inner.core.dispose().await;
    }
}

impl SubscriberInner {
    async fn run(weak: Weak<Self>, mut input: mpsc::UnboundedReceiver<PeerInput>) {
        while let Some(message) = input.recv().await {
            let Some(this) = weak.upgrade() else {
                break;
            };
            if this.core.is_disposed() {
                break;
            }
            match message {
                PeerInput::Pc { generation, event } if generation == this.core.generation() => {
                    this.on_peer_event(event).await
                }
                PeerInput::Pc { generation, .. } => {
                    debug!(generation, "Dropping event from a replaced subscriber connection")
                }
                PeerInput::Sfu(event) => this.on_sfu_event(event).await,
            }
        }
        debug!("Subscriber event loop stopped");
    }

    async fn on_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::Track(remote) => self.on_track(remote).await,
            PeerEvent::IceCandidate(candidate) => self.core.send_local_candidate(candidate),
            PeerEvent::IceConnectionStateChange(state) => on_ice_connection_state(self, state),
            PeerEvent::ConnectionStateChange(state) => {
                if state == PeerConnectionState::Connected {
                    self.finish_migration().await;
                }
                on_connection_state(self, state).await
            }
            PeerEvent::NegotiationNeeded => {}
        }
    }

    async fn on_sfu_event(self: &Arc<Self>, event: SfuEvent) {
        match event {
            SfuEvent::SubscriberOffer(offer) => {
                if let Err(e) = self.answer(offer).await {
                    error!("Failed to answer subscriber offer: {e}");
                    if matches!(e, ClientError::Negotiation(_)) {
                        try_restart_ice(self);
                    }
                }
            }
            SfuEvent::IceRestart(restart) if restart.peer_type == PeerType::Subscriber => {
                try_restart_ice(self)
            }
            SfuEvent::ParticipantJoined(joined) => self.adopt(joined.participant).await,
            SfuEvent::TrackPublished(published) => {
                if let Some(participant) = published.participant {
                    self.adopt(participant).await;
                }
            }
            SfuEvent::TrackUnpublished(unpublished) => {
                let removed = self
                    .core
                    .registry
                    .detach_stream(unpublished.session_id, unpublished.track_type);
                if let Some(stream) = removed {
                    self.release(unpublished.session_id, stream).await;
                }
            }
            SfuEvent::ParticipantLeft(left) => {
                let session_id = left.participant.session_id;
                for stream in self.core.registry.remove(session_id) {
                    self.release(session_id, stream).await;
                }
            }
            _ => {}
        }
    }

    async fn answer(&self, offer: SubscriberOffer) -> Result<()> {
        let pc = self.core.pc();
        let session = self.core.session();
        debug!(ice_restart = offer.ice_restart, "Received subscriber offer");

        pc.set_remote_description(SessionDescription::offer(offer.sdp.clone()))
            .await
            .map_err(|e| ClientError::Negotiation(format!("subscriber offer rejected: {e}")))?;
        self.core.attach_trickled_candidates();

        let answer = pc.create_answer().await?;
        let sdp = enable_stereo(&offer.sdp, &answer.sdp);
        pc.set_local_description(SessionDescription::answer(sdp.clone()))
            .await?;
        session.send_subscriber_answer(sdp).await?;
        self.core.ice_restarting.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn on_track(&self, remote: RemoteTrack) {
        let Some((prefix, raw_type)) = remote.stream_id.split_once(':') else {
            warn!(stream_id = %remote.stream_id, "Remote stream id has no track lookup prefix");
            return;
        };
        let Some(track_type) = TrackType::from_raw(raw_type) else {
            warn!(stream_id = %remote.stream_id, "Unknown track type in remote stream id");
            return;
        };

        let stream = RemoteStream {
            stream_id: remote.stream_id.clone(),
            track_type,
            track: remote.track,
        };
        match self.core.registry.find_by_prefix(prefix) {
            Some(participant) => self.attach(participant.session_id, stream).await,
            None => {
                warn!(%prefix, %track_type, "Track arrived before its participant, parking it");
                self.core.registry.park_orphan(OrphanedTrack {
                    track_lookup_prefix: prefix.to_string(),
                    stream,
                });
            }
        }
    }

    async fn attach(&self, session_id: SessionId, stream: RemoteStream) {
        let track_type = stream.track_type;
        let track = stream.track.clone();
        if let Some(previous) = self.core.registry.attach_stream(session_id, stream) {
            if previous.track.id() != track.id() {
                previous.track.stop();
            }
            self.core
                .observer
                .on_track_detached(session_id, track_type, previous.track)
                .await;
        }
        debug!(%session_id, %track_type, track_id = %track.id(), "Attached remote track");
        self.core
            .observer
            .on_track_attached(session_id, track_type, track)
            .await;
    }

    async fn release(&self, session_id: SessionId, stream: RemoteStream) {
        stream.track.stop();
        self.core
            .observer
            .on_track_detached(session_id, stream.track_type, stream.track)
            .await;
    }

    /// Registers a participant and attaches any tracks that arrived ahead of it.
    async fn adopt(&self, participant: ParticipantInfo) {
        let prefix = participant.track_lookup_prefix.clone();
        let session_id = participant.session_id;
        self.core.registry.upsert(participant);
        for orphan in self.core.registry.take_orphans(&prefix) {
            info!(%session_id, track_type = %orphan.stream.track_type, "Adopting orphaned track");
            self.attach(session_id, orphan.stream).await;
        }
    }

    async fn migrate_to(&self, session: SignalingSession, rtc_config: &RtcConfig) -> Result<()> {
        let timeout = session.config().migration_timeout;
        info!(
            from = %self.core.session().session_id(),
            to = %session.session_id(),
            "Migrating subscriber"
        );

        if !self.core.registry.has_remote_streams() {
            self.core.set_session(session);
            self.core.pc().set_configuration(rtc_config).await?;
            return self.restart_ice().await;
        }

        let generation = self.core.generation() + 1;
        let pc = open_peer_connection(
            self.core.factory.as_ref(),
            rtc_config,
            generation,
            self.core.input.clone(),
        )
        .await?;
        let (done, connected) = oneshot::channel();
        let previous = self.core.swap_pc(pc, generation);
        let superseded = self.migration.lock().replace(Migration { previous, done });
        if let Some(superseded) = superseded
            && let Err(e) = superseded.previous.close().await
        {
            warn!("Failed to close superseded subscriber connection: {e}");
        }
        self.core.ice_restarting.store(false, Ordering::SeqCst);
        self.core.set_session(session);

        match tokio::time::timeout(timeout, connected).await {
            Ok(Ok(())) => {
                info!("Subscriber migration complete");
                Ok(())
            }
            Ok(Err(_)) => Err(ClientError::InvalidState(
                "subscriber disposed during migration".to_string(),
            )),
            Err(_) => Err(ClientError::Timeout(
                "migrated subscriber connection did not connect".to_string(),
            )),
        }
    }

    async fn finish_migration(&self) {
        let migration = self.migration.lock().take();
        let Some(Migration { previous, done }) = migration else {
            return;
        };
        debug!("New subscriber connection is up, closing the previous one");
        if let Err(e) = previous.close().await {
            warn!("Failed to close previous subscriber connection: {e}");
        }
        let _ = done.send(());
    }
}

#[async_trait]
impl IceRestarter for SubscriberInner {
    fn core(&self) -> &PeerCore {
        &self.core
    }

    async fn restart_ice(&self) -> Result<()> {
        let pc = self.core.pc();
        if pc.signaling_state() == SignalingState::HaveRemoteOffer {
            debug!("Skipping subscriber ICE restart, offer being applied");
            return Ok(());
        }
        if pc.connection_state() == PeerConnectionState::New {
            debug!("Skipping subscriber ICE restart, connection not established yet");
            return Ok(());
        }
        if self.core.ice_restarting.swap(true, Ordering::SeqCst) {
            debug!("Subscriber ICE restart already in progress");
            return Ok(());
        }

        info!("Requesting subscriber ICE restart");
        // Cleared again by the answer to the SFU's restart offer.
        if let Err(e) = self.core.session().ice_restart(PeerType::Subscriber).await {
            self.core.ice_restarting.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }
}
