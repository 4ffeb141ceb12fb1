use crate::concurrency::{TagLock, TransitionGuard};
use crate::config::RtcConfig;
use crate::error::{ClientError, Result};
use crate::layers::{
    OptimalLayer, TrackPublishOptions, compute_audio_layers, compute_video_encodings,
    compute_video_layers, is_svc_codec, to_video_layers,
};
use crate::rtc::MediaTrack;
use crate::rtc::base::{
    IceRestarter, PeerCore, PeerInput, PeerParams, on_connection_state, on_ice_connection_state,
    open_peer_connection, request_reconnect, try_restart_ice,
};
use crate::rtc::peer::{
    EncodingParameters, PeerEvent, SessionDescription, SignalingState, Transceiver,
    TransceiverDirection, TransceiverInit, codec_preferences,
};
use crate::sdp::{
    CodecSelector, enable_high_quality_audio, mid_for_track, prefer_codec, preserve_codec,
    remove_codec, toggle_dtx,
};
use crate::signaling::SignalingSession;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use strata_core::model::{
    AudioBitrateProfile, EventKind, MuteState, PeerType, PublishOption, SfuEvent, TrackInfo,
    TrackKind, TrackType, VideoLayerSetting, VideoSender,
};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

const PUBLISHER_EVENTS: &[EventKind] = &[EventKind::ChangePublishQuality, EventKind::IceRestart];
const QUALITY_TAG: &str = "publisher.update_video_quality";

struct TransceiverEntry {
    publish_option: PublishOption,
    track_type: TrackType,
    transceiver: Arc<dyn Transceiver>,
    track: Arc<dyn MediaTrack>,
    options: TrackPublishOptions,
    /// Codec moved to the front of this transceiver's m-line in every offer.
    preferred_codec: String,
    /// Last computed plan; kept for announcing tracks that have since ended.
    layers: Vec<OptimalLayer>,
}

impl TransceiverEntry {
    fn is_published(&self) -> bool {
        self.track.is_live() && self.track.is_enabled()
    }

    /// Screen-share audio and music-profile audio are sent in stereo at full bitrate.
    fn wants_hq_audio(&self) -> bool {
        self.track_type == TrackType::ScreenShareAudio
            || (self.track_type.is_audio()
                && self.options.audio_bitrate_profile == AudioBitrateProfile::MusicHighQuality)
    }

    fn uses_svc(&self) -> bool {
        is_svc_codec(self.publish_option.codec.as_ref().map(|c| c.name.as_str()))
    }
}

/// Transceivers in the order they were created.
#[derive(Default)]
struct TransceiverCache {
    entries: Vec<TransceiverEntry>,
}

impl TransceiverCache {
    fn find(&self, publish_option_id: i32, track_type: TrackType) -> Option<&TransceiverEntry> {
        self.entries
            .iter()
            .find(|e| e.publish_option.id == publish_option_id && e.track_type == track_type)
    }

    fn find_mut(
        &mut self,
        publish_option_id: i32,
        track_type: TrackType,
    ) -> Option<&mut TransceiverEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.publish_option.id == publish_option_id && e.track_type == track_type)
    }

    fn of_type(&self, track_type: TrackType) -> impl Iterator<Item = &TransceiverEntry> {
        self.entries.iter().filter(move |e| e.track_type == track_type)
    }
}

struct PublisherInner {
    core: PeerCore,
    publish_options: RwLock<Vec<PublishOption>>,
    transceivers: Mutex<TransceiverCache>,
    negotiating: AtomicBool,
    tags: TagLock,
}

/// The outbound peer connection.
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

impl Publisher {
    pub async fn new(params: PeerParams, publish_options: Vec<PublishOption>) -> Result<Self> {
        let (input, input_rx) = mpsc::unbounded_channel();
        let pc = open_peer_connection(
            params.factory.as_ref(),
            &params.rtc_config,
            0,
            input.clone(),
        )
        .await?;
        let core = PeerCore::new(PeerType::Publisher, &params, pc, input, PUBLISHER_EVENTS);
        let inner = Arc::new(PublisherInner {
            core,
            publish_options: RwLock::new(publish_options),
            transceivers: Mutex::new(TransceiverCache::default()),
            negotiating: AtomicBool::new(false),
            tags: TagLock::new(),
        });
        tokio::spawn(PublisherInner::run(Arc::downgrade(&inner), input_rx));
        Ok(Self { inner })
    }

    /// Replaces the publish options, typically with the ones from the join response.
    pub fn set_publish_options(&self, publish_options: Vec<PublishOption>) {
        *self.inner.publish_options.write() = publish_options;
    }

    /// Starts sending `track` as `track_type`.
    ///
    /// Adds one send-only transceiver per publish option of that type on first use; later calls
    /// swap the track in place without renegotiating.
    pub async fn publish(
        &self,
        track: Arc<dyn MediaTrack>,
        track_type: TrackType,
        options: TrackPublishOptions,
    ) -> Result<()> {
        self.inner.publish(track, track_type, options).await
    }

    /// Stops (or just disables) the track published as `track_type`.
    pub async fn unpublish(&self, track_type: TrackType, stop_track: bool) -> Result<()> {
        self.inner.unpublish(track_type, stop_track).await
    }

    pub async fn is_publishing(&self, track_type: TrackType) -> bool {
        self.inner
            .transceivers
            .lock()
            .await
            .of_type(track_type)
            .any(TransceiverEntry::is_published)
    }

    /// Stops every published track.
    pub async fn stop_publishing(&self) {
        let cache = self.inner.transceivers.lock().await;
        for entry in &cache.entries {
            entry.track.stop();
            self.inner
                .core
                .registry
                .set_local_published(entry.track_type, false);
        }
        debug!(transceivers = cache.entries.len(), "Stopped publishing");
    }

    pub async fn update_video_publish_quality(&self, sender: &VideoSender) -> Result<()> {
        self.inner.update_video_publish_quality(sender).await
    }

    pub async fn restart_ice(&self) -> Result<()> {
        self.inner.restart_ice().await
    }

    /// Moves to a new SFU while keeping the current tracks and transceivers.
    pub async fn migrate_to(&self, session: SignalingSession, rtc_config: &RtcConfig) -> Result<()> {
        self.inner.migrate_to(session, rtc_config).await
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.core.is_healthy()
    }

    pub async fn dispose(&self) {
        self.inner.core.dispose().await;
    }
}

impl PublisherInner {
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
                    debug!(generation, "Dropping event from a replaced publisher connection")
                }
                PeerInput::Sfu(event) => this.on_sfu_event(event).await,
            }
        }
        debug!("Publisher event loop stopped");
    }

    async fn on_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::NegotiationNeeded => {
                if let Err(e) = self.negotiate(false).await {
                    self.on_negotiation_failed(e).await;
                }
            }
            PeerEvent::IceCandidate(candidate) => self.core.send_local_candidate(candidate),
            PeerEvent::IceConnectionStateChange(state) => on_ice_connection_state(self, state),
            PeerEvent::ConnectionStateChange(state) => on_connection_state(self, state).await,
            PeerEvent::Track(remote) => {
                debug!(stream_id = %remote.stream_id, "Ignoring remote track on publisher")
            }
        }
    }

    /// A rejected answer is retried with an ICE restart; a failed signaling exchange needs a
    /// reconnect since the SFU never saw the offer.
    async fn on_negotiation_failed(self: &Arc<Self>, e: ClientError) {
        match e {
            ClientError::Negotiation(_) => {
                error!("Publisher negotiation failed: {e}");
                try_restart_ice(self);
            }
            ClientError::InvalidState(_) | ClientError::SessionClosed => {
                warn!("Publisher negotiation skipped: {e}");
            }
            e => request_reconnect(&self.core, &e, "negotiation failed").await,
        }
    }

    async fn on_sfu_event(self: &Arc<Self>, event: SfuEvent) {
        match event {
            SfuEvent::ChangePublishQuality(change) => {
                for sender in &change.video_senders {
                    if let Err(e) = self.update_video_publish_quality(sender).await {
                        warn!(track_type = %sender.track_type, "Failed to change publish quality: {e}");
                    }
                }
            }
            SfuEvent::IceRestart(restart) if restart.peer_type == PeerType::Publisher => {
                try_restart_ice(self)
            }
            _ => {}
        }
    }

    async fn publish(
        &self,
        track: Arc<dyn MediaTrack>,
        track_type: TrackType,
        options: TrackPublishOptions,
    ) -> Result<()> {
        if self.core.is_disposed() {
            return Err(ClientError::InvalidState("publisher is disposed".to_string()));
        }
        if !track.is_live() {
            return Err(ClientError::ResourceUnavailable(format!(
                "can't publish {track_type}: track has ended"
            )));
        }
        if track.kind() != track_type.kind() {
            return Err(ClientError::InvalidState(format!(
                "a {} track can't be published as {track_type}",
                track.kind().as_str()
            )));
        }

        let publish_options: Vec<PublishOption> = self
            .publish_options
            .read()
            .iter()
            .filter(|option| option.track_type == track_type)
            .cloned()
            .collect();
        if publish_options.is_empty() {
            return Err(ClientError::ResourceUnavailable(format!(
                "no publish options for {track_type}"
            )));
        }

        {
            let mut cache = self.transceivers.lock().await;
            for option in &publish_options {
                if let Some(entry) = cache.find_mut(option.id, track_type) {
                    if entry.track.id() != track.id() {
                        entry.track.stop();
                    }
                    entry.transceiver.replace_track(Some(track.clone())).await?;
                    entry.track = track.clone();
                    entry.preferred_codec = self.codec_preference(track_type.kind(), option, &options).0;
                    entry.options = options.clone();
                    debug!(%track_type, publish_option = option.id, "Replaced published track");
                } else {
                    let entry = self
                        .add_transceiver(&track, track_type, option, &options)
                        .await?;
                    cache.entries.push(entry);
                }
            }
        }

        track.set_enabled(true);
        self.notify_mute_state(track_type, false).await
    }

    async fn add_transceiver(
        &self,
        track: &Arc<dyn MediaTrack>,
        track_type: TrackType,
        option: &PublishOption,
        options: &TrackPublishOptions,
    ) -> Result<TransceiverEntry> {
        let pc = self.core.pc();
        let kind = track_type.kind();
        let thresholds = &self.core.config.simulcast;

        let (layers, send_encodings): (Vec<OptimalLayer>, Vec<EncodingParameters>) = match kind {
            TrackKind::Video => {
                let settings = track.settings();
                let layers = compute_video_layers(&settings, option, thresholds).unwrap_or_default();
                let encodings = compute_video_encodings(&settings, option, thresholds)
                    .unwrap_or_default()
                    .iter()
                    .map(EncodingParameters::from)
                    .collect();
                (layers, encodings)
            }
            TrackKind::Audio => (
                Vec::new(),
                compute_audio_layers(option, options)
                    .iter()
                    .map(EncodingParameters::from)
                    .collect(),
            ),
        };

        let transceiver = pc
            .add_transceiver(
                track.clone(),
                TransceiverInit {
                    direction: TransceiverDirection::SendOnly,
                    send_encodings,
                },
            )
            .await?;

        let (preferred, remove) = self.codec_preference(kind, option, options);
        let preferences = codec_preferences(&pc.codec_capabilities(kind), &preferred, remove);
        if !preferences.is_empty()
            && let Err(e) = transceiver.set_codec_preferences(preferences).await
        {
            warn!(%track_type, "Failed to set codec preferences: {e}");
        }

        info!(
            %track_type,
            publish_option = option.id,
            layers = layers.len(),
            codec = %preferred,
            "Added send transceiver"
        );
        if !layers.is_empty() {
            self.core.observer.on_layers_updated(track_type, &layers).await;
        }

        Ok(TransceiverEntry {
            publish_option: option.clone(),
            track_type,
            transceiver,
            track: track.clone(),
            options: options.clone(),
            preferred_codec: preferred,
            layers,
        })
    }

    /// Preferred codec name and, for audio with RED disabled, the codec to drop.
    fn codec_preference(
        &self,
        kind: TrackKind,
        option: &PublishOption,
        options: &TrackPublishOptions,
    ) -> (String, Option<&'static str>) {
        match kind {
            TrackKind::Video => {
                let preferred = options
                    .preferred_codec
                    .clone()
                    .or_else(|| option.codec.as_ref().map(|c| c.name.clone()))
                    .unwrap_or_else(|| "vp8".to_string());
                (preferred, None)
            }
            TrackKind::Audio => {
                let red = self.core.config.red_enabled;
                let fallback = if red { "red" } else { "opus" };
                let preferred = options
                    .preferred_codec
                    .clone()
                    .unwrap_or_else(|| fallback.to_string());
                (preferred, (!red).then_some("red"))
            }
        }
    }

    async fn unpublish(&self, track_type: TrackType, stop_track: bool) -> Result<()> {
        let was_published = {
            let cache = self.transceivers.lock().await;
            let mut was_published = false;
            for entry in cache.of_type(track_type) {
                was_published |= entry.is_published();
                if stop_track {
                    entry.track.stop();
                } else {
                    entry.track.set_enabled(false);
                }
            }
            was_published
        };

        if !was_published {
            debug!(%track_type, "Track is not published, nothing to do");
            return Ok(());
        }
        self.notify_mute_state(track_type, true).await
    }

    async fn notify_mute_state(&self, track_type: TrackType, muted: bool) -> Result<()> {
        self.core.registry.set_local_published(track_type, !muted);
        self.core.observer.on_mute_state_changed(track_type, muted).await;
        self.core
            .session()
            .update_mute_states(vec![MuteState { track_type, muted }])
            .await
    }

    async fn update_video_publish_quality(&self, sender: &VideoSender) -> Result<()> {
        self.tags
            .run(QUALITY_TAG, self.apply_publish_quality(sender))
            .await
    }

    async fn apply_publish_quality(&self, sender: &VideoSender) -> Result<()> {
        let cache = self.transceivers.lock().await;
        let Some(entry) = cache.find(sender.publish_option_id, sender.track_type) else {
            warn!(
                track_type = %sender.track_type,
                publish_option = sender.publish_option_id,
                "No transceiver for requested quality change"
            );
            return Ok(());
        };

        let mut encodings = entry.transceiver.parameters();
        if encodings.is_empty() {
            warn!(track_type = %sender.track_type, "Sender has no encodings");
            return Ok(());
        }
        if !apply_layer_settings(&mut encodings, &sender.layers, entry.uses_svc()) {
            debug!(track_type = %sender.track_type, "Publish quality unchanged");
            return Ok(());
        }

        let active: Vec<(Option<String>, bool)> =
            encodings.iter().map(|e| (e.rid.clone(), e.active)).collect();
        entry.transceiver.set_parameters(encodings).await?;
        info!(track_type = %sender.track_type, ?active, "Updated publish quality");
        Ok(())
    }

    async fn negotiate(&self, ice_restart: bool) -> Result<()> {
        let Some(_transition) = TransitionGuard::try_begin(&self.negotiating) else {
            debug!(ice_restart, "Publisher negotiation already in progress");
            return Ok(());
        };

        let pc = self.core.pc();
        let session = self.core.session();
        let offer = pc.create_offer(ice_restart).await?;

        let (sdp, tracks, layer_updates) = {
            let mut cache = self.transceivers.lock().await;
            let sdp = self.munge_offer(&offer.sdp, &cache);
            let (tracks, updates) = self.announced_tracks(&sdp, &mut cache);
            (sdp, tracks, updates)
        };
        if tracks.is_empty() {
            return Err(ClientError::InvalidState(
                "can't negotiate without announcing any tracks".to_string(),
            ));
        }

        pc.set_local_description(SessionDescription::offer(sdp.clone()))
            .await?;
        debug!(ice_restart, tracks = tracks.len(), "Sending publisher offer");
        let answered = async {
            let response = session.set_publisher_description(sdp, tracks).await?;
            pc.set_remote_description(SessionDescription::answer(response.sdp))
                .await
                .map_err(|e| ClientError::Negotiation(format!("publisher answer rejected: {e}")))
        }
        .await;
        if let Err(e) = answered {
            // Leave signaling stable so the next offer can go out.
            if pc.signaling_state() == SignalingState::HaveLocalOffer
                && let Err(rollback) = pc.rollback().await
            {
                warn!("Failed to roll back publisher offer: {rollback}");
            }
            return Err(e);
        }
        self.core.attach_trickled_candidates();

        for (track_type, layers) in layer_updates {
            self.core.observer.on_layers_updated(track_type, &layers).await;
        }
        Ok(())
    }

    fn munge_offer(&self, sdp: &str, cache: &TransceiverCache) -> String {
        let config = &self.core.config;
        let mut sdp = toggle_dtx(sdp, config.dtx_enabled);
        for entry in &cache.entries {
            let Some(mid) = entry.transceiver.mid() else {
                continue;
            };
            sdp = prefer_codec(&sdp, &mid, &entry.preferred_codec);
            if config.pin_single_codec
                && entry.track_type.kind() == TrackKind::Video
                && let Some(codec) = &entry.publish_option.codec
            {
                let selector = CodecSelector {
                    mime_type: format!("video/{}", codec.name),
                    clock_rate: codec.clock_rate,
                    sdp_fmtp_line: (!codec.fmtp.is_empty()).then(|| codec.fmtp.clone()),
                };
                sdp = preserve_codec(&sdp, &mid, &selector);
            }
            if entry.wants_hq_audio() && entry.is_published() {
                sdp = enable_high_quality_audio(&sdp, &mid);
            }
        }
        if !config.red_enabled {
            sdp = remove_codec(&sdp, "audio", "red");
        }
        sdp
    }

    /// Track metadata for the offer, refreshing the layer cache of live video tracks.
    fn announced_tracks(
        &self,
        sdp: &str,
        cache: &mut TransceiverCache,
    ) -> (Vec<TrackInfo>, Vec<(TrackType, Vec<OptimalLayer>)>) {
        let config = &self.core.config;
        let mut tracks = Vec::with_capacity(cache.entries.len());
        let mut updates = Vec::new();

        for (index, entry) in cache.entries.iter_mut().enumerate() {
            let kind = entry.track_type.kind();
            if kind == TrackKind::Video
                && entry.track.is_live()
                && let Some(layers) = compute_video_layers(
                    &entry.track.settings(),
                    &entry.publish_option,
                    &config.simulcast,
                )
                && layers != entry.layers
            {
                entry.layers = layers.clone();
                updates.push((entry.track_type, layers));
            }

            let track_id = entry.track.id();
            let mid = entry
                .transceiver
                .mid()
                .or_else(|| mid_for_track(sdp, kind.as_str(), &track_id))
                .unwrap_or_else(|| index.to_string());

            tracks.push(TrackInfo {
                track_id,
                track_type: entry.track_type,
                layers: to_video_layers(&entry.layers),
                mid,
                stereo: entry.wants_hq_audio(),
                dtx: kind == TrackKind::Audio && config.dtx_enabled,
                red: kind == TrackKind::Audio && config.red_enabled,
                muted: !entry.is_published(),
                codec: entry.publish_option.codec.clone(),
                publish_option_id: entry.publish_option.id,
            });
        }
        (tracks, updates)
    }

    async fn migrate_to(&self, session: SignalingSession, rtc_config: &RtcConfig) -> Result<()> {
        info!(
            from = %self.core.session().session_id(),
            to = %session.session_id(),
            "Migrating publisher"
        );
        self.core.set_session(session);
        self.core.pc().set_configuration(rtc_config).await?;
        if self.transceivers.lock().await.entries.is_empty() {
            return Ok(());
        }
        self.negotiate(true).await
    }
}

#[async_trait]
impl IceRestarter for PublisherInner {
    fn core(&self) -> &PeerCore {
        &self.core
    }

    async fn restart_ice(&self) -> Result<()> {
        if self.core.ice_restarting.swap(true, Ordering::SeqCst) {
            debug!("Publisher ICE restart already in progress");
            return Ok(());
        }
        let result = async {
            if self.negotiating.load(Ordering::SeqCst) {
                debug!("Skipping publisher ICE restart, negotiation in progress");
                return Ok(());
            }
            if self.transceivers.lock().await.entries.is_empty() {
                debug!("Skipping publisher ICE restart, nothing published");
                return Ok(());
            }
            info!("Restarting publisher ICE");
            self.negotiate(true).await
        }
        .await;
        self.core.ice_restarting.store(false, Ordering::SeqCst);
        result
    }
}

/// Applies SFU-requested layer settings to sender encodings in place.
///
/// Layers are matched by rid, or for SVC (and single-encoding senders) the first active layer
/// drives the one encoding. Returns whether anything changed.
fn apply_layer_settings(
    encodings: &mut [EncodingParameters],
    layers: &[VideoLayerSetting],
    svc: bool,
) -> bool {
    let enabled: Vec<&VideoLayerSetting> = layers.iter().filter(|l| l.active).collect();
    let single = encodings.len() == 1;
    let mut changed = false;

    for encoding in encodings.iter_mut() {
        let layer = if svc {
            enabled.first().copied()
        } else {
            enabled
                .iter()
                .copied()
                .find(|l| encoding.rid.as_deref() == Some(l.name.as_str()))
                .or_else(|| if single { enabled.first().copied() } else { None })
        };

        let active = layer.is_some();
        if encoding.active != active {
            encoding.active = active;
            changed = true;
        }
        let Some(layer) = layer else {
            continue;
        };

        if layer.scale_resolution_down_by >= 1.0
            && encoding.scale_resolution_down_by != Some(layer.scale_resolution_down_by)
        {
            encoding.scale_resolution_down_by = Some(layer.scale_resolution_down_by);
            changed = true;
        }
        if layer.max_bitrate > 0 && encoding.max_bitrate != Some(layer.max_bitrate) {
            encoding.max_bitrate = Some(layer.max_bitrate);
            changed = true;
        }
        if layer.max_framerate > 0 && encoding.max_framerate != Some(layer.max_framerate) {
            encoding.max_framerate = Some(layer.max_framerate);
            changed = true;
        }
        if !layer.scalability_mode.is_empty()
            && encoding.scalability_mode.as_deref() != Some(layer.scalability_mode.as_str())
        {
            encoding.scalability_mode = Some(layer.scalability_mode.clone());
            changed = true;
        }
    }
    changed
}
