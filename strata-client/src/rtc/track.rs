use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strata_core::model::TrackKind;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Native capture settings reported by a track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

/// A media track attached to a sender or received from the SFU.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    fn settings(&self) -> TrackSettings;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    fn ready_state(&self) -> TrackState;

    /// Ends the track. Idempotent.
    fn stop(&self);

    fn as_any(&self) -> &dyn Any;

    fn is_live(&self) -> bool {
        self.ready_state() == TrackState::Live
    }
}

/// In-process track, optionally backed by a webrtc-rs sample writer.
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    settings: Mutex<TrackSettings>,
    enabled: AtomicBool,
    ended: AtomicBool,
    sample_track: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, settings: TrackSettings) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            settings: Mutex::new(settings),
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            sample_track: None,
        })
    }

    /// Track whose media is written through the returned webrtc-rs sample track.
    pub fn with_sample_track(
        kind: TrackKind,
        sample_track: Arc<TrackLocalStaticSample>,
        settings: TrackSettings,
    ) -> Arc<Self> {
        use webrtc::track::track_local::TrackLocal;

        Arc::new(Self {
            id: sample_track.id().to_string(),
            kind,
            settings: Mutex::new(settings),
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            sample_track: Some(sample_track),
        })
    }

    pub fn sample_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.sample_track.clone()
    }

    /// Capture resolution changed (camera switch, window resize).
    pub fn update_settings(&self, settings: TrackSettings) {
        *self.settings.lock() = settings;
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("state", &self.ready_state())
            .finish()
    }
}

impl MediaTrack for LocalTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn settings(&self) -> TrackSettings {
        *self.settings.lock()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn ready_state(&self) -> TrackState {
        if self.ended.load(Ordering::SeqCst) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    fn stop(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
