use crate::rtc::MediaTrack;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strata_core::model::{ParticipantInfo, SessionId, TrackType};

/// A received stream bound to a participant slot.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub stream_id: String,
    pub track_type: TrackType,
    pub track: Arc<dyn MediaTrack>,
}

/// A track that arrived before the participant it belongs to was known.
#[derive(Debug, Clone)]
pub struct OrphanedTrack {
    pub track_lookup_prefix: String,
    pub stream: RemoteStream,
}

struct ParticipantEntry {
    info: ParticipantInfo,
    streams: HashMap<TrackType, RemoteStream>,
}

/// Call-state view shared by the subscriber and publisher.
#[derive(Default)]
pub struct ParticipantRegistry {
    participants: DashMap<SessionId, ParticipantEntry>,
    orphans: Mutex<Vec<OrphanedTrack>>,
    local_published: Mutex<HashSet<TrackType>>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes a participant, keeping any attached streams.
    pub fn upsert(&self, info: ParticipantInfo) {
        self.participants
            .entry(info.session_id)
            .and_modify(|entry| entry.info = info.clone())
            .or_insert_with(|| ParticipantEntry {
                info,
                streams: HashMap::new(),
            });
    }

    /// Removes a participant and hands back its streams.
    pub fn remove(&self, session_id: SessionId) -> Vec<RemoteStream> {
        self.participants
            .remove(&session_id)
            .map(|(_, entry)| entry.streams.into_values().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, session_id: SessionId) -> Option<ParticipantInfo> {
        self.participants.get(&session_id).map(|e| e.info.clone())
    }

    pub fn find_by_prefix(&self, prefix: &str) -> Option<ParticipantInfo> {
        self.participants
            .iter()
            .find(|entry| entry.info.track_lookup_prefix == prefix)
            .map(|entry| entry.info.clone())
    }

    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(|e| e.info.clone()).collect()
    }

    /// Binds `stream` to its slot, returning whatever stream it replaced.
    ///
    /// Returns `None` without binding if the participant is unknown.
    pub fn attach_stream(&self, session_id: SessionId, stream: RemoteStream) -> Option<RemoteStream> {
        let mut entry = self.participants.get_mut(&session_id)?;
        entry.streams.insert(stream.track_type, stream)
    }

    pub fn stream(&self, session_id: SessionId, track_type: TrackType) -> Option<RemoteStream> {
        self.participants
            .get(&session_id)
            .and_then(|e| e.streams.get(&track_type).cloned())
    }

    pub fn detach_stream(&self, session_id: SessionId, track_type: TrackType) -> Option<RemoteStream> {
        self.participants
            .get_mut(&session_id)
            .and_then(|mut e| e.streams.remove(&track_type))
    }

    pub fn has_remote_streams(&self) -> bool {
        self.participants.iter().any(|e| !e.streams.is_empty())
    }

    pub fn park_orphan(&self, orphan: OrphanedTrack) {
        let mut orphans = self.orphans.lock();
        orphans.retain(|o| o.stream.stream_id != orphan.stream.stream_id);
        orphans.push(orphan);
    }

    /// Removes and returns the orphans whose stream ids carry `prefix`.
    pub fn take_orphans(&self, prefix: &str) -> Vec<OrphanedTrack> {
        let mut orphans = self.orphans.lock();
        let (matching, rest) = orphans
            .drain(..)
            .partition(|o| o.track_lookup_prefix == prefix);
        *orphans = rest;
        matching
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.lock().len()
    }

    pub fn set_local_published(&self, track_type: TrackType, published: bool) {
        let mut local = self.local_published.lock();
        if published {
            local.insert(track_type);
        } else {
            local.remove(&track_type);
        }
    }

    pub fn local_published(&self) -> Vec<TrackType> {
        let mut published: Vec<_> = self.local_published.lock().iter().copied().collect();
        published.sort();
        published
    }
}
