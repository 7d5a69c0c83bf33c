use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::media::MediaSubsession;

/// A named stream endpoint (e.g. `live`, `cams/front`) with its tracks.
///
/// Tracks are numbered in insertion order (`track0`, `track1`, ...) and
/// the numbering never changes afterwards.
pub struct MediaSession {
    name: String,
    subsessions: IndexMap<String, Arc<dyn MediaSubsession>>,
}

impl MediaSession {
    /// `name` is the URL path without surrounding slashes.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim_matches('/').to_string(),
            subsessions: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a track and return its id.
    pub fn add_subsession(&mut self, subsession: Arc<dyn MediaSubsession>) -> String {
        let track_id = format!("track{}", self.subsessions.len());
        self.subsessions.insert(track_id.clone(), subsession);
        track_id
    }

    pub fn subsession(&self, track_id: &str) -> Option<Arc<dyn MediaSubsession>> {
        self.subsessions.get(track_id).cloned()
    }

    /// Tracks in SDP order.
    pub fn tracks(&self) -> impl Iterator<Item = (&str, &Arc<dyn MediaSubsession>)> {
        self.subsessions.iter().map(|(id, sub)| (id.as_str(), sub))
    }

    pub fn track_count(&self) -> usize {
        self.subsessions.len()
    }
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("name", &self.name)
            .field("tracks", &self.subsessions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registry of media sessions, keyed by name.
#[derive(Clone, Default)]
pub struct MediaSessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<MediaSession>>>>,
}

impl MediaSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a media session. Replaces any existing one with the same name.
    pub fn add(&self, session: MediaSession) -> Arc<MediaSession> {
        let session = Arc::new(session);
        let name = session.name().to_string();
        tracing::info!(name = %name, tracks = session.track_count(), "media session registered");
        self.sessions.write().insert(name, session.clone());
        session
    }

    pub fn get(&self, name: &str) -> Option<Arc<MediaSession>> {
        self.sessions.read().get(name.trim_matches('/')).cloned()
    }

    /// Resolve a request URL path to a media session and optional track.
    ///
    /// `live` and `live/` name the session itself; `live/track0` names a
    /// track of it. An exact session match wins over the track split, so
    /// names may contain slashes.
    pub fn resolve(&self, path: &str) -> Option<(Arc<MediaSession>, Option<String>)> {
        let path = path.trim_matches('/');
        if let Some(session) = self.get(path) {
            return Some((session, None));
        }
        let (name, track) = path.rsplit_once('/')?;
        let session = self.get(name)?;
        Some((session, Some(track.to_string())))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::media::{FrameSource, RtpSink};
    use crate::random::RandomSource;
    use crate::transport::MediaTransport;

    struct NullSubsession;

    impl MediaSubsession for NullSubsession {
        fn payload_type(&self) -> u8 {
            96
        }
        fn clock_rate(&self) -> u32 {
            90_000
        }
        fn fps(&self) -> u32 {
            25
        }
        fn sdp_lines(&self, track_id: &str) -> Vec<String> {
            vec![format!("a=control:{track_id}")]
        }
        fn new_frame_source(&self, _rng: &dyn RandomSource) -> Result<Box<dyn FrameSource>> {
            unimplemented!()
        }
        fn new_rtp_sink(
            &self,
            _transport: MediaTransport,
            _rng: &dyn RandomSource,
        ) -> Box<dyn RtpSink> {
            unimplemented!()
        }
    }

    #[test]
    fn track_ids_follow_insertion_order() {
        let mut session = MediaSession::new("/live/");
        assert_eq!(session.name(), "live");
        assert_eq!(session.add_subsession(Arc::new(NullSubsession)), "track0");
        assert_eq!(session.add_subsession(Arc::new(NullSubsession)), "track1");
        let ids: Vec<&str> = session.tracks().map(|(id, _)| id).collect();
        assert_eq!(ids, ["track0", "track1"]);
        assert!(session.subsession("track2").is_none());
    }

    #[test]
    fn resolve_session_and_track() {
        let registry = MediaSessionRegistry::new();
        let mut live = MediaSession::new("live");
        live.add_subsession(Arc::new(NullSubsession));
        registry.add(live);
        registry.add(MediaSession::new("cams/front"));

        let (session, track) = registry.resolve("live").unwrap();
        assert_eq!(session.name(), "live");
        assert_eq!(track, None);

        let (_, track) = registry.resolve("live/track0").unwrap();
        assert_eq!(track.as_deref(), Some("track0"));

        let (session, track) = registry.resolve("cams/front/").unwrap();
        assert_eq!(session.name(), "cams/front");
        assert_eq!(track, None);

        assert!(registry.resolve("other").is_none());
        assert!(registry.resolve("other/track0").is_none());
        assert_eq!(registry.len(), 2);
    }
}
