//! Media streams.

use crate::track::{MediaTrack, TrackKind};

/// A set of tracks broadcast together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Create a stream from tracks.
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    /// The first video track, if any.
    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.video_tracks().next()
    }

    /// Returns true if every track has ended.
    pub fn is_ended(&self) -> bool {
        self.tracks.iter().all(MediaTrack::is_ended)
    }

    /// End every track.
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
