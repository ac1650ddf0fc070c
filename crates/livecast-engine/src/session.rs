//! The process-wide broadcast session.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use livecast_capture::MediaStream;
use livecast_ipc::{CropRegion, SessionPhase};

/// Session state shared between the controller and the connection manager.
pub(crate) type SharedSession = Arc<RwLock<BroadcastSession>>;

/// The single active broadcast.
///
/// A session exists for the whole process; starting a capture begins a new
/// epoch with a fresh identifier and cancellation scope.
#[derive(Debug)]
pub struct BroadcastSession {
    id: String,
    epoch: u64,
    phase: SessionPhase,
    broadcaster_id: String,
    source: Option<MediaStream>,
    broadcast: Option<MediaStream>,
    crop: Option<CropRegion>,
    cancel: CancellationToken,
}

/// What a new viewer connection is built from.
#[derive(Debug, Clone)]
pub(crate) struct BroadcastTarget {
    pub session_id: String,
    pub epoch: u64,
    pub broadcaster_id: String,
    pub stream: MediaStream,
    pub cancel: CancellationToken,
}

fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

impl BroadcastSession {
    pub fn new(broadcaster_id: impl Into<String>) -> Self {
        Self {
            id: new_session_id(),
            epoch: 0,
            phase: SessionPhase::Idle,
            broadcaster_id: broadcaster_id.into(),
            source: None,
            broadcast: None,
            crop: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn broadcaster_id(&self) -> &str {
        &self.broadcaster_id
    }

    /// The captured stream.
    pub fn source(&self) -> Option<&MediaStream> {
        self.source.as_ref()
    }

    /// The stream sent to viewers. Composited when a crop is active.
    pub fn broadcast_stream(&self) -> Option<&MediaStream> {
        self.broadcast.as_ref()
    }

    pub fn crop(&self) -> Option<CropRegion> {
        self.crop
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Start a new epoch for a capture request.
    pub(crate) fn begin_capture(&mut self, broadcaster_id: String) {
        self.id = new_session_id();
        self.epoch += 1;
        self.phase = SessionPhase::Capturing;
        self.broadcaster_id = broadcaster_id;
        self.source = None;
        self.broadcast = None;
        self.crop = None;
        self.cancel = CancellationToken::new();
    }

    pub(crate) fn capture_ready(&mut self, source: MediaStream) {
        self.source = Some(source);
        self.phase = SessionPhase::AwaitingCropDecision;
    }

    /// Enter broadcasting under a fresh identifier.
    pub(crate) fn start_broadcast(&mut self, stream: MediaStream, crop: Option<CropRegion>) {
        self.id = new_session_id();
        self.broadcast = Some(stream);
        self.crop = crop;
        self.phase = SessionPhase::Broadcasting;
    }

    /// Detach the streams ahead of teardown so no new connection can use them.
    pub(crate) fn detach_streams(&mut self) -> (Option<MediaStream>, Option<MediaStream>) {
        (self.source.take(), self.broadcast.take())
    }

    /// Return to idle under a fresh identifier.
    pub(crate) fn reset(&mut self) {
        self.id = new_session_id();
        self.phase = SessionPhase::Idle;
        self.source = None;
        self.broadcast = None;
        self.crop = None;
    }

    /// The stream new viewers should receive, if one is ready.
    pub(crate) fn broadcast_target(&self) -> Option<BroadcastTarget> {
        if !self.phase.is_broadcasting() || self.cancel.is_cancelled() {
            return None;
        }

        self.broadcast.as_ref().map(|stream| BroadcastTarget {
            session_id: self.id.clone(),
            epoch: self.epoch,
            broadcaster_id: self.broadcaster_id.clone(),
            stream: stream.clone(),
            cancel: self.cancel.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecast_capture::{MediaTrack, TrackKind};

    fn stream() -> MediaStream {
        MediaStream::new(vec![MediaTrack::new(TrackKind::Video, "screen")])
    }

    #[test]
    fn test_new_epoch_per_capture() {
        let mut session = BroadcastSession::new("admin");
        let first_id = session.id().to_string();

        session.begin_capture("admin".into());
        assert_eq!(session.epoch(), 1);
        assert_ne!(session.id(), first_id);
        assert_eq!(session.phase(), SessionPhase::Capturing);
    }

    #[test]
    fn test_broadcast_gets_fresh_id() {
        let mut session = BroadcastSession::new("admin");
        session.begin_capture("admin".into());
        session.capture_ready(stream());
        let capture_id = session.id().to_string();

        assert!(session.broadcast_target().is_none());

        session.start_broadcast(stream(), None);
        let target = session.broadcast_target().unwrap();
        assert_ne!(target.session_id, capture_id);
        assert_eq!(target.epoch, 1);
    }

    #[test]
    fn test_no_target_once_cancelled() {
        let mut session = BroadcastSession::new("admin");
        session.begin_capture("admin".into());
        session.capture_ready(stream());
        session.start_broadcast(stream(), None);

        session.cancel_token().cancel();
        assert!(session.broadcast_target().is_none());
    }

    #[test]
    fn test_reset_clears_streams() {
        let mut session = BroadcastSession::new("admin");
        session.begin_capture("admin".into());
        session.capture_ready(stream());
        session.start_broadcast(stream(), Some(CropRegion::new(0, 0, 10, 10)));
        let broadcast_id = session.id().to_string();

        session.reset();
        assert!(session.phase().is_idle());
        assert!(session.source().is_none());
        assert!(session.broadcast_stream().is_none());
        assert!(session.crop().is_none());
        assert_ne!(session.id(), broadcast_id);
    }
}
