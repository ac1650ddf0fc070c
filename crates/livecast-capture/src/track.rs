//! Media tracks and their health state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::frame::VideoFrame;

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Liveness of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackReadyState {
    /// Created but not yet producing.
    Pending,

    /// Producing media.
    Live,

    /// Stopped for good.
    Ended,
}

/// Observable health of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackStatus {
    pub ready_state: TrackReadyState,
    pub muted: bool,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    status: watch::Sender<TrackStatus>,
    frames: watch::Sender<Option<VideoFrame>>,
}

/// A single audio or video track.
///
/// Cloning yields another handle to the same track. The producer (a capture
/// backend or the compositor) drives the status; consumers observe it
/// through [`MediaTrack::subscribe`].
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a pending, enabled, unmuted track.
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        let (status, _) = watch::channel(TrackStatus {
            ready_state: TrackReadyState::Pending,
            muted: false,
        });
        let (frames, _) = watch::channel(None);

        Self {
            inner: Arc::new(TrackInner {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                status,
                frames,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Current status.
    pub fn status(&self) -> TrackStatus {
        *self.inner.status.borrow()
    }

    pub fn ready_state(&self) -> TrackReadyState {
        self.status().ready_state
    }

    pub fn is_muted(&self) -> bool {
        self.status().muted
    }

    pub fn is_live(&self) -> bool {
        self.ready_state() == TrackReadyState::Live
    }

    pub fn is_ended(&self) -> bool {
        self.ready_state() == TrackReadyState::Ended
    }

    /// Enabled, unmuted and live.
    pub fn is_broadcastable(&self) -> bool {
        let status = self.status();
        self.is_enabled() && !status.muted && status.ready_state == TrackReadyState::Live
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<TrackStatus> {
        self.inner.status.subscribe()
    }

    /// Subscribe to published frames.
    pub fn subscribe_frames(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.inner.frames.subscribe()
    }

    /// The most recently published frame.
    pub fn latest_frame(&self) -> Option<VideoFrame> {
        self.inner.frames.borrow().clone()
    }

    /// Report a mute change from the platform. Ignored once ended.
    pub fn set_muted(&self, muted: bool) {
        let changed = self.inner.status.send_if_modified(|status| {
            if status.ready_state == TrackReadyState::Ended || status.muted == muted {
                return false;
            }
            status.muted = muted;
            true
        });

        if changed {
            debug!(track_id = %self.id(), kind = %self.kind(), muted, "Track mute changed");
        }
    }

    /// Move a pending track to live.
    pub fn mark_live(&self) {
        self.inner.status.send_if_modified(|status| {
            if status.ready_state != TrackReadyState::Pending {
                return false;
            }
            status.ready_state = TrackReadyState::Live;
            true
        });
    }

    /// Publish a frame. The first frame makes a pending track live.
    pub fn publish(&self, frame: VideoFrame) {
        if self.is_ended() {
            trace!(track_id = %self.id(), "Dropping frame for ended track");
            return;
        }
        self.inner.frames.send_replace(Some(frame));
        self.mark_live();
    }

    /// End the track. Ending is permanent.
    pub fn stop(&self) {
        let changed = self.inner.status.send_if_modified(|status| {
            if status.ready_state == TrackReadyState::Ended {
                return false;
            }
            status.ready_state = TrackReadyState::Ended;
            true
        });

        if changed {
            self.inner.frames.send_replace(None);
            debug!(track_id = %self.id(), kind = %self.kind(), "Track ended");
        }
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for MediaTrack {}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("status", &self.status())
            .finish()
    }
}

/// Poll a track until it is live.
///
/// Checks up to `retries + 1` times, `interval` apart. Returns false early
/// if the track ends.
pub async fn wait_until_live(track: &MediaTrack, retries: u32, interval: Duration) -> bool {
    for attempt in 0..=retries {
        match track.ready_state() {
            TrackReadyState::Live => return true,
            TrackReadyState::Ended => return false,
            TrackReadyState::Pending => {}
        }

        if attempt < retries {
            trace!(track_id = %track.id(), attempt, "Track not live yet");
            tokio::time::sleep(interval).await;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CaptureTimestamp;
    use bytes::Bytes;
    use std::time::Instant;

    fn frame() -> VideoFrame {
        VideoFrame::new(
            Bytes::from(vec![0u8; 4]),
            1,
            1,
            CaptureTimestamp::now(Instant::now()),
            0,
        )
    }

    #[test]
    fn test_new_track_is_pending() {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        assert_eq!(track.ready_state(), TrackReadyState::Pending);
        assert!(track.is_enabled());
        assert!(!track.is_muted());
        assert!(!track.is_broadcastable());
    }

    #[test]
    fn test_publish_makes_live() {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        track.publish(frame());
        assert!(track.is_live());
        assert!(track.is_broadcastable());
        assert!(track.latest_frame().is_some());
    }

    #[test]
    fn test_muted_track_not_broadcastable() {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        track.mark_live();
        track.set_muted(true);
        assert!(!track.is_broadcastable());
        track.set_muted(false);
        assert!(track.is_broadcastable());
    }

    #[test]
    fn test_stop_is_permanent() {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        track.mark_live();
        track.stop();
        track.mark_live();
        track.publish(frame());
        track.set_muted(true);

        assert!(track.is_ended());
        assert!(!track.is_muted());
        assert!(track.latest_frame().is_none());
    }

    #[test]
    fn test_subscribers_see_mute() {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        let mut rx = track.subscribe();
        track.set_muted(true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_live_times_out() {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        let started = tokio::time::Instant::now();

        assert!(!wait_until_live(&track, 3, Duration::from_millis(500)).await);
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_live_succeeds_later() {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        let producer = track.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            producer.mark_live();
        });

        assert!(wait_until_live(&track, 10, Duration::from_millis(500)).await);
    }
}
