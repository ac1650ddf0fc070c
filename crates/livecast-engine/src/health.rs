//! Track health checkpoints.
//!
//! A track may only reach a viewer while it is enabled, unmuted and live.
//! The checks run at fixed points of the session lifecycle:
//!
//! - capture: right after the capture is acquired ([`check_capture`])
//! - attach: before tracks are attached to a connection ([`check_attach`])
//! - offer: before an offer is created ([`check_before_offer`])
//! - continuous: while broadcasting ([`spawn_track_watch`])

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use livecast_capture::{wait_until_live, MediaStream, MediaTrack, TrackReadyState};

use crate::error::EngineError;
use crate::EngineResult;

/// A track is usable when it is live and neither muted nor disabled.
pub fn check_track(track: &MediaTrack) -> EngineResult<()> {
    let track_id = || track.id().to_string();

    if track.is_muted() {
        return Err(EngineError::TrackMuted {
            track_id: track_id(),
        });
    }
    if !track.is_enabled() {
        return Err(EngineError::TrackDisabled {
            track_id: track_id(),
        });
    }
    if !track.is_live() {
        return Err(EngineError::TrackNotLive {
            track_id: track_id(),
        });
    }
    Ok(())
}

/// Validate a freshly acquired capture.
///
/// Muted tracks reject the capture outright; pending tracks are polled
/// until live.
pub async fn check_capture(
    stream: &MediaStream,
    retries: u32,
    interval: Duration,
) -> EngineResult<()> {
    if stream.video_track().is_none() {
        return Err(EngineError::Device("capture has no video track".to_string()));
    }

    let reject_muted = || {
        stream
            .tracks()
            .iter()
            .find(|t| t.is_muted())
            .map_or(Ok(()), |t| {
                Err(EngineError::TrackMuted {
                    track_id: t.id().to_string(),
                })
            })
    };

    reject_muted()?;

    for track in stream.tracks() {
        if !wait_until_live(track, retries, interval).await {
            return Err(EngineError::TrackNotLive {
                track_id: track.id().to_string(),
            });
        }
    }

    reject_muted()
}

/// Validate tracks before they are attached to a connection.
pub fn check_attach(tracks: &[MediaTrack]) -> EngineResult<()> {
    tracks.iter().try_for_each(check_track)
}

/// Validate tracks before an offer, including the ones already attached.
pub fn check_before_offer(tracks: &[MediaTrack], attached: &[MediaTrack]) -> EngineResult<()> {
    tracks
        .iter()
        .chain(attached.iter().filter(|t| !tracks.contains(t)))
        .try_for_each(check_track)
}

/// Final readiness validation before broadcasting.
pub fn check_broadcast_ready(stream: Option<&MediaStream>) -> EngineResult<()> {
    let stream = stream.ok_or(EngineError::NoStream)?;
    let video = stream.video_track().ok_or(EngineError::NoStream)?;
    check_track(video)
}

/// What the continuous monitor observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Muted,
    Ended,
}

/// A health failure reported by the continuous monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthAlert {
    /// Session epoch the watched tracks belong to.
    pub epoch: u64,
    pub track_id: String,
    pub kind: AlertKind,

    /// Set when the watch belongs to one viewer connection.
    pub viewer_id: Option<String>,
}

impl HealthAlert {
    pub fn to_error(&self) -> EngineError {
        match self.kind {
            AlertKind::Muted => EngineError::TrackMuted {
                track_id: self.track_id.clone(),
            },
            AlertKind::Ended => EngineError::CaptureEnded,
        }
    }
}

/// Continuous monitor settings.
#[derive(Debug, Clone, Copy)]
pub struct WatchConfig {
    pub poll_interval: Duration,
    pub max_checks: u32,

    /// Report mutes. When false only ended tracks are reported.
    pub react_to_mute: bool,
}

/// Running continuous monitor. Dropping it aborts the watchers.
pub struct TrackWatch {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl TrackWatch {
    /// Cancel the watchers and wait for them to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        while self.tasks.join_next().await.is_some() {}
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Watch `tracks` until `cancel` fires, reporting the first failure of
/// each track to `alerts`.
pub fn spawn_track_watch(
    tracks: &[MediaTrack],
    epoch: u64,
    viewer_id: Option<String>,
    config: WatchConfig,
    alerts: mpsc::UnboundedSender<HealthAlert>,
    cancel: CancellationToken,
) -> TrackWatch {
    let mut tasks = JoinSet::new();

    for track in tracks {
        tasks.spawn(watch_track(
            track.clone(),
            epoch,
            viewer_id.clone(),
            config,
            alerts.clone(),
            cancel.clone(),
        ));
    }

    debug!(
        tracks = tracks.len(),
        epoch,
        viewer_id = viewer_id.as_deref().unwrap_or("-"),
        react_to_mute = config.react_to_mute,
        "Track watch started"
    );

    TrackWatch { cancel, tasks }
}

async fn watch_track(
    track: MediaTrack,
    epoch: u64,
    viewer_id: Option<String>,
    config: WatchConfig,
    alerts: mpsc::UnboundedSender<HealthAlert>,
    cancel: CancellationToken,
) {
    let mut status = track.subscribe();
    let mut ticker = tokio::time::interval_at(
        Instant::now() + config.poll_interval,
        config.poll_interval.max(Duration::from_millis(1)),
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut polling = config.react_to_mute && config.max_checks > 0;
    let mut checks = 0u32;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let current = track.status();
        let kind = if current.ready_state == TrackReadyState::Ended {
            Some(AlertKind::Ended)
        } else if config.react_to_mute && current.muted {
            Some(AlertKind::Muted)
        } else {
            None
        };

        if let Some(kind) = kind {
            warn!(track_id = %track.id(), ?kind, epoch, "Track health failure");
            let _ = alerts.send(HealthAlert {
                epoch,
                track_id: track.id().to_string(),
                kind,
                viewer_id,
            });
            return;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick(), if polling => {
                checks += 1;
                if checks >= config.max_checks {
                    polling = false;
                    info!(track_id = %track.id(), checks, "Mute polling finished, still watching for mute events");
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use livecast_capture::{CaptureTimestamp, TrackKind, VideoFrame};

    fn live_track(kind: TrackKind) -> MediaTrack {
        let track = MediaTrack::new(kind, "t");
        track.mark_live();
        track
    }

    fn watch_config() -> WatchConfig {
        WatchConfig {
            poll_interval: Duration::from_secs(2),
            max_checks: 30,
            react_to_mute: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_rejects_muted_track() {
        let video = live_track(TrackKind::Video);
        video.set_muted(true);
        let stream = MediaStream::new(vec![video]);

        let err = check_capture(&stream, 10, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TrackMuted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_waits_for_live() {
        let video = MediaTrack::new(TrackKind::Video, "screen");
        let stream = MediaStream::new(vec![video.clone()]);

        let producer = video.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            producer.publish(VideoFrame::new(
                Bytes::from(vec![1u8; 4]),
                1,
                1,
                CaptureTimestamp::now(std::time::Instant::now()),
                0,
            ));
        });

        check_capture(&stream, 10, Duration::from_millis(500))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_never_live() {
        let stream = MediaStream::new(vec![MediaTrack::new(TrackKind::Video, "screen")]);

        let err = check_capture(&stream, 3, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TrackNotLive { .. }));
    }

    #[tokio::test]
    async fn test_capture_without_video_is_device_error() {
        let stream = MediaStream::new(vec![live_track(TrackKind::Audio)]);
        let err = check_capture(&stream, 0, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, EngineError::Device(_)));
    }

    #[test]
    fn test_attach_check_order() {
        let muted = live_track(TrackKind::Video);
        muted.set_muted(true);
        muted.set_enabled(false);
        assert!(matches!(
            check_attach(&[muted]),
            Err(EngineError::TrackMuted { .. })
        ));

        let disabled = live_track(TrackKind::Video);
        disabled.set_enabled(false);
        assert!(matches!(
            check_attach(&[disabled]),
            Err(EngineError::TrackDisabled { .. })
        ));

        let pending = MediaTrack::new(TrackKind::Video, "pending");
        assert!(matches!(
            check_attach(&[pending]),
            Err(EngineError::TrackNotLive { .. })
        ));

        assert!(check_attach(&[live_track(TrackKind::Video)]).is_ok());
    }

    #[test]
    fn test_offer_check_covers_attached_tracks() {
        let selected = live_track(TrackKind::Video);
        let stale = live_track(TrackKind::Audio);
        stale.set_muted(true);

        assert!(check_before_offer(&[selected.clone()], &[selected.clone()]).is_ok());
        assert!(matches!(
            check_before_offer(&[selected.clone()], &[selected, stale]),
            Err(EngineError::TrackMuted { .. })
        ));
    }

    #[test]
    fn test_broadcast_ready() {
        assert!(matches!(
            check_broadcast_ready(None),
            Err(EngineError::NoStream)
        ));

        let audio_only = MediaStream::new(vec![live_track(TrackKind::Audio)]);
        assert!(matches!(
            check_broadcast_ready(Some(&audio_only)),
            Err(EngineError::NoStream)
        ));

        let ok = MediaStream::new(vec![live_track(TrackKind::Video)]);
        assert!(check_broadcast_ready(Some(&ok)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_reports_mute_once() {
        let track = live_track(TrackKind::Video);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watch = spawn_track_watch(
            &[track.clone()],
            7,
            None,
            watch_config(),
            tx,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        track.set_muted(true);

        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.epoch, 7);
        assert_eq!(alert.kind, AlertKind::Muted);
        assert!(matches!(alert.to_error(), EngineError::TrackMuted { .. }));

        watch.stop().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_events_seen_after_polling_cap() {
        let track = live_track(TrackKind::Video);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watch = spawn_track_watch(
            &[track.clone()],
            1,
            Some("viewer-1".into()),
            watch_config(),
            tx,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        track.set_muted(true);

        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.viewer_id.as_deref(), Some("viewer-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_only_watch_ignores_mute() {
        let track = live_track(TrackKind::Video);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watch = spawn_track_watch(
            &[track.clone()],
            1,
            None,
            WatchConfig {
                react_to_mute: false,
                ..watch_config()
            },
            tx,
            CancellationToken::new(),
        );

        track.set_muted(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        track.stop();
        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.kind, AlertKind::Ended);
        assert!(matches!(alert.to_error(), EngineError::CaptureEnded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_watchers() {
        let track = live_track(TrackKind::Video);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let watch = spawn_track_watch(&[track.clone()], 1, None, watch_config(), tx, cancel.clone());

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        track.set_muted(true);

        watch.stop().await;
        assert!(rx.recv().await.is_none());
    }
}
