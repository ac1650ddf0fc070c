//! Session controller.
//!
//! Drives the session through `Idle → Capturing → AwaitingCropDecision →
//! Broadcasting → Idle`. Lifecycle operations are serialized; viewer
//! signaling is handled concurrently with them.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use livecast_capture::{CaptureSource, MediaStream, MediaTrack, RegionCompositor};
use livecast_ipc::{
    CropRegion, EngineEvent, IdentityProvider, SessionPhase, SessionSnapshot, SignalMessage,
    SignalingChannel, StopReason,
};
use livecast_transport::PeerTransportFactory;

use crate::admission::ViewerAdmissionQueue;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::{self, AlertKind, HealthAlert, TrackWatch, WatchConfig};
use crate::notify::Notifier;
use crate::peers::PeerConnectionManager;
use crate::session::{BroadcastSession, SharedSession};
use crate::EngineResult;

/// Resources owned by the running session, guarded by the lifecycle lock.
#[derive(Default)]
struct Pipeline {
    compositor: Option<RegionCompositor>,
    watch: Option<TrackWatch>,
    drain: Option<JoinHandle<()>>,
}

struct ControllerInner {
    config: EngineConfig,
    source: Arc<dyn CaptureSource>,
    identity: Arc<dyn IdentityProvider>,
    signaling: Arc<dyn SignalingChannel>,
    notifier: Notifier,
    session: SharedSession,
    peers: Arc<PeerConnectionManager>,
    admission: Arc<ViewerAdmissionQueue>,
    pipeline: Mutex<Pipeline>,
    alerts: mpsc::UnboundedSender<HealthAlert>,
    supervisor: CancellationToken,
}

/// Public control surface of the broadcast session manager.
///
/// Cloning yields another handle to the same controller. Must be created
/// inside a Tokio runtime.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn CaptureSource>,
        factory: Arc<dyn PeerTransportFactory>,
        identity: Arc<dyn IdentityProvider>,
        signaling: Arc<dyn SignalingChannel>,
        event_tx: crossbeam_channel::Sender<EngineEvent>,
    ) -> Self {
        let notifier = Notifier::new(event_tx);
        let session: SharedSession =
            Arc::new(RwLock::new(BroadcastSession::new(identity.broadcaster_id())));
        let (alerts, alerts_rx) = mpsc::unbounded_channel();

        let peers = Arc::new(PeerConnectionManager::new(
            factory,
            Arc::clone(&signaling),
            Arc::clone(&session),
            notifier.clone(),
            alerts.clone(),
            config.retry_policy(),
            watch_config(&config, true),
        ));

        let inner = Arc::new(ControllerInner {
            config,
            source,
            identity,
            signaling,
            notifier,
            session,
            peers,
            admission: Arc::new(ViewerAdmissionQueue::new()),
            pipeline: Mutex::new(Pipeline::default()),
            alerts,
            supervisor: CancellationToken::new(),
        });

        tokio::spawn(supervise(
            Arc::downgrade(&inner),
            alerts_rx,
            inner.supervisor.clone(),
        ));

        Self { inner }
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.session.read().phase()
    }

    pub fn session_id(&self) -> String {
        self.inner.session.read().id().to_string()
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.admission.len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let compositor_view = self.inner.pipeline.try_lock().ok().map(|pipeline| {
            let effective = pipeline
                .compositor
                .as_ref()
                .and_then(|c| c.effective_region());
            (effective, pipeline.compositor.is_some())
        });

        let session = self.inner.session.read();
        let (effective_crop, compositing) =
            compositor_view.unwrap_or_else(|| (session.crop(), session.crop().is_some()));

        SessionSnapshot {
            phase: session.phase(),
            session_id: (!session.phase().is_idle()).then(|| session.id().to_string()),
            viewer_count: self.inner.peers.len(),
            pending_viewers: self.inner.admission.len(),
            effective_crop: effective_crop.or(session.crop()),
            compositing,
        }
    }

    /// Acquire and validate a capture.
    ///
    /// A running session is stopped first.
    #[instrument(name = "start_capture", skip(self))]
    pub async fn start_capture(&self) -> EngineResult<()> {
        let inner = &self.inner;
        let mut pipeline = inner.pipeline.lock().await;

        if !self.phase().is_idle() {
            info!("Capture already active, restarting");
            self.teardown(&mut pipeline, StopReason::Restarted).await;
        }

        let broadcaster_id = inner.identity.broadcaster_id();
        let (epoch, cancel) = self.transition(|s| {
            s.begin_capture(broadcaster_id);
            (s.epoch(), s.cancel_token().clone())
        });
        inner.notifier.status("Requesting screen capture");

        let stream = match inner.source.start().await {
            Ok(stream) => stream,
            Err(e) => return Err(self.abort_capture(EngineError::from(e), None)),
        };

        if let Err(e) = health::check_capture(
            &stream,
            inner.config.capture_ready_retries,
            inner.config.capture_ready_interval(),
        )
        .await
        {
            return Err(self.abort_capture(e, Some(&stream)));
        }

        info!(stream_id = %stream.id(), epoch, "Capture validated");
        let tracks = stream.tracks().to_vec();
        self.transition(|s| s.capture_ready(stream));

        pipeline.watch = Some(health::spawn_track_watch(
            &tracks,
            epoch,
            None,
            watch_config(&inner.config, false),
            inner.alerts.clone(),
            cancel.child_token(),
        ));

        inner
            .notifier
            .status("Capture ready. Confirm or skip the crop to start broadcasting");
        Ok(())
    }

    fn abort_capture(&self, error: EngineError, stream: Option<&MediaStream>) -> EngineError {
        warn!("Capture rejected: {}", error);

        if let Some(stream) = stream {
            stream.stop();
        }
        self.inner.source.stop();

        self.transition(|s| {
            s.cancel_token().cancel();
            s.reset();
        });
        self.inner.notifier.error(&error, None, false);
        error
    }

    /// Broadcast only `region` of the capture.
    #[instrument(name = "confirm_crop", skip(self))]
    pub async fn confirm_crop(&self, region: CropRegion) -> EngineResult<()> {
        self.enter_broadcast(Some(region), "confirm crop").await
    }

    /// Broadcast the full capture.
    #[instrument(name = "skip_crop", skip(self))]
    pub async fn skip_crop(&self) -> EngineResult<()> {
        self.enter_broadcast(None, "skip crop").await
    }

    async fn enter_broadcast(
        &self,
        region: Option<CropRegion>,
        action: &'static str,
    ) -> EngineResult<()> {
        let inner = &self.inner;
        let mut pipeline = inner.pipeline.lock().await;

        let (phase, source, epoch, cancel, broadcaster_id) = {
            let s = inner.session.read();
            (
                s.phase(),
                s.source().cloned(),
                s.epoch(),
                s.cancel_token().clone(),
                s.broadcaster_id().to_string(),
            )
        };

        if phase != SessionPhase::AwaitingCropDecision {
            return Err(self.reject_broadcast(EngineError::InvalidState { action, phase }));
        }

        let (source, video) = match ready_video(source) {
            Ok(found) => found,
            Err(e) => return Err(self.reject_broadcast(e)),
        };

        let (stream, compositor) = match region.filter(|r| r.enabled && !r.is_empty()) {
            Some(region) => self.composite(&source, video, region, &cancel).await,
            None => (source.clone(), None),
        };

        if let Err(e) = health::check_broadcast_ready(Some(&stream)) {
            if let Some(mut compositor) = compositor {
                compositor.shutdown().await;
            }
            return Err(self.reject_broadcast(e));
        }

        let effective = compositor
            .as_ref()
            .map(|c| c.effective_region().unwrap_or_else(|| c.requested_region()));
        let compositing = compositor.is_some();

        let mut watched: Vec<MediaTrack> = source.tracks().to_vec();
        for track in stream.tracks() {
            if !watched.contains(track) {
                watched.push(track.clone());
            }
        }

        if let Some(watch) = pipeline.watch.take() {
            watch.stop().await;
        }
        pipeline.compositor = compositor;

        let session_id = self.transition(|s| {
            s.start_broadcast(stream, effective);
            s.id().to_string()
        });
        info!(session_id = %session_id, compositing, "Broadcasting");

        let start = SignalMessage::StreamStart {
            from: broadcaster_id,
            stream_id: session_id,
        };
        if let Err(e) = inner.signaling.send(start) {
            warn!("Failed to announce stream start: {}", e);
        }

        pipeline.watch = Some(health::spawn_track_watch(
            &watched,
            epoch,
            None,
            watch_config(&inner.config, true),
            inner.alerts.clone(),
            cancel.child_token(),
        ));
        pipeline.drain = Some(self.spawn_drain(cancel));

        inner.notifier.status("Broadcasting");
        Ok(())
    }

    async fn composite(
        &self,
        source: &MediaStream,
        video: MediaTrack,
        region: CropRegion,
        cancel: &CancellationToken,
    ) -> (MediaStream, Option<RegionCompositor>) {
        let mut compositor = RegionCompositor::start(
            video,
            region,
            self.inner.config.compositor_config(),
            cancel.child_token(),
        );

        if compositor.wait_broadcastable().await {
            let mut tracks = vec![compositor.output_track().clone()];
            tracks.extend(source.audio_tracks().cloned());
            return (MediaStream::new(tracks), Some(compositor));
        }

        // The crop was asked for explicitly; sending the full capture instead
        // exposes more than the broadcaster chose to share.
        warn!(?region, "Cropped stream not ready, broadcasting the full capture");
        self.inner
            .notifier
            .status("Crop could not be applied; broadcasting the full capture");
        compositor.shutdown().await;
        (source.clone(), None)
    }

    fn reject_broadcast(&self, error: EngineError) -> EngineError {
        warn!("Cannot start broadcasting: {}", error);
        self.inner.notifier.error(&error, None, false);
        error
    }

    fn spawn_drain(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let admission = Arc::clone(&self.inner.admission);
        let peers = Arc::clone(&self.inner.peers);
        let notifier = self.inner.notifier.clone();
        let stagger = self.inner.config.admission_stagger();

        tokio::spawn(async move {
            for (viewer_id, error) in admission.drain(&peers, stagger, &cancel).await {
                notifier.error(&error, Some(&viewer_id), false);
            }
        })
    }

    /// Stop the session. Stopping an idle session does nothing.
    #[instrument(name = "stop_broadcast", skip(self))]
    pub async fn stop(&self) -> EngineResult<()> {
        let mut pipeline = self.inner.pipeline.lock().await;

        if self.phase().is_idle() {
            debug!("Already idle, ignoring stop");
            return Ok(());
        }

        self.teardown(&mut pipeline, StopReason::UserRequested).await;
        Ok(())
    }

    /// Tear the session down and return to idle.
    ///
    /// Periodic tasks stop first, then connections close, then media tracks
    /// end, then drawing surfaces are released.
    async fn teardown(&self, pipeline: &mut Pipeline, reason: StopReason) {
        let inner = &self.inner;

        let (was_broadcasting, broadcaster_id, source, broadcast) = {
            let mut s = inner.session.write();
            s.cancel_token().cancel();
            let (source, broadcast) = s.detach_streams();
            (
                s.phase().is_broadcasting(),
                s.broadcaster_id().to_string(),
                source,
                broadcast,
            )
        };
        info!(?reason, "Tearing down session");

        if let Some(watch) = pipeline.watch.take() {
            watch.stop().await;
        }
        if let Some(drain) = pipeline.drain.take() {
            drain.abort();
            let _ = drain.await;
        }
        if let Some(compositor) = pipeline.compositor.as_mut() {
            compositor.stop_loop().await;
        }

        inner.peers.close_all().await;

        if let Some(stream) = &source {
            stream.stop();
        }
        inner.source.stop();

        if let Some(mut compositor) = pipeline.compositor.take() {
            compositor.release();
        }
        if let Some(stream) = &broadcast {
            stream.stop();
        }

        if was_broadcasting {
            let stop = SignalMessage::StreamStop {
                from: broadcaster_id,
            };
            if let Err(e) = inner.signaling.send(stop) {
                warn!("Failed to announce stream stop: {}", e);
            }
        }

        self.transition(|s| {
            inner.admission.clear();
            s.reset();
        });
        inner.notifier.status(reason.message());
    }

    /// Handle a message received from a viewer.
    #[instrument(skip(self, message), fields(kind = message.name()))]
    pub async fn handle_signal(&self, message: SignalMessage) -> EngineResult<()> {
        let inner = &self.inner;

        match message {
            SignalMessage::ViewerJoined { viewer_id } => {
                self.on_join(viewer_id);
                Ok(())
            }
            SignalMessage::ViewerLeft { viewer_id } => {
                inner.admission.remove(&viewer_id);
                if inner.peers.close_connection_for(&viewer_id).await {
                    info!(viewer_id = %viewer_id, "Viewer left");
                }
                Ok(())
            }
            SignalMessage::Answer {
                from,
                session_description,
            } => {
                let result = inner.peers.handle_answer(&from, session_description).await;
                self.report_viewer(&from, result)
            }
            SignalMessage::IceCandidate {
                from: Some(from),
                candidate,
                ..
            } => {
                let result = inner.peers.handle_remote_candidate(&from, candidate).await;
                self.report_viewer(&from, result)
            }
            other => {
                debug!("Ignoring {} message", other.name());
                Ok(())
            }
        }
    }

    fn on_join(&self, viewer_id: String) {
        let queued = {
            let session = self.inner.session.read();
            session.broadcast_target().is_none() && self.inner.admission.enqueue(&viewer_id)
        };
        if queued {
            info!(viewer_id = %viewer_id, "Viewer waiting for the stream");
            return;
        }
        if !self.phase().is_broadcasting() {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let inner = &this.inner;
            match inner.admission.admit(&inner.peers, &viewer_id).await {
                Ok(admission) => debug!(viewer_id = %viewer_id, ?admission, "Viewer admitted"),
                Err(e) => inner.notifier.error(&e, Some(&viewer_id), false),
            }
        });
    }

    fn report_viewer(&self, viewer_id: &str, result: EngineResult<()>) -> EngineResult<()> {
        if let Err(e) = &result {
            warn!(viewer_id, "Viewer signaling failed: {}", e);
            self.inner.notifier.error(e, Some(viewer_id), false);
        }
        result
    }

    async fn handle_alert(&self, alert: HealthAlert) {
        let mut pipeline = self.inner.pipeline.lock().await;

        {
            let session = self.inner.session.read();
            if session.epoch() != alert.epoch || session.phase().is_idle() {
                debug!(?alert, "Stale health alert ignored");
                return;
            }
        }

        let failure = alert.to_error();
        let reason = match alert.kind {
            AlertKind::Muted => StopReason::TrackMuted {
                track_id: alert.track_id.clone(),
            },
            AlertKind::Ended => StopReason::CaptureEnded,
        };
        error!(
            track_id = %alert.track_id,
            viewer_id = alert.viewer_id.as_deref().unwrap_or("-"),
            "Broadcast health failure: {}",
            failure
        );

        self.teardown(&mut pipeline, reason).await;
        self.inner
            .notifier
            .error(&failure, None, failure.is_session_fatal());
    }

    /// Stop the session and the health supervisor.
    #[instrument(name = "controller_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        {
            let mut pipeline = self.inner.pipeline.lock().await;
            if !self.phase().is_idle() {
                self.teardown(&mut pipeline, StopReason::Shutdown).await;
            }
            self.inner.admission.clear();
        }
        self.inner.supervisor.cancel();
    }

    fn transition<R>(&self, f: impl FnOnce(&mut BroadcastSession) -> R) -> R {
        let (previous, current, result) = {
            let mut session = self.inner.session.write();
            let previous = session.phase();
            let result = f(&mut session);
            (previous, session.phase(), result)
        };

        if previous != current {
            debug!(
                previous = %previous.name(),
                current = %current.name(),
                "Phase transition"
            );
            self.inner
                .notifier
                .send(EngineEvent::PhaseChanged { previous, current });
        }
        result
    }
}

fn watch_config(config: &EngineConfig, react_to_mute: bool) -> WatchConfig {
    WatchConfig {
        poll_interval: config.mute_poll_interval(),
        max_checks: config.mute_poll_max_checks,
        react_to_mute,
    }
}

fn ready_video(source: Option<MediaStream>) -> EngineResult<(MediaStream, MediaTrack)> {
    health::check_broadcast_ready(source.as_ref())?;
    let source = source.ok_or(EngineError::NoStream)?;
    let video = source.video_track().cloned().ok_or(EngineError::NoStream)?;
    Ok((source, video))
}

async fn supervise(
    inner: Weak<ControllerInner>,
    mut alerts: mpsc::UnboundedReceiver<HealthAlert>,
    shutdown: CancellationToken,
) {
    loop {
        let alert = tokio::select! {
            _ = shutdown.cancelled() => break,
            alert = alerts.recv() => match alert {
                Some(alert) => alert,
                None => break,
            },
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        SessionController { inner }.handle_alert(alert).await;
    }

    debug!("Health supervisor stopped");
}
