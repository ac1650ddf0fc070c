//! Test doubles for the transport and signaling collaborators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use livecast_capture::{MediaStream, MediaTrack, SyntheticConfig, SyntheticSource, TrackKind};
use livecast_ipc::{
    event_channel, EngineEvent, IceCandidate, SessionDescription, SignalMessage, SignalResult,
    SignalingChannel, StaticIdentity,
};
use livecast_transport::{
    ConnectionState, PeerHandle, PeerTransport, PeerTransportFactory, TransportError,
    TransportEvent, TransportResult,
};

use crate::config::EngineConfig;
use crate::controller::SessionController;
use crate::session::{BroadcastSession, SharedSession};

pub(crate) const BROADCASTER_ID: &str = "admin";

/// Peer transport that records what the engine does with it.
pub(crate) struct FakeTransport {
    attached: Mutex<Vec<MediaTrack>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    state: RwLock<ConnectionState>,
    closed: AtomicBool,
    answer_delay: Duration,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl FakeTransport {
    /// Simulate a transport state change.
    pub fn push_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        let _ = self.events_tx.send(TransportEvent::StateChanged(state));
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_track(&self, track: &MediaTrack) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.attached.lock().push(track.clone());
        Ok(())
    }

    fn attached_tracks(&self) -> Vec<MediaTrack> {
        self.attached.lock().clone()
    }

    async fn create_offer(&self) -> TransportResult<SessionDescription> {
        Ok(SessionDescription::offer("v=0\r\ns=fake\r\n"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> TransportResult<()> {
        *self.local.lock() = Some(desc);
        let candidate = IceCandidate::new("candidate:1 1 udp 2122260223 192.0.2.1 50000 typ host")
            .with_mid("0", 0);
        let _ = self.events_tx.send(TransportEvent::LocalCandidate(candidate));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> TransportResult<()> {
        if desc.sdp.starts_with("bad") {
            return Err(TransportError::InvalidDescription(desc.sdp));
        }
        if !self.answer_delay.is_zero() {
            tokio::time::sleep(self.answer_delay).await;
        }
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportResult<()> {
        if self.remote.lock().is_none() {
            return Err(TransportError::Candidate(
                "remote description not set".to_string(),
            ));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Closed;
        Ok(())
    }
}

/// Factory handing out [`FakeTransport`]s.
#[derive(Default)]
pub(crate) struct FakeTransportFactory {
    created: Mutex<Vec<(String, Arc<FakeTransport>)>>,
    create_delay: Duration,
    answer_delay: Duration,
}

impl FakeTransportFactory {
    pub fn with_delay(create_delay: Duration) -> Self {
        Self {
            create_delay,
            ..Default::default()
        }
    }

    /// Applying a remote description takes `answer_delay`.
    pub fn with_answer_delay(answer_delay: Duration) -> Self {
        Self {
            answer_delay,
            ..Default::default()
        }
    }

    pub fn create_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn created(&self) -> Vec<Arc<FakeTransport>> {
        self.created.lock().iter().map(|(_, t)| t.clone()).collect()
    }

    /// Most recent transport created for `viewer_id`.
    pub fn transport_for(&self, viewer_id: &str) -> Option<Arc<FakeTransport>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id == viewer_id)
            .map(|(_, t)| t.clone())
    }
}

#[async_trait]
impl PeerTransportFactory for FakeTransportFactory {
    async fn create(&self, viewer_id: &str) -> TransportResult<PeerHandle> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        let transport = Arc::new(FakeTransport {
            attached: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            state: RwLock::new(ConnectionState::New),
            closed: AtomicBool::new(false),
            answer_delay: self.answer_delay,
            events_tx,
        });
        self.created
            .lock()
            .push((viewer_id.to_string(), transport.clone()));

        Ok(PeerHandle {
            transport,
            events,
        })
    }
}

/// Signaling channel that keeps every outgoing message.
#[derive(Default)]
pub(crate) struct RecordingSignaling {
    sent: Mutex<Vec<SignalMessage>>,
}

impl RecordingSignaling {
    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.sent.lock().iter().filter(|m| m.name() == name).count()
    }

    pub fn offers_to(&self, viewer_id: &str) -> Vec<SignalMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.name() == "offer" && m.recipient() == Some(viewer_id))
            .cloned()
            .collect()
    }
}

impl SignalingChannel for RecordingSignaling {
    fn send(&self, message: SignalMessage) -> SignalResult<()> {
        self.sent.lock().push(message);
        Ok(())
    }
}

/// A live video track and a live audio track.
pub(crate) fn live_stream() -> MediaStream {
    let video = MediaTrack::new(TrackKind::Video, "screen");
    let audio = MediaTrack::new(TrackKind::Audio, "system-audio");
    video.mark_live();
    audio.mark_live();
    MediaStream::new(vec![video, audio])
}

/// A session already broadcasting `stream`.
pub(crate) fn broadcasting_session(stream: MediaStream) -> SharedSession {
    let mut session = BroadcastSession::new(BROADCASTER_ID);
    session.begin_capture(BROADCASTER_ID.to_string());
    session.capture_ready(stream.clone());
    session.start_broadcast(stream, None);
    Arc::new(RwLock::new(session))
}

pub(crate) fn small_source() -> SyntheticConfig {
    SyntheticConfig {
        width: 64,
        height: 48,
        ..Default::default()
    }
}

/// A controller wired to a synthetic source and recording fakes.
pub(crate) struct Harness {
    pub controller: SessionController,
    pub source: Arc<SyntheticSource>,
    pub factory: Arc<FakeTransportFactory>,
    pub signaling: Arc<RecordingSignaling>,
    pub events: Receiver<EngineEvent>,
}

impl Harness {
    pub fn new(source: SyntheticConfig) -> Self {
        Self::with_config(EngineConfig::default(), source)
    }

    pub fn with_config(config: EngineConfig, source: SyntheticConfig) -> Self {
        let source = Arc::new(SyntheticSource::new(source));
        let factory = Arc::new(FakeTransportFactory::default());
        let signaling = Arc::new(RecordingSignaling::default());
        let (event_tx, events) = event_channel();

        let controller = SessionController::new(
            config,
            source.clone(),
            factory.clone(),
            Arc::new(StaticIdentity(BROADCASTER_ID.to_string())),
            signaling.clone(),
            event_tx,
        );

        Self {
            controller,
            source,
            factory,
            signaling,
            events,
        }
    }

    pub fn take_events(&self) -> Vec<EngineEvent> {
        self.events.try_iter().collect()
    }

    pub fn source_video(&self) -> MediaTrack {
        self.source
            .stream()
            .and_then(|s| s.video_track().cloned())
            .expect("capture running")
    }
}
