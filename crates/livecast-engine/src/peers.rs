//! Peer connection manager.
//!
//! Holds at most one connection per viewer. Negotiations run concurrently,
//! but every change to the registry goes through its lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use livecast_capture::MediaTrack;
use livecast_ipc::{
    EngineEvent, IceCandidate, SdpType, SessionDescription, SignalMessage, SignalingChannel,
};
use livecast_transport::{
    ConnectionState, PeerHandle, PeerTransport, PeerTransportFactory, RetryPolicy, TransportEvent,
};

use crate::error::EngineError;
use crate::health::{self, HealthAlert, TrackWatch, WatchConfig};
use crate::notify::Notifier;
use crate::session::{BroadcastTarget, SharedSession};
use crate::EngineResult;

/// Result of a connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The viewer already has a connection.
    Existing,

    /// No stream is ready; the viewer must wait.
    Deferred,

    /// An offer was sent.
    Offered,

    /// The session was torn down mid-negotiation.
    Abandoned,
}

struct ViewerConnection {
    connection_id: u64,
    state: ConnectionState,
    retries: u32,
    transport: Option<Arc<dyn PeerTransport>>,
    cancel: CancellationToken,
    watch: Option<TrackWatch>,
}

/// Manages one peer connection per viewer.
pub struct PeerConnectionManager {
    registry: Mutex<HashMap<String, ViewerConnection>>,
    factory: Arc<dyn PeerTransportFactory>,
    signaling: Arc<dyn SignalingChannel>,
    session: SharedSession,
    notifier: Notifier,
    alerts: mpsc::UnboundedSender<HealthAlert>,
    retry: RetryPolicy,
    watch_config: WatchConfig,
    next_connection_id: AtomicU64,
}

impl PeerConnectionManager {
    pub(crate) fn new(
        factory: Arc<dyn PeerTransportFactory>,
        signaling: Arc<dyn SignalingChannel>,
        session: SharedSession,
        notifier: Notifier,
        alerts: mpsc::UnboundedSender<HealthAlert>,
        retry: RetryPolicy,
        watch_config: WatchConfig,
    ) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            factory,
            signaling,
            session,
            notifier,
            alerts,
            retry,
            watch_config,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    pub fn contains(&self, viewer_id: &str) -> bool {
        self.registry.lock().contains_key(viewer_id)
    }

    pub fn state_of(&self, viewer_id: &str) -> Option<ConnectionState> {
        self.registry.lock().get(viewer_id).map(|c| c.state)
    }

    /// Attempts made so far while waiting for tracks to become ready.
    pub fn retries_of(&self, viewer_id: &str) -> Option<u32> {
        self.registry.lock().get(viewer_id).map(|c| c.retries)
    }

    /// Create a connection for `viewer_id` and send it an offer.
    ///
    /// Failures only affect this viewer.
    #[instrument(name = "create_connection", skip(self))]
    pub async fn create_connection_for(
        self: &Arc<Self>,
        viewer_id: &str,
    ) -> EngineResult<ConnectOutcome> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        let (target, cancel) = {
            let mut registry = self.registry.lock();
            if registry.contains_key(viewer_id) {
                debug!("Connection already exists");
                return Ok(ConnectOutcome::Existing);
            }

            let Some(target) = self.session.read().broadcast_target() else {
                debug!("No broadcastable stream, deferring viewer");
                return Ok(ConnectOutcome::Deferred);
            };

            let cancel = target.cancel.child_token();
            registry.insert(
                viewer_id.to_string(),
                ViewerConnection {
                    connection_id,
                    state: ConnectionState::New,
                    retries: 0,
                    transport: None,
                    cancel: cancel.clone(),
                    watch: None,
                },
            );
            (target, cancel)
        };

        match self.negotiate(viewer_id, connection_id, &target, &cancel).await {
            Ok(true) => Ok(ConnectOutcome::Offered),
            Ok(false) => {
                info!("Negotiation abandoned");
                self.discard(viewer_id, connection_id).await;
                Ok(ConnectOutcome::Abandoned)
            }
            Err(e) => {
                warn!("Connection attempt failed: {}", e);
                self.discard(viewer_id, connection_id).await;
                Err(e)
            }
        }
    }

    /// Returns Ok(false) if cancelled.
    async fn negotiate(
        self: &Arc<Self>,
        viewer_id: &str,
        connection_id: u64,
        target: &BroadcastTarget,
        cancel: &CancellationToken,
    ) -> EngineResult<bool> {
        let tracks: Vec<MediaTrack> = target.stream.tracks().to_vec();

        if !self
            .wait_attachable(viewer_id, connection_id, &tracks, cancel)
            .await?
        {
            return Ok(false);
        }

        let Some(handle) = cancellable(cancel, self.factory.create(viewer_id)).await else {
            return Ok(false);
        };
        let PeerHandle { transport, events } = handle?;

        let stored = self.update(viewer_id, connection_id, |c| {
            c.transport = Some(Arc::clone(&transport));
            c.state = ConnectionState::Connecting;
        });
        if !stored {
            close_transport(viewer_id, transport.as_ref()).await;
            return Ok(false);
        }

        // Tracks can change state while the transport is being created.
        for track in &tracks {
            health::check_track(track)?;
            match cancellable(cancel, transport.add_track(track)).await {
                None => return Ok(false),
                Some(result) => result?,
            }
        }

        let watch = health::spawn_track_watch(
            &tracks,
            target.epoch,
            Some(viewer_id.to_string()),
            self.watch_config,
            self.alerts.clone(),
            cancel.child_token(),
        );
        self.update(viewer_id, connection_id, |c| c.watch = Some(watch));

        health::check_before_offer(&tracks, &transport.attached_tracks())?;

        let offer = match cancellable(cancel, transport.create_offer()).await {
            None => return Ok(false),
            Some(result) => result?,
        };
        match cancellable(cancel, transport.set_local_description(offer.clone())).await {
            None => return Ok(false),
            Some(result) => result?,
        }

        if cancel.is_cancelled() {
            return Ok(false);
        }

        self.signaling.send(SignalMessage::Offer {
            to: viewer_id.to_string(),
            from: target.broadcaster_id.clone(),
            stream_id: target.session_id.clone(),
            session_description: offer,
        })?;
        info!(session_id = %target.session_id, "Offer sent");

        tokio::spawn(Arc::clone(self).pump_events(
            viewer_id.to_string(),
            connection_id,
            target.broadcaster_id.clone(),
            events,
            cancel.clone(),
        ));

        Ok(true)
    }

    /// Attach-time check, retried while tracks are not yet enabled or live.
    async fn wait_attachable(
        &self,
        viewer_id: &str,
        connection_id: u64,
        tracks: &[MediaTrack],
        cancel: &CancellationToken,
    ) -> EngineResult<bool> {
        let mut attempt = 1;

        loop {
            match health::check_attach(tracks) {
                Ok(()) => return Ok(true),
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    debug!(attempt, "Tracks not ready: {}", e);
                    self.update(viewer_id, connection_id, |c| c.retries = attempt);

                    let delay = self.retry.delay_for_attempt(attempt);
                    if !sleep_unless_cancelled(delay, cancel).await {
                        return Ok(false);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn pump_events(
        self: Arc<Self>,
        viewer_id: String,
        connection_id: u64,
        broadcaster_id: String,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                TransportEvent::LocalCandidate(candidate) => {
                    let message = SignalMessage::IceCandidate {
                        to: Some(viewer_id.clone()),
                        from: Some(broadcaster_id.clone()),
                        candidate,
                    };
                    if let Err(e) = self.signaling.send(message) {
                        warn!(viewer_id = %viewer_id, "Failed to relay candidate: {}", e);
                    }
                }
                TransportEvent::StateChanged(state) => {
                    if !self.on_state_change(&viewer_id, connection_id, state).await {
                        break;
                    }
                }
            }
        }

        debug!(viewer_id = %viewer_id, "Event pump stopped");
    }

    /// Returns false once the connection is gone.
    async fn on_state_change(
        &self,
        viewer_id: &str,
        connection_id: u64,
        state: ConnectionState,
    ) -> bool {
        if !self.update(viewer_id, connection_id, |c| c.state = state) {
            return false;
        }

        match state {
            ConnectionState::Connected => {
                info!(viewer_id, "Viewer connected");
                self.notifier.send(EngineEvent::ViewerConnected {
                    viewer_id: viewer_id.to_string(),
                });
                true
            }
            ConnectionState::Failed | ConnectionState::Closed => {
                info!(viewer_id, %state, "Removing viewer connection");
                if let Some(connection) = self.take(viewer_id, Some(connection_id)) {
                    release(viewer_id, connection).await;
                }
                self.notifier.send(EngineEvent::ViewerDisconnected {
                    viewer_id: viewer_id.to_string(),
                });

                if state == ConnectionState::Failed {
                    let error =
                        EngineError::Connection(format!("transport to viewer {viewer_id} failed"));
                    self.notifier.error(&error, Some(viewer_id), false);
                }
                false
            }
            _ => true,
        }
    }

    /// Apply a viewer's answer.
    #[instrument(skip(self, desc))]
    pub async fn handle_answer(&self, viewer_id: &str, desc: SessionDescription) -> EngineResult<()> {
        let Some(transport) = self.transport_for(viewer_id) else {
            debug!("Answer from unknown viewer ignored");
            return Ok(());
        };

        if desc.sdp_type != SdpType::Answer {
            self.close_connection_for(viewer_id).await;
            return Err(EngineError::Negotiation(format!(
                "expected an answer from {viewer_id}"
            )));
        }

        if let Err(e) = transport.set_remote_description(desc).await {
            self.close_connection_for(viewer_id).await;
            return Err(e.into());
        }

        debug!("Remote description applied");
        Ok(())
    }

    /// Apply a viewer's connectivity candidate.
    pub async fn handle_remote_candidate(
        &self,
        viewer_id: &str,
        candidate: IceCandidate,
    ) -> EngineResult<()> {
        let Some(transport) = self.transport_for(viewer_id) else {
            debug!(viewer_id, "Candidate from unknown viewer ignored");
            return Ok(());
        };

        transport.add_ice_candidate(candidate).await?;
        Ok(())
    }

    /// Close one viewer's connection. Returns false if there was none.
    #[instrument(skip(self))]
    pub async fn close_connection_for(&self, viewer_id: &str) -> bool {
        let Some(connection) = self.take(viewer_id, None) else {
            return false;
        };

        release(viewer_id, connection).await;
        self.notifier.send(EngineEvent::ViewerDisconnected {
            viewer_id: viewer_id.to_string(),
        });
        true
    }

    /// Close every connection, including ones still negotiating.
    #[instrument(skip(self))]
    pub async fn close_all(&self) -> usize {
        let connections: Vec<(String, ViewerConnection)> = self.registry.lock().drain().collect();

        for (_, connection) in &connections {
            connection.cancel.cancel();
        }

        let count = connections.len();
        for (viewer_id, connection) in connections {
            release(&viewer_id, connection).await;
            self.notifier.send(EngineEvent::ViewerDisconnected { viewer_id });
        }

        if count > 0 {
            info!(count, "Closed all viewer connections");
        }
        count
    }

    fn transport_for(&self, viewer_id: &str) -> Option<Arc<dyn PeerTransport>> {
        self.registry
            .lock()
            .get(viewer_id)
            .and_then(|c| c.transport.clone())
    }

    fn update(
        &self,
        viewer_id: &str,
        connection_id: u64,
        f: impl FnOnce(&mut ViewerConnection),
    ) -> bool {
        match self.registry.lock().get_mut(viewer_id) {
            Some(connection) if connection.connection_id == connection_id => {
                f(connection);
                true
            }
            _ => false,
        }
    }

    /// Remove an entry, optionally only if it is still the given connection.
    fn take(&self, viewer_id: &str, connection_id: Option<u64>) -> Option<ViewerConnection> {
        let mut registry = self.registry.lock();
        let matches = registry
            .get(viewer_id)
            .is_some_and(|c| connection_id.map_or(true, |id| c.connection_id == id));
        if matches {
            registry.remove(viewer_id)
        } else {
            None
        }
    }

    async fn discard(&self, viewer_id: &str, connection_id: u64) {
        if let Some(connection) = self.take(viewer_id, Some(connection_id)) {
            release(viewer_id, connection).await;
        }
    }
}

async fn release(viewer_id: &str, connection: ViewerConnection) {
    connection.cancel.cancel();
    drop(connection.watch);
    if let Some(transport) = connection.transport {
        close_transport(viewer_id, transport.as_ref()).await;
    }
}

async fn close_transport(viewer_id: &str, transport: &dyn PeerTransport) {
    if let Err(e) = transport.close().await {
        warn!(viewer_id, "Failed to close connection: {}", e);
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
