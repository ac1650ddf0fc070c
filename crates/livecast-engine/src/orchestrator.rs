//! Engine command loop.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use livecast_capture::CaptureSource;
use livecast_ipc::{
    CropRegion, EngineCommand, EngineEvent, IdentityProvider, SignalMessage, SignalingChannel,
};
use livecast_transport::PeerTransportFactory;

use crate::config::EngineConfig;
use crate::controller::SessionController;
use crate::error::EngineError;
use crate::EngineResult;

/// Lifecycle requests, applied strictly in the order received.
#[derive(Debug)]
enum Lifecycle {
    StartCapture,
    ConfirmCrop(CropRegion),
    SkipCrop,
    Stop,
}

/// The broadcast engine.
///
/// Owns the async runtime the session runs on and translates host commands
/// into controller calls. Lifecycle commands run one after another on one
/// task. Viewer signaling runs in arrival order on a second task, so an
/// answer is applied before the candidates that follow it.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    controller: SessionController,
    lifecycle_tx: Option<mpsc::UnboundedSender<Lifecycle>>,
    lifecycle_task: Option<JoinHandle<()>>,
    signal_tx: Option<mpsc::UnboundedSender<SignalMessage>>,
    signal_task: Option<JoinHandle<()>>,
    runtime: Runtime,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn CaptureSource>,
        factory: Arc<dyn PeerTransportFactory>,
        identity: Arc<dyn IdentityProvider>,
        signaling: Arc<dyn SignalingChannel>,
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<EngineEvent>,
    ) -> EngineResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("livecast-engine")
            .build()
            .map_err(|e| EngineError::Runtime(e.to_string()))?;

        let controller = {
            let _guard = runtime.enter();
            SessionController::new(
                config,
                source,
                factory,
                identity,
                signaling,
                event_tx.clone(),
            )
        };

        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let lifecycle_task = runtime.spawn(run_lifecycle(controller.clone(), lifecycle_rx));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let signal_task = runtime.spawn(run_signaling(controller.clone(), signal_rx));

        Ok(Self {
            command_rx,
            event_tx,
            controller,
            lifecycle_tx: Some(lifecycle_tx),
            lifecycle_task: Some(lifecycle_task),
            signal_tx: Some(signal_tx),
            signal_task: Some(signal_task),
            runtime,
        })
    }

    /// Handle to the session controller driven by this engine.
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.shutdown();
                    break;
                }
            }
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::StartCapture => self.queue(Lifecycle::StartCapture),
            EngineCommand::ConfirmCrop { region } => self.queue(Lifecycle::ConfirmCrop(region)),
            EngineCommand::SkipCrop => self.queue(Lifecycle::SkipCrop),
            EngineCommand::Stop => self.queue(Lifecycle::Stop),
            EngineCommand::Signal(message) => self.forward_signal(message),
            EngineCommand::GetState => {
                self.send_event(EngineEvent::Snapshot(self.controller.snapshot()));
            }
            EngineCommand::Shutdown => {
                self.shutdown();
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        }

        true
    }

    fn queue(&self, request: Lifecycle) {
        let Some(tx) = &self.lifecycle_tx else {
            warn!(?request, "Engine shutting down, dropping request");
            return;
        };
        if tx.send(request).is_err() {
            warn!("Lifecycle task is gone");
        }
    }

    fn forward_signal(&self, message: SignalMessage) {
        let Some(tx) = &self.signal_tx else {
            warn!("Engine shutting down, dropping {} message", message.name());
            return;
        };
        if tx.send(message).is_err() {
            warn!("Signaling task is gone");
        }
    }

    /// Finish queued lifecycle requests and signaling, then tear the
    /// session down.
    #[instrument(name = "engine_shutdown", skip(self))]
    fn shutdown(&mut self) {
        self.lifecycle_tx.take();
        self.signal_tx.take();

        let lifecycle = self.lifecycle_task.take();
        let signaling = self.signal_task.take();
        let controller = self.controller.clone();
        self.runtime.block_on(async move {
            if let Some(task) = lifecycle {
                if let Err(e) = task.await {
                    warn!("Lifecycle task failed: {}", e);
                }
            }
            if let Some(task) = signaling {
                if let Err(e) = task.await {
                    warn!("Signaling task failed: {}", e);
                }
            }
            controller.shutdown().await;
        });
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.lifecycle_tx.is_some() {
            self.shutdown();
        }
    }
}

async fn run_lifecycle(
    controller: SessionController,
    mut requests: mpsc::UnboundedReceiver<Lifecycle>,
) {
    while let Some(request) = requests.recv().await {
        debug!(?request, "Applying lifecycle request");

        // Errors have been reported to the host by the controller.
        let _ = match request {
            Lifecycle::StartCapture => controller.start_capture().await,
            Lifecycle::ConfirmCrop(region) => controller.confirm_crop(region).await,
            Lifecycle::SkipCrop => controller.skip_crop().await,
            Lifecycle::Stop => controller.stop().await,
        };
    }
}

async fn run_signaling(
    controller: SessionController,
    mut messages: mpsc::UnboundedReceiver<SignalMessage>,
) {
    while let Some(message) = messages.recv().await {
        // Failures are already reported as events.
        let _ = controller.handle_signal(message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use livecast_capture::SyntheticSource;
    use livecast_ipc::{
        command_channel, event_channel, IceCandidate, SessionDescription, SessionPhase,
        StaticIdentity,
    };

    use crate::testing::{small_source, FakeTransportFactory, RecordingSignaling, BROADCASTER_ID};

    fn spawn_engine(
        factory: Arc<FakeTransportFactory>,
        signaling: Arc<RecordingSignaling>,
    ) -> (Sender<EngineCommand>, Receiver<EngineEvent>, thread::JoinHandle<()>) {
        let (command_tx, command_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();

        let handle = thread::spawn(move || {
            let mut engine = Engine::new(
                EngineConfig::default(),
                Arc::new(SyntheticSource::new(small_source())),
                factory,
                Arc::new(StaticIdentity(BROADCASTER_ID.to_string())),
                signaling,
                command_rx,
                event_tx,
            )
            .unwrap();
            engine.run();
        });

        (command_tx, event_rx, handle)
    }

    fn wait_for(
        events: &Receiver<EngineEvent>,
        pred: impl Fn(&EngineEvent) -> bool,
    ) -> EngineEvent {
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(e) => panic!("expected event not received: {e}"),
            }
        }
    }

    fn wait_for_phase(events: &Receiver<EngineEvent>, phase: SessionPhase) {
        wait_for(events, |e| {
            matches!(e, EngineEvent::PhaseChanged { current, .. } if *current == phase)
        });
    }

    #[test]
    fn test_engine_broadcasts_and_shuts_down() {
        let factory = Arc::new(FakeTransportFactory::default());
        let signaling = Arc::new(RecordingSignaling::default());
        let (commands, events, handle) = spawn_engine(factory.clone(), signaling.clone());

        wait_for(&events, |e| matches!(e, EngineEvent::Ready));

        commands
            .send(EngineCommand::Signal(SignalMessage::ViewerJoined {
                viewer_id: "viewer-1".into(),
            }))
            .unwrap();
        commands.send(EngineCommand::StartCapture).unwrap();
        commands.send(EngineCommand::SkipCrop).unwrap();
        wait_for_phase(&events, SessionPhase::Broadcasting);

        wait_for(&events, |e| matches!(e, EngineEvent::Status(s) if s == "Broadcasting"));

        commands.send(EngineCommand::GetState).unwrap();
        let snapshot = wait_for(&events, |e| matches!(e, EngineEvent::Snapshot(_)));
        let EngineEvent::Snapshot(snapshot) = snapshot else {
            unreachable!();
        };
        assert_eq!(snapshot.phase, SessionPhase::Broadcasting);
        assert!(snapshot.session_id.is_some());

        commands.send(EngineCommand::Shutdown).unwrap();
        wait_for(&events, |e| matches!(e, EngineEvent::Shutdown));
        handle.join().unwrap();

        assert_eq!(signaling.count("stream-stop"), 1);
        assert!(factory.created().iter().all(|t| t.is_closed()));
    }

    #[test]
    fn test_engine_stops_when_host_disconnects() {
        let factory = Arc::new(FakeTransportFactory::default());
        let signaling = Arc::new(RecordingSignaling::default());
        let (commands, events, handle) = spawn_engine(factory, signaling.clone());

        wait_for(&events, |e| matches!(e, EngineEvent::Ready));
        commands.send(EngineCommand::StartCapture).unwrap();
        commands.send(EngineCommand::SkipCrop).unwrap();
        wait_for_phase(&events, SessionPhase::Broadcasting);

        drop(commands);
        handle.join().unwrap();

        wait_for_phase(&events, SessionPhase::Idle);
        assert_eq!(signaling.count("stream-stop"), 1);
    }

    #[test]
    fn test_invalid_command_reports_error() {
        let factory = Arc::new(FakeTransportFactory::default());
        let signaling = Arc::new(RecordingSignaling::default());
        let (commands, events, handle) = spawn_engine(factory, signaling);

        wait_for(&events, |e| matches!(e, EngineEvent::Ready));
        commands.send(EngineCommand::SkipCrop).unwrap();

        let error = wait_for(&events, |e| matches!(e, EngineEvent::Error { .. }));
        let EngineEvent::Error { fatal, viewer_id, .. } = error else {
            unreachable!();
        };
        assert!(!fatal);
        assert!(viewer_id.is_none());

        commands.send(EngineCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_candidate_after_answer_is_applied_in_order() {
        let factory = Arc::new(FakeTransportFactory::with_answer_delay(
            Duration::from_millis(200),
        ));
        let signaling = Arc::new(RecordingSignaling::default());
        let (commands, events, handle) = spawn_engine(factory.clone(), signaling.clone());

        wait_for(&events, |e| matches!(e, EngineEvent::Ready));
        commands.send(EngineCommand::StartCapture).unwrap();
        commands.send(EngineCommand::SkipCrop).unwrap();
        wait_for_phase(&events, SessionPhase::Broadcasting);

        commands
            .send(EngineCommand::Signal(SignalMessage::ViewerJoined {
                viewer_id: "viewer-1".into(),
            }))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(20);
        while signaling.offers_to("viewer-1").is_empty() {
            assert!(Instant::now() < deadline, "no offer sent");
            thread::sleep(Duration::from_millis(10));
        }

        commands
            .send(EngineCommand::Signal(SignalMessage::Answer {
                from: "viewer-1".into(),
                session_description: SessionDescription::answer("v=0 answer"),
            }))
            .unwrap();
        commands
            .send(EngineCommand::Signal(SignalMessage::IceCandidate {
                to: None,
                from: Some("viewer-1".into()),
                candidate: IceCandidate::new("candidate:remote"),
            }))
            .unwrap();
        commands.send(EngineCommand::Shutdown).unwrap();

        let mut errors = Vec::new();
        loop {
            match events.recv_timeout(Duration::from_secs(20)) {
                Ok(EngineEvent::Shutdown) => break,
                Ok(EngineEvent::Error { message, .. }) => errors.push(message),
                Ok(_) => {}
                Err(e) => panic!("engine did not shut down: {e}"),
            }
        }
        handle.join().unwrap();

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let transport = factory.transport_for("viewer-1").unwrap();
        assert!(transport.remote_description().is_some());
        assert_eq!(transport.remote_candidates().len(), 1);
    }
}
