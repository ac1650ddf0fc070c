//! Viewer admission queue.
//!
//! Viewers that ask to join before a stream is ready wait here until the
//! session starts broadcasting.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::peers::{ConnectOutcome, PeerConnectionManager};
use crate::EngineResult;

/// What happened to a viewer asking to join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Connecting,
    AlreadyConnected,
    Queued,
    Abandoned,
}

/// Viewers waiting for a broadcastable stream.
#[derive(Debug, Default)]
pub struct ViewerAdmissionQueue {
    pending: Mutex<Vec<String>>,
}

impl ViewerAdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a viewer. Returns false if it was already waiting.
    pub fn enqueue(&self, viewer_id: &str) -> bool {
        let mut pending = self.pending.lock();
        if pending.iter().any(|v| v == viewer_id) {
            return false;
        }
        pending.push(viewer_id.to_string());
        debug!(viewer_id, waiting = pending.len(), "Viewer queued");
        true
    }

    pub fn remove(&self, viewer_id: &str) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|v| v != viewer_id);
        pending.len() != before
    }

    pub fn contains(&self, viewer_id: &str) -> bool {
        self.pending.lock().iter().any(|v| v == viewer_id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    fn take_all(&self) -> Vec<String> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Connect a viewer now, or queue it if no stream is ready.
    pub async fn admit(
        &self,
        peers: &Arc<PeerConnectionManager>,
        viewer_id: &str,
    ) -> EngineResult<Admission> {
        let admission = match peers.create_connection_for(viewer_id).await? {
            ConnectOutcome::Offered => Admission::Connecting,
            ConnectOutcome::Existing => Admission::AlreadyConnected,
            ConnectOutcome::Abandoned => Admission::Abandoned,
            ConnectOutcome::Deferred => {
                self.enqueue(viewer_id);
                Admission::Queued
            }
        };
        Ok(admission)
    }

    /// Connect every waiting viewer, `stagger` apart.
    ///
    /// Each waiting viewer is attempted once. Viewers that find the stream
    /// momentarily unavailable are queued again. Returns the failures.
    pub async fn drain(
        self: &Arc<Self>,
        peers: &Arc<PeerConnectionManager>,
        stagger: Duration,
        cancel: &CancellationToken,
    ) -> Vec<(String, EngineError)> {
        let viewers = self.take_all();
        if viewers.is_empty() {
            return Vec::new();
        }

        info!(count = viewers.len(), "Draining pending viewers");
        let mut attempts = JoinSet::new();

        for (i, viewer_id) in viewers.into_iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(stagger) => {}
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            let queue = Arc::clone(self);
            let peers = Arc::clone(peers);
            attempts.spawn(async move {
                let result = queue.admit(&peers, &viewer_id).await;
                (viewer_id, result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((viewer_id, Ok(admission))) => {
                    debug!(viewer_id = %viewer_id, ?admission, "Pending viewer admitted");
                }
                Ok((viewer_id, Err(e))) => failures.push((viewer_id, e)),
                Err(e) => debug!("Admission task ended early: {}", e),
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::WatchConfig;
    use crate::notify::Notifier;
    use crate::testing::{broadcasting_session, live_stream, FakeTransportFactory, RecordingSignaling};
    use livecast_ipc::event_channel;
    use livecast_transport::RetryPolicy;
    use tokio::sync::mpsc;

    fn manager(
        session: crate::session::SharedSession,
    ) -> (Arc<PeerConnectionManager>, Arc<FakeTransportFactory>, Arc<RecordingSignaling>) {
        let factory = Arc::new(FakeTransportFactory::default());
        let signaling = Arc::new(RecordingSignaling::default());
        let (event_tx, _events) = event_channel();
        let (alerts, _) = mpsc::unbounded_channel();
        let peers = Arc::new(PeerConnectionManager::new(
            factory.clone(),
            signaling.clone(),
            session,
            Notifier::new(event_tx),
            alerts,
            RetryPolicy::default(),
            WatchConfig {
                poll_interval: Duration::from_secs(2),
                max_checks: 30,
                react_to_mute: true,
            },
        ));
        (peers, factory, signaling)
    }

    #[test]
    fn test_enqueue_dedupes() {
        let queue = ViewerAdmissionQueue::new();
        assert!(queue.enqueue("a"));
        assert!(!queue.enqueue("a"));
        assert!(queue.enqueue("b"));
        assert_eq!(queue.len(), 2);

        assert!(queue.remove("a"));
        assert!(!queue.remove("a"));
        assert!(!queue.contains("a"));

        queue.clear();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_admit_queues_without_stream() {
        let session = broadcasting_session(live_stream());
        session.write().reset();
        let (peers, factory, _) = manager(session);
        let queue = ViewerAdmissionQueue::new();

        assert_eq!(queue.admit(&peers, "a").await.unwrap(), Admission::Queued);
        assert_eq!(queue.admit(&peers, "a").await.unwrap(), Admission::Queued);
        assert_eq!(queue.len(), 1);
        assert_eq!(factory.create_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_connects_each_viewer_once() {
        let (peers, factory, signaling) = manager(broadcasting_session(live_stream()));
        let queue = Arc::new(ViewerAdmissionQueue::new());
        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue("c");

        let failures = queue
            .drain(&peers, Duration::from_millis(100), &CancellationToken::new())
            .await;

        assert!(failures.is_empty());
        assert!(queue.is_empty());
        assert_eq!(factory.create_count(), 3);
        for viewer in ["a", "b", "c"] {
            assert_eq!(signaling.offers_to(viewer).len(), 1);
        }

        let again = queue
            .drain(&peers, Duration::from_millis(100), &CancellationToken::new())
            .await;
        assert!(again.is_empty());
        assert_eq!(factory.create_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_requeues_when_stream_unavailable() {
        let session = broadcasting_session(live_stream());
        session.write().reset();
        let (peers, _, _) = manager(session);
        let queue = Arc::new(ViewerAdmissionQueue::new());
        queue.enqueue("a");

        let failures = queue
            .drain(&peers, Duration::from_millis(100), &CancellationToken::new())
            .await;
        assert!(failures.is_empty());
        assert!(queue.contains("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_reports_failures() {
        let stream = live_stream();
        stream.video_track().unwrap().set_muted(true);
        let (peers, _, _) = manager(broadcasting_session(stream));
        let queue = Arc::new(ViewerAdmissionQueue::new());
        queue.enqueue("a");

        let failures = queue
            .drain(&peers, Duration::from_millis(100), &CancellationToken::new())
            .await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "a");
        assert!(!queue.contains("a"));
    }
}
