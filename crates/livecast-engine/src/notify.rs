//! Notification surface.

use crossbeam_channel::Sender;
use tracing::warn;

use livecast_ipc::EngineEvent;

use crate::error::EngineError;

/// Sends engine events to the host without blocking.
#[derive(Clone)]
pub(crate) struct Notifier {
    event_tx: Sender<EngineEvent>,
}

impl Notifier {
    pub fn new(event_tx: Sender<EngineEvent>) -> Self {
        Self { event_tx }
    }

    pub fn send(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(EngineEvent::Status(message.into()));
    }

    pub fn error(&self, error: &EngineError, viewer_id: Option<&str>, fatal: bool) {
        self.send(EngineEvent::Error {
            category: error.category(),
            message: error.user_message(),
            viewer_id: viewer_id.map(str::to_string),
            fatal,
        });
    }
}
