//! Events sent from the engine to the notification surface.

use serde::{Deserialize, Serialize};

use crate::state::{SessionPhase, SessionSnapshot};
use crate::types::ErrorCategory;

/// Events that the engine can send to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Session phase has changed.
    PhaseChanged {
        /// Previous phase.
        previous: SessionPhase,

        /// Current phase.
        current: SessionPhase,
    },

    /// Human-readable status line.
    Status(String),

    /// Error occurred.
    Error {
        /// What kind of failure this is.
        category: ErrorCategory,

        /// Actionable message for the broadcaster.
        message: String,

        /// Affected viewer, for viewer-scoped failures.
        viewer_id: Option<String>,

        /// Whether the session was torn down.
        fatal: bool,
    },

    /// A viewer's connection reached the connected state.
    ViewerConnected { viewer_id: String },

    /// A viewer's connection was removed.
    ViewerDisconnected { viewer_id: String },

    /// Session snapshot.
    Snapshot(SessionSnapshot),

    /// Engine is ready.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
