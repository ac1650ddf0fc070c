//! Error types for the engine.

use thiserror::Error;

use livecast_capture::CaptureError;
use livecast_ipc::{ErrorCategory, SessionPhase, SignalError};
use livecast_transport::TransportError;

/// Errors raised by the broadcast session manager.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Screen capture permission was denied")]
    PermissionDenied,

    #[error("Capture device error: {0}")]
    Device(String),

    #[error("Track {track_id} is muted")]
    TrackMuted { track_id: String },

    #[error("Track {track_id} is not live")]
    TrackNotLive { track_id: String },

    #[error("Track {track_id} is disabled")]
    TrackDisabled { track_id: String },

    /// No stream is ready to be broadcast.
    #[error("No broadcastable stream")]
    NoStream,

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Screen sharing ended")]
    CaptureEnded,

    #[error("Cannot {action} while {}", phase.name())]
    InvalidState {
        action: &'static str,
        phase: SessionPhase,
    },

    #[error("Broadcast service already initialized")]
    AlreadyInitialized,

    #[error("Failed to start runtime: {0}")]
    Runtime(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Signal(#[from] SignalError),
}

impl From<CaptureError> for EngineError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::PermissionDenied => Self::PermissionDenied,
            other => Self::Device(other.to_string()),
        }
    }
}

impl EngineError {
    /// Maps the error onto the user-facing taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PermissionDenied => ErrorCategory::PermissionDenied,
            Self::Device(_) | Self::Runtime(_) => ErrorCategory::DeviceError,
            Self::TrackMuted { .. } => ErrorCategory::TrackMuted,
            Self::TrackNotLive { .. } | Self::TrackDisabled { .. } | Self::NoStream => {
                ErrorCategory::TrackNotLive
            }
            Self::Negotiation(_) | Self::Signal(_) => ErrorCategory::NegotiationFailed,
            Self::Connection(_) => ErrorCategory::ConnectionFailed,
            Self::CaptureEnded => ErrorCategory::CaptureEnded,
            Self::InvalidState { .. } | Self::AlreadyInitialized => ErrorCategory::InvalidState,
            Self::Transport(e) => match e {
                TransportError::Negotiation(_)
                | TransportError::InvalidDescription(_)
                | TransportError::Candidate(_) => ErrorCategory::NegotiationFailed,
                _ => ErrorCategory::ConnectionFailed,
            },
        }
    }

    /// Whether the category forces the session back to idle when raised by
    /// the continuous track monitor.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TrackMuted | ErrorCategory::CaptureEnded
        )
    }

    /// Whether a connection attempt may succeed later without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TrackNotLive { .. } | Self::TrackDisabled { .. } | Self::NoStream
        )
    }

    /// What happened and what to do about it.
    pub fn user_message(&self) -> String {
        format!("{}. {}", self, self.category().remediation())
    }
}
