//! Session state machine types.

use serde::{Deserialize, Serialize};

use crate::types::CropRegion;

/// Lifecycle phase of the broadcast session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// No capture is running.
    #[default]
    Idle,

    /// Capture has been requested and is being acquired and validated.
    Capturing,

    /// Capture is running; waiting for the crop to be confirmed or skipped.
    AwaitingCropDecision,

    /// The stream is being fanned out to viewers.
    Broadcasting,
}

impl SessionPhase {
    /// Returns true if the session is idle.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the session is broadcasting.
    pub fn is_broadcasting(self) -> bool {
        matches!(self, Self::Broadcasting)
    }

    /// Returns true if a capture is held in this phase.
    pub fn holds_capture(self) -> bool {
        !self.is_idle()
    }

    /// Returns a simple string representation of the phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Capturing => "Capturing",
            Self::AwaitingCropDecision => "AwaitingCropDecision",
            Self::Broadcasting => "Broadcasting",
        }
    }
}

/// Reason for tearing a session down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The broadcaster asked to stop.
    UserRequested,

    /// A new capture replaced the running one.
    Restarted,

    /// The platform revoked the capture.
    CaptureEnded,

    /// A broadcast track was muted.
    TrackMuted { track_id: String },

    /// The service is shutting down.
    Shutdown,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Broadcast stopped".to_string(),
            Self::Restarted => "Broadcast restarted with a new capture".to_string(),
            Self::CaptureEnded => "Screen sharing ended".to_string(),
            Self::TrackMuted { track_id } => format!("Track {track_id} stopped producing frames"),
            Self::Shutdown => "Broadcast service shutting down".to_string(),
        }
    }
}

/// Point-in-time view of the session for the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Current phase.
    pub phase: SessionPhase,

    /// Current session identifier, if a session exists.
    pub session_id: Option<String>,

    /// Number of viewer connections in the registry.
    pub viewer_count: usize,

    /// Number of viewers waiting for the stream.
    pub pending_viewers: usize,

    /// Crop rectangle as actually drawn, if compositing.
    pub effective_crop: Option<CropRegion>,

    /// Whether the broadcast stream is the composited one.
    pub compositing: bool,
}
