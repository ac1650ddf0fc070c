//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Permission denied for capture.
    #[error("Permission denied for capture")]
    PermissionDenied,

    /// Capture device failed for a reason other than permission.
    #[error("Capture device error: {0}")]
    Device(String),

    /// Capture source not found.
    #[error("Capture source not found: {0}")]
    SourceNotFound(String),

    /// Capture already started.
    #[error("Capture already started")]
    AlreadyStarted,

    /// Capture not started.
    #[error("Capture not started")]
    NotStarted,

    /// Frame does not match its declared dimensions.
    #[error("Frame conversion error: {0}")]
    FrameConversion(String),
}
