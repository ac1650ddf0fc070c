//! Commands sent from the host to the engine.

use serde::{Deserialize, Serialize};

use crate::signaling::SignalMessage;
use crate::types::CropRegion;

/// Commands that the host can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Acquire a capture and validate it.
    StartCapture,

    /// Broadcast only the given region of the capture.
    ConfirmCrop { region: CropRegion },

    /// Broadcast the full capture.
    SkipCrop,

    /// Stop the current broadcast.
    Stop,

    /// A signaling message received from a viewer.
    Signal(SignalMessage),

    /// Request a session snapshot.
    GetState,

    /// Shutdown the engine completely.
    Shutdown,
}
