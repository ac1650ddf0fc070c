//! Typed messages for the livecast broadcaster.
//!
//! This crate defines the commands and events exchanged between a host and
//! the engine, and the signaling protocol spoken with viewers.

mod commands;
mod events;
mod signaling;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use signaling::{
    signal_channel, ChannelSignaling, IceCandidate, IdentityProvider, SdpType,
    SessionDescription, SignalError, SignalMessage, SignalResult, SignalingChannel,
    StaticIdentity, SIGNAL_CHANNEL_CAPACITY,
};
pub use state::{SessionPhase, SessionSnapshot, StopReason};
pub use types::{CropRegion, ErrorCategory};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (host → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
