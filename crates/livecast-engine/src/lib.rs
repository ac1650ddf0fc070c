//! Broadcast session manager.
//!
//! This crate validates capture tracks, negotiates one peer connection per
//! viewer, queues viewers until a stream is ready, and drives the session
//! state machine that ties them together.

mod admission;
mod config;
mod controller;
mod error;
mod health;
mod notify;
mod orchestrator;
mod peers;
pub mod service;
mod session;

#[cfg(test)]
mod testing;

pub use admission::{Admission, ViewerAdmissionQueue};
pub use config::EngineConfig;
pub use controller::SessionController;
pub use error::EngineError;
pub use health::{
    check_attach, check_before_offer, check_broadcast_ready, check_capture, check_track,
    spawn_track_watch, AlertKind, HealthAlert, TrackWatch, WatchConfig,
};
pub use orchestrator::Engine;
pub use peers::{ConnectOutcome, PeerConnectionManager};
pub use session::BroadcastSession;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
