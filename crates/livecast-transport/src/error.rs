//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer connection could not be created.
    #[error("Peer connection setup failed: {0}")]
    Setup(String),

    /// A track could not be attached.
    #[error("Failed to attach track: {0}")]
    AttachTrack(String),

    /// Offer/answer exchange failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Session description was malformed.
    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    /// Remote candidate was rejected.
    #[error("Failed to add ICE candidate: {0}")]
    Candidate(String),

    /// Connection already closed.
    #[error("Connection closed")]
    Closed,

    /// Close failed.
    #[error("Failed to close connection: {0}")]
    Close(String),
}
