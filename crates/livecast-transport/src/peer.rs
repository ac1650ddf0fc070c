//! Transport abstraction for one viewer's peer connection.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use livecast_capture::MediaTrack;
use livecast_ipc::{IceCandidate, SessionDescription};

use crate::connection::ConnectionState;
use crate::TransportResult;

/// Asynchronous notifications from a peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local candidate was gathered and should be sent to the viewer.
    LocalCandidate(IceCandidate),

    /// The connection state changed.
    StateChanged(ConnectionState),
}

/// One send-only peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attach a track to be sent to the viewer.
    async fn add_track(&self, track: &MediaTrack) -> TransportResult<()>;

    /// Tracks attached so far.
    fn attached_tracks(&self) -> Vec<MediaTrack>;

    /// Create a send-only offer.
    async fn create_offer(&self) -> TransportResult<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> TransportResult<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> TransportResult<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportResult<()>;

    fn state(&self) -> ConnectionState;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self) -> TransportResult<()>;
}

/// A freshly created connection and its event stream.
pub struct PeerHandle {
    pub transport: Arc<dyn PeerTransport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Creates peer connections.
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(&self, viewer_id: &str) -> TransportResult<PeerHandle>;
}
