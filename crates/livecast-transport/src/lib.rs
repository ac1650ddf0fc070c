//! Peer-to-peer media transport.
//!
//! This crate provides one send-only peer connection per viewer. The
//! [`PeerTransport`] trait is implemented over webrtc-rs by
//! [`RtcPeerTransport`].

mod config;
mod connection;
mod error;
mod peer;
mod rtc;

pub use config::{IceServerConfig, TransportConfig, DEFAULT_STUN_SERVERS};
pub use connection::{ConnectionState, RetryPolicy};
pub use error::TransportError;
pub use peer::{PeerHandle, PeerTransport, PeerTransportFactory, TransportEvent};
pub use rtc::{RtcPeerTransport, RtcTransportFactory};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Maximum connection attempts per viewer while tracks are not ready.
pub const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Delay between connection attempts in milliseconds.
pub const CONNECT_RETRY_DELAY_MS: u64 = 1000;
