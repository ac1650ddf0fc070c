//! Viewer signaling protocol.
//!
//! Messages are exchanged with viewers over an external, bidirectional
//! channel. Only the shape of the messages is defined here; the transport
//! is provided by the host through [`SignalingChannel`].

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capacity of the in-process signaling channel.
pub const SIGNAL_CHANNEL_CAPACITY: usize = 256;

/// A signaling message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalMessage {
    /// Broadcaster's offer to a viewer.
    Offer {
        to: String,
        from: String,
        stream_id: String,
        session_description: SessionDescription,
    },

    /// Viewer's answer to an offer.
    Answer {
        from: String,
        session_description: SessionDescription,
    },

    /// Connectivity candidate, addressed `to` a viewer or received `from` one.
    IceCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        candidate: IceCandidate,
    },

    /// Broadcasting has started.
    StreamStart { from: String, stream_id: String },

    /// Broadcasting has stopped.
    StreamStop { from: String },

    /// A viewer wants to watch.
    ViewerJoined { viewer_id: String },

    /// A viewer went away.
    ViewerLeft { viewer_id: String },
}

impl SignalMessage {
    /// Returns the viewer this message is addressed to, if any.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Self::Offer { to, .. } => Some(to),
            Self::IceCandidate { to, .. } => to.as_deref(),
            _ => None,
        }
    }

    /// Returns the wire name of the message type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::StreamStart { .. } => "stream-start",
            Self::StreamStop { .. } => "stream-stop",
            Self::ViewerJoined { .. } => "viewer-joined",
            Self::ViewerLeft { .. } => "viewer-left",
        }
    }
}

/// SDP type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description as exchanged by browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Errors raised by a signaling channel.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The channel has no receiver anymore.
    #[error("Signaling channel closed")]
    ChannelClosed,

    /// The channel is full.
    #[error("Signaling channel full")]
    ChannelFull,

    /// The transport refused the message.
    #[error("Signaling message rejected: {0}")]
    Rejected(String),
}

/// Result type for signaling operations.
pub type SignalResult<T> = Result<T, SignalError>;

/// Outbound half of the signaling transport.
pub trait SignalingChannel: Send + Sync {
    /// Send a message without blocking.
    fn send(&self, message: SignalMessage) -> SignalResult<()>;
}

/// Supplies the broadcaster identity used to tag outgoing messages.
pub trait IdentityProvider: Send + Sync {
    fn broadcaster_id(&self) -> String;
}

/// Identity fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl IdentityProvider for StaticIdentity {
    fn broadcaster_id(&self) -> String {
        self.0.clone()
    }
}

/// Signaling channel backed by a bounded in-process queue.
#[derive(Debug, Clone)]
pub struct ChannelSignaling {
    tx: Sender<SignalMessage>,
}

impl SignalingChannel for ChannelSignaling {
    fn send(&self, message: SignalMessage) -> SignalResult<()> {
        self.tx.try_send(message).map_err(|e| match e {
            crossbeam_channel::TrySendError::Full(_) => SignalError::ChannelFull,
            crossbeam_channel::TrySendError::Disconnected(_) => SignalError::ChannelClosed,
        })
    }
}

/// Creates a bounded signaling channel.
pub fn signal_channel() -> (ChannelSignaling, Receiver<SignalMessage>) {
    let (tx, rx) = crossbeam_channel::bounded(SIGNAL_CHANNEL_CAPACITY);
    (ChannelSignaling { tx }, rx)
}
