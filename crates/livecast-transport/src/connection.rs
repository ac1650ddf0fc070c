//! Connection state management.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{CONNECT_RETRY_DELAY_MS, MAX_CONNECT_ATTEMPTS};

/// Connection state of one viewer's peer connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, nothing negotiated yet.
    #[default]
    New,

    /// Negotiating or checking connectivity.
    Connecting,

    /// Media is flowing.
    Connected,

    /// Connectivity lost, may recover.
    Disconnected,

    /// Connection failed permanently.
    Failed,

    /// Closed locally or remotely.
    Closed,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the connection is gone for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Policy for retrying connection setup while a track is not yet ready.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_CONNECT_ATTEMPTS,
            delay: Duration::from_millis(CONNECT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt`.
    pub fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        self.delay
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
