//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use livecast_capture::CompositorConfig;
use livecast_transport::{IceServerConfig, RetryPolicy, TransportConfig};

/// Tunables for the broadcast session manager.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Live checks on freshly captured tracks before the capture is rejected.
    pub capture_ready_retries: u32,
    pub capture_ready_interval_ms: u64,

    pub compositor_fps: u32,
    pub composite_live_retries: u32,
    pub composite_live_interval_ms: u64,
    pub first_content_timeout_ms: u64,

    /// Connection attempts per viewer while tracks are not yet ready.
    pub connect_max_attempts: u32,
    pub connect_retry_delay_ms: u64,

    /// Mute polling. Mute events are still handled after polling stops.
    pub mute_poll_interval_ms: u64,
    pub mute_poll_max_checks: u32,

    /// Delay between connection attempts when draining pending viewers.
    pub admission_stagger_ms: u64,

    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture_ready_retries: 10,
            capture_ready_interval_ms: 500,
            compositor_fps: 30,
            composite_live_retries: 10,
            composite_live_interval_ms: 500,
            first_content_timeout_ms: 5000,
            connect_max_attempts: livecast_transport::MAX_CONNECT_ATTEMPTS,
            connect_retry_delay_ms: livecast_transport::CONNECT_RETRY_DELAY_MS,
            mute_poll_interval_ms: 2000,
            mute_poll_max_checks: 30,
            admission_stagger_ms: 100,
            ice_servers: TransportConfig::default().ice_servers,
        }
    }
}

impl EngineConfig {
    pub fn capture_ready_interval(&self) -> Duration {
        Duration::from_millis(self.capture_ready_interval_ms)
    }

    pub fn mute_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mute_poll_interval_ms)
    }

    pub fn admission_stagger(&self) -> Duration {
        Duration::from_millis(self.admission_stagger_ms)
    }

    pub fn compositor_config(&self) -> CompositorConfig {
        CompositorConfig {
            fps: self.compositor_fps,
            first_content_timeout: Duration::from_millis(self.first_content_timeout_ms),
            live_retries: self.composite_live_retries,
            live_interval: Duration::from_millis(self.composite_live_interval_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connect_max_attempts,
            delay: Duration::from_millis(self.connect_retry_delay_ms),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            ice_servers: self.ice_servers.clone(),
            video_fps: self.compositor_fps,
            ..Default::default()
        }
    }
}
