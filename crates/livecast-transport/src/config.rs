//! Peer connection configuration.

use serde::{Deserialize, Serialize};

/// Public STUN servers used when none are configured.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// A STUN or TURN server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub credential: String,
}

impl IceServerConfig {
    /// Server without credentials.
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }
}

/// Settings shared by every peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServerConfig>,

    /// Media stream label announced in the offer.
    pub stream_label: String,

    /// Nominal video frame rate, used for sample durations.
    pub video_fps: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_SERVERS
                .iter()
                .map(|url| IceServerConfig::stun(*url))
                .collect(),
            stream_label: "livecast".to_string(),
            video_fps: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_public_stun() {
        let config = TransportConfig::default();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"ice_servers":[{"urls":["turn:relay.example:3478"],"username":"u","credential":"p"}]}"#)
                .unwrap();

        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].username, "u");
        assert_eq!(config.video_fps, 30);
        assert_eq!(config.stream_label, "livecast");
    }
}
