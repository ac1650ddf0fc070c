//! Host configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use livecast_capture::{SyntheticConfig, TestPattern};
use livecast_engine::EngineConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "LIVECAST_CONFIG";

/// Everything the host needs to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Identity used as `from` on outgoing signaling messages.
    pub broadcaster_id: String,

    pub capture_width: u32,
    pub capture_height: u32,
    pub capture_fps: u32,
    pub capture_audio: bool,

    pub engine: EngineConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            broadcaster_id: "admin".to_string(),
            capture_width: 1280,
            capture_height: 720,
            capture_fps: 30,
            capture_audio: true,
            engine: EngineConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load from `path`, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            info!("No configuration file, using defaults");
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))?;

        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn capture(&self) -> SyntheticConfig {
        SyntheticConfig {
            width: self.capture_width,
            height: self.capture_height,
            fps: self.capture_fps,
            with_audio: self.capture_audio,
            pattern: TestPattern::Gradient,
            ..Default::default()
        }
    }
}

/// Config path from the environment, else the first argument.
pub fn config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .or_else(|| std::env::args_os().nth(1).map(PathBuf::from))
}
