//! Capture sources, media tracks and region compositing.
//!
//! A [`CaptureSource`] hands out a [`MediaStream`] of [`MediaTrack`]s whose
//! liveness and mute state are observable. The [`RegionCompositor`] derives
//! a cropped video track from a source track.

mod compositor;
mod error;
mod frame;
mod stream;
mod synthetic;
mod track;

pub use compositor::{Canvas, CompositorConfig, RegionCompositor, CONTENT_SAMPLE_SIZE, NOISE_FLOOR};
pub use error::CaptureError;
pub use frame::{CaptureTimestamp, VideoFrame, BYTES_PER_PIXEL};
pub use stream::MediaStream;
pub use synthetic::{SyntheticConfig, SyntheticSource, TestPattern};
pub use track::{wait_until_live, MediaTrack, TrackKind, TrackReadyState, TrackStatus};

use async_trait::async_trait;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Trait for capture sources.
///
/// Revocation by the platform (for example the user pressing "stop
/// sharing") is reported by ending the stream's tracks.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Acquire the capture. May wait on a permission prompt.
    async fn start(&self) -> CaptureResult<MediaStream>;

    /// Release the capture and end its tracks.
    fn stop(&self);

    /// Check if capture is active.
    fn is_active(&self) -> bool;

    /// Get the source dimensions.
    fn dimensions(&self) -> (u32, u32);
}
