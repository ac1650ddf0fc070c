//! Synthetic test-pattern capture source.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::CaptureError;
use crate::frame::{CaptureTimestamp, VideoFrame, BYTES_PER_PIXEL};
use crate::stream::MediaStream;
use crate::track::{MediaTrack, TrackKind};
use crate::{CaptureResult, CaptureSource};

/// Pixel content produced by the synthetic source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Color gradient; never black.
    Gradient,

    /// Uniform black, as produced by a capture that lost its content.
    Black,
}

/// Configuration for the synthetic source.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub with_audio: bool,
    pub pattern: TestPattern,

    /// Refuse capture as a user declining the share dialog would.
    pub deny_permission: bool,

    /// Deliver the video track already muted.
    pub start_muted: bool,

    /// Delay before the first frame.
    pub ready_delay: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            with_audio: false,
            pattern: TestPattern::Gradient,
            deny_permission: false,
            start_muted: false,
            ready_delay: Duration::ZERO,
        }
    }
}

struct ActiveCapture {
    stream: MediaStream,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Capture source that renders a test pattern.
///
/// Each `start` produces fresh tracks. Dimensions can be changed while
/// running to simulate a resized source window.
pub struct SyntheticSource {
    config: SyntheticConfig,
    width: Arc<AtomicU32>,
    height: Arc<AtomicU32>,
    active: Mutex<Option<ActiveCapture>>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            width: Arc::new(AtomicU32::new(config.width)),
            height: Arc::new(AtomicU32::new(config.height)),
            config,
            active: Mutex::new(None),
        }
    }

    /// Change the dimensions of subsequent frames.
    pub fn resize(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::SeqCst);
        self.height.store(height, Ordering::SeqCst);
    }

    /// The stream of the running capture, if any.
    pub fn stream(&self) -> Option<MediaStream> {
        self.active.lock().as_ref().map(|a| a.stream.clone())
    }
}

#[async_trait]
impl CaptureSource for SyntheticSource {
    #[instrument(name = "synthetic_capture_start", skip(self))]
    async fn start(&self) -> CaptureResult<MediaStream> {
        if self.active.lock().is_some() {
            return Err(CaptureError::AlreadyStarted);
        }

        if self.config.deny_permission {
            return Err(CaptureError::PermissionDenied);
        }

        let video = MediaTrack::new(TrackKind::Video, "synthetic-screen");
        if self.config.start_muted {
            video.set_muted(true);
        }

        let mut tracks = vec![video.clone()];
        let audio = self.config.with_audio.then(|| {
            let track = MediaTrack::new(TrackKind::Audio, "synthetic-audio");
            tracks.push(track.clone());
            track
        });

        let stream = MediaStream::new(tracks);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(generate_frames(
            video,
            audio,
            Arc::clone(&self.width),
            Arc::clone(&self.height),
            self.config.fps.max(1),
            self.config.pattern,
            self.config.ready_delay,
            cancel.clone(),
        ));

        *self.active.lock() = Some(ActiveCapture {
            stream: stream.clone(),
            cancel,
            task,
        });

        info!(stream_id = %stream.id(), "Synthetic capture started");
        Ok(stream)
    }

    #[instrument(name = "synthetic_capture_stop", skip(self))]
    fn stop(&self) {
        if let Some(active) = self.active.lock().take() {
            active.cancel.cancel();
            active.task.abort();
            active.stream.stop();
            info!("Synthetic capture stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    fn dimensions(&self) -> (u32, u32) {
        (
            self.width.load(Ordering::SeqCst),
            self.height.load(Ordering::SeqCst),
        )
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
async fn generate_frames(
    video: MediaTrack,
    audio: Option<MediaTrack>,
    width: Arc<AtomicU32>,
    height: Arc<AtomicU32>,
    fps: u32,
    pattern: TestPattern,
    ready_delay: Duration,
    cancel: CancellationToken,
) {
    if !ready_delay.is_zero() {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(ready_delay) => {}
        }
    }

    if let Some(ref audio) = audio {
        audio.mark_live();
    }

    let start_time = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut cached: Option<(u32, u32, Bytes)> = None;
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if video.is_ended() {
            break;
        }

        let (w, h) = (width.load(Ordering::SeqCst), height.load(Ordering::SeqCst));
        let data = match cached {
            Some((cw, ch, ref data)) if cw == w && ch == h => data.clone(),
            _ => {
                let data = render_pattern(w, h, pattern);
                cached = Some((w, h, data.clone()));
                data
            }
        };

        video.publish(VideoFrame::new(
            data,
            w,
            h,
            CaptureTimestamp::now(start_time),
            sequence,
        ));
        sequence += 1;
    }

    debug!(frames = sequence, "Synthetic frame generator stopped");
}

fn render_pattern(width: u32, height: u32, pattern: TestPattern) -> Bytes {
    let mut data = vec![0u8; VideoFrame::rgba_buffer_size(width, height)];

    if pattern == TestPattern::Gradient {
        for (i, px) in data.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let x = (i % width.max(1) as usize) as u32;
            let y = (i / width.max(1) as usize) as u32;
            px[0] = (x % 256) as u8;
            px[1] = (y % 256) as u8;
            px[2] = 128;
            px[3] = 255;
        }
    } else {
        for px in data.chunks_exact_mut(BYTES_PER_PIXEL) {
            px[3] = 255;
        }
    }

    Bytes::from(data)
}
