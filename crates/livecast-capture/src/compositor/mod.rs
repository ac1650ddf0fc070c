//! Region compositing.
//!
//! Redraws a rectangle of a live source track onto an off-screen canvas at
//! a fixed frame rate and exposes the canvas as a derived video track.

mod canvas;

pub use canvas::{Canvas, CONTENT_SAMPLE_SIZE, NOISE_FLOOR};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use livecast_ipc::CropRegion;

use crate::track::{wait_until_live, MediaTrack, TrackKind};

/// Compositor tunables.
#[derive(Debug, Clone)]
pub struct CompositorConfig {
    /// Redraw rate.
    pub fps: u32,

    /// How long to wait for the first non-black frame.
    pub first_content_timeout: Duration,

    /// Live checks on the derived track after it is exposed.
    pub live_retries: u32,

    /// Delay between live checks.
    pub live_interval: Duration,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            first_content_timeout: Duration::from_secs(5),
            live_retries: 10,
            live_interval: Duration::from_millis(500),
        }
    }
}

/// Draws a cropped view of a source track into a derived track.
pub struct RegionCompositor {
    requested: CropRegion,
    output: MediaTrack,
    canvas: Arc<Mutex<Canvas>>,
    effective: Arc<Mutex<Option<CropRegion>>>,
    first_content: watch::Receiver<bool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    config: CompositorConfig,
}

impl RegionCompositor {
    /// Start redrawing `region` of `source`.
    ///
    /// The redraw loop stops when `cancel` (or a parent of it) is cancelled.
    #[instrument(name = "compositor_start", skip_all, fields(source = %source.id()))]
    pub fn start(
        source: MediaTrack,
        region: CropRegion,
        config: CompositorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let output = MediaTrack::new(TrackKind::Video, format!("{}-cropped", source.label()));
        let canvas = Arc::new(Mutex::new(Canvas::new()));
        let effective = Arc::new(Mutex::new(None));
        let (content_tx, first_content) = watch::channel(false);

        let task = tokio::spawn(redraw_loop(RedrawContext {
            source,
            output: output.clone(),
            region,
            canvas: Arc::clone(&canvas),
            effective: Arc::clone(&effective),
            content_tx,
            fps: config.fps.max(1),
            cancel: cancel.clone(),
        }));

        info!(?region, fps = config.fps, "Compositor started");

        Self {
            requested: region,
            output,
            canvas,
            effective,
            first_content,
            cancel,
            task: Some(task),
            config,
        }
    }

    /// The derived track. Pending until the first non-black frame is drawn.
    pub fn output_track(&self) -> &MediaTrack {
        &self.output
    }

    pub fn requested_region(&self) -> CropRegion {
        self.requested
    }

    /// The rectangle as last clamped against the source frame.
    pub fn effective_region(&self) -> Option<CropRegion> {
        *self.effective.lock()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Wait until the derived track may be broadcast.
    ///
    /// Returns false if no frame with content was drawn in time or the
    /// derived track never became live; the caller falls back to the source.
    pub async fn wait_broadcastable(&self) -> bool {
        let mut content = self.first_content.clone();
        let drawn = matches!(
            tokio::time::timeout(
                self.config.first_content_timeout,
                content.wait_for(|drawn| *drawn),
            )
            .await,
            Ok(Ok(_))
        );

        if !drawn {
            warn!("No frame with content drawn before timeout");
            return false;
        }

        let live = wait_until_live(
            &self.output,
            self.config.live_retries,
            self.config.live_interval,
        )
        .await;

        if !live {
            warn!(track_id = %self.output.id(), "Composited track never became live");
        }
        live
    }

    /// Cancel the redraw loop and wait for it to exit.
    pub async fn stop_loop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Redraw loop panicked: {}", e);
                }
            }
        }
    }

    /// Clear the surface and end the derived track.
    ///
    /// Must follow [`RegionCompositor::stop_loop`].
    pub fn release(&mut self) {
        self.canvas.lock().clear();
        self.output.stop();
        debug!("Compositor released");
    }

    /// Stop the loop, clear the surface, end the derived track.
    #[instrument(name = "compositor_shutdown", skip(self))]
    pub async fn shutdown(&mut self) {
        self.stop_loop().await;
        self.release();
    }

    #[cfg(test)]
    fn canvas_cleared(&self) -> bool {
        self.canvas.lock().is_cleared()
    }
}

impl Drop for RegionCompositor {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct RedrawContext {
    source: MediaTrack,
    output: MediaTrack,
    region: CropRegion,
    canvas: Arc<Mutex<Canvas>>,
    effective: Arc<Mutex<Option<CropRegion>>>,
    content_tx: watch::Sender<bool>,
    fps: u32,
    cancel: CancellationToken,
}

async fn redraw_loop(ctx: RedrawContext) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / ctx.fps);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut exposed = false;
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if ctx.source.is_ended() {
            debug!("Source track ended, redraw loop exiting");
            break;
        }

        let Some(frame) = ctx.source.latest_frame() else {
            continue;
        };

        let clamped = ctx.region.clamped(frame.width, frame.height);
        {
            let mut effective = ctx.effective.lock();
            if *effective != Some(clamped) {
                debug!(
                    source_width = frame.width,
                    source_height = frame.height,
                    ?clamped,
                    "Crop clamped to source"
                );
                *effective = Some(clamped);
            }
        }

        let drawn = {
            let mut canvas = ctx.canvas.lock();
            canvas.draw_region(&frame, &clamped);
            if !exposed && !canvas.has_content() {
                None
            } else {
                Some(canvas.snapshot(frame.timestamp, sequence))
            }
        };

        let Some(drawn) = drawn else {
            continue;
        };

        if !exposed {
            exposed = true;
            ctx.content_tx.send_replace(true);
            info!(track_id = %ctx.output.id(), "First composited frame with content");
        }

        ctx.output.publish(drawn);
        sequence += 1;
    }

    debug!(frames = sequence, "Redraw loop stopped");
}
