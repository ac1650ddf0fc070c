//! Off-screen RGBA drawing surface.

use bytes::Bytes;

use livecast_ipc::CropRegion;

use crate::frame::{CaptureTimestamp, VideoFrame, BYTES_PER_PIXEL};

/// Channel values at or below this are treated as sensor/encoder noise.
pub const NOISE_FLOOR: u8 = 10;

/// Edge length of the corner sampled for content detection.
pub const CONTENT_SAMPLE_SIZE: u32 = 10;

/// Off-screen surface the crop is drawn onto.
#[derive(Debug, Default)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resize the surface, discarding its contents when the size changes.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        self.pixels = vec![0; VideoFrame::rgba_buffer_size(width, height)];
    }

    /// Drop the surface contents and its backing memory.
    pub fn clear(&mut self) {
        self.width = 0;
        self.height = 0;
        self.pixels = Vec::new();
    }

    pub fn is_cleared(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Copy `region` of `frame` onto the surface, resizing it to the region.
    ///
    /// `region` must already be clamped to the frame.
    pub fn draw_region(&mut self, frame: &VideoFrame, region: &CropRegion) {
        let width = region.width.max(0) as u32;
        let height = region.height.max(0) as u32;
        self.resize(width, height);

        if !frame.is_valid() || width == 0 || height == 0 {
            return;
        }

        let src_stride = frame.width as usize * BYTES_PER_PIXEL;
        let dst_stride = width as usize * BYTES_PER_PIXEL;
        let x_offset = region.x.max(0) as usize * BYTES_PER_PIXEL;

        for row in 0..height as usize {
            let src_row = region.y.max(0) as usize + row;
            let src_start = src_row * src_stride + x_offset;
            let dst_start = row * dst_stride;

            let (Some(src), Some(dst)) = (
                frame.data.get(src_start..src_start + dst_stride),
                self.pixels.get_mut(dst_start..dst_start + dst_stride),
            ) else {
                break;
            };
            dst.copy_from_slice(src);
        }
    }

    /// Check a small top-left corner for any color channel above the noise floor.
    pub fn has_content(&self) -> bool {
        let sample_w = self.width.min(CONTENT_SAMPLE_SIZE) as usize;
        let sample_h = self.height.min(CONTENT_SAMPLE_SIZE) as usize;
        let stride = self.width as usize * BYTES_PER_PIXEL;

        (0..sample_h).any(|row| {
            let start = row * stride;
            self.pixels[start..start + sample_w * BYTES_PER_PIXEL]
                .chunks_exact(BYTES_PER_PIXEL)
                .any(|px| px[..3].iter().any(|&c| c > NOISE_FLOOR))
        })
    }

    /// Copy the surface into a frame.
    pub fn snapshot(&self, timestamp: CaptureTimestamp, sequence: u64) -> VideoFrame {
        VideoFrame::new(
            Bytes::copy_from_slice(&self.pixels),
            self.width,
            self.height,
            timestamp,
            sequence,
        )
    }
}
