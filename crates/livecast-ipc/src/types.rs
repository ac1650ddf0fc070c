//! Common types used across engine messages.

use serde::{Deserialize, Serialize};

/// Rectangle of the source video to broadcast, in source pixel coordinates.
///
/// A requested region may lie partly (or wholly) outside the source; use
/// [`CropRegion::clamped`] to obtain the rectangle that is actually drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    /// Left edge in source pixels.
    pub x: i32,

    /// Top edge in source pixels.
    pub y: i32,

    /// Width in pixels.
    pub width: i32,

    /// Height in pixels.
    pub height: i32,

    /// Whether cropping is enabled at all.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl CropRegion {
    /// Create an enabled crop region.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            enabled: true,
        }
    }

    /// A region covering the whole source.
    pub fn full_frame(source_width: u32, source_height: u32) -> Self {
        Self::new(0, 0, to_i32(source_width), to_i32(source_height))
    }

    /// Clamp the region to a source of the given dimensions.
    ///
    /// The result always satisfies `0 <= x`, `0 <= y`,
    /// `x + width <= source_width` and `y + height <= source_height`.
    /// A non-empty source always yields at least a 1x1 rectangle; an empty
    /// source yields an empty rectangle at the origin.
    pub fn clamped(&self, source_width: u32, source_height: u32) -> Self {
        let (x, width) = clamp_axis(self.x, self.width, to_i32(source_width));
        let (y, height) = clamp_axis(self.y, self.height, to_i32(source_height));

        Self {
            x,
            y,
            width,
            height,
            enabled: self.enabled,
        }
    }

    /// Check whether the region lies within a source of the given size.
    pub fn fits_within(&self, source_width: u32, source_height: u32) -> bool {
        let w = i64::from(source_width);
        let h = i64::from(source_height);
        self.x >= 0
            && self.y >= 0
            && self.width >= 0
            && self.height >= 0
            && i64::from(self.x) + i64::from(self.width) <= w
            && i64::from(self.y) + i64::from(self.height) <= h
    }

    /// Returns true if the region covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Clamp one axis of a rectangle to `[0, limit)`.
fn clamp_axis(origin: i32, extent: i32, limit: i32) -> (i32, i32) {
    if limit <= 0 {
        return (0, 0);
    }

    let start = origin.clamp(0, limit - 1);
    let end = origin
        .saturating_add(extent.max(0))
        .clamp(start + 1, limit);

    (start, end - start)
}

/// Category of an engine error.
///
/// The category decides the remediation offered to the user, so each one
/// maps to a distinct message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// The user or platform refused capture.
    PermissionDenied,

    /// Capture failed for a reason other than permission.
    DeviceError,

    /// A track stopped producing frames.
    TrackMuted,

    /// A track never reached the live state.
    TrackNotLive,

    /// Offer/answer/candidate exchange failed.
    NegotiationFailed,

    /// A viewer's transport failed.
    ConnectionFailed,

    /// Capture was revoked externally.
    CaptureEnded,

    /// A request arrived in a phase that cannot serve it.
    InvalidState,
}

impl ErrorCategory {
    /// Returns the user-facing remediation for this category.
    pub fn remediation(self) -> &'static str {
        match self {
            Self::PermissionDenied => "Allow screen capture in the browser or system settings and try again.",
            Self::DeviceError => "Check that the capture device is available and try again.",
            Self::TrackMuted => "Restart screen share and keep this tab focused while broadcasting.",
            Self::TrackNotLive => "The captured video never started. Restart screen share.",
            Self::NegotiationFailed => "The viewer could not negotiate a connection and may retry joining.",
            Self::ConnectionFailed => "The connection to the viewer was lost.",
            Self::CaptureEnded => "Screen sharing was stopped. Start a new capture to continue.",
            Self::InvalidState => "This action is not available right now.",
        }
    }
}
