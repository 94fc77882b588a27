//! Frames flowing through the recorder.
//!
//! A `Frame` is owned by the session controller for exactly one processing
//! cycle. Sinks only ever see borrowed (annotated) pixel buffers.

use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Pixel dimensions of a frame stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

impl FrameDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// One captured frame plus its capture timestamps.
pub struct Frame {
    image: RgbImage,
    /// Monotonic capture time; drives every duration and grace check.
    pub captured_at: Instant,
    /// Wall-clock capture time; used for annotations and session names.
    pub wall_clock: DateTime<Local>,
    /// Per-source sequence number, starting at 1.
    pub sequence: u64,
}

impl Frame {
    pub fn new(
        image: RgbImage,
        captured_at: Instant,
        wall_clock: DateTime<Local>,
        sequence: u64,
    ) -> Self {
        Self {
            image,
            captured_at,
            wall_clock,
            sequence,
        }
    }

    /// Frame stamped with the current instant and wall-clock time.
    pub fn captured_now(image: RgbImage, sequence: u64) -> Self {
        Self::new(image, Instant::now(), Local::now(), sequence)
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn dimensions(&self) -> FrameDimensions {
        let (width, height) = self.image.dimensions();
        FrameDimensions { width, height }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("dimensions", &self.dimensions())
            .field("sequence", &self.sequence)
            .field("wall_clock", &self.wall_clock)
            .finish()
    }
}
