//! Region-of-interest containment.
//!
//! All coordinates are pixel-space, axis-aligned, origin at the top-left corner.

use serde::{Deserialize, Serialize};

use crate::detect::Detection;

/// Fixed square region of interest, defined at startup and never mutated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

impl Roi {
    pub fn new(x: f32, y: f32, size: f32) -> Self {
        Self { x, y, size }
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn right(&self) -> f32 {
        self.x + self.size
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.size
    }
}

impl Default for Roi {
    fn default() -> Self {
        Self::new(200.0, 150.0, 200.0)
    }
}

/// True iff the detection lies entirely inside the ROI. Touching edges count.
///
/// Negative-size (or NaN) boxes are never contained.
pub fn contains(detection: &Detection, roi: &Roi) -> bool {
    if !(detection.w >= 0.0 && detection.h >= 0.0) {
        return false;
    }
    detection.left() >= roi.left()
        && detection.top() >= roi.top()
        && detection.right() <= roi.right()
        && detection.bottom() <= roi.bottom()
}
