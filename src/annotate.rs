//! Frame annotation: ROI outline, detection boxes, timestamp and rate overlay.
//!
//! Annotation is a pure transform. The input frame is never modified and the
//! same `(frame, detections, now, fps)` always yields the same pixels.

use ab_glyph::{FontRef, PxScale};
use chrono::{DateTime, TimeZone};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::fmt::Display;
use std::time::Duration;

use crate::detect::Detection;
use crate::geometry::Roi;

pub const ROI_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const DETECTION_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Shortest cycle used for rate computation (caps the reported rate at 1000).
pub const MIN_CYCLE: Duration = Duration::from_millis(1);

const OVERLAY_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");
const TEXT_SCALE: f32 = 20.0;
const LINE_THICKNESS: i32 = 2;
const TIME_ORIGIN: (i32, i32) = (10, 12);
const FPS_ORIGIN: (i32, i32) = (10, 36);

/// Instantaneous processing rate for one cycle: `1 / elapsed`.
///
/// Elapsed times below `MIN_CYCLE` are clamped, so the result is always finite.
pub fn instantaneous_fps(elapsed: Duration) -> f64 {
    1.0 / elapsed.max(MIN_CYCLE).as_secs_f64()
}

/// Burns the overlay into a copy of each outgoing frame.
#[derive(Clone, Debug)]
pub struct FrameAnnotator {
    roi: Roi,
    /// `None` if the bundled font failed to parse; boxes are still drawn.
    font: Option<FontRef<'static>>,
}

impl FrameAnnotator {
    pub fn new(roi: Roi) -> Self {
        let font = match FontRef::try_from_slice(OVERLAY_FONT) {
            Ok(font) => Some(font),
            Err(err) => {
                log::error!("FrameAnnotator: overlay font unusable, text disabled: {}", err);
                None
            }
        };
        Self { roi, font }
    }

    pub fn roi(&self) -> Roi {
        self.roi
    }

    pub fn annotate<Tz>(
        &self,
        frame: &RgbImage,
        detections: &[Detection],
        now: &DateTime<Tz>,
        fps: f64,
    ) -> RgbImage
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let mut out = frame.clone();
        draw_box(
            &mut out,
            self.roi.x,
            self.roi.y,
            self.roi.size,
            self.roi.size,
            ROI_COLOR,
        );
        for detection in detections {
            draw_box(
                &mut out,
                detection.x,
                detection.y,
                detection.w,
                detection.h,
                DETECTION_COLOR,
            );
        }

        if let Some(font) = &self.font {
            let time_line = format!("TIME: {}", now.format("%Y-%m-%d %H:%M:%S"));
            let fps = if fps.is_finite() { fps } else { 0.0 };
            let fps_line = format!("FPS: {:.2}", fps);
            let scale = PxScale::from(TEXT_SCALE);
            let (x, y) = TIME_ORIGIN;
            draw_text_mut(&mut out, TEXT_COLOR, x, y, scale, font, &time_line);
            let (x, y) = FPS_ORIGIN;
            draw_text_mut(&mut out, TEXT_COLOR, x, y, scale, font, &fps_line);
        }
        out
    }
}

/// Pixel edge clamped to just outside `[0, limit]`, so any finite box maps to
/// a small rectangle that imageproc clips.
fn clamp_edge(v: f32, limit: u32) -> i32 {
    let margin = LINE_THICKNESS as f32;
    v.round().clamp(-margin, limit as f32 + margin) as i32
}

/// Outline `LINE_THICKNESS` pixels wide, drawn inward. Degenerate boxes draw nothing.
fn draw_box(image: &mut RgbImage, x: f32, y: f32, w: f32, h: f32, color: Rgb<u8>) {
    if !(w > 0.0 && h > 0.0) || !x.is_finite() || !y.is_finite() {
        return;
    }
    let (width, height) = image.dimensions();
    let left = clamp_edge(x, width);
    let top = clamp_edge(y, height);
    let right = clamp_edge(x + w, width);
    let bottom = clamp_edge(y + h, height);
    for inset in 0..LINE_THICKNESS {
        let box_w = right - left - 2 * inset;
        let box_h = bottom - top - 2 * inset;
        if box_w <= 0 || box_h <= 0 {
            break;
        }
        let rect = Rect::at(left + inset, top + inset).of_size(box_w as u32, box_h as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}
