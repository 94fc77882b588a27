//! Synthetic frame source (`stub://`).
//!
//! Renders a dark scene with one bright square "subject" that walks across
//! the frame from left to right, then leaves the scene empty for the rest of
//! the cycle. With the default geometry the subject passes through the
//! default ROI, so a full cycle exercises start, continue and grace-period
//! stop paths.
//!
//! `realtime` paces frames at `target_fps` against the wall clock. Without it
//! frames are produced immediately and stamped on a virtual clock advancing
//! exactly `1 / target_fps` per frame.

use anyhow::Result;
use chrono::{DateTime, Local};
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const BACKGROUND: Rgb<u8> = Rgb([20, 20, 20]);
const SUBJECT: Rgb<u8> = Rgb([235, 235, 235]);

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// End of stream after this many frames (`None` = endless).
    pub max_frames: Option<u64>,
    pub realtime: bool,
    /// Frames per scene cycle (walk + empty stretch).
    pub cycle_frames: u64,
    /// Fraction of each cycle during which the subject is on screen.
    pub visible_fraction: f32,
    /// Side of the subject square in pixels.
    pub subject_size: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://synthetic".to_string(),
            width: 640,
            height: 480,
            target_fps: 10,
            max_frames: None,
            realtime: false,
            cycle_frames: 600,
            visible_fraction: 0.5,
            subject_size: 48,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    started: Option<(Instant, DateTime<Local>)>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            started: None,
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.target_fps.max(1) as f64)
    }

    /// Top-left corner of the subject for a given frame, if visible.
    pub fn subject_position(&self, frame_index: u64) -> Option<(i64, i64)> {
        let cycle = self.config.cycle_frames.max(1);
        let visible = ((cycle as f32 * self.config.visible_fraction).round() as u64).clamp(1, cycle);
        let phase = frame_index % cycle;
        if phase >= visible {
            return None;
        }
        let side = self.config.subject_size as i64;
        let travel = self.config.width as i64 + side;
        let x = -side + travel * phase as i64 / visible as i64;
        let y = (self.config.height as i64 - side) / 2;
        Some((x, y))
    }

    fn render(&self, frame_index: u64) -> RgbImage {
        let mut image = RgbImage::from_pixel(self.config.width, self.config.height, BACKGROUND);
        if let Some((x0, y0)) = self.subject_position(frame_index) {
            let side = self.config.subject_size as i64;
            for y in y0.max(0)..(y0 + side).min(self.config.height as i64) {
                for x in x0.max(0)..(x0 + side).min(self.config.width as i64) {
                    image.put_pixel(x as u32, y as u32, SUBJECT);
                }
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.started = Some((Instant::now(), Local::now()));
        log::info!(
            "SyntheticSource: connected to {} ({}x{} @ {} fps, {})",
            self.config.name,
            self.config.width,
            self.config.height,
            self.config.target_fps,
            if self.config.realtime {
                "realtime"
            } else {
                "virtual clock"
            }
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Ok(None);
        }
        let (base_instant, base_wall) = *self
            .started
            .get_or_insert_with(|| (Instant::now(), Local::now()));

        let index = self.frame_count;
        let offset = self.frame_interval().mul_f64(index as f64);
        let image = self.render(index);
        self.frame_count += 1;

        if self.config.realtime {
            let deadline = base_instant + offset;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            return Ok(Some(Frame::captured_now(image, self.frame_count)));
        }

        let wall_offset = chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(Some(Frame::new(
            image,
            base_instant + offset,
            base_wall + wall_offset,
            self.frame_count,
        )))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyntheticConfig {
        SyntheticConfig {
            target_fps: 10,
            max_frames: Some(20),
            cycle_frames: 10,
            visible_fraction: 0.5,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn synthetic_source_produces_frames_until_limit() -> Result<()> {
        let mut source = SyntheticSource::new(config());
        source.connect()?;
        let mut frames = 0;
        while let Some(frame) = source.next_frame()? {
            frames += 1;
            assert_eq!(frame.dimensions().width, 640);
            assert_eq!(frame.sequence, frames);
        }
        assert_eq!(frames, 20);
        assert_eq!(source.stats().frames_captured, 20);
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn virtual_clock_advances_one_interval_per_frame() -> Result<()> {
        let mut source = SyntheticSource::new(config());
        source.connect()?;
        let first = source.next_frame()?.expect("frame");
        let second = source.next_frame()?.expect("frame");
        assert_eq!(
            second.captured_at - first.captured_at,
            Duration::from_millis(100)
        );
        assert_eq!(
            (second.wall_clock - first.wall_clock).num_milliseconds(),
            100
        );
        Ok(())
    }

    #[test]
    fn subject_walks_then_leaves_scene() {
        let source = SyntheticSource::new(config());
        assert_eq!(source.subject_position(0), Some((-48, 216)));
        let (x_mid, _) = source.subject_position(3).expect("visible");
        assert!(x_mid > 0);
        assert_eq!(source.subject_position(5), None);
        assert_eq!(source.subject_position(9), None);
        assert_eq!(source.subject_position(10), Some((-48, 216)));
    }
}
