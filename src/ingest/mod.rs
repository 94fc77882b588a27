//! Frame acquisition.
//!
//! Sources are pull-based: the session controller asks for one frame per
//! cycle. Every source either returns promptly with a frame, signals end of
//! stream with `Ok(None)`, or reports a capture error for that attempt.
//!
//! - `stub://<name>`: synthetic scene (tests, demos, dry runs)
//! - `v4l2:///dev/videoN` or `/dev/videoN`: local camera (feature: ingest-v4l2)
//! - any other local path: directory of still images replayed in name order

pub mod file;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::config::SourceSettings;
use crate::frame::Frame;

pub use file::{ImageDirConfig, ImageDirSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// Statistics common to all sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Pull source of timestamped frames.
pub trait FrameSource {
    /// Open the underlying device or file set.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Next frame, or `Ok(None)` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

/// Build the source named by `settings.url`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.is_empty() {
        return Err(anyhow!("source url must not be empty"));
    }
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig {
            name: url.to_string(),
            width: settings.width,
            height: settings.height,
            target_fps: settings.target_fps,
            max_frames: settings.max_frames,
            realtime: true,
            ..SyntheticConfig::default()
        })));
    }
    if let Some(device) = camera_device(url) {
        return open_camera(device, settings);
    }
    if url.contains("://") {
        return Err(anyhow!("unsupported source url scheme: {}", url));
    }
    Ok(Box::new(ImageDirSource::new(ImageDirConfig {
        dir: url.into(),
        target_fps: settings.target_fps,
    })?))
}

fn camera_device(url: &str) -> Option<&str> {
    if let Some(device) = url.strip_prefix("v4l2://") {
        return Some(device);
    }
    url.starts_with("/dev/video").then_some(url)
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera(device: &str, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(V4l2Config {
        device: device.to_string(),
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    })?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera(device: &str, _settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "camera {} requires the ingest-v4l2 feature",
        device
    ))
}
