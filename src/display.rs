//! Display sinks for annotated frames.
//!
//! Every processed frame is offered to the display regardless of recording
//! state. Displays must not stall the pipeline; slow consumers drop frames.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

pub trait DisplaySink {
    fn show(&mut self, frame: &RgbImage) -> Result<()>;
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn show(&mut self, _frame: &RgbImage) -> Result<()> {
        Ok(())
    }
}

/// Periodically writes the latest frame to a JPEG file for external viewers.
pub struct SnapshotDisplay {
    path: PathBuf,
    every: u64,
    quality: u8,
    seen: u64,
}

impl SnapshotDisplay {
    pub fn new(path: impl Into<PathBuf>, every: u64, quality: u8) -> Self {
        Self {
            path: path.into(),
            every: every.max(1),
            quality: quality.clamp(1, 100),
            seen: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DisplaySink for SnapshotDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        self.seen += 1;
        if (self.seen - 1) % self.every != 0 {
            return Ok(());
        }
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality)
            .encode_image(frame)
            .context("encode preview snapshot")?;
        write_atomic(&self.path, &encoded)
            .with_context(|| format!("write preview snapshot {}", self.path.display()))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

/// Hands frames to another thread (e.g. a UI) over a bounded queue.
///
/// Only the finished, immutable frame crosses the thread boundary.
pub struct ChannelDisplay {
    tx: SyncSender<Arc<RgbImage>>,
    dropped: u64,
}

impl ChannelDisplay {
    pub fn new(capacity: usize) -> (Self, Receiver<Arc<RgbImage>>) {
        let (tx, rx) = sync_channel(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

    /// Frames discarded because the consumer was behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl DisplaySink for ChannelDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        match self.tx.try_send(Arc::new(frame.clone())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                log::debug!("ChannelDisplay: consumer behind, dropped frame");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("display consumer disconnected")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn snapshot_display_writes_every_nth_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("preview/latest.jpg");
        let mut display = SnapshotDisplay::new(&path, 3, 80);

        display.show(&RgbImage::from_pixel(8, 8, Rgb([255, 0, 0])))?;
        assert!(path.is_file());
        let first = fs::read(&path)?;

        display.show(&RgbImage::from_pixel(8, 8, Rgb([0, 0, 255])))?;
        display.show(&RgbImage::from_pixel(8, 8, Rgb([0, 0, 255])))?;
        assert_eq!(fs::read(&path)?, first);

        display.show(&RgbImage::from_pixel(8, 8, Rgb([0, 0, 255])))?;
        assert_ne!(fs::read(&path)?, first);
        assert!(!path.with_extension("tmp").exists());
        Ok(())
    }

    #[test]
    fn channel_display_drops_when_consumer_is_behind() -> Result<()> {
        let (mut display, rx) = ChannelDisplay::new(1);
        display.show(&RgbImage::new(2, 2))?;
        display.show(&RgbImage::new(2, 2))?;
        assert_eq!(display.dropped(), 1);
        assert!(rx.try_recv().is_ok());

        drop(rx);
        assert!(display.show(&RgbImage::new(2, 2)).is_err());
        Ok(())
    }
}
